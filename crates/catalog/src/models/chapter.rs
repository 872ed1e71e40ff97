use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::hash::{Hash, Hasher};
use time::OffsetDateTime;

/// A single installment of a work.
///
/// Identity is the chapter id alone (`"125"`, `"45.5"`); the title and date
/// are informational and two chapters with the same id are the same chapter
/// even if a provider renamed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub published: Option<OffsetDateTime>,
}
impl Chapter {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), title: None, published: None }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_published(mut self, published: OffsetDateTime) -> Self {
        self.published = Some(published);
        self
    }
}
impl PartialEq for Chapter {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Chapter {}
impl Hash for Chapter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Content-derived signature of a chapter list.
///
/// BLAKE3 of the chapter ids, sorted and newline-joined, so the fingerprint
/// only changes when the *set* of chapters changes (not their order, and not
/// their titles).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);
impl Fingerprint {
    pub fn of<'a>(chapters: impl IntoIterator<Item = &'a Chapter>) -> Self {
        let mut ids: Vec<&str> = chapters.into_iter().map(|c| c.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        Self(blake3::hash(ids.join("\n").as_bytes()).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl From<String> for Fingerprint {
    fn from(hex: String) -> Self {
        Self(hex)
    }
}
impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapters(ids: &[&str]) -> Vec<Chapter> {
        ids.iter().map(|id| Chapter::new(*id)).collect()
    }

    #[test]
    fn test_identity_is_by_id() {
        assert_eq!(Chapter::new("12").with_title("Old name"), Chapter::new("12").with_title("New name"));
        assert_ne!(Chapter::new("12"), Chapter::new("12.5"));
    }

    #[test]
    fn test_fingerprint_ignores_order() {
        assert_eq!(Fingerprint::of(&chapters(&["1", "2", "3"])), Fingerprint::of(&chapters(&["3", "1", "2"])));
    }

    #[test]
    fn test_fingerprint_changes_with_new_chapter() {
        assert_ne!(Fingerprint::of(&chapters(&["1", "2"])), Fingerprint::of(&chapters(&["1", "2", "3"])));
        // Joining on newlines keeps ["1", "23"] and ["12", "3"] apart.
        assert_ne!(Fingerprint::of(&chapters(&["1", "23"])), Fingerprint::of(&chapters(&["12", "3"])));
    }

    #[test]
    fn test_fingerprint_is_hex() {
        let fingerprint = Fingerprint::of(&chapters(&["1"]));
        assert_eq!(fingerprint.as_str().len(), 64);
        assert!(fingerprint.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
