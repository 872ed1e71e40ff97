//! The capability interface provider plugins implement.
//!
//! Every provider can fetch a single work's chapter list. Some can also
//! report every changed work in one call; they expose that through
//! [`Provider::bulk()`].

use async_trait::async_trait;
use derive_more::{Display, Error};
use scanwatch_catalog::Chapter;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A provider error with automatic location tracking.
pub type ProviderError = exn::Exn<ProviderErrorKind>;
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum ProviderErrorKind {
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    #[display("request timed out")]
    Timeout,
    /// The provider answered, but not with anything we could use.
    #[display("could not parse provider response: {_0}")]
    Parse(#[error(not(source))] String),
    /// The provider explicitly refused a bulk update.
    #[display("operation not supported by provider")]
    NotSupported,
}

impl ProviderErrorKind {
    /// Transient errors may go away by themselves; retry them.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }
}

/// A work's chapters as the provider currently lists them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChapterListing {
    pub chapters: Vec<Chapter>,
    /// Expected total, if the provider announces one.
    pub total: Option<u32>,
}
impl ChapterListing {
    pub fn new(chapters: impl IntoIterator<Item = Chapter>) -> Self {
        Self { chapters: chapters.into_iter().collect(), total: None }
    }

    pub fn with_total(mut self, total: u32) -> Self {
        self.total = Some(total);
        self
    }
}

/// One changed work reported by a bulk update.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkChange {
    /// Provider-relative locator; matched against [`Work::locator`](scanwatch_catalog::Work).
    pub work_ref: String,
    /// Used to match the work when the locator doesn't.
    pub title: String,
    pub listing: ChapterListing,
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Name scans use to refer to this provider.
    fn name(&self) -> &str;

    /// Fetch the current chapter list of one work.
    async fn fetch_chapters(&self, work_ref: &str) -> ProviderResult<ChapterListing>;

    /// The bulk-update capability, if this provider has one.
    fn bulk(&self) -> Option<&dyn BulkUpdate> {
        None
    }
}

#[async_trait]
pub trait BulkUpdate: Send + Sync {
    /// Every work that changed recently, in one request.
    ///
    /// Fails with [`NotSupported`](ProviderErrorKind::NotSupported) if the
    /// provider turns out not to offer this after all.
    async fn bulk_update(&self) -> ProviderResult<Vec<BulkChange>>;
}

/// Registered providers, by name.
#[derive(Default, Clone)]
pub struct Providers {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}
impl Providers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name, replacing any previous one.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> &mut Self {
        self.providers.insert(provider.name().to_string(), provider);
        self
    }

    pub fn with(mut self, provider: Arc<dyn Provider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    struct Plain;

    #[async_trait]
    impl Provider for Plain {
        fn name(&self) -> &str {
            "plain"
        }

        async fn fetch_chapters(&self, _work_ref: &str) -> ProviderResult<ChapterListing> {
            Ok(ChapterListing::new([Chapter::new("1")]))
        }
    }

    #[rstest]
    #[case(ProviderErrorKind::Network("reset".to_string()), true)]
    #[case(ProviderErrorKind::Timeout, true)]
    #[case(ProviderErrorKind::Parse("bad html".to_string()), false)]
    #[case(ProviderErrorKind::NotSupported, false)]
    fn test_is_transient(#[case] kind: ProviderErrorKind, #[case] transient: bool) {
        assert_eq!(kind.is_transient(), transient);
    }

    #[test]
    fn test_bulk_defaults_to_none() {
        assert!(Plain.bulk().is_none());
    }

    #[test]
    fn test_registry_by_name() {
        let providers = Providers::new().with(Arc::new(Plain));
        assert!(providers.get("plain").is_some());
        assert!(providers.get("other").is_none());
        assert_eq!(providers.names().collect::<Vec<_>>(), vec!["plain"]);
    }
}
