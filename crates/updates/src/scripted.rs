//! Scripted provider for testing.

use crate::provider::{BulkChange, BulkUpdate, ChapterListing, Provider, ProviderErrorKind, ProviderResult};
use async_trait::async_trait;
use scanwatch_catalog::Chapter;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

type Scripted<T> = Result<T, ProviderErrorKind>;

/// Pops scripted responses in order; the last one repeats forever.
struct Script<T: Clone> {
    queue: Mutex<VecDeque<Scripted<T>>>,
}
impl<T: Clone> Script<T> {
    fn new() -> Self {
        Self { queue: Mutex::new(VecDeque::new()) }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Scripted<T>>> {
        // A panicking test thread shouldn't take every other test down with it.
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next(&self) -> Option<Scripted<T>> {
        let mut queue = self.lock();
        match queue.len() {
            0 => None,
            1 => queue.front().cloned(),
            _ => queue.pop_front(),
        }
    }
}

/// In-memory provider whose answers are scripted per work locator.
///
/// Every call is counted, so tests can assert exactly how many requests an
/// update check issued.
///
/// # Examples
///
/// ```
/// use scanwatch_updates::{Provider, ScriptedProvider};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let provider = ScriptedProvider::new("mangadex").with_chapters("/manga/1", &["1", "2"]);
/// let listing = provider.fetch_chapters("/manga/1").await.unwrap();
/// assert_eq!(listing.chapters.len(), 2);
/// assert_eq!(provider.fetch_calls(), 1);
/// # }
/// ```
pub struct ScriptedProvider {
    name: String,
    works: Mutex<HashMap<String, Script<ChapterListing>>>,
    bulk: Option<ScriptedBulk>,
    fetch_calls: AtomicUsize,
}

struct ScriptedBulk {
    script: Script<Vec<BulkChange>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    /// A provider without the bulk capability.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            works: Mutex::new(HashMap::new()),
            bulk: None,
            fetch_calls: AtomicUsize::new(0),
        }
    }

    /// Give the provider the bulk capability, answering with `changes`.
    pub fn with_bulk(mut self, changes: Vec<BulkChange>) -> Self {
        let bulk = ScriptedBulk { script: Script::new(), calls: AtomicUsize::new(0) };
        bulk.script.lock().push_back(Ok(changes));
        self.bulk = Some(bulk);
        self
    }

    /// Give the provider the bulk capability, failing every call with `error`.
    pub fn with_bulk_error(mut self, error: ProviderErrorKind) -> Self {
        let bulk = ScriptedBulk { script: Script::new(), calls: AtomicUsize::new(0) };
        bulk.script.lock().push_back(Err(error));
        self.bulk = Some(bulk);
        self
    }

    pub fn with_chapters(self, work_ref: &str, ids: &[&str]) -> Self {
        self.set_chapters(work_ref, ids);
        self
    }

    /// Replace whatever was scripted for a work with a fixed chapter list.
    pub fn set_chapters(&self, work_ref: &str, ids: &[&str]) {
        self.set(work_ref, Ok(ChapterListing::new(ids.iter().map(|id| Chapter::new(*id)))));
    }

    /// Make every fetch of a work fail.
    pub fn fail(&self, work_ref: &str, error: ProviderErrorKind) {
        self.set(work_ref, Err(error));
    }

    /// Queue a response for a work after those already queued.
    pub fn push_response(&self, work_ref: &str, response: Result<ChapterListing, ProviderErrorKind>) {
        let mut works = self.works.lock().unwrap_or_else(PoisonError::into_inner);
        works.entry(work_ref.to_string()).or_insert_with(Script::new).lock().push_back(response);
    }

    /// Queue a bulk response. Does nothing for a provider without the bulk
    /// capability.
    pub fn push_bulk_response(&self, response: Result<Vec<BulkChange>, ProviderErrorKind>) {
        if let Some(bulk) = &self.bulk {
            let mut queue = bulk.script.lock();
            // Drop the repeating tail so the new response is next.
            if queue.len() == 1 {
                queue.clear();
            }
            queue.push_back(response);
        }
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn bulk_calls(&self) -> usize {
        self.bulk.as_ref().map_or(0, |b| b.calls.load(Ordering::SeqCst))
    }

    fn set(&self, work_ref: &str, response: Scripted<ChapterListing>) {
        let script = Script::new();
        script.lock().push_back(response);
        self.works.lock().unwrap_or_else(PoisonError::into_inner).insert(work_ref.to_string(), script);
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_chapters(&self, work_ref: &str) -> ProviderResult<ChapterListing> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let response = {
            let works = self.works.lock().unwrap_or_else(PoisonError::into_inner);
            works.get(work_ref).and_then(|script| script.next())
        };
        match response {
            Some(Ok(listing)) => Ok(listing),
            Some(Err(kind)) => Err(kind.into()),
            None => Err(ProviderErrorKind::Parse(format!("no such work: {work_ref}")).into()),
        }
    }

    fn bulk(&self) -> Option<&dyn BulkUpdate> {
        self.bulk.as_ref().map(|b| b as &dyn BulkUpdate)
    }
}

#[async_trait]
impl BulkUpdate for ScriptedBulk {
    async fn bulk_update(&self) -> ProviderResult<Vec<BulkChange>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.next() {
            Some(Ok(changes)) => Ok(changes),
            Some(Err(kind)) => Err(kind.into()),
            None => Ok(Vec::new()),
        }
    }
}
