use std::sync::Arc;

use dashmap::DashMap;

/// Maps request URLs to the last `ETag` the server returned for them.
///
/// Keys are the full, already-parameterized URL. Writes are
/// last-write-wins per URL.
pub trait EtagStore: Send + Sync {
    fn get(&self, url: &str) -> Option<String>;

    fn set(&self, url: &str, etag: String);
}

/// An in-memory [`EtagStore`]. Clones share the same table.
///
/// Applications usually keep one for the lifetime of the process; tests
/// create one per case.
#[derive(Debug, Clone, Default)]
pub struct MemoryEtagStore {
    entries: Arc<DashMap<String, String>>,
}

impl MemoryEtagStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl EtagStore for MemoryEtagStore {
    fn get(&self, url: &str) -> Option<String> {
        self.entries.get(url).map(|entry| entry.value().clone())
    }

    fn set(&self, url: &str, etag: String) {
        self.entries.insert(url.to_string(), etag);
    }
}
