//! The cache store contract.
//!
//! Adapters never touch a concrete cache. They address entries by
//! [`CacheKey`], observe changes through [`CacheEvent`]s, and register their
//! in-flight fetches so that optimistic mutations can cancel them. The
//! default implementation is [`QueryClient`](super::QueryClient).

use std::any::Any;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

use super::cache::CacheEntry;
use super::config::QueryConfig;
use super::key::CacheKey;

/// A type-erased cached value.
pub type CacheValue = Arc<dyn Any + Send + Sync>;

/// A change observed by live queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// The entry at this exact key was written or removed outside a fetch.
    Updated(CacheKey),
    /// Every entry matching this prefix must be refetched.
    Invalidated(CacheKey),
    /// The paginated query at this key should load its next page.
    FetchNextPage(CacheKey),
}

impl CacheEvent {
    pub const fn key(&self) -> &CacheKey {
        match self {
            Self::Updated(key) | Self::Invalidated(key) | Self::FetchNextPage(key) => key,
        }
    }
}

/// A registered in-flight fetch.
///
/// Obtained from [`CacheStore::begin_fetch`] and settled with exactly one of
/// [`CacheStore::commit_fetch`] or [`CacheStore::abandon_fetch`].
#[derive(Debug, Clone)]
pub struct FetchHandle {
    pub(crate) key: CacheKey,
    pub(crate) id: u64,
    pub(crate) token: CancellationToken,
}

impl FetchHandle {
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The token to hand to the HTTP call.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A keyed, observable cache shared by queries and mutations.
pub trait CacheStore: Send + Sync {
    fn entry(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// Writes (or with `None` removes) the entry at `key` and emits
    /// [`CacheEvent::Updated`].
    fn write(&self, key: &CacheKey, value: Option<CacheValue>);

    /// Every cached entry whose key starts with `prefix`.
    fn find_all_matching(&self, prefix: &CacheKey) -> Vec<(CacheKey, CacheEntry)>;

    /// Marks every entry matching `prefix` stale and emits
    /// [`CacheEvent::Invalidated`], even when nothing is cached. Returns the
    /// number of entries marked.
    fn invalidate(&self, prefix: &CacheKey) -> usize;

    /// Registers a fetch of `key`, cancelling any earlier one for the same key.
    fn begin_fetch(&self, key: &CacheKey) -> FetchHandle;

    /// Stores the result of a fetch unless it was cancelled. The check and
    /// the write are atomic with respect to [`CacheStore::cancel_pending`].
    /// Returns `true` if the value was stored.
    fn commit_fetch(&self, handle: &FetchHandle, value: Option<CacheValue>) -> bool;

    /// Deregisters a fetch without writing.
    fn abandon_fetch(&self, handle: &FetchHandle);

    /// Cancels every in-flight fetch whose key starts with `prefix`.
    fn cancel_pending(&self, prefix: &CacheKey) -> usize;

    /// Asks the paginated query at `key` to load its next page.
    fn request_next_page(&self, key: &CacheKey);

    fn subscribe(&self) -> broadcast::Receiver<CacheEvent>;

    /// The lock serializing optimistic mutations on this store.
    fn optimistic_gate(&self) -> Arc<Mutex<()>>;

    fn config(&self) -> &QueryConfig;
}

/// Typed helpers over [`CacheStore`].
pub trait CacheStoreExt: CacheStore {
    /// Returns a copy of the value at `key` if it holds a `T`.
    fn get<T: Clone + 'static>(&self, key: &CacheKey) -> Option<T> {
        self.entry(key).and_then(|entry| entry.downcast::<T>())
    }

    fn set<T: Send + Sync + 'static>(&self, key: &CacheKey, value: T) {
        self.write(key, Some(Arc::new(value)));
    }

    /// Replaces the `T` at `key` with `f(current)`. Returns `false`, leaving
    /// the entry untouched, when there is no `T` at `key`.
    fn update<T, F>(&self, key: &CacheKey, f: F) -> bool
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> T,
    {
        match self.get::<T>(key) {
            Some(current) => {
                self.set(key, f(current));
                true
            }
            None => false,
        }
    }

    fn remove(&self, key: &CacheKey) {
        self.write(key, None);
    }
}

impl<S: CacheStore + ?Sized> CacheStoreExt for S {}
