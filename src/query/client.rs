use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::command::Command;

use super::cache::CacheEntry;
use super::config::QueryConfig;
use super::key::CacheKey;
use super::store::{CacheEvent, CacheStore, CacheValue, FetchHandle};

const EVENT_CAPACITY: usize = 100;

#[derive(Debug)]
struct PendingFetch {
    id: u64,
    token: CancellationToken,
}

/// The in-process cache store.
///
/// The `QueryClient` is the central state manager for queries. It handles:
/// - caching query results under their [`CacheKey`]
/// - broadcasting updates and invalidations to live queries
/// - tracking in-flight fetches so they can be cancelled
///
/// Clones share the same cache.
///
/// # Example
///
/// ```rust
/// use sprig::query::{QueryClient, QueryConfig};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let config = QueryConfig::new(
///     Duration::from_secs(30),  // stale_time
///     Duration::from_secs(300), // cache_time
/// );
///
/// let client = Arc::new(QueryClient::with_config(config));
/// ```
#[derive(Debug, Clone)]
pub struct QueryClient {
    cache: Arc<DashMap<CacheKey, CacheEntry>>,
    pending: Arc<DashMap<CacheKey, PendingFetch>>,
    events: broadcast::Sender<CacheEvent>,
    optimistic_gate: Arc<Mutex<()>>,
    next_fetch_id: Arc<AtomicU64>,
    config: QueryConfig,
}

impl QueryClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(QueryConfig::default())
    }

    #[must_use]
    pub fn with_config(config: QueryConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            cache: Arc::new(DashMap::new()),
            pending: Arc::new(DashMap::new()),
            events,
            optimistic_gate: Arc::new(Mutex::new(())),
            next_fetch_id: Arc::new(AtomicU64::new(0)),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Number of fetches currently in flight.
    pub fn pending_fetches(&self) -> usize {
        self.pending.len()
    }

    /// Drops entries older than `cache_time` that no fetch is writing to.
    /// Returns the number of entries dropped.
    pub fn gc(&self) -> usize {
        let before = self.cache.len();
        let cache_time = self.config.cache_time;
        // `commit_fetch` writes the cache while holding a `pending` shard, so
        // no `pending` lock may be taken while `retain` holds a cache shard.
        let pending: HashSet<CacheKey> =
            self.pending.iter().map(|entry| entry.key().clone()).collect();

        self.cache
            .retain(|key, entry| !entry.should_gc(cache_time) || pending.contains(key));

        let dropped = before.saturating_sub(self.cache.len());
        if dropped > 0 {
            debug!(dropped, "collected cache entries");
        }
        dropped
    }

    /// Invalidates `prefix` as a side effect of an `update` function.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// fn update(&mut self, msg: Message) -> Command<Message> {
    ///     match msg {
    ///         Message::PlantRenamed => self.query_client.invalidate_command("/api/plants"),
    ///     }
    /// }
    /// ```
    pub fn invalidate_command<Msg>(&self, prefix: impl Into<CacheKey>) -> Command<Msg>
    where
        Msg: Send + 'static,
    {
        let client = self.clone();
        let prefix = prefix.into();

        Command::effect(async move {
            client.invalidate(&prefix);
        })
    }

    /// Asks the paginated query at `key` to load more, as a command.
    pub fn fetch_next_page_command<Msg>(&self, key: impl Into<CacheKey>) -> Command<Msg>
    where
        Msg: Send + 'static,
    {
        let client = self.clone();
        let key = key.into();

        Command::effect(async move {
            client.request_next_page(&key);
        })
    }

    fn store(&self, key: &CacheKey, value: Option<CacheValue>) {
        match value {
            Some(value) => {
                self.cache
                    .entry(key.clone())
                    .and_modify(|entry| entry.update(value.clone()))
                    .or_insert_with(|| CacheEntry::new(value));
            }
            None => {
                self.cache.remove(key);
            }
        }
    }

    fn emit(&self, event: CacheEvent) {
        // No receiver just means no live query.
        let _ = self.events.send(event);
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for QueryClient {
    fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.cache.get(key).map(|entry| entry.value().clone())
    }

    fn write(&self, key: &CacheKey, value: Option<CacheValue>) {
        debug!(%key, removed = value.is_none(), "cache write");
        self.store(key, value);
        self.emit(CacheEvent::Updated(key.clone()));
    }

    fn find_all_matching(&self, prefix: &CacheKey) -> Vec<(CacheKey, CacheEntry)> {
        self.cache
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn invalidate(&self, prefix: &CacheKey) -> usize {
        let mut marked = 0;
        for mut entry in self.cache.iter_mut() {
            if entry.key().starts_with(prefix) {
                entry.value_mut().mark_stale();
                marked += 1;
            }
        }

        debug!(%prefix, marked, "invalidated");
        self.emit(CacheEvent::Invalidated(prefix.clone()));
        marked
    }

    fn begin_fetch(&self, key: &CacheKey) -> FetchHandle {
        let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        let previous = self.pending.insert(
            key.clone(),
            PendingFetch {
                id,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!(%key, "superseding in-flight fetch");
            previous.token.cancel();
        }

        FetchHandle {
            key: key.clone(),
            id,
            token,
        }
    }

    fn commit_fetch(&self, handle: &FetchHandle, value: Option<CacheValue>) -> bool {
        let mut committed = false;

        // The shard lock held by `remove_if` keeps `cancel_pending` out until
        // the write is done.
        self.pending.remove_if(&handle.key, |_, pending| {
            if pending.id != handle.id {
                return false;
            }
            if !handle.token.is_cancelled() {
                self.store(&handle.key, value);
                committed = true;
            }
            true
        });

        if !committed {
            debug!(key = %handle.key, "discarded cancelled fetch");
        }
        committed
    }

    fn abandon_fetch(&self, handle: &FetchHandle) {
        self.pending
            .remove_if(&handle.key, |_, pending| pending.id == handle.id);
    }

    fn cancel_pending(&self, prefix: &CacheKey) -> usize {
        let mut cancelled = 0;
        for entry in self.pending.iter() {
            if entry.key().starts_with(prefix) {
                entry.value().token.cancel();
                cancelled += 1;
            }
        }

        if cancelled > 0 {
            debug!(%prefix, cancelled, "cancelled in-flight fetches");
        }
        cancelled
    }

    fn request_next_page(&self, key: &CacheKey) {
        self.emit(CacheEvent::FetchNextPage(key.clone()));
    }

    fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    fn optimistic_gate(&self) -> Arc<Mutex<()>> {
        self.optimistic_gate.clone()
    }

    fn config(&self) -> &QueryConfig {
        &self.config
    }
}
