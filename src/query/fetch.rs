//! Single and collection fetches as subscriptions.
//!
//! A [`Query`] is a **subscription** that keeps one cache entry and the UI in
//! sync. When subscribed:
//!
//! 1. If cached data exists, it is emitted immediately; stale data is
//!    refetched right after.
//! 2. If nothing is cached, `Loading` is emitted and a fetch starts.
//! 3. When a matching prefix is invalidated, the query refetches.
//! 4. When the entry is written from outside (an optimistic edit, a
//!    rollback), the new value is emitted.
//!
//! Fetch results are written through [`CacheStore::commit_fetch`], so a
//! fetch cancelled by an optimistic mutation never reaches the cache and
//! emits nothing.
//!
//! # Example
//!
//! ```rust,ignore
//! fn subscriptions(&self) -> Vec<Subscription<Message>> {
//!     vec![
//!         Subscription::new(Query::<Vec<Plant>>::fetch_collection(
//!             self.api.clone(),
//!             self.store.clone(),
//!             "/api/today",
//!             FetchOptions::new(),
//!         ))
//!         .map(Message::DuePlants),
//!     ]
//! }
//! ```

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::http::{ApiClient, ApiError, Fetched, GetOptions};
use crate::http::url::build_url;
use crate::params::Params;
use crate::subscription::{SubscriptionId, SubscriptionSource};

use super::key::{CacheKey, build_key};
use super::store::{CacheEvent, CacheStore, CacheStoreExt};

/// The state of a query.
#[derive(Debug, Clone)]
pub enum QueryState<T> {
    /// Nothing to show yet; a fetch is running.
    Loading,
    Success {
        data: T,
        /// Whether the data is stale and being refetched.
        is_stale: bool,
    },
    /// The endpoint answered without data.
    Empty,
    Error(ApiError),
}

/// A query result containing the current state.
#[derive(Debug, Clone)]
pub struct QueryResult<T> {
    pub state: QueryState<T>,
}

impl<T> QueryResult<T> {
    pub(crate) const fn new(state: QueryState<T>) -> Self {
        Self { state }
    }

    /// Returns the data if the query succeeded, otherwise `None`.
    pub const fn data(&self) -> Option<&T> {
        match &self.state {
            QueryState::Success { data, .. } => Some(data),
            _ => None,
        }
    }

    pub const fn error(&self) -> Option<&ApiError> {
        match &self.state {
            QueryState::Error(error) => Some(error),
            _ => None,
        }
    }

    pub const fn is_loading(&self) -> bool {
        matches!(self.state, QueryState::Loading)
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.state, QueryState::Success { .. })
    }

    pub const fn is_empty(&self) -> bool {
        matches!(self.state, QueryState::Empty)
    }

    pub const fn is_error(&self) -> bool {
        matches!(self.state, QueryState::Error(_))
    }

    pub const fn is_stale(&self) -> bool {
        matches!(self.state, QueryState::Success { is_stale: true, .. })
    }
}

/// Loads a value given the cancellation token of the fetch.
pub type QueryFetcher<V> =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<Fetched<V>, ApiError>> + Send + Sync>;

/// Parameters of an endpoint fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub params: Option<Params>,
    /// Send `If-None-Match` when a cached value exists.
    pub use_etag: bool,
}

impl FetchOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

    /// Adds one parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params
            .get_or_insert_with(Params::new)
            .insert(name, value);
        self
    }

    #[must_use]
    pub const fn with_etag(mut self, use_etag: bool) -> Self {
        self.use_etag = use_etag;
        self
    }
}

/// A subscription to one cache entry.
pub struct Query<V> {
    key: CacheKey,
    fetcher: QueryFetcher<V>,
    store: Arc<dyn CacheStore>,
}

impl<V> Query<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a query for `key` loaded by `fetcher`.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let query = Query::new(
    ///     "plant-count",
    ///     |_token| async { Ok(Fetched::Data(42)) }.boxed(),
    ///     store,
    /// );
    /// ```
    pub fn new<F>(key: impl Into<CacheKey>, fetcher: F, store: Arc<dyn CacheStore>) -> Self
    where
        F: Fn(CancellationToken) -> BoxFuture<'static, Result<Fetched<V>, ApiError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            key: key.into(),
            fetcher: Arc::new(fetcher),
            store,
        }
    }

    pub const fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl<V> Query<V>
where
    V: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Fetches `endpoint` with `options.params`, cached under
    /// [`build_key`]`(endpoint, params)`.
    pub fn fetch(
        api: ApiClient,
        store: Arc<dyn CacheStore>,
        endpoint: &str,
        options: FetchOptions,
    ) -> Self {
        let key = build_key(endpoint, options.params.as_ref());
        let url = build_url(endpoint, options.params.as_ref());
        let use_etag = options.use_etag;

        let fetcher = {
            let key = key.clone();
            let store = store.clone();
            move |token: CancellationToken| {
                let api = api.clone();
                let url = url.clone();
                // A 304 is only useful when there is something to keep.
                let cold = store.entry(&key).is_none();

                async move {
                    let options = GetOptions::new()
                        .with_etag(use_etag)
                        .with_etag_record_only(cold)
                        .with_cancel(token);
                    api.fetch::<V>(&url, options).await
                }
                .boxed()
            }
        };

        Self::new(key, fetcher, store)
    }

    /// Fetches one resource; `id` is sent as the `id` parameter after any
    /// other parameters.
    pub fn fetch_single(
        api: ApiClient,
        store: Arc<dyn CacheStore>,
        endpoint: &str,
        id: impl Into<String>,
        options: FetchOptions,
    ) -> Self {
        let options = options.with_param("id", id.into());
        Self::fetch(api, store, endpoint, options)
    }

    /// Fetches a list endpoint.
    pub fn fetch_collection(
        api: ApiClient,
        store: Arc<dyn CacheStore>,
        endpoint: &str,
        options: FetchOptions,
    ) -> Self {
        Self::fetch(api, store, endpoint, options)
    }
}

impl<V> SubscriptionSource for Query<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Output = QueryResult<V>;

    fn stream(&self) -> BoxStream<'static, Self::Output> {
        let key = self.key.clone();
        let fetcher = self.fetcher.clone();
        let store = self.store.clone();

        stream::unfold(State::Initial, move |state| {
            let key = key.clone();
            let fetcher = fetcher.clone();
            let store = store.clone();

            async move {
                match state {
                    State::Initial => {
                        // Subscribe first so no write during the fetch is missed.
                        let rx = store.subscribe();
                        let stale_time = store.config().stale_time;

                        let cached = store.entry(&key).and_then(|mut entry| {
                            let is_stale = entry.check_staleness(stale_time);
                            entry.downcast::<V>().map(|data| (data, is_stale))
                        });

                        match cached {
                            Some((data, false)) => Some((
                                Some(QueryResult::new(QueryState::Success {
                                    data,
                                    is_stale: false,
                                })),
                                State::Watching { rx },
                            )),
                            Some((data, true)) => Some((
                                Some(QueryResult::new(QueryState::Success {
                                    data,
                                    is_stale: true,
                                })),
                                State::Fetching { rx },
                            )),
                            None => Some((
                                Some(QueryResult::new(QueryState::Loading)),
                                State::Fetching { rx },
                            )),
                        }
                    }

                    State::Fetching { rx } => {
                        let result = fetch_once::<V>(&key, fetcher.as_ref(), store.as_ref()).await;
                        Some((result, State::Watching { rx }))
                    }

                    State::Watching { mut rx } => loop {
                        match rx.recv().await {
                            Ok(CacheEvent::Invalidated(prefix)) if key.starts_with(&prefix) => {
                                let state = match store.get::<V>(&key) {
                                    Some(data) => QueryState::Success {
                                        data,
                                        is_stale: true,
                                    },
                                    None => QueryState::Loading,
                                };
                                return Some((Some(QueryResult::new(state)), State::Fetching { rx }));
                            }
                            Ok(CacheEvent::Updated(updated)) if updated == key => {
                                let Some(entry) = store.entry(&key) else {
                                    continue;
                                };
                                let Some(data) = entry.downcast::<V>() else {
                                    continue;
                                };
                                let state = QueryState::Success {
                                    data,
                                    is_stale: entry.is_stale,
                                };
                                return Some((Some(QueryResult::new(state)), State::Watching { rx }));
                            }
                            Ok(_) => {}
                            Err(RecvError::Lagged(skipped)) => {
                                debug!(%key, skipped, "query lagged behind cache events");
                                return Some((None, State::Fetching { rx }));
                            }
                            Err(RecvError::Closed) => return None,
                        }
                    },
                }
            }
        })
        .filter_map(|result| async move { result })
        .boxed()
    }

    fn id(&self) -> SubscriptionId {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        SubscriptionId::of::<Self>(hasher.finish())
    }
}

impl<V> Hash for Query<V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

/// Runs one fetch and settles it in the store. `None` means the fetch was
/// cancelled and nothing may be emitted.
async fn fetch_once<V>(
    key: &CacheKey,
    fetcher: &(dyn Fn(CancellationToken) -> BoxFuture<'static, Result<Fetched<V>, ApiError>>
          + Send
          + Sync),
    store: &dyn CacheStore,
) -> Option<QueryResult<V>>
where
    V: Clone + Send + Sync + 'static,
{
    let handle = store.begin_fetch(key);
    debug!(%key, "fetching");

    match fetcher(handle.token()).await {
        Ok(Fetched::Data(data)) => store
            .commit_fetch(&handle, Some(Arc::new(data.clone())))
            .then(|| {
                QueryResult::new(QueryState::Success {
                    data,
                    is_stale: false,
                })
            }),
        Ok(Fetched::NotModified) => {
            // Re-commit the cached value itself: fresh again, unchanged.
            let Some(entry) = store.entry(key) else {
                store.abandon_fetch(&handle);
                return (!handle.is_cancelled()).then(|| QueryResult::new(QueryState::Empty));
            };
            let data = entry.downcast::<V>();
            if !store.commit_fetch(&handle, Some(entry.value)) {
                return None;
            }
            Some(QueryResult::new(match data {
                Some(data) => QueryState::Success {
                    data,
                    is_stale: false,
                },
                None => QueryState::Empty,
            }))
        }
        Ok(Fetched::Empty) => store
            .commit_fetch(&handle, None)
            .then(|| QueryResult::new(QueryState::Empty)),
        Err(error) => {
            let cancelled = handle.is_cancelled();
            store.abandon_fetch(&handle);
            (!cancelled).then(|| QueryResult::new(QueryState::Error(error)))
        }
    }
}

/// Internal state machine for the Query subscription.
enum State {
    Initial,
    Fetching { rx: broadcast::Receiver<CacheEvent> },
    Watching { rx: broadcast::Receiver<CacheEvent> },
}
