//! Paginated ("load more") queries.
//!
//! An [`InfiniteQuery`] caches an [`InfiniteData`]: the pages loaded so far,
//! in request order. Page 1 is loaded on subscribe; every
//! [`CacheEvent::FetchNextPage`] for the query's key appends the page named
//! by the last page's `nextPage`, until there is none. A refetch reloads as
//! many pages as were loaded before.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::http::url::build_url;
use crate::http::{ApiClient, ApiError, Fetched, GetOptions};
use crate::subscription::{SubscriptionId, SubscriptionSource};

use super::fetch::{FetchOptions, QueryResult, QueryState};
use super::key::{CacheKey, build_key};
use super::store::{CacheEvent, CacheStore, CacheStoreExt, FetchHandle};

/// The first page number requested.
pub const FIRST_PAGE: u32 = 1;

/// One page of a paginated endpoint.
///
/// Every page of one query reports the same `total_count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData<T> {
    pub data: T,
    #[serde(default)]
    pub next_page: Option<u32>,
    #[serde(default)]
    pub previous_page: Option<u32>,
    pub total_count: u64,
}

/// The result of rewriting one page with [`InfiniteData::update_pages`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedPageData<T> {
    pub data: T,
    pub total_count: u64,
}

/// The pages of a paginated query, in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfiniteData<T> {
    pub pages: Vec<PageData<T>>,
    pub page_params: Vec<u32>,
}

impl<T> InfiniteData<T> {
    #[must_use]
    pub fn new(first: PageData<T>) -> Self {
        Self {
            pages: vec![first],
            page_params: vec![FIRST_PAGE],
        }
    }

    /// The total item count, read off the first page. `0` without pages.
    pub fn total_count(&self) -> u64 {
        self.pages.first().map_or(0, |page| page.total_count)
    }

    pub fn next_page(&self) -> Option<u32> {
        self.pages.last().and_then(|page| page.next_page)
    }

    pub fn previous_page(&self) -> Option<u32> {
        self.pages.first().and_then(|page| page.previous_page)
    }

    pub fn has_next_page(&self) -> bool {
        self.next_page().is_some()
    }

    pub fn push_page(&mut self, page_param: u32, page: PageData<T>) {
        self.pages.push(page);
        self.page_params.push(page_param);
    }

    /// Rewrites every page's data and total with `f(data, total_count)`,
    /// keeping the page links and page params.
    #[must_use]
    pub fn update_pages<F>(&self, mut f: F) -> Self
    where
        F: FnMut(&T, u64) -> UpdatedPageData<T>,
    {
        let pages = self
            .pages
            .iter()
            .map(|page| {
                let UpdatedPageData { data, total_count } = f(&page.data, page.total_count);
                PageData {
                    data,
                    next_page: page.next_page,
                    previous_page: page.previous_page,
                    total_count,
                }
            })
            .collect();

        Self {
            pages,
            page_params: self.page_params.clone(),
        }
    }
}

impl<T: Clone> InfiniteData<Vec<T>> {
    /// Drops the items matching `predicate` from every page and decrements
    /// every page's total by one, which keeps the pages agreeing on it.
    #[must_use]
    pub fn remove_items<P>(&self, mut predicate: P) -> Self
    where
        P: FnMut(&T) -> bool,
    {
        self.update_pages(|items, total_count| UpdatedPageData {
            data: items.iter().filter(|item| !predicate(item)).cloned().collect(),
            total_count: total_count.saturating_sub(1),
        })
    }

    /// All loaded items, in page order.
    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.pages.iter().flat_map(|page| page.data.iter())
    }
}

/// The state of a paginated query.
pub type InfiniteQueryResult<T> = QueryResult<InfiniteData<T>>;

impl<T> QueryResult<InfiniteData<T>> {
    /// The total item count of the loaded data, `0` while nothing is loaded.
    pub fn total_count(&self) -> u64 {
        self.data().map_or(0, InfiniteData::total_count)
    }

    pub fn has_next_page(&self) -> bool {
        self.data().is_some_and(InfiniteData::has_next_page)
    }
}

/// Loads one page given its number and the cancellation token of the fetch.
pub type PageFetcher<T> = Arc<
    dyn Fn(u32, CancellationToken) -> BoxFuture<'static, Result<Option<PageData<T>>, ApiError>>
        + Send
        + Sync,
>;

/// A subscription to a paginated cache entry.
pub struct InfiniteQuery<T> {
    key: CacheKey,
    fetcher: PageFetcher<T>,
    store: Arc<dyn CacheStore>,
}

impl<T> InfiniteQuery<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<F>(key: impl Into<CacheKey>, fetcher: F, store: Arc<dyn CacheStore>) -> Self
    where
        F: Fn(u32, CancellationToken) -> BoxFuture<'static, Result<Option<PageData<T>>, ApiError>>
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

impl<T> InfiniteQuery<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Fetches pages of `endpoint`. The page number is sent as the `page`
    /// parameter but is not part of the cache key.
    pub fn fetch(
        api: ApiClient,
        store: Arc<dyn CacheStore>,
        endpoint: &str,
        options: FetchOptions,
    ) -> Self {
        let key = build_key(endpoint, options.params.as_ref());
        let endpoint = endpoint.to_string();
        let params = options.params.unwrap_or_default();

        let fetcher = move |page: u32, token: CancellationToken| {
            let api = api.clone();
            let url = build_url(&endpoint, Some(&params.clone().with("page", page)));

            async move {
                let fetched = api
                    .fetch::<PageData<T>>(&url, GetOptions::new().with_cancel(token))
                    .await?;
                Ok::<_, ApiError>(fetched.into_data())
            }
            .boxed()
        };

        Self::new(key, fetcher, store)
    }
}

impl<T> SubscriptionSource for InfiniteQuery<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = InfiniteQueryResult<T>;

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
                        let rx = store.subscribe();
                        let stale_time = store.config().stale_time;

                        let cached = store.entry(&key).and_then(|mut entry| {
                            let is_stale = entry.check_staleness(stale_time);
                            entry
                                .downcast::<InfiniteData<T>>()
                                .map(|data| (data, is_stale))
                        });

                        let (state, next) = match cached {
                            Some((data, false)) => (
                                QueryState::Success {
                                    data,
                                    is_stale: false,
                                },
                                State::Watching { rx },
                            ),
                            Some((data, true)) => (
                                QueryState::Success {
                                    data,
                                    is_stale: true,
                                },
                                State::Refetching { rx },
                            ),
                            None => (QueryState::Loading, State::Refetching { rx }),
                        };
                        Some((Some(QueryResult::new(state)), next))
                    }

                    State::Refetching { rx } => {
                        let result = refetch(&key, &fetcher, store.as_ref()).await;
                        Some((result, State::Watching { rx }))
                    }

                    State::NextPage { rx } => {
                        let result = fetch_next_page(&key, &fetcher, store.as_ref()).await;
                        Some((result, State::Watching { rx }))
                    }

                    State::Watching { mut rx } => loop {
                        match rx.recv().await {
                            Ok(CacheEvent::Invalidated(prefix)) if key.starts_with(&prefix) => {
                                let state = match store.get::<InfiniteData<T>>(&key) {
                                    Some(data) => QueryState::Success {
                                        data,
                                        is_stale: true,
                                    },
                                    None => QueryState::Loading,
                                };
                                return Some((
                                    Some(QueryResult::new(state)),
                                    State::Refetching { rx },
                                ));
                            }
                            Ok(CacheEvent::Updated(updated)) if updated == key => {
                                let Some(entry) = store.entry(&key) else {
                                    continue;
                                };
                                let Some(data) = entry.downcast::<InfiniteData<T>>() else {
                                    continue;
                                };
                                let state = QueryState::Success {
                                    data,
                                    is_stale: entry.is_stale,
                                };
                                return Some((
                                    Some(QueryResult::new(state)),
                                    State::Watching { rx },
                                ));
                            }
                            Ok(CacheEvent::FetchNextPage(requested)) if requested == key => {
                                return Some((None, State::NextPage { rx }));
                            }
                            Ok(_) => {}
                            Err(RecvError::Lagged(skipped)) => {
                                debug!(%key, skipped, "infinite query lagged behind cache events");
                                return Some((None, State::Refetching { rx }));
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

impl<T> Hash for InfiniteQuery<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

fn settle_error<T>(
    store: &dyn CacheStore,
    handle: &FetchHandle,
    error: ApiError,
) -> Option<InfiniteQueryResult<T>> {
    let cancelled = handle.is_cancelled();
    store.abandon_fetch(handle);
    (!cancelled).then(|| QueryResult::new(QueryState::Error(error)))
}

/// Reloads page 1 and then as many following pages as were loaded before.
async fn refetch<T>(
    key: &CacheKey,
    fetcher: &PageFetcher<T>,
    store: &dyn CacheStore,
) -> Option<InfiniteQueryResult<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let loaded = store
        .get::<InfiniteData<T>>(key)
        .map_or(1, |data| data.pages.len().max(1));

    let handle = store.begin_fetch(key);
    debug!(%key, pages = loaded, "fetching pages");

    let first = match fetcher(FIRST_PAGE, handle.token()).await {
        Ok(Some(page)) => page,
        Ok(None) => {
            return store
                .commit_fetch(&handle, None)
                .then(|| QueryResult::new(QueryState::Empty));
        }
        Err(error) => return settle_error(store, &handle, error),
    };

    let mut data = InfiniteData::new(first);
    while data.pages.len() < loaded {
        let Some(next) = data.next_page() else {
            break;
        };
        match fetcher(next, handle.token()).await {
            Ok(Some(page)) => data.push_page(next, page),
            Ok(None) => break,
            Err(error) => return settle_error(store, &handle, error),
        }
    }

    store
        .commit_fetch(&handle, Some(Arc::new(data.clone())))
        .then(|| {
            QueryResult::new(QueryState::Success {
                data,
                is_stale: false,
            })
        })
}

/// Appends the page after the last loaded one, if there is one.
async fn fetch_next_page<T>(
    key: &CacheKey,
    fetcher: &PageFetcher<T>,
    store: &dyn CacheStore,
) -> Option<InfiniteQueryResult<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let mut data = store.get::<InfiniteData<T>>(key)?;
    let next = data.next_page()?;

    let handle = store.begin_fetch(key);
    debug!(%key, page = next, "fetching next page");

    match fetcher(next, handle.token()).await {
        Ok(Some(page)) => {
            data.push_page(next, page);
            store
                .commit_fetch(&handle, Some(Arc::new(data.clone())))
                .then(|| {
                    QueryResult::new(QueryState::Success {
                        data,
                        is_stale: false,
                    })
                })
        }
        Ok(None) => {
            store.abandon_fetch(&handle);
            None
        }
        Err(error) => settle_error(store, &handle, error),
    }
}

/// Internal state machine for the InfiniteQuery subscription.
enum State {
    Initial,
    Refetching { rx: broadcast::Receiver<CacheEvent> },
    NextPage { rx: broadcast::Receiver<CacheEvent> },
    Watching { rx: broadcast::Receiver<CacheEvent> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryClient;

    #[derive(Debug, Clone, PartialEq)]
    struct Plant {
        id: u32,
    }

    fn page(ids: &[u32], next_page: Option<u32>, total_count: u64) -> PageData<Vec<Plant>> {
        PageData {
            data: ids.iter().map(|&id| Plant { id }).collect(),
            next_page,
            previous_page: None,
            total_count,
        }
    }

    fn two_pages() -> InfiniteData<Vec<Plant>> {
        let mut data = InfiniteData::new(page(&[1], Some(2), 2));
        data.push_page(2, page(&[2], None, 2));
        data
    }

    #[test]
    fn test_page_data_wire_format() {
        let page: PageData<Vec<u32>> =
            serde_json::from_str(r#"{"data":[1,2],"nextPage":2,"previousPage":null,"totalCount":9}"#)
                .expect("page should deserialize");
        assert_eq!(page.next_page, Some(2));
        assert_eq!(page.previous_page, None);
        assert_eq!(page.total_count, 9);
    }

    #[test]
    fn test_total_count_reads_first_page() {
        assert_eq!(two_pages().total_count(), 2);

        let empty: InfiniteData<Vec<Plant>> = InfiniteData {
            pages: Vec::new(),
            page_params: Vec::new(),
        };
        assert_eq!(empty.total_count(), 0);
        assert!(!empty.has_next_page());
    }

    #[test]
    fn test_remove_items_updates_every_page() {
        let updated = two_pages().remove_items(|plant| plant.id == 1);

        assert_eq!(updated.items().map(|p| p.id).collect::<Vec<_>>(), vec![2]);
        assert!(updated.pages.iter().all(|page| page.total_count == 1));
        assert_eq!(updated.page_params, vec![1, 2]);
        assert_eq!(updated.pages[0].next_page, Some(2));
    }

    #[test]
    fn test_update_pages_passes_totals() {
        let updated = two_pages().update_pages(|items, total_count| UpdatedPageData {
            data: items.clone(),
            total_count: total_count + 10,
        });
        assert_eq!(updated.total_count(), 12);
    }

    #[test]
    fn test_result_helpers() {
        let loading: InfiniteQueryResult<Vec<Plant>> = QueryResult::new(QueryState::Loading);
        assert_eq!(loading.total_count(), 0);
        assert!(!loading.has_next_page());

        let loaded = QueryResult::new(QueryState::Success {
            data: InfiniteData::new(page(&[1], Some(2), 5)),
            is_stale: false,
        });
        assert_eq!(loaded.total_count(), 5);
        assert!(loaded.has_next_page());
    }

    #[tokio::test]
    async fn test_next_page_is_appended() {
        let client = QueryClient::new();
        let store: Arc<dyn CacheStore> = Arc::new(client.clone());
        let key = CacheKey::new("/api/plants/search");

        let query = InfiniteQuery::new(
            key.clone(),
            |page: u32, _token| {
                async move {
                    Ok(Some(match page {
                        1 => page_for(&[1], Some(2)),
                        _ => page_for(&[2], None),
                    }))
                }
                .boxed()
            },
            store,
        );

        fn page_for(ids: &[u32], next_page: Option<u32>) -> PageData<Vec<Plant>> {
            page(ids, next_page, 2)
        }

        let mut stream = query.stream();
        assert!(stream.next().await.expect("loading").is_loading());
        let first = stream.next().await.expect("page 1");
        assert!(first.has_next_page());

        client.request_next_page(&key);
        let second = stream.next().await.expect("page 2");
        let data = second.data().expect("data");
        assert_eq!(data.pages.len(), 2);
        assert_eq!(data.page_params, vec![1, 2]);
        assert!(!second.has_next_page());
    }
}
