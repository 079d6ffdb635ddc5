//! Warming the cache ahead of a query.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::http::url::build_url;
use crate::http::{ApiClient, ApiError, Fetched, GetOptions};
use crate::params::Params;

use super::key::build_key;
use super::store::{CacheStore, CacheValue};

/// Parameters of [`prefetch_single`].
#[derive(Debug, Clone)]
pub struct PrefetchOptions {
    /// The parameter name carrying the id.
    pub id_key_name: String,
    pub params: Option<Params>,
    pub use_etag: bool,
}

impl Default for PrefetchOptions {
    fn default() -> Self {
        Self {
            id_key_name: "id".to_string(),
            params: None,
            use_etag: false,
        }
    }
}

impl PrefetchOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_id_key_name(mut self, name: impl Into<String>) -> Self {
        self.id_key_name = name.into();
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

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

/// Loads one resource into the cache under the key a matching
/// [`Query::fetch_single`](super::Query::fetch_single) would use. Does
/// nothing when the key is already cached.
///
/// # Errors
///
/// Returns the failure of the fetch. Nothing is written in that case.
pub async fn prefetch_single<T>(
    api: &ApiClient,
    store: &dyn CacheStore,
    url: &str,
    id: impl Into<String>,
    options: PrefetchOptions,
) -> Result<(), ApiError>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    let mut params = options.params.unwrap_or_default();
    params.insert(options.id_key_name, id.into());

    let key = build_key(url, Some(&params));
    if store.entry(&key).is_some() {
        debug!(%key, "prefetch skipped, already cached");
        return Ok(());
    }

    let handle = store.begin_fetch(&key);
    let get = GetOptions::new()
        .with_etag(options.use_etag)
        .with_cancel(handle.token());

    match api.fetch::<T>(&build_url(url, Some(&params)), get).await {
        Ok(fetched) => {
            let value = match fetched {
                Fetched::Data(data) => Some(Arc::new(data) as CacheValue),
                Fetched::Empty | Fetched::NotModified => None,
            };
            let stored = store.commit_fetch(&handle, value);
            debug!(%key, stored, "prefetched");
            Ok(())
        }
        Err(error) => {
            store.abandon_fetch(&handle);
            Err(error)
        }
    }
}
