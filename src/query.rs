//! Cached queries, mutations, and cache coherence.
//!
//! Reads are **subscriptions**: a [`Query`] or [`InfiniteQuery`] keeps one
//! cache entry in sync with the UI and refetches when its key is
//! invalidated. Writes are **commands**: a [`Mutation`] sends its input,
//! applies the validation channel, then invalidates the keys it affects. An
//! [`OptimisticMutation`] edits the cache first and restores it if the
//! command fails.
//!
//! All of them share one [`CacheStore`], normally a [`QueryClient`].
//!
//! # Example
//!
//! ```rust,ignore
//! use sprig::prelude::*;
//!
//! struct App {
//!     api: ApiClient,
//!     store: Arc<dyn CacheStore>,
//!     plants: QueryState<InfiniteData<Vec<Plant>>>,
//! }
//!
//! impl App {
//!     fn subscriptions(&self) -> Vec<Subscription<Message>> {
//!         vec![
//!             Subscription::new(InfiniteQuery::fetch(
//!                 self.api.clone(),
//!                 self.store.clone(),
//!                 "/api/plants/search",
//!                 FetchOptions::new().with_param("query", "fern"),
//!             ))
//!             .map(Message::Plants),
//!         ]
//!     }
//!
//!     fn delete(&self, id: String) -> Command<Message> {
//!         OptimisticMutation::delete(
//!             self.api.clone(),
//!             self.store.clone(),
//!             format!("/api/plants/{id}"),
//!             vec![CacheUpdater::remove_from_pages(
//!                 "/api/plants/search",
//!                 |input: &DeletePlant, plant: &Plant| plant.id == input.id,
//!             )],
//!         )
//!         .mutate(DeletePlant { id })
//!         .map(Message::Deleted)
//!     }
//! }
//! ```

mod cache;
mod client;
mod config;
pub mod fetch;
pub mod infinite;
pub mod key;
pub mod mutation;
pub mod optimistic;
pub mod prefetch;
pub mod store;

pub use cache::CacheEntry;
pub use client::QueryClient;
pub use config::QueryConfig;
pub use fetch::{FetchOptions, Query, QueryFetcher, QueryResult, QueryState};
pub use infinite::{
    FIRST_PAGE, InfiniteData, InfiniteQuery, InfiniteQueryResult, PageData, PageFetcher,
    UpdatedPageData,
};
pub use key::{CacheKey, build_key};
pub use mutation::{InvalidateKeys, Mutation, MutationResult, MutationState};
pub use optimistic::{
    CacheUpdater, OptimisticMutation, OptimisticPhase, PendingMutation, RollbackContext,
};
pub use prefetch::{PrefetchOptions, prefetch_single};
pub use store::{CacheEvent, CacheStore, CacheStoreExt, CacheValue, FetchHandle};
