//! Prelude module for convenient imports.
//!
//! ```
//! use sprig::prelude::*;
//! ```

pub use crate::command::Command;
pub use crate::http::{
    ApiClient, ApiError, ClientConfig, ClientError, ErrorReason, Fetched, HttpMethod,
    HttpResponse, ValidationError,
};
pub use crate::params::Params;
pub use crate::query::{
    CacheKey, CacheStore, CacheStoreExt, CacheUpdater, FetchOptions, InfiniteData,
    InfiniteQuery, Mutation, MutationResult, MutationState, OptimisticMutation, PageData, Query,
    QueryClient, QueryConfig, QueryResult, QueryState, build_key,
};
pub use crate::subscription::{Subscription, SubscriptionSource};
