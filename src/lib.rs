//! # Sprig - typed HTTP queries for Elm-architecture applications
//!
//! Sprig is the data layer of a message-driven application. It talks to a
//! JSON API through a typed [`ApiClient`](http::ApiClient), keeps the
//! responses in a shared cache, and exposes them the way an Elm-architecture
//! runtime consumes effects: reads as [`Subscription`](subscription::Subscription)s
//! that emit query states, writes as [`Command`](command::Command)s that emit
//! mutation results.
//!
//! ## Architecture
//!
//! 1. **HTTP**: every call ends in an [`HttpResponse`](http::HttpResponse)
//!    with exactly one [`ErrorReason`](http::ErrorReason) on failure.
//! 2. **Cache keys**: an endpoint plus its non-empty parameter values
//!    ([`build_key`](query::build_key)); prefix matching drives invalidation.
//! 3. **Queries**: single, collection and paginated fetches, optionally
//!    revalidated with ETags.
//! 4. **Mutations**: commands with a validation channel and key
//!    invalidation, optionally optimistic with rollback.
//!
//! ## Core Components
//!
//! - [`ApiClient`](http::ApiClient): Request execution and error classification
//! - [`QueryClient`](query::QueryClient): The default cache store
//! - [`Query`](query::Query) / [`InfiniteQuery`](query::InfiniteQuery): Cache-backed subscriptions
//! - [`Mutation`](query::Mutation) / [`OptimisticMutation`](query::OptimisticMutation): Cache-aware commands
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use futures::StreamExt;
//! use sprig::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let api = ApiClient::new(&ClientConfig::new("https://plants.example.com"))?;
//! let store: Arc<dyn CacheStore> = Arc::new(QueryClient::new());
//!
//! let plants = Query::<Vec<String>>::fetch_collection(
//!     api.clone(),
//!     store.clone(),
//!     "/api/plants",
//!     FetchOptions::new(),
//! );
//! let mut states = Subscription::new(plants).into_stream();
//!
//! while let Some(result) = states.next().await {
//!     if let Some(names) = result.data() {
//!         println!("{} plants", names.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod http;
pub mod params;
pub mod prelude;
pub mod query;
pub mod subscription;
