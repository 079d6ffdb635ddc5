//! Commands (POST, PUT, DELETE) with cache invalidation.
//!
//! A [`Mutation`] sends its input as a JSON body and applies the two-tier
//! error model of command endpoints: a failed call raises the classified
//! transport error, and a successful call whose body carries
//! `validationErrors` raises [`ApiError::Validation`]. On success the
//! caller's callback runs first, then every configured key prefix is
//! invalidated.
//!
//! # Example
//!
//! ```rust,ignore
//! let add_plant = Mutation::<AddPlant, IdentityData>::post(api, store, "/api/plants")
//!     .invalidate_keys(["/api/plants/search"]);
//!
//! fn update(&mut self, msg: Message) -> Command<Message> {
//!     match msg {
//!         Message::Add(plant) => self.add_plant.mutate(plant).map(Message::Added),
//!         Message::Added(result) => {
//!             self.add_state = result.state;
//!             Command::none()
//!         }
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use futures::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::command::Command;
use crate::http::{ApiClient, ApiError, CommandOptions, HttpMethod};

use super::key::CacheKey;
use super::store::CacheStore;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// The state of a mutation.
#[derive(Debug, Clone)]
pub enum MutationState<T> {
    /// Not started.
    Idle,
    /// The command is in flight.
    Loading,
    Success(T),
    Error(ApiError),
}

/// A mutation result containing the current state.
#[derive(Debug, Clone)]
pub struct MutationResult<T> {
    pub state: MutationState<T>,
}

impl<T> MutationResult<T> {
    pub const fn new(state: MutationState<T>) -> Self {
        Self { state }
    }

    /// Returns the data if the mutation succeeded, otherwise `None`.
    pub const fn data(&self) -> Option<&T> {
        match &self.state {
            MutationState::Success(data) => Some(data),
            _ => None,
        }
    }

    pub const fn error(&self) -> Option<&ApiError> {
        match &self.state {
            MutationState::Error(error) => Some(error),
            _ => None,
        }
    }

    pub const fn is_idle(&self) -> bool {
        matches!(self.state, MutationState::Idle)
    }

    pub const fn is_loading(&self) -> bool {
        matches!(self.state, MutationState::Loading)
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.state, MutationState::Success(_))
    }

    pub const fn is_error(&self) -> bool {
        matches!(self.state, MutationState::Error(_))
    }
}

impl<T> Default for MutationResult<T> {
    fn default() -> Self {
        Self::new(MutationState::Idle)
    }
}

impl<T> From<Result<T, ApiError>> for MutationResult<T> {
    fn from(result: Result<T, ApiError>) -> Self {
        match result {
            Ok(data) => Self::new(MutationState::Success(data)),
            Err(error) => Self::new(MutationState::Error(error)),
        }
    }
}

/// Which cache entries a successful mutation invalidates.
pub enum InvalidateKeys<I> {
    /// A fixed list of prefixes.
    Keys(Vec<CacheKey>),
    /// Prefixes derived from the mutation's input.
    Derived(Arc<dyn Fn(&I) -> Vec<CacheKey> + Send + Sync>),
}

impl<I> InvalidateKeys<I> {
    pub fn resolve(&self, input: &I) -> Vec<CacheKey> {
        match self {
            Self::Keys(keys) => keys.clone(),
            Self::Derived(derive) => derive(input),
        }
    }
}

impl<I> Clone for InvalidateKeys<I> {
    fn clone(&self) -> Self {
        match self {
            Self::Keys(keys) => Self::Keys(keys.clone()),
            Self::Derived(derive) => Self::Derived(derive.clone()),
        }
    }
}

impl<I> fmt::Debug for InvalidateKeys<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keys(keys) => f.debug_tuple("Keys").field(keys).finish(),
            Self::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

type SuccessCallback<I, O> = Arc<dyn Fn(&I, Option<&O>) + Send + Sync>;
type ErrorCallback<I> = Arc<dyn Fn(&I, &ApiError) + Send + Sync>;

/// A command endpoint bound to a cache store.
///
/// `I` is the request body, `O` the `data` of the response envelope.
pub struct Mutation<I, O> {
    api: ApiClient,
    store: Arc<dyn CacheStore>,
    url: String,
    method: HttpMethod,
    invalidate: Option<InvalidateKeys<I>>,
    on_success: Option<SuccessCallback<I, O>>,
    on_error: Option<ErrorCallback<I>>,
    retry: u32,
    retry_delay: Duration,
}

impl<I, O> Clone for Mutation<I, O> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            store: self.store.clone(),
            url: self.url.clone(),
            method: self.method,
            invalidate: self.invalidate.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            retry: self.retry,
            retry_delay: self.retry_delay,
        }
    }
}

impl<I, O> fmt::Debug for Mutation<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("invalidate", &self.invalidate)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl<I, O> Mutation<I, O> {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub const fn method(&self) -> HttpMethod {
        self.method
    }

    pub(crate) fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }
}

impl<I, O> Mutation<I, O>
where
    I: Serialize + Send + Sync + 'static,
    O: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Creates a mutation that retries retryable failures once.
    pub fn new(
        api: ApiClient,
        store: Arc<dyn CacheStore>,
        url: impl Into<String>,
        method: HttpMethod,
    ) -> Self {
        Self {
            api,
            store,
            url: url.into(),
            method,
            invalidate: None,
            on_success: None,
            on_error: None,
            retry: 1,
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn post(api: ApiClient, store: Arc<dyn CacheStore>, url: impl Into<String>) -> Self {
        Self::new(api, store, url, HttpMethod::Post)
    }

    pub fn put(api: ApiClient, store: Arc<dyn CacheStore>, url: impl Into<String>) -> Self {
        Self::new(api, store, url, HttpMethod::Put)
    }

    pub fn delete(api: ApiClient, store: Arc<dyn CacheStore>, url: impl Into<String>) -> Self {
        Self::new(api, store, url, HttpMethod::Delete)
    }

    /// Invalidates these prefixes after every success.
    #[must_use]
    pub fn invalidate_keys<K>(mut self, keys: impl IntoIterator<Item = K>) -> Self
    where
        K: Into<CacheKey>,
    {
        self.invalidate = Some(InvalidateKeys::Keys(keys.into_iter().map(Into::into).collect()));
        self
    }

    /// Invalidates the prefixes derived from the input after every success.
    #[must_use]
    pub fn invalidate_with<F>(mut self, derive: F) -> Self
    where
        F: Fn(&I) -> Vec<CacheKey> + Send + Sync + 'static,
    {
        self.invalidate = Some(InvalidateKeys::Derived(Arc::new(derive)));
        self
    }

    /// Runs after a success, before invalidation.
    #[must_use]
    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&I, Option<&O>) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&I, &ApiError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// How many times a retryable failure is retried.
    #[must_use]
    pub const fn retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    /// Delay before the first retry; it doubles for each further attempt,
    /// up to 30 seconds.
    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sends the command, retrying retryable failures. Runs no callbacks.
    ///
    /// # Errors
    ///
    /// Returns the last failure.
    pub async fn send(&self, input: &I, cancel: &CancellationToken) -> Result<Option<O>, ApiError> {
        let mut attempt = 0;

        loop {
            let options = CommandOptions::new().with_cancel(cancel.clone());
            let result = self
                .api
                .send_command::<O, I>(&self.url, self.method, input, options)
                .await;

            match result {
                Err(error) if attempt < self.retry && error.is_retryable() && !cancel.is_cancelled() => {
                    attempt += 1;
                    let delay = self
                        .retry_delay
                        .saturating_mul(1 << (attempt - 1).min(16))
                        .min(MAX_RETRY_DELAY);
                    warn!(url = %self.url, attempt, ?delay, "retrying command: {error}");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Sends the command and settles it: callbacks, then invalidation.
    ///
    /// # Errors
    ///
    /// Returns the transport or validation failure after `on_error` ran.
    pub async fn execute(&self, input: I) -> Result<Option<O>, ApiError> {
        let result = self.send(&input, &CancellationToken::new()).await;

        match &result {
            Ok(data) => self.succeed(&input, data.as_ref()),
            Err(error) => self.fail(&input, error),
        }

        result
    }

    /// Runs [`Mutation::execute`] as a command emitting `Loading` and then
    /// the outcome.
    pub fn mutate(&self, input: I) -> Command<MutationResult<Option<O>>> {
        let mutation = self.clone();

        Command::stream(
            stream::once(async { MutationResult::new(MutationState::Loading) })
                .chain(stream::once(async move {
                    MutationResult::from(mutation.execute(input).await)
                })),
        )
    }

    pub(crate) fn succeed(&self, input: &I, data: Option<&O>) {
        if let Some(callback) = &self.on_success {
            callback(input, data);
        }

        if let Some(invalidate) = &self.invalidate {
            for key in invalidate.resolve(input) {
                self.store.invalidate(&key);
            }
        }

        debug!(url = %self.url, method = %self.method, "command succeeded");
    }

    pub(crate) fn fail(&self, input: &I, error: &ApiError) {
        warn!(url = %self.url, method = %self.method, reason = %error.reason(), "command failed: {error}");

        if let Some(callback) = &self.on_error {
            callback(input, error);
        }
    }
}
