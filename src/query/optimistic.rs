//! Optimistic mutations with rollback.
//!
//! An [`OptimisticMutation`] edits the cache *before* its command is sent, so
//! the UI reflects the change immediately. Its lifecycle is expressed in the
//! types:
//!
//! - [`OptimisticMutation::begin`] takes the store's optimistic gate, and for
//!   each [`CacheUpdater`] in order cancels in-flight fetches under the
//!   updater's prefix, snapshots every matching entry into a
//!   [`RollbackContext`] and overwrites it with the transformed value. The
//!   result is a [`PendingMutation`].
//! - [`PendingMutation::run`] sends the command. On success the edit stands
//!   ([`OptimisticPhase::Committed`]); on failure every snapshot is written
//!   back verbatim before `on_error` runs ([`OptimisticPhase::RolledBack`]).
//!   A `PendingMutation` dropped before it settles is rolled back without
//!   running `on_error`.
//!
//! The gate is held until the mutation settles, so two optimistic mutations
//! on one store never interleave their snapshots and rollbacks.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::command::Command;
use crate::http::{ApiClient, ApiError};

use super::infinite::InfiniteData;
use super::key::CacheKey;
use super::mutation::{Mutation, MutationResult, MutationState};
use super::store::{CacheStore, CacheValue};

type Transform<I> = Arc<dyn Fn(&I, &CacheValue) -> Option<CacheValue> + Send + Sync>;

/// Rewrites every cache entry under `prefix` for a given input.
pub struct CacheUpdater<I> {
    prefix: CacheKey,
    transform: Transform<I>,
}

impl<I> Clone for CacheUpdater<I> {
    fn clone(&self) -> Self {
        Self {
            prefix: self.prefix.clone(),
            transform: self.transform.clone(),
        }
    }
}

impl<I> fmt::Debug for CacheUpdater<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheUpdater")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl<I: 'static> CacheUpdater<I> {
    /// Creates an updater for entries holding a `T`. Entries of another type
    /// under the same prefix are left alone.
    pub fn new<T, F>(prefix: impl Into<CacheKey>, transform: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&I, &T) -> T + Send + Sync + 'static,
    {
        Self {
            prefix: prefix.into(),
            transform: Arc::new(move |input, value| {
                value
                    .downcast_ref::<T>()
                    .map(|current| Arc::new(transform(input, current)) as CacheValue)
            }),
        }
    }

    /// The delete transform for paginated entries: removes the items
    /// matching `predicate` from every page and decrements every page's
    /// total by one.
    ///
    /// ```
    /// use sprig::query::CacheUpdater;
    ///
    /// # #[derive(Clone)]
    /// # struct Plant { id: String }
    /// struct DeletePlant { id: String }
    ///
    /// let updater = CacheUpdater::remove_from_pages("/api/plants/search", |input: &DeletePlant, plant: &Plant| {
    ///     plant.id == input.id
    /// });
    /// ```
    pub fn remove_from_pages<T, P>(prefix: impl Into<CacheKey>, predicate: P) -> Self
    where
        T: Clone + Send + Sync + 'static,
        P: Fn(&I, &T) -> bool + Send + Sync + 'static,
    {
        Self::new::<InfiniteData<Vec<T>>, _>(prefix, move |input, data| {
            data.remove_items(|item| predicate(input, item))
        })
    }
}

impl<I> CacheUpdater<I> {
    pub const fn prefix(&self) -> &CacheKey {
        &self.prefix
    }

    /// Returns the rewritten value, or `None` if this updater does not apply.
    pub fn apply(&self, input: &I, value: &CacheValue) -> Option<CacheValue> {
        (self.transform)(input, value)
    }
}

/// The cache values an optimistic mutation overwrote.
#[derive(Clone, Default)]
pub struct RollbackContext {
    entries: Vec<(CacheKey, CacheValue)>,
}

impl RollbackContext {
    /// Records the pre-mutation value of `key`. Only the first snapshot of a
    /// key is kept.
    pub fn record(&mut self, key: CacheKey, value: CacheValue) {
        if !self.entries.iter().any(|(recorded, _)| *recorded == key) {
            self.entries.push((key, value));
        }
    }

    /// Writes every snapshot back.
    pub fn restore(&self, store: &dyn CacheStore) {
        for (key, value) in &self.entries {
            store.write(key, Some(value.clone()));
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.entries.iter().map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for RollbackContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

/// How an optimistic mutation ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimisticPhase {
    /// The cache holds the speculative edit and the command is in flight.
    Pending,
    /// The command succeeded; the edit stands.
    Committed,
    /// The command failed; the snapshots were restored.
    RolledBack,
}

/// A mutation whose effect is applied to the cache before it is sent.
pub struct OptimisticMutation<I, O> {
    mutation: Mutation<I, O>,
    updaters: Vec<CacheUpdater<I>>,
}

impl<I, O> Clone for OptimisticMutation<I, O> {
    fn clone(&self) -> Self {
        Self {
            mutation: self.mutation.clone(),
            updaters: self.updaters.clone(),
        }
    }
}

impl<I, O> fmt::Debug for OptimisticMutation<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticMutation")
            .field("mutation", &self.mutation)
            .field("updaters", &self.updaters)
            .finish()
    }
}

impl<I, O> OptimisticMutation<I, O>
where
    I: Serialize + Send + Sync + 'static,
    O: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(mutation: Mutation<I, O>, updaters: Vec<CacheUpdater<I>>) -> Self {
        Self { mutation, updaters }
    }

    /// An optimistic DELETE to `url`.
    pub fn delete(
        api: ApiClient,
        store: Arc<dyn CacheStore>,
        url: impl Into<String>,
        updaters: Vec<CacheUpdater<I>>,
    ) -> Self {
        Self::new(Mutation::delete(api, store, url), updaters)
    }

    #[must_use]
    pub fn with_updater(mut self, updater: CacheUpdater<I>) -> Self {
        self.updaters.push(updater);
        self
    }

    pub const fn mutation(&self) -> &Mutation<I, O> {
        &self.mutation
    }

    /// Applies the speculative edit. Waits for any other optimistic mutation
    /// on the same store to settle first.
    pub async fn begin(&self, input: I) -> PendingMutation<I, O> {
        let store = self.mutation.store().clone();
        let guard = store.optimistic_gate().lock_owned().await;
        let mut context = RollbackContext::default();

        for updater in &self.updaters {
            store.cancel_pending(updater.prefix());

            for (key, entry) in store.find_all_matching(updater.prefix()) {
                let Some(next) = updater.apply(&input, &entry.value) else {
                    continue;
                };
                context.record(key.clone(), entry.value);
                store.write(&key, Some(next));
            }
        }

        debug!(url = self.mutation.url(), entries = context.len(), "optimistic edit applied");

        PendingMutation {
            mutation: self.mutation.clone(),
            input,
            context,
            phase: OptimisticPhase::Pending,
            _gate: guard,
        }
    }

    /// Applies the edit, sends the command and commits or rolls back.
    ///
    /// # Errors
    ///
    /// Returns the failure of the command after the rollback.
    pub async fn execute(&self, input: I) -> Result<Option<O>, ApiError> {
        self.begin(input).await.run().await
    }

    /// Runs [`OptimisticMutation::execute`] as a command emitting `Loading`
    /// and then the outcome.
    pub fn mutate(&self, input: I) -> Command<MutationResult<Option<O>>> {
        let mutation = self.clone();

        Command::stream(
            stream::once(async { MutationResult::new(MutationState::Loading) })
                .chain(stream::once(async move {
                    MutationResult::from(mutation.execute(input).await)
                })),
        )
    }
}

/// An optimistic mutation whose edit is applied and whose command has not
/// settled yet. Holds the store's optimistic gate.
pub struct PendingMutation<I, O> {
    mutation: Mutation<I, O>,
    input: I,
    context: RollbackContext,
    phase: OptimisticPhase,
    _gate: OwnedMutexGuard<()>,
}

impl<I, O> fmt::Debug for PendingMutation<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingMutation")
            .field("mutation", &self.mutation)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl<I, O> PendingMutation<I, O>
where
    I: Serialize + Send + Sync + 'static,
    O: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub const fn context(&self) -> &RollbackContext {
        &self.context
    }

    /// Sends the command and settles the edit.
    ///
    /// # Errors
    ///
    /// Returns the failure of the command after the rollback.
    pub async fn run(self) -> Result<Option<O>, ApiError> {
        match self.mutation.send(&self.input, &CancellationToken::new()).await {
            Ok(data) => {
                self.commit(data.as_ref());
                Ok(data)
            }
            Err(error) => {
                self.rollback(&error);
                Err(error)
            }
        }
    }

    /// Keeps the edit and runs the success path of the mutation.
    pub fn commit(mut self, data: Option<&O>) -> OptimisticPhase {
        self.phase = OptimisticPhase::Committed;
        self.mutation.succeed(&self.input, data);
        debug!(url = self.mutation.url(), "optimistic edit committed");
        self.phase
    }

    /// Restores every snapshot, then runs the failure path of the mutation.
    pub fn rollback(mut self, error: &ApiError) -> OptimisticPhase {
        self.phase = OptimisticPhase::RolledBack;
        warn!(
            url = self.mutation.url(),
            entries = self.context.len(),
            "rolling back optimistic edit"
        );
        self.context.restore(self.mutation.store().as_ref());
        self.mutation.fail(&self.input, error);
        self.phase
    }
}

// Dropped before settling (a cancelled `run`, a dropped command stream): the
// outcome is unknown, so the edit is undone. The gate is released after this.
impl<I, O> Drop for PendingMutation<I, O> {
    fn drop(&mut self) {
        if self.phase != OptimisticPhase::Pending {
            return;
        }
        warn!(
            url = self.mutation.url(),
            entries = self.context.len(),
            "optimistic mutation dropped before settling, restoring"
        );
        self.context.restore(self.mutation.store().as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryClient;
    use crate::query::store::CacheStoreExt;

    #[test]
    fn test_rollback_context_keeps_first_snapshot() {
        let client = QueryClient::new();
        let key = CacheKey::new("/x");

        let mut context = RollbackContext::default();
        context.record(key.clone(), Arc::new(1));
        context.record(key.clone(), Arc::new(2));
        assert_eq!(context.len(), 1);

        client.set(&key, 99);
        context.restore(&client);
        assert_eq!(client.get::<i32>(&key), Some(1));
    }

    #[test]
    fn test_updater_skips_other_types() {
        let updater = CacheUpdater::new::<i32, _>("/x", |delta: &i32, current| current + delta);

        let number: CacheValue = Arc::new(1);
        let text: CacheValue = Arc::new("one".to_string());

        let updated = updater.apply(&2, &number).expect("applies to i32");
        assert_eq!(updated.downcast_ref::<i32>(), Some(&3));
        assert!(updater.apply(&2, &text).is_none());
    }
}
