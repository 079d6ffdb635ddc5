//! Long-lived message sources.
//!
//! Queries are exposed as [`SubscriptionSource`]s: a host subscribes once and
//! receives every state change of the query as a message. Two sources with
//! the same [`SubscriptionId`] describe the same stream, so hosts can diff
//! their subscription lists between updates and keep existing streams alive.

use std::any::TypeId;

use futures::StreamExt;
use futures::stream::BoxStream;

/// Identity of a subscription: the source type plus a hash of its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    type_id: TypeId,
    hash: u64,
}

impl SubscriptionId {
    /// Creates the id of a `T` source whose parameters hash to `hash`.
    #[must_use]
    pub fn of<T: 'static>(hash: u64) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            hash,
        }
    }
}

/// Something that can be subscribed to.
pub trait SubscriptionSource: Send + 'static {
    type Output: Send + 'static;

    /// Creates the stream. Streams are cold: nothing happens until polled.
    fn stream(&self) -> BoxStream<'static, Self::Output>;

    fn id(&self) -> SubscriptionId;
}

/// A type-erased subscription producing `Msg`.
///
/// # Example
///
/// ```rust,ignore
/// let sub = Subscription::new(Query::fetch(api, store, "/api/plants", FetchOptions::new()))
///     .map(Message::Plants);
/// ```
pub struct Subscription<Msg: Send + 'static> {
    id: SubscriptionId,
    stream: BoxStream<'static, Msg>,
}

impl<Msg: Send + 'static> Subscription<Msg> {
    pub fn new(source: impl SubscriptionSource<Output = Msg>) -> Self {
        Self {
            id: source.id(),
            stream: source.stream(),
        }
    }

    /// Converts the messages of this subscription. The id is kept.
    pub fn map<T: Send + 'static>(self, f: impl Fn(Msg) -> T + Send + 'static) -> Subscription<T> {
        Subscription {
            id: self.id,
            stream: self.stream.map(f).boxed(),
        }
    }

    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn into_stream(self) -> BoxStream<'static, Msg> {
        self.stream
    }
}
