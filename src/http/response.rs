use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use reqwest::StatusCode;
use reqwest::header::{AsHeaderName, HeaderMap};
use tokio::sync::OnceCell;

use super::error::ClientError;
use super::transport::TransportError;

/// A response body that has not been read yet.
pub type BodyFuture = BoxFuture<'static, Result<String, TransportError>>;

/// Lazily-read response text.
///
/// Error values keep one of these instead of an eagerly buffered body, so the
/// read cost is only paid when a caller actually asks for diagnostics. Bodies
/// already read during classification are stored as buffered text.
#[derive(Clone)]
pub struct ResponseText {
    inner: Arc<TextInner>,
}

struct TextInner {
    text: OnceCell<String>,
    pending: Mutex<Option<BodyFuture>>,
}

impl ResponseText {
    /// Wraps text that has already been read.
    #[must_use]
    pub fn buffered(text: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TextInner {
                text: OnceCell::new_with(Some(text.into())),
                pending: Mutex::new(None),
            }),
        }
    }

    /// Wraps an unread body; it is read on the first call to [`ResponseText::get`].
    #[must_use]
    pub fn deferred(body: BodyFuture) -> Self {
        Self {
            inner: Arc::new(TextInner {
                text: OnceCell::new(),
                pending: Mutex::new(Some(body)),
            }),
        }
    }

    /// Returns the body text, reading it on first use.
    ///
    /// A body that fails to read yields an empty string.
    pub async fn get(&self) -> &str {
        self.inner
            .text
            .get_or_init(|| async {
                let pending = self
                    .inner
                    .pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();

                match pending {
                    Some(body) => body.await.unwrap_or_else(|error| {
                        tracing::warn!(%error, "failed to read response body");
                        String::new()
                    }),
                    None => String::new(),
                }
            })
            .await
    }

    /// Returns the text if it has already been read.
    pub fn peek(&self) -> Option<&str> {
        self.inner.text.get().map(String::as_str)
    }
}

impl fmt::Debug for ResponseText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseText")
            .field("text", &self.peek())
            .finish_non_exhaustive()
    }
}

/// Transport metadata of a received response.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
}

impl ResponseMeta {
    /// Returns a header value as text, if present and valid UTF-8.
    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// The uniform outcome of one HTTP call.
///
/// Exactly one of success or failure is populated. A failure may still carry
/// partial data (a parseable `400` body) and the response metadata when a
/// response was received at all.
#[derive(Debug, Clone)]
pub enum HttpResponse<T> {
    Success {
        data: Option<T>,
        meta: ResponseMeta,
    },
    Failure {
        error: ClientError,
        data: Option<T>,
        meta: Option<ResponseMeta>,
    },
}

impl<T> HttpResponse<T> {
    pub(crate) const fn success(meta: ResponseMeta, data: Option<T>) -> Self {
        Self::Success { data, meta }
    }

    pub(crate) const fn failure(
        error: ClientError,
        meta: Option<ResponseMeta>,
        data: Option<T>,
    ) -> Self {
        Self::Failure { error, data, meta }
    }

    /// Returns `true` for the success variant.
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns `true` for a successful `304 Not Modified`.
    pub fn is_not_modified(&self) -> bool {
        matches!(self, Self::Success { meta, .. } if meta.status == StatusCode::NOT_MODIFIED)
    }

    /// Returns the decoded body, including partial data on a failure.
    pub const fn data(&self) -> Option<&T> {
        match self {
            Self::Success { data, .. } | Self::Failure { data, .. } => data.as_ref(),
        }
    }

    /// Returns the classified error of a failure.
    pub const fn error(&self) -> Option<&ClientError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
        }
    }

    /// Returns the response metadata, when a response was received.
    pub const fn meta(&self) -> Option<&ResponseMeta> {
        match self {
            Self::Success { meta, .. } => Some(meta),
            Self::Failure { meta, .. } => meta.as_ref(),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.meta().map(|meta| meta.status)
    }

    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.meta().and_then(|meta| meta.header(name))
    }

    /// Converts into a `Result`, dropping metadata and partial failure data.
    pub fn into_result(self) -> Result<Option<T>, ClientError> {
        match self {
            Self::Success { data, .. } => Ok(data),
            Self::Failure { error, .. } => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_buffered_text() {
        let text = ResponseText::buffered("hello");
        assert_eq!(text.peek(), Some("hello"));
        assert_eq!(text.get().await, "hello");
    }

    #[tokio::test]
    async fn test_deferred_text_is_read_once() {
        let text = ResponseText::deferred(async { Ok("late".to_string()) }.boxed());
        assert_eq!(text.peek(), None);

        let clone = text.clone();
        assert_eq!(text.get().await, "late");
        assert_eq!(clone.peek(), Some("late"));
        assert_eq!(clone.get().await, "late");
    }

    #[tokio::test]
    async fn test_deferred_read_failure_yields_empty_text() {
        let text = ResponseText::deferred(async { Err(TransportError::Aborted) }.boxed());
        assert_eq!(text.get().await, "");
    }
}
