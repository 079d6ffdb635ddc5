//! The failure taxonomy of the client.
//!
//! HTTP execution never raises: every outcome is classified into a
//! [`ClientError`] carrying one [`ErrorReason`] and returned as a value. The
//! query and mutation adapters then lift it into an [`ApiError`], which also
//! covers the business-level validation channel of command endpoints.

use std::fmt;
use std::sync::Arc;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::request::RequestDescriptor;
use super::response::{ResponseMeta, ResponseText};
use super::transport::TransportError;

/// Closed set of reasons an HTTP call can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorReason {
    BadGateway,
    BadRequest,
    ConcurrencyError,
    Forbidden,
    GatewayTimeout,
    InternalServerError,
    MalformedJson,
    NetworkError,
    NotFound,
    PreconditionFailed,
    RequestError,
    Unauthorized,
    UnsupportedContentType,
}

impl ErrorReason {
    /// Maps a non-success status to its dedicated reason.
    ///
    /// `400` is not mapped here because its body decides between
    /// `BadRequest` and `MalformedJson`. Unlisted codes return `None` and are
    /// reported as [`ErrorReason::RequestError`].
    #[must_use]
    pub fn from_status(status: StatusCode) -> Option<Self> {
        match status {
            StatusCode::UNAUTHORIZED => Some(Self::Unauthorized),
            StatusCode::FORBIDDEN => Some(Self::Forbidden),
            StatusCode::NOT_FOUND => Some(Self::NotFound),
            StatusCode::CONFLICT => Some(Self::ConcurrencyError),
            StatusCode::PRECONDITION_FAILED => Some(Self::PreconditionFailed),
            StatusCode::INTERNAL_SERVER_ERROR => Some(Self::InternalServerError),
            StatusCode::BAD_GATEWAY => Some(Self::BadGateway),
            StatusCode::GATEWAY_TIMEOUT => Some(Self::GatewayTimeout),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadGateway => "BadGateway",
            Self::BadRequest => "BadRequest",
            Self::ConcurrencyError => "ConcurrencyError",
            Self::Forbidden => "Forbidden",
            Self::GatewayTimeout => "GatewayTimeout",
            Self::InternalServerError => "InternalServerError",
            Self::MalformedJson => "MalformedJson",
            Self::NetworkError => "NetworkError",
            Self::NotFound => "NotFound",
            Self::PreconditionFailed => "PreconditionFailed",
            Self::RequestError => "RequestError",
            Self::Unauthorized => "Unauthorized",
            Self::UnsupportedContentType => "UnsupportedContentType",
        }
    }

    const fn status_message(self) -> &'static str {
        match self {
            Self::BadGateway => "Server responded with a 502 Bad Gateway.",
            Self::BadRequest => "Server responded with a 400 Bad Request.",
            Self::ConcurrencyError => "Server responded with a 409 Conflict.",
            Self::Forbidden => "Server responded with a 403 Forbidden.",
            Self::GatewayTimeout => {
                "Server responded with a 504 Gateway Timeout. The upstream server did not respond in time."
            }
            Self::InternalServerError => "Server responded with a 500 Internal Server Error.",
            Self::NotFound => "Server responded with a 404 Not Found.",
            Self::PreconditionFailed => "Server responded with a 412 Precondition Failed.",
            Self::Unauthorized => "Server responded with a 401 Unauthorized.",
            Self::MalformedJson
            | Self::NetworkError
            | Self::RequestError
            | Self::UnsupportedContentType => "An error occurred while sending the request.",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified HTTP failure.
///
/// `status` is present for every reason except `NetworkError` and
/// `MalformedJson`. When a body was received it is reachable through
/// [`ClientError::response_text`], read lazily.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ClientError {
    reason: ErrorReason,
    message: String,
    status: Option<StatusCode>,
    status_text: Option<String>,
    request: Arc<RequestDescriptor>,
    body: Option<ResponseText>,
}

impl ClientError {
    pub(crate) fn network(request: Arc<RequestDescriptor>, error: &TransportError) -> Self {
        Self {
            reason: ErrorReason::NetworkError,
            message: format!("Couldn't reach the server: {error}."),
            status: None,
            status_text: None,
            request,
            body: None,
        }
    }

    pub(crate) fn malformed_json(
        request: Arc<RequestDescriptor>,
        error: &serde_json::Error,
        body: ResponseText,
    ) -> Self {
        Self {
            reason: ErrorReason::MalformedJson,
            message: format!("Server responded with a malformed JSON body: {error}."),
            status: None,
            status_text: None,
            request,
            body: Some(body),
        }
    }

    pub(crate) fn unsupported_content_type(
        request: Arc<RequestDescriptor>,
        meta: &ResponseMeta,
        content_type: &str,
        body: ResponseText,
    ) -> Self {
        Self {
            reason: ErrorReason::UnsupportedContentType,
            message: format!("Server response Content-Type \"{content_type}\" is not supported."),
            status: Some(meta.status),
            status_text: Some(meta.status_text.clone()),
            request,
            body: Some(body),
        }
    }

    pub(crate) fn serialization(request: Arc<RequestDescriptor>, error: &serde_json::Error) -> Self {
        Self {
            reason: ErrorReason::RequestError,
            message: format!("Failed to serialize the request body: {error}."),
            status: None,
            status_text: None,
            request,
            body: None,
        }
    }

    /// Builds the error for a non-success status with a known or generic reason.
    pub(crate) fn from_status(
        reason: ErrorReason,
        request: Arc<RequestDescriptor>,
        meta: &ResponseMeta,
        body: ResponseText,
    ) -> Self {
        Self {
            reason,
            message: reason.status_message().to_string(),
            status: Some(meta.status),
            status_text: Some(meta.status_text.clone()),
            request,
            body: Some(body),
        }
    }

    pub const fn reason(&self) -> ErrorReason {
        self.reason
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn status_text(&self) -> Option<&str> {
        self.status_text.as_deref()
    }

    /// The request that produced this error.
    pub fn request(&self) -> &RequestDescriptor {
        &self.request
    }

    /// Returns `true` if a response body is available for diagnostics.
    pub const fn has_response_text(&self) -> bool {
        self.body.is_some()
    }

    /// Reads the raw response body, if one was received.
    pub async fn response_text(&self) -> Option<&str> {
        match &self.body {
            Some(body) => Some(body.get().await),
            None => None,
        }
    }
}

/// One business-level validation failure reported by a command endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// The reason reported by an [`ApiError`]: a transport reason, or the
/// validation channel layered on top of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorReason {
    Client(ErrorReason),
    ValidationError,
}

impl fmt::Display for ApiErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client(reason) => reason.fmt(f),
            Self::ValidationError => f.write_str("ValidationError"),
        }
    }
}

/// The error raised at the query and mutation boundary.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error(transparent)]
    Transport(#[from] ClientError),

    #[error("Validation failed: {}", join_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl ApiError {
    pub const fn reason(&self) -> ApiErrorReason {
        match self {
            Self::Transport(error) => ApiErrorReason::Client(error.reason()),
            Self::Validation(_) => ApiErrorReason::ValidationError,
        }
    }

    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Transport(error) => error.status(),
            Self::Validation(_) => None,
        }
    }

    pub fn validation_errors(&self) -> Option<&[ValidationError]> {
        match self {
            Self::Transport(_) => None,
            Self::Validation(errors) => Some(errors),
        }
    }

    /// Session loss. Must reach the application's global handler.
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self.reason(), ApiErrorReason::Client(ErrorReason::Unauthorized))
    }

    /// Returns `true` if retrying the same call may succeed.
    ///
    /// `Unauthorized` is fatal for the session and validation failures are
    /// deterministic, so neither is retryable.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(error) => !matches!(error.reason(), ErrorReason::Unauthorized),
            Self::Validation(_) => false,
        }
    }
}
