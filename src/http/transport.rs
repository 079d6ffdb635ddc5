//! The network seam of the client.
//!
//! [`ApiClient`](super::ApiClient) never talks to the network directly; it
//! hands a [`RequestDescriptor`] to a [`Transport`] and classifies whatever
//! comes back. Production code uses [`ReqwestTransport`]; tests and demos use
//! [`MockTransport`](super::mock::MockTransport).

use std::fmt;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use thiserror::Error;

use super::config::{ClientConfig, ConfigError};
use super::request::RequestDescriptor;
use super::response::BodyFuture;

/// A failure below HTTP: DNS, refused connections, timeouts, aborts.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("request was aborted")]
    Aborted,

    #[error("{0}")]
    Unreachable(String),
}

/// A received response whose body has not been read yet.
pub struct RawResponse {
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: BodyFuture,
}

impl RawResponse {
    /// Returns the `Content-Type` header, if present.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Sends one request and returns the raw response.
pub trait Transport: Send + Sync {
    fn send(&self, request: &RequestDescriptor)
    -> BoxFuture<'static, Result<RawResponse, TransportError>>;
}

/// A [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    /// Builds a transport from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the underlying
    /// client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .default_headers(config.header_map()?)
            .build()?;

        Ok(Self::from_client(client, &config.base_url))
    }

    /// Wraps an existing client. Relative request URLs are resolved against `base_url`.
    #[must_use]
    pub fn from_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}{}", self.base_url, url)
        }
    }
}

impl Transport for ReqwestTransport {
    fn send(
        &self,
        request: &RequestDescriptor,
    ) -> BoxFuture<'static, Result<RawResponse, TransportError>> {
        let mut builder = self
            .client
            .request(request.method().to_method(), self.resolve(request.url()))
            .headers(request.headers().clone());

        if let Some(body) = request.body() {
            builder = builder.body(body.to_string());
        }

        async move {
            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();

            Ok::<_, TransportError>(RawResponse {
                status,
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                headers,
                body: async move { response.text().await.map_err(TransportError::from) }.boxed(),
            })
        }
        .boxed()
    }
}
