//! Scripted transport for tests and demos.
//!
//! [`MockTransport`] answers requests from per-route queues instead of the
//! network, so classification, caching and mutations can be exercised
//! deterministically.
//!
//! # Basic Usage
//!
//! ```
//! use sprig::http::mock::{MockResponse, MockTransport};
//! use sprig::http::{ApiClient, HttpMethod};
//!
//! let transport = MockTransport::new();
//! transport.on(HttpMethod::Get, "/api/plants", MockResponse::json(200, r#"{"data":[]}"#));
//!
//! let api = ApiClient::with_transport(transport.clone());
//! ```
//!
//! Each route replays its queued responses in order; the last one repeats
//! for every later request. Requests to unknown routes fail like an
//! unreachable host.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tokio::sync::Notify;

use super::request::{HttpMethod, RequestDescriptor};
use super::transport::{RawResponse, Transport, TransportError};

/// One scripted response.
#[derive(Clone)]
pub struct MockResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
    failure: Option<String>,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
}

impl MockResponse {
    fn with_status(status: u16) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: HeaderMap::new(),
            body: String::new(),
            failure: None,
            delay: None,
            gate: None,
        }
    }

    /// A response with an `application/json` body.
    #[must_use]
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        let mut response = Self::with_status(status);
        response.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        response.body = body.into();
        response
    }

    /// A response with a `text/plain` body.
    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        let mut response = Self::with_status(status);
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        response.body = body.into();
        response
    }

    /// A response without body or content type.
    #[must_use]
    pub fn empty(status: u16) -> Self {
        Self::with_status(status)
    }

    /// A failure below HTTP, such as a refused connection.
    #[must_use]
    pub fn network_error(message: impl Into<String>) -> Self {
        let mut response = Self::with_status(500);
        response.failure = Some(message.into());
        response
    }

    /// Adds a response header. Invalid names or values are ignored.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Holds the response until `gate` is notified.
    #[must_use]
    pub fn held_by(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockResponse")
            .field("status", &self.status)
            .field("body", &self.body)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

/// A [`Transport`] that replays scripted responses and records requests.
///
/// Clones share routes and the request log.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

#[derive(Debug, Default)]
struct MockInner {
    routes: DashMap<String, VecDeque<MockResponse>>,
    requests: Mutex<Vec<RequestDescriptor>>,
}

fn route(method: HttpMethod, url: &str) -> String {
    format!("{method} {url}")
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `response` for `method url`.
    pub fn on(&self, method: HttpMethod, url: &str, response: MockResponse) -> &Self {
        self.inner
            .routes
            .entry(route(method, url))
            .or_default()
            .push_back(response);
        self
    }

    /// Every request sent so far, in order.
    pub fn requests(&self) -> Vec<RequestDescriptor> {
        self.inner
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests sent to `method url`.
    pub fn request_count(&self, method: HttpMethod, url: &str) -> usize {
        self.inner
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|request| request.method() == method && request.url() == url)
            .count()
    }

    fn next_response(&self, key: &str) -> Option<MockResponse> {
        let mut queue = self.inner.routes.get_mut(key)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl Transport for MockTransport {
    fn send(
        &self,
        request: &RequestDescriptor,
    ) -> BoxFuture<'static, Result<RawResponse, TransportError>> {
        self.inner
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let key = route(request.method(), request.url());
        let response = self.next_response(&key);

        async move {
            let Some(response) = response else {
                return Err(TransportError::Unreachable(format!(
                    "no mock response for {key}"
                )));
            };

            if let Some(gate) = &response.gate {
                gate.notified().await;
            }
            if let Some(delay) = response.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(message) = response.failure {
                return Err(TransportError::Unreachable(message));
            }

            let body = response.body;
            Ok(RawResponse {
                status: response.status,
                status_text: response
                    .status
                    .canonical_reason()
                    .unwrap_or_default()
                    .to_string(),
                headers: response.headers,
                body: async move { Ok(body) }.boxed(),
            })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::RequestOptions;

    fn get(url: &str) -> RequestDescriptor {
        RequestDescriptor::new(url, RequestOptions::new(HttpMethod::Get))
    }

    #[tokio::test]
    async fn test_queue_replays_last_response() {
        let transport = MockTransport::new();
        transport
            .on(HttpMethod::Get, "/x", MockResponse::text(200, "first"))
            .on(HttpMethod::Get, "/x", MockResponse::text(200, "second"));

        let mut bodies = Vec::new();
        for _ in 0..3 {
            let raw = transport.send(&get("/x")).await.expect("route exists");
            bodies.push(raw.body.await.expect("body"));
        }

        assert_eq!(bodies, ["first", "second", "second"]);
        assert_eq!(transport.request_count(HttpMethod::Get, "/x"), 3);
    }

    #[tokio::test]
    async fn test_unknown_route_is_unreachable() {
        let transport = MockTransport::new();
        let result = transport.send(&get("/missing")).await;
        assert!(matches!(result, Err(TransportError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_held_response_waits_for_gate() {
        let gate = Arc::new(Notify::new());
        let transport = MockTransport::new();
        transport.on(
            HttpMethod::Get,
            "/x",
            MockResponse::empty(204).held_by(gate.clone()),
        );

        let pending = tokio::spawn({
            let transport = transport.clone();
            async move { transport.send(&get("/x")).await }
        });

        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        gate.notify_one();
        let raw = pending.await.expect("task").expect("response");
        assert_eq!(raw.status, StatusCode::NO_CONTENT);
    }
}
