use std::fmt;
use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::header::{ETAG, HeaderMap, HeaderName, HeaderValue, IF_NONE_MATCH};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::{ClientConfig, ConfigError};
use super::envelope::{ApiCommandResponse, ApiGetResponse, Fetched};
use super::error::{ApiError, ClientError, ErrorReason};
use super::etag::{EtagStore, MemoryEtagStore};
use super::request::{HttpMethod, RequestDescriptor, RequestOptions};
use super::response::{BodyFuture, HttpResponse, ResponseMeta, ResponseText};
use super::transport::{RawResponse, ReqwestTransport, Transport, TransportError};

/// Options for a GET request.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub use_etag: bool,
    /// With `use_etag`, record the response ETag but send no `If-None-Match`.
    pub record_etag_only: bool,
    pub headers: HeaderMap,
    pub cancel: CancellationToken,
}

impl GetOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends `If-None-Match` from the ETag table and records new ETags.
    #[must_use]
    pub const fn with_etag(mut self, use_etag: bool) -> Self {
        self.use_etag = use_etag;
        self
    }

    /// Records the ETag of the response without asking for a 304. Used when
    /// there is no cached value a 304 could refer to.
    #[must_use]
    pub const fn with_etag_record_only(mut self, record_only: bool) -> Self {
        self.record_etag_only = record_only;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Options for a POST, PUT or DELETE request.
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    pub headers: HeaderMap,
    pub cancel: CancellationToken,
}

impl CommandOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Executes requests and classifies every outcome.
///
/// Cloning is cheap; clones share the transport and the ETag table.
///
/// # Example
///
/// ```no_run
/// use sprig::http::{ApiClient, ClientConfig, Fetched, GetOptions};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let api = ApiClient::new(&ClientConfig::new("https://plants.example"))?;
///
/// match api.fetch::<Vec<String>>("/api/plants", GetOptions::new()).await? {
///     Fetched::Data(plants) => println!("{} plants", plants.len()),
///     Fetched::Empty | Fetched::NotModified => println!("nothing new"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    etags: Arc<dyn EtagStore>,
}

impl ApiClient {
    /// Creates a client over a [`ReqwestTransport`] with an in-memory ETag table.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        Ok(Self::with_transport(ReqwestTransport::new(config)?))
    }

    pub fn with_transport(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
            etags: Arc::new(MemoryEtagStore::new()),
        }
    }

    #[must_use]
    pub fn with_etag_store(mut self, etags: impl EtagStore + 'static) -> Self {
        self.etags = Arc::new(etags);
        self
    }

    pub fn etags(&self) -> &dyn EtagStore {
        self.etags.as_ref()
    }

    /// Sends `request` and classifies the outcome. Never fails: transport
    /// errors, bad statuses and unreadable bodies all come back as
    /// [`HttpResponse::Failure`].
    ///
    /// Cancelling `cancel` aborts the call, which is reported as
    /// [`ErrorReason::NetworkError`].
    pub async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestDescriptor,
        cancel: &CancellationToken,
    ) -> HttpResponse<T> {
        let request = Arc::new(request);
        debug!(method = %request.method(), url = request.url(), "sending request");

        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TransportError::Aborted),
            result = self.transport.send(&request) => result,
        };

        let raw = match sent {
            Ok(raw) => raw,
            Err(error) => return failed(ClientError::network(request, &error), None, None),
        };

        let content_type = raw.content_type().map(str::to_owned);
        let RawResponse {
            status,
            status_text,
            headers,
            body,
        } = raw;
        let meta = ResponseMeta {
            status,
            status_text,
            headers,
        };

        debug!(url = request.url(), status = status.as_u16(), "received response");

        if status == StatusCode::NOT_MODIFIED {
            return HttpResponse::success(meta, None);
        }

        if status.is_success() {
            return read_success(request, meta, content_type, body, cancel).await;
        }

        if status == StatusCode::BAD_REQUEST {
            return read_bad_request(request, meta, content_type, body, cancel).await;
        }

        let reason = ErrorReason::from_status(status).unwrap_or(ErrorReason::RequestError);
        let error = ClientError::from_status(reason, request, &meta, ResponseText::deferred(body));
        failed(error, Some(meta), None)
    }

    /// Sends a GET to `url`.
    ///
    /// With [`GetOptions::use_etag`], a known ETag for `url` is sent as
    /// `If-None-Match` (caller headers still win), and the `ETag` of a
    /// successful non-304 response replaces the stored one.
    pub async fn get<T: DeserializeOwned>(&self, url: &str, options: GetOptions) -> HttpResponse<T> {
        let GetOptions {
            use_etag,
            record_etag_only,
            headers,
            cancel,
        } = options;

        let mut request = RequestOptions::new(HttpMethod::Get);
        if use_etag && !record_etag_only {
            if let Some(value) = self
                .etags
                .get(url)
                .and_then(|etag| HeaderValue::from_str(&etag).ok())
            {
                request = request.with_header(IF_NONE_MATCH, value);
            }
        }
        let request = request.with_headers(headers);

        let response = self
            .execute::<T>(RequestDescriptor::new(url, request), &cancel)
            .await;

        if use_etag && response.is_ok() && !response.is_not_modified() {
            if let Some(etag) = response.header(ETAG) {
                debug!(url, etag, "storing etag");
                self.etags.set(url, etag.to_string());
            }
        }

        response
    }

    /// Sends `body` as JSON to `url` with a non-GET `method`.
    pub async fn command<T, B>(
        &self,
        url: &str,
        method: HttpMethod,
        body: &B,
        options: CommandOptions,
    ) -> HttpResponse<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = RequestOptions::new(method).with_headers(options.headers);

        match serde_json::to_string(body) {
            Ok(json) => {
                let descriptor = RequestDescriptor::new(url, request.with_body(json));
                self.execute(descriptor, &options.cancel).await
            }
            Err(error) => {
                let descriptor = Arc::new(RequestDescriptor::new(url, request));
                failed(ClientError::serialization(descriptor, &error), None, None)
            }
        }
    }

    /// GETs an [`ApiGetResponse`] envelope and unwraps its `data`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] with the classified failure.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        url: &str,
        options: GetOptions,
    ) -> Result<Fetched<T>, ApiError> {
        let response = self.get::<ApiGetResponse<T>>(url, options).await;

        if response.is_not_modified() {
            return Ok(Fetched::NotModified);
        }

        match response.into_result()? {
            Some(ApiGetResponse { data: Some(data) }) => Ok(Fetched::Data(data)),
            Some(ApiGetResponse { data: None }) | None => Ok(Fetched::Empty),
        }
    }

    /// Sends a command and applies the validation channel of its
    /// [`ApiCommandResponse`] envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] for a failed call, then
    /// [`ApiError::Validation`] when a successful body carries
    /// `validationErrors`.
    pub async fn send_command<T, B>(
        &self,
        url: &str,
        method: HttpMethod,
        body: &B,
        options: CommandOptions,
    ) -> Result<Option<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self
            .command::<ApiCommandResponse<T>, B>(url, method, body, options)
            .await;

        match response.into_result()? {
            Some(envelope) => envelope.into_result(),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient").finish_non_exhaustive()
    }
}

fn failed<T>(error: ClientError, meta: Option<ResponseMeta>, data: Option<T>) -> HttpResponse<T> {
    warn!(
        reason = %error.reason(),
        url = error.request().url(),
        status = error.status().map(|status| status.as_u16()),
        "request failed: {error}"
    );
    HttpResponse::failure(error, meta, data)
}

fn is_json(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

async fn read_body(body: BodyFuture, cancel: &CancellationToken) -> Result<String, TransportError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(TransportError::Aborted),
        text = body => text,
    }
}

async fn read_success<T: DeserializeOwned>(
    request: Arc<RequestDescriptor>,
    meta: ResponseMeta,
    content_type: Option<String>,
    body: BodyFuture,
    cancel: &CancellationToken,
) -> HttpResponse<T> {
    // Without a content type the server sent nothing worth reading.
    let Some(content_type) = content_type else {
        return HttpResponse::success(meta, None);
    };

    let text = match read_body(body, cancel).await {
        Ok(text) => text,
        Err(error) => return failed(ClientError::network(request, &error), Some(meta), None),
    };

    if text.is_empty() || text == "OK" {
        return HttpResponse::success(meta, None);
    }

    if !is_json(&content_type) {
        let error = ClientError::unsupported_content_type(
            request,
            &meta,
            &content_type,
            ResponseText::buffered(text),
        );
        return failed(error, Some(meta), None);
    }

    match serde_json::from_str::<T>(&text) {
        Ok(data) => HttpResponse::success(meta, Some(data)),
        Err(error) => {
            let error = ClientError::malformed_json(request, &error, ResponseText::buffered(text));
            failed(error, Some(meta), None)
        }
    }
}

async fn read_bad_request<T: DeserializeOwned>(
    request: Arc<RequestDescriptor>,
    meta: ResponseMeta,
    content_type: Option<String>,
    body: BodyFuture,
    cancel: &CancellationToken,
) -> HttpResponse<T> {
    let text = match content_type {
        Some(_) => match read_body(body, cancel).await {
            Ok(text) => text,
            Err(error) => return failed(ClientError::network(request, &error), Some(meta), None),
        },
        None => String::new(),
    };

    let json = content_type.as_deref().is_some_and(is_json);
    if text.is_empty() || !json {
        let error = ClientError::from_status(
            ErrorReason::BadRequest,
            request,
            &meta,
            ResponseText::buffered(text),
        );
        return failed(error, Some(meta), None);
    }

    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(value) => {
            // The partial body may not fit `T`; the error is what matters then.
            let data = serde_json::from_value::<T>(value).ok();
            let error = ClientError::from_status(
                ErrorReason::BadRequest,
                request,
                &meta,
                ResponseText::buffered(text),
            );
            failed(error, Some(meta), data)
        }
        Err(error) => {
            let error = ClientError::malformed_json(request, &error, ResponseText::buffered(text));
            failed(error, Some(meta), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::{MockResponse, MockTransport};
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Plant {
        id: String,
        name: String,
    }

    fn client(transport: &MockTransport) -> ApiClient {
        ApiClient::with_transport(transport.clone())
    }

    #[test]
    fn test_is_json() {
        assert!(is_json("application/json"));
        assert!(is_json("application/json; charset=utf-8"));
        assert!(is_json("application/problem+json"));
        assert!(!is_json("text/plain"));
    }

    #[tokio::test]
    async fn test_json_success() {
        let transport = MockTransport::new();
        transport.on(
            HttpMethod::Get,
            "/api/plants/1",
            MockResponse::json(200, r#"{"id":"1","name":"Fern"}"#),
        );

        let response = client(&transport)
            .get::<Plant>("/api/plants/1", GetOptions::new())
            .await;

        assert!(response.is_ok());
        assert_eq!(response.data().map(|p| p.name.as_str()), Some("Fern"));
    }

    #[tokio::test]
    async fn test_missing_content_type_is_empty() {
        let transport = MockTransport::new();
        transport.on(HttpMethod::Get, "/x", MockResponse::empty(200));

        let response = client(&transport).get::<Plant>("/x", GetOptions::new()).await;
        assert!(response.is_ok());
        assert!(response.data().is_none());
    }

    #[tokio::test]
    async fn test_ok_acknowledgement_is_empty() {
        let transport = MockTransport::new();
        transport.on(HttpMethod::Post, "/x", MockResponse::text(200, "OK"));

        let response = client(&transport)
            .command::<Plant, _>("/x", HttpMethod::Post, &(), CommandOptions::new())
            .await;
        assert!(response.is_ok());
        assert!(response.data().is_none());
    }

    #[tokio::test]
    async fn test_non_json_body_is_unsupported() {
        let transport = MockTransport::new();
        transport.on(HttpMethod::Get, "/x", MockResponse::text(200, "<html/>"));

        let response = client(&transport).get::<Plant>("/x", GetOptions::new()).await;
        let error = response.error().expect("should fail");
        assert_eq!(error.reason(), ErrorReason::UnsupportedContentType);
        assert_eq!(error.response_text().await, Some("<html/>"));
    }

    #[tokio::test]
    async fn test_unknown_status_is_request_error() {
        let transport = MockTransport::new();
        transport.on(HttpMethod::Get, "/x", MockResponse::text(418, "teapot"));

        let response = client(&transport).get::<Plant>("/x", GetOptions::new()).await;
        let error = response.error().expect("should fail");
        assert_eq!(error.reason(), ErrorReason::RequestError);
        assert_eq!(error.status(), Some(StatusCode::IM_A_TEAPOT));
        assert_eq!(error.response_text().await, Some("teapot"));
    }

    #[tokio::test]
    async fn test_send_command_surfaces_validation_errors() {
        let transport = MockTransport::new();
        transport.on(
            HttpMethod::Post,
            "/api/plants",
            MockResponse::json(
                200,
                r#"{"validationErrors":[{"field":"name","message":"required","type":"required"}]}"#,
            ),
        );

        let result = client(&transport)
            .send_command::<Plant, _>("/api/plants", HttpMethod::Post, &(), CommandOptions::new())
            .await;

        let error = result.expect_err("should fail validation");
        assert_eq!(error.validation_errors().map(<[_]>::len), Some(1));
    }

    #[tokio::test]
    async fn test_command_sends_json_body() {
        let transport = MockTransport::new();
        transport.on(HttpMethod::Put, "/api/plants/1", MockResponse::text(200, "OK"));

        let body = serde_json::json!({ "name": "Moss" });
        let _ = client(&transport)
            .command::<Plant, _>("/api/plants/1", HttpMethod::Put, &body, CommandOptions::new())
            .await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].body(), Some(r#"{"name":"Moss"}"#));
        assert_eq!(requests[0].method(), HttpMethod::Put);
    }
}
