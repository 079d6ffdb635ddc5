use std::fmt;

use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

/// The HTTP methods issued by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    /// Returns the method name as sent on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Converts to the transport's method type.
    #[must_use]
    pub fn to_method(self) -> Method {
        match self {
            Self::Get => Method::GET,
            Self::Post => Method::POST,
            Self::Put => Method::PUT,
            Self::Delete => Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Method, headers and body of one request.
///
/// Every request starts with `Content-Type: application/json`; headers
/// supplied later replace it.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    method: HttpMethod,
    headers: HeaderMap,
    body: Option<String>,
}

impl RequestOptions {
    /// Creates options for `method` with the default JSON content type.
    #[must_use]
    pub fn new(method: HttpMethod) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Self {
            method,
            headers,
            body: None,
        }
    }

    /// Sets a single header, replacing any existing value.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Merges `headers` on top of the current ones. Names present in both
    /// take the values from `headers`.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Sets the serialized request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub const fn method(&self) -> HttpMethod {
        self.method
    }

    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }
}

/// A fully built request: target URL plus options.
///
/// Descriptors are immutable once built and constructed fresh per call.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    url: String,
    options: RequestOptions,
}

impl RequestDescriptor {
    #[must_use]
    pub fn new(url: impl Into<String>, options: RequestOptions) -> Self {
        Self {
            url: url.into(),
            options,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub const fn options(&self) -> &RequestOptions {
        &self.options
    }

    pub const fn method(&self) -> HttpMethod {
        self.options.method
    }

    pub const fn headers(&self) -> &HeaderMap {
        &self.options.headers
    }

    pub fn body(&self) -> Option<&str> {
        self.options.body()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::IF_NONE_MATCH;

    #[test]
    fn test_default_content_type() {
        let options = RequestOptions::new(HttpMethod::Get);
        assert_eq!(
            options.headers().get(CONTENT_TYPE),
            Some(&HeaderValue::from_static("application/json"))
        );
        assert!(options.body().is_none());
    }

    #[test]
    fn test_caller_headers_override_defaults() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        let options = RequestOptions::new(HttpMethod::Post)
            .with_header(IF_NONE_MATCH, HeaderValue::from_static("\"v1\""))
            .with_headers(headers);

        assert_eq!(
            options.headers().get(CONTENT_TYPE),
            Some(&HeaderValue::from_static("text/plain"))
        );
        assert_eq!(
            options.headers().get(IF_NONE_MATCH),
            Some(&HeaderValue::from_static("\"v1\""))
        );
    }

    #[test]
    fn test_method_names() {
        assert_eq!(HttpMethod::Get.to_string(), "GET");
        assert_eq!(HttpMethod::Delete.as_str(), "DELETE");
        assert_eq!(HttpMethod::Put.to_method(), Method::PUT);
    }
}
