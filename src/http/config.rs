use std::collections::BTreeMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use thiserror::Error;

/// Configuration for the production HTTP transport.
///
/// The struct deserializes from any serde format the host application uses
/// for its settings; missing fields fall back to [`ClientConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Prefix for relative request URLs. Empty means URLs are used as given.
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Headers attached to every request.
    pub default_headers: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout_ms: 30_000,
            default_headers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl ClientConfig {
    /// Creates a configuration targeting `base_url` with default settings.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Checks that every field holds a usable value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }

        if !self.base_url.is_empty() {
            let parsed = url::Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidValue {
                field: "base_url",
                reason: e.to_string(),
            })?;

            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidValue {
                    field: "base_url",
                    reason: format!("unsupported scheme '{}'", parsed.scheme()),
                });
            }
        }

        self.header_map().map(|_| ())
    }

    /// Builds the default header map.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a header name or value that
    /// is not valid HTTP.
    pub fn header_map(&self) -> Result<HeaderMap, ConfigError> {
        let mut headers = HeaderMap::with_capacity(self.default_headers.len());

        for (name, value) in &self.default_headers {
            let name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::InvalidValue {
                    field: "default_headers",
                    reason: format!("{name}: {e}"),
                })?;
            let value = HeaderValue::from_str(value).map_err(|e| ConfigError::InvalidValue {
                field: "default_headers",
                reason: format!("{name}: {e}"),
            })?;
            headers.insert(name, value);
        }

        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "");
        assert_eq!(config.request_timeout_ms, 30_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"base_url":"https://plants.example","default_headers":{"x-client":"sprig"}}"#,
        )
        .expect("config should deserialize");

        assert_eq!(config.base_url, "https://plants.example");
        assert_eq!(config.request_timeout_ms, 30_000);
        let headers = config.header_map().expect("headers should be valid");
        assert_eq!(headers.get("x-client").map(|v| v.as_bytes()), Some(&b"sprig"[..]));
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let result = serde_json::from_str::<ClientConfig>(r#"{"timeout":5}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ClientConfig::new("ftp://plants.example");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "base_url", .. })
        ));

        let config = ClientConfig::new("not a url");
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config
            .default_headers
            .insert("bad header".to_string(), "x".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "default_headers", .. })
        ));
    }
}
