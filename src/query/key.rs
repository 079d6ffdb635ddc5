use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::Value;

use crate::params::Params;

/// The address of a cache entry: an endpoint plus ordered parameter values.
///
/// Keys are compared structurally, so two equivalent queries always meet at
/// the same entry. A key without parts is a *bare* key; it is written as the
/// plain endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    endpoint: String,
    parts: Vec<Value>,
}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.endpoint.hash(state);
        self.parts.len().hash(state);
        // `Value` is not `Hash`; its JSON text is canonical for equal values.
        for part in &self.parts {
            part.to_string().hash(state);
        }
    }
}

impl CacheKey {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            parts: Vec::new(),
        }
    }

    /// Appends one part.
    #[must_use]
    pub fn with_part(mut self, part: impl Into<Value>) -> Self {
        self.parts.push(part.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn parts(&self) -> &[Value] {
        &self.parts
    }

    pub fn is_bare(&self) -> bool {
        self.parts.is_empty()
    }

    /// Returns `true` if `prefix` addresses this key or a family containing it:
    /// same endpoint, and `prefix`'s parts are a leading run of this key's.
    ///
    /// A bare key therefore matches every parameterized variant of its
    /// endpoint.
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.endpoint == prefix.endpoint && self.parts.starts_with(&prefix.parts)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parts.is_empty() {
            return f.write_str(&self.endpoint);
        }

        write!(f, "[{}", Value::String(self.endpoint.clone()))?;
        for part in &self.parts {
            write!(f, ",{part}")?;
        }
        f.write_str("]")
    }
}

impl From<&str> for CacheKey {
    fn from(endpoint: &str) -> Self {
        Self::new(endpoint)
    }
}

impl From<String> for CacheKey {
    fn from(endpoint: String) -> Self {
        Self::new(endpoint)
    }
}

/// Builds the cache key of `endpoint` queried with `params`.
///
/// Empty values (null and `""`) are dropped; the remaining values, not
/// names, follow the endpoint in insertion order. With nothing left the key
/// is bare.
///
/// ```
/// use sprig::params::Params;
/// use sprig::query::build_key;
///
/// let params = Params::new().with("query", "fern").with("tag", "").with("page", 2);
/// assert_eq!(build_key("/api/plants/search", Some(&params)).to_string(), r#"["/api/plants/search","fern",2]"#);
/// assert!(build_key("/api/plants", None).is_bare());
/// ```
#[must_use]
pub fn build_key(endpoint: &str, params: Option<&Params>) -> CacheKey {
    CacheKey {
        endpoint: endpoint.to_string(),
        parts: params
            .map(|params| params.non_empty_values().cloned().collect())
            .unwrap_or_default(),
    }
}
