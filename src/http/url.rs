//! Request URL helpers.

use std::borrow::Cow;

use serde_json::Value;
use url::form_urlencoded;

use crate::params::{Params, is_empty_value};

/// Encodes `params` as a query string, without the leading `?`.
///
/// Empty values are skipped. Arrays expand to `name[index]=value`, skipping
/// empty elements but keeping the original indexes.
#[must_use]
pub fn to_query_string(params: &Params) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());

    for (name, value) in params.iter() {
        match value {
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    if let Some(text) = scalar_text(item) {
                        serializer.append_pair(&format!("{name}[{index}]"), &text);
                    }
                }
            }
            other => {
                if let Some(text) = scalar_text(other) {
                    serializer.append_pair(name, &text);
                }
            }
        }
    }

    serializer.finish()
}

fn scalar_text(value: &Value) -> Option<Cow<'_, str>> {
    if is_empty_value(value) {
        return None;
    }

    match value {
        Value::String(text) => Some(Cow::Borrowed(text)),
        other => Some(Cow::Owned(other.to_string())),
    }
}

/// Appends the query string built from `params` to `url`.
///
/// ```
/// use sprig::http::url::build_url;
/// use sprig::params::Params;
///
/// let params = Params::new().with("query", "sword fern").with("tag", "");
/// assert_eq!(build_url("/api/plants/search", Some(&params)), "/api/plants/search?query=sword+fern");
/// assert_eq!(build_url("/api/plants", None), "/api/plants");
/// ```
#[must_use]
pub fn build_url(url: &str, params: Option<&Params>) -> String {
    let query = params.map(to_query_string).unwrap_or_default();

    if query.is_empty() {
        url.to_string()
    } else {
        format!("{url}?{query}")
    }
}

/// Strips the query string from `url`.
#[must_use]
pub fn remove_parameters(url: &str) -> &str {
    url.find('?').map_or(url, |index| &url[..index])
}

/// Returns the route part of `url`: the base URL is stripped from absolute
/// `http://` URLs, then the query string is removed.
#[must_use]
pub fn extract_route<'a>(url: &'a str, base_url: &str) -> &'a str {
    let route = if url.starts_with("http://") {
        url.strip_prefix(base_url).unwrap_or(url)
    } else {
        url
    };

    remove_parameters(route)
}
