//! HTTP execution and error classification.
//!
//! [`ApiClient`] sends a [`RequestDescriptor`] through a [`Transport`] and
//! turns whatever happens into an [`HttpResponse`]: success with optional
//! data, or a [`ClientError`] carrying exactly one [`ErrorReason`].
//!
//! | Outcome | Result |
//! |---|---|
//! | transport failure or cancellation | `NetworkError`, no status |
//! | `304` | success, no data |
//! | `2xx` without content type, empty, or `"OK"` | success, no data |
//! | `2xx` JSON | success with data, or `MalformedJson` |
//! | `2xx` other content type | `UnsupportedContentType` |
//! | `400` | `BadRequest` with partial data, or `MalformedJson` |
//! | `401 403 404 409 412 500 502 504` | dedicated reason |
//! | any other status | `RequestError` |

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod etag;
pub mod mock;
pub mod request;
pub mod response;
pub mod transport;
pub mod url;

pub use client::{ApiClient, CommandOptions, GetOptions};
pub use config::{ClientConfig, ConfigError};
pub use envelope::{ApiCommandResponse, ApiGetResponse, Fetched, IdentityData};
pub use error::{ApiError, ApiErrorReason, ClientError, ErrorReason, ValidationError};
pub use etag::{EtagStore, MemoryEtagStore};
pub use request::{HttpMethod, RequestDescriptor, RequestOptions};
pub use response::{HttpResponse, ResponseMeta, ResponseText};
pub use transport::{RawResponse, ReqwestTransport, Transport, TransportError};
