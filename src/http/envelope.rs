//! Body shapes shared by every endpoint.

use serde::{Deserialize, Serialize};

use super::error::{ApiError, ValidationError};

/// Body of a GET endpoint: `{ data?: T }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiGetResponse<T> {
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

/// Body of a command endpoint: `{ data?: T, validationErrors?: [...] }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCommandResponse<T> {
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub validation_errors: Option<Vec<ValidationError>>,
}

impl<T> ApiCommandResponse<T> {
    /// Splits the validation channel from the payload.
    ///
    /// A present `validationErrors` array fails the command even when it is
    /// empty, whatever the HTTP status said.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] when the body carries validation errors.
    pub fn into_result(self) -> Result<Option<T>, ApiError> {
        match self.validation_errors {
            Some(errors) => Err(ApiError::Validation(errors)),
            None => Ok(self.data),
        }
    }
}

/// Identifier returned by create commands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityData {
    pub id: String,
}

/// What a GET produced once its envelope is unwrapped.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    /// The body carried `data`.
    Data(T),
    /// No body, an `"OK"` acknowledgement, or a body without `data`.
    Empty,
    /// `304 Not Modified`: the caller's cached value is still current.
    NotModified,
}

impl<T> Fetched<T> {
    pub fn into_data(self) -> Option<T> {
        match self {
            Self::Data(data) => Some(data),
            Self::Empty | Self::NotModified => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        match self {
            Self::Data(data) => Fetched::Data(f(data)),
            Self::Empty => Fetched::Empty,
            Self::NotModified => Fetched::NotModified,
        }
    }
}
