//! Errors returned by the remote Power Virtual Server API

use thiserror::Error;

/// Errors surfaced by a cloud capability client
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The requested resource does not exist (or is not visible yet)
    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },

    /// The API answered with a non-success status
    #[error("API error ({status}): {message}")]
    Status { status: u16, message: String },

    /// Authentication with IAM failed
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The request never produced a response
    #[error("network error: {0}")]
    Transport(String),

    /// The response body could not be decoded
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        ApiError::NotFound {
            resource,
            id: id.into(),
        }
    }

    /// True when the error only says the resource cannot be fetched right now
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}
