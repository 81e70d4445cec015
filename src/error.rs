//! Pipeline-level error taxonomy

use crate::cloud::ApiError;
use crate::config::ConfigError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    /// A remote call failed outright; never retried
    #[error("{operation} failed: {source}")]
    Api {
        operation: &'static str,
        #[source]
        source: ApiError,
    },

    /// A remote resource or job reached its failed terminal state
    #[error("{resource} {id} reported failure: {message}")]
    RemoteFailed {
        resource: &'static str,
        id: String,
        message: String,
    },

    #[error("timed out after {}s while waiting for {operation}", after.as_secs())]
    Timeout { operation: String, after: Duration },

    #[error("instance creation returned an empty id list")]
    EmptyInstanceList,

    #[error("image '{0}' not found")]
    ImageNotFound(String),

    /// A COS import would shadow an image the build does not own
    #[error("an image named '{0}' already exists in the workspace")]
    ImageNameTaken(String),

    #[error("stock image '{0}' not found in the catalog")]
    StockImageNotFound(String),

    #[error("could not determine an address for instance {0}")]
    HostNotFound(String),

    /// A step read build state that no earlier step produced
    #[error("build state '{0}' is not available; a preceding step must produce it")]
    MissingState(&'static str),

    #[error("build cancelled")]
    Cancelled,

    /// A step halted without recording why
    #[error("step '{0}' halted the build without reporting an error")]
    HaltedWithoutError(&'static str),

    #[error("provisioning failed: {0}")]
    Provision(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BuildError {
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        BuildError::Timeout {
            operation: operation.into(),
            after,
        }
    }
}

/// Attaches the name of the remote operation to an [`ApiError`]
pub trait ApiResultExt<T> {
    fn during(self, operation: &'static str) -> Result<T, BuildError>;
}

impl<T> ApiResultExt<T> for Result<T, ApiError> {
    fn during(self, operation: &'static str) -> Result<T, BuildError> {
        self.map_err(|source| BuildError::Api { operation, source })
    }
}
