//! Error types for the ClickHouse provider.

use thiserror::Error;

use crate::schema::Diagnostic;

/// Errors surfaced by provider operations.
///
/// Every variant is reported back to the engine as an error [`Diagnostic`]
/// whose summary is [`ProviderError::category`] and whose detail is
/// [`ProviderError::message`].
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The resource no longer exists on the server.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The provider is missing configuration or has not been configured.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The connection to ClickHouse could not be established.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A statement was rejected by the server or failed in transit.
    #[error("Execution error: {0}")]
    Execution(String),

    /// The resource does not support in-place updates.
    #[error("Update not permitted: {0}")]
    UpdateNotPermitted(String),

    /// An enumeration query or one of its rows failed.
    #[error("Listing error: {0}")]
    Listing(String),

    /// The requested resource or data source type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// The operation is not supported for this resource type.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// A record could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProviderError {
    /// Get the error message as a string.
    pub fn message(&self) -> String {
        match self {
            Self::NotFound(msg)
            | Self::Configuration(msg)
            | Self::Connection(msg)
            | Self::Execution(msg)
            | Self::UpdateNotPermitted(msg)
            | Self::Listing(msg)
            | Self::UnknownResource(msg)
            | Self::Unimplemented(msg) => msg.clone(),
            Self::Serialization(err) => err.to_string(),
        }
    }

    /// Short, user-facing category used as the diagnostic summary.
    pub fn category(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "Resource does not exist",
            Self::Configuration(_) => "Provider configuration error",
            Self::Connection(_) => "Unable to Create ClickHouse Client",
            Self::Execution(_) => "ClickHouse statement failed",
            Self::UpdateNotPermitted(_) => "Update not permitted",
            Self::Listing(_) => "Unable to list ClickHouse objects",
            Self::UnknownResource(_) => "Unknown resource type",
            Self::Unimplemented(_) => "Operation not supported",
            Self::Serialization(_) => "Malformed record",
        }
    }

    /// Convert this error into an error diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error(self.category()).with_detail(self.message())
    }
}
