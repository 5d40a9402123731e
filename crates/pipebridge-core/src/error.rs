//! Error types for the pipebridge core library.

use thiserror::Error;

/// Result type alias using the pipebridge [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for setup and configuration.
///
/// Session-scoped failures have their own types ([`crate::session::SessionError`],
/// [`crate::endpoint::EndpointError`]) so they never abort the whole process.
#[derive(Debug, Error)]
pub enum Error {
    /// Fatal setup error (missing carrier, unusable transport, listen failure)
    #[error("Setup error: {0}")]
    Setup(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed transport address
    #[error("Invalid transport address: {0}")]
    Address(String),

    /// Carrier argument template error
    #[error(transparent)]
    Template(#[from] crate::subprocess::TemplateError),

    /// Carrier program could not be found
    #[error(transparent)]
    Spawn(#[from] crate::subprocess::SpawnError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
