//! Common error types for posturescan.

use thiserror::Error;

/// Common error type for posturescan operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The fleet itself could not be listed. The only fatal audit error.
    #[error("Fleet enumeration failed for {provider}: {reason}")]
    Enumeration { provider: String, reason: String },

    #[error("Command execution failed: {cmd} - {reason}")]
    CommandExecution { cmd: String, reason: String },

    #[error("AWS error {code}: {message}")]
    Aws { code: String, message: String },

    #[error("Failed to parse provider response: {0}")]
    Parse(String),

    #[error("Scan failed: {0}")]
    ScanFailed(String),

    #[error("Unknown severity: {0}")]
    UnknownSeverity(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias using common Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

impl Error {
    /// Whether this error aborts an entire audit run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Enumeration { .. })
    }
}
