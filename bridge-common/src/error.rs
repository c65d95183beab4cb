use thiserror::Error;

/// Common error type for bridge plumbing.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("Logging error: {0}")]
    Logging(String),

    #[error("Signal handler error: {0}")]
    Signal(String),
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
