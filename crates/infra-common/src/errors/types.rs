use thiserror::Error;

/// Result type for infra-common operations
pub type Result<T> = std::result::Result<T, InfraError>;

/// Errors raised by the shared infrastructure layer
#[derive(Debug, Error)]
pub enum InfraError {
    /// Invalid or unusable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A ticker could not be started
    #[error("Ticker error: {0}")]
    Ticker(String),

    /// The logging subsystem could not be installed
    #[error("Logging setup failed: {0}")]
    Logging(String),
}
