use thiserror::Error;

/// Common error type for SunSight components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type alias using SunSight's Error.
pub type Result<T> = std::result::Result<T, Error>;
