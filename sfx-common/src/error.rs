//! Common error types for the sfx workspace

use thiserror::Error;

/// Common result type for sfx operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the sfx crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error (wraps toml::de::Error)
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sample format not representable by the pipeline
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Invalid parameter value
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
