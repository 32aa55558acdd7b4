//! Error types for sfx-stream
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

/// Main error type for sfx-stream
#[derive(Error, Debug)]
pub enum Error {
    /// Errors bubbled up from the shared library (config, formats)
    #[error("Common error: {0}")]
    Common(#[from] sfx_common::Error),

    /// Device refused to create a buffer or voice
    #[error("Device error: {0}")]
    Device(String),

    /// Operation needs a device but none is initialized
    #[error("No device: {0}")]
    NoDevice(String),

    /// Source stream could not be opened or read
    #[error("Stream error: {0}")]
    Stream(String),

    /// Reader pool could not accept work
    #[error("Reader pool error: {0}")]
    ReaderPool(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Handle does not refer to a live object
    #[error("Not found: {0}")]
    NotFound(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using sfx-stream Error
pub type Result<T> = std::result::Result<T, Error>;
