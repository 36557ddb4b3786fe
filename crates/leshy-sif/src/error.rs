//! Error types for the SIF container crate.

use thiserror::Error;

/// Errors that can occur when parsing SIF containers.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Common library error.
    #[error("{0}")]
    Common(#[from] leshy_common::Error),

    /// Chunk framing failed bounds validation in both byte orders.
    #[error("malformed container: chunk header at offset {offset:#x} is invalid in both byte orders")]
    MalformedContainer { offset: usize },

    /// Decompression error.
    #[error("decompression error: {0}")]
    Decompression(String),
}

/// Result type for SIF operations.
pub type Result<T> = std::result::Result<T, Error>;
