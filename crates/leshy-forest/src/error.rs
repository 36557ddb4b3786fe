//! Error types for the Forest resource crate.
//!
//! Only structural failures surface as errors; everything else is
//! recovered in place (the field or entry is skipped with a warning) so
//! one malformed sub-resource never prevents loading the rest of a file.

use thiserror::Error;

/// Errors that can occur when loading Forest resources.
#[derive(Debug, Error)]
pub enum Error {
    /// Common library error.
    #[error("{0}")]
    Common(#[from] leshy_common::Error),

    /// Container-level error from the SIF layer.
    #[error("{0}")]
    Sif(#[from] leshy_sif::Error),

    /// A declared size extends past the end of the backing buffer.
    #[error("truncated payload: {what} needs {needed} bytes at offset {offset:#x}")]
    TruncatedPayload {
        what: &'static str,
        offset: usize,
        needed: usize,
    },

    /// A top-level resource pointer is out of range; the owning entry is
    /// skipped.
    #[error("structural pointer invalid: {what} = {address:#x}")]
    StructuralPointerInvalid { what: &'static str, address: i32 },

    /// The Type-6 heuristic search found no plausible decode.
    #[error("unresolvable animation: no trial decode scored above the reject floor")]
    UnresolvableAnimation,
}

/// Result type for Forest operations.
pub type Result<T> = std::result::Result<T, Error>;
