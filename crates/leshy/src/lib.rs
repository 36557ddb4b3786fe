//! Leshy - SIF archive and Forest vegetation resource decoding library.
//!
//! This crate provides a unified interface to the Leshy library ecosystem
//! for working with SIF game resource files.
//!
//! # Crates
//!
//! - [`leshy_common`] - Common utilities (binary reading, platforms, CRC32C)
//! - [`leshy_sif`] - SIF container parsing (chunks, zlib, relocations)
//! - [`leshy_forest`] - Forest resource graphs and skeletal animation
//!
//! # Example
//!
//! ```no_run
//! use leshy::prelude::*;
//!
//! // Open a SIF archive
//! let file = SifFile::open("vegetation.sif")?;
//! let container = file.parse()?;
//!
//! // Load the forest resources
//! if let Some(chunk) = container.find(ChunkKind::Forest) {
//!     let library = ForestLibrary::load(&chunk);
//!     println!("Forests: {}", library.entries.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Re-export all sub-crates
pub use leshy_common as common;
pub use leshy_forest as forest;
pub use leshy_sif as sif;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use leshy_common::{crc, BinaryReader, Endian, Platform};
    pub use leshy_forest::{
        Animation, Branch, BranchPayload, DecodeStatus, Forest, ForestEntry, ForestLibrary,
        LoadContext, Primitive, RenderMesh, Sample, Tree, VertexStream,
    };
    pub use leshy_sif::{Chunk, ChunkKind, SifContainer, SifFile};
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
