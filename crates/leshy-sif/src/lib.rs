//! SIF container parser.
//!
//! SIF is the chunked resource container the Forest vegetation assets ship
//! in. A container is optionally zlib-compressed and optionally
//! length-prefixed, then framed as a sequence of typed chunks, each with
//! its own byte order and an optional `RELO` relocation sub-chunk.
//!
//! The format was recovered by reverse engineering and is ambiguous in
//! places; this parser validates each chunk header in both byte orders and
//! keeps the interpretation that passes bounds checks.
//!
//! # Example
//!
//! ```no_run
//! use leshy_sif::{ChunkKind, SifFile};
//!
//! let file = SifFile::open("vegetation.sif")?;
//! let container = file.parse()?;
//!
//! for chunk in container.chunks() {
//!     println!("{} ({} bytes)", chunk.kind(), chunk.payload().len());
//! }
//!
//! if let Some(forest) = container.find(ChunkKind::Forest) {
//!     println!("forest payload: {} bytes", forest.payload().len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod chunk;
mod container;
mod error;
mod file;

pub use chunk::{Chunk, ChunkDesc, ChunkKind};
pub use container::{SifContainer, CHUNK_HEADER_SIZE, ENDIAN_MARKER};
pub use error::{Error, Result};
pub use file::SifFile;
