//! Chunk descriptors and typed chunk kinds.

use std::ops::Range;

/// Semantic kind of a chunk, identified by its fourcc type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    /// Renderable vegetation resources (trees, meshes, animations).
    Forest,
    /// Collision geometry.
    Collision,
    /// Navigation data.
    Navigation,
    /// Scripted logic data.
    Logic,
    /// Relocation sub-chunk (never surfaced as a top-level chunk).
    Relocation,
    /// Any type code this tooling does not recognize.
    Unknown(u32),
}

impl ChunkKind {
    /// Fourcc for Forest chunks.
    pub const FOREST: u32 = fourcc(b"FRST");
    /// Fourcc for collision chunks.
    pub const COLLISION: u32 = fourcc(b"COLL");
    /// Fourcc for navigation chunks.
    pub const NAVIGATION: u32 = fourcc(b"NAVI");
    /// Fourcc for logic chunks.
    pub const LOGIC: u32 = fourcc(b"LOGC");
    /// Fourcc for relocation sub-chunks.
    pub const RELOCATION: u32 = fourcc(b"RELO");

    /// Classify a raw type code.
    pub const fn from_code(code: u32) -> Self {
        match code {
            Self::FOREST => ChunkKind::Forest,
            Self::COLLISION => ChunkKind::Collision,
            Self::NAVIGATION => ChunkKind::Navigation,
            Self::LOGIC => ChunkKind::Logic,
            Self::RELOCATION => ChunkKind::Relocation,
            other => ChunkKind::Unknown(other),
        }
    }

    /// The raw fourcc for this kind.
    pub const fn code(&self) -> u32 {
        match self {
            ChunkKind::Forest => Self::FOREST,
            ChunkKind::Collision => Self::COLLISION,
            ChunkKind::Navigation => Self::NAVIGATION,
            ChunkKind::Logic => Self::LOGIC,
            ChunkKind::Relocation => Self::RELOCATION,
            ChunkKind::Unknown(code) => *code,
        }
    }

    /// Human-readable name for display.
    pub const fn name(&self) -> &'static str {
        match self {
            ChunkKind::Forest => "Forest",
            ChunkKind::Collision => "Collision",
            ChunkKind::Navigation => "Navigation",
            ChunkKind::Logic => "Logic",
            ChunkKind::Relocation => "Relocation",
            ChunkKind::Unknown(_) => "Unknown",
        }
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkKind::Unknown(code) => write!(f, "Unknown({:#010x})", code),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Build a fourcc from its byte spelling (first byte is lowest).
const fn fourcc(tag: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*tag)
}

/// Parsed location of one chunk inside a container buffer.
#[derive(Debug, Clone)]
pub struct ChunkDesc {
    /// Semantic kind.
    pub kind: ChunkKind,
    /// Raw type code as stored.
    pub type_code: u32,
    /// Whether this chunk's payload is big-endian.
    pub big_endian: bool,
    /// Byte range of the payload within the container buffer.
    pub payload: Range<usize>,
    /// Byte range of the trailer (bytes between payload end and chunk end).
    ///
    /// Forest chunks put GPU-resident data (vertex/index/texture payloads)
    /// here, separately addressed from the CPU-side structures.
    pub trailer: Range<usize>,
    /// Total size of the chunk including header and trailer.
    pub chunk_size: u32,
    /// Relocation addresses harvested from a trailing RELO sub-chunk.
    ///
    /// Addresses are byte offsets within the payload. The original runtime
    /// patched these into live pointers; this decoder keeps them only as a
    /// structural hint.
    pub relocations: Vec<u32>,
}

/// A borrowed view of one chunk: descriptor plus its payload bytes.
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    pub(crate) desc: &'a ChunkDesc,
    pub(crate) payload: &'a [u8],
    pub(crate) trailer: &'a [u8],
}

impl<'a> Chunk<'a> {
    /// Semantic kind of the chunk.
    #[inline]
    pub fn kind(&self) -> ChunkKind {
        self.desc.kind
    }

    /// Raw type code.
    #[inline]
    pub fn type_code(&self) -> u32 {
        self.desc.type_code
    }

    /// Whether the payload is big-endian.
    #[inline]
    pub fn is_big_endian(&self) -> bool {
        self.desc.big_endian
    }

    /// The payload bytes (CPU-resident data).
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// The trailer bytes (GPU-resident data), empty when the chunk has no
    /// trailer.
    #[inline]
    pub fn trailer(&self) -> &'a [u8] {
        self.trailer
    }

    /// Relocation addresses for this chunk.
    #[inline]
    pub fn relocations(&self) -> &'a [u32] {
        &self.desc.relocations
    }

    /// Total on-disk size of the chunk including header and trailer.
    #[inline]
    pub fn chunk_size(&self) -> u32 {
        self.desc.chunk_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_roundtrip() {
        assert_eq!(ChunkKind::from_code(ChunkKind::FOREST), ChunkKind::Forest);
        assert_eq!(ChunkKind::Forest.code(), u32::from_le_bytes(*b"FRST"));
        assert_eq!(
            ChunkKind::from_code(0xDEADBEEF),
            ChunkKind::Unknown(0xDEADBEEF)
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(ChunkKind::Forest.to_string(), "Forest");
        assert_eq!(ChunkKind::Unknown(0xAB).to_string(), "Unknown(0x000000ab)");
    }
}
