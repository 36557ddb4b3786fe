//! SIF container parsing.
//!
//! A SIF stream is, outermost first: an optional whole-buffer zlib layer
//! (whose decompressed form carries its own 4-byte length prefix), an
//! optional leading 4-byte length prefix, then a sequence of 16-byte chunk
//! headers `{type, chunk_size, data_size, endian_marker}` each followed by
//! `data_size` payload bytes and `chunk_size - 16 - data_size` trailer
//! bytes. A chunk may be followed by a `RELO` sub-chunk carrying the
//! offsets the original runtime patched into pointers.
//!
//! The format is platform-ambiguous: chunk headers validate in little- or
//! big-endian byte order, and the parser keeps whichever interpretation
//! passes bounds validation.

use std::borrow::Cow;
use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};
use flate2::read::ZlibDecoder;
use tracing::warn;

use leshy_common::{BinaryReader, Endian};

use crate::chunk::{Chunk, ChunkDesc, ChunkKind};
use crate::{Error, Result};

/// Size of a chunk header in bytes.
pub const CHUNK_HEADER_SIZE: usize = 16;

/// Marker value that, read little-endian, flags a big-endian chunk.
pub const ENDIAN_MARKER: u32 = 0x1122_3344;

/// A parsed SIF container: the backing buffer plus chunk descriptors.
///
/// Borrows the input buffer when it was raw; owns a buffer when the input
/// was zlib-compressed.
#[derive(Debug)]
pub struct SifContainer<'a> {
    data: Cow<'a, [u8]>,
    chunks: Vec<ChunkDesc>,
}

/// One decoded chunk header, fields already in host byte order.
#[derive(Debug, Clone, Copy)]
struct ChunkHeader {
    type_code: u32,
    chunk_size: u32,
    data_size: u32,
}

impl ChunkHeader {
    fn read(bytes: &[u8], big_endian: bool) -> Self {
        let endian = if big_endian { Endian::Big } else { Endian::Little };
        let mut reader = BinaryReader::with_endian(bytes, endian);
        Self {
            type_code: reader.read_u32().unwrap_or(0),
            chunk_size: reader.read_u32().unwrap_or(0),
            data_size: reader.read_u32().unwrap_or(0),
        }
    }

    /// Bounds validation against the bytes remaining at the header offset.
    fn validates(&self, remaining: usize) -> bool {
        self.chunk_size as usize >= CHUNK_HEADER_SIZE
            && self.chunk_size as usize <= remaining
            && self.data_size <= self.chunk_size - CHUNK_HEADER_SIZE as u32
    }
}

impl<'a> SifContainer<'a> {
    /// Parse a SIF container from raw bytes.
    ///
    /// Fails only on container-level framing errors; everything below the
    /// chunk table is recovered field-by-field by higher layers.
    pub fn parse(input: &'a [u8]) -> Result<Self> {
        let data = unwrap_compression(input)?;

        let mut offset = leading_prefix_len(&data);
        let mut chunks = Vec::new();

        while data.len() - offset >= CHUNK_HEADER_SIZE {
            let (header, big_endian) = read_chunk_header(&data, offset)?;

            let payload_start = offset + CHUNK_HEADER_SIZE;
            let payload_end = payload_start + header.data_size as usize;
            let chunk_end = offset + header.chunk_size as usize;
            let mut desc = ChunkDesc {
                kind: ChunkKind::from_code(header.type_code),
                type_code: header.type_code,
                big_endian,
                payload: payload_start..payload_end,
                trailer: payload_end..chunk_end,
                chunk_size: header.chunk_size,
                relocations: Vec::new(),
            };
            offset = chunk_end;

            if let Some((relocations, relo_size)) =
                read_relocations(&data, offset, header.type_code, big_endian)
            {
                desc.relocations = relocations;
                offset += relo_size;
            }

            chunks.push(desc);
        }

        let trailing = data.len() - offset;
        if trailing > 0 {
            warn!(trailing, "container has trailing bytes after last chunk");
        }

        Ok(Self { data, chunks })
    }

    /// Number of chunks in the container.
    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the container holds no chunks.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// The backing buffer (decompressed if the input was compressed).
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Iterate the chunks in container order.
    pub fn chunks(&self) -> impl Iterator<Item = Chunk<'_>> {
        self.chunks.iter().map(|desc| Chunk {
            desc,
            payload: &self.data[desc.payload.clone()],
            trailer: &self.data[desc.trailer.clone()],
        })
    }

    /// Get a chunk by index.
    pub fn get(&self, index: usize) -> Option<Chunk<'_>> {
        self.chunks.get(index).map(|desc| Chunk {
            desc,
            payload: &self.data[desc.payload.clone()],
            trailer: &self.data[desc.trailer.clone()],
        })
    }

    /// Find the first chunk of a given kind.
    pub fn find(&self, kind: ChunkKind) -> Option<Chunk<'_>> {
        self.chunks().find(|c| c.kind() == kind)
    }
}

/// Detect a zlib header: low nibble of CMF is 8 (deflate) and the
/// CMF/FLG pair passes the RFC1950 check.
fn is_zlib(data: &[u8]) -> bool {
    if data.len() < 2 {
        return false;
    }
    let cmf = data[0] as u16;
    let flg = data[1] as u16;
    (cmf & 0xF) == 8 && ((cmf << 8) | flg) % 31 == 0
}

/// Decompress a zlib-wrapped container and strip its length prefix.
fn unwrap_compression(input: &[u8]) -> Result<Cow<'_, [u8]>> {
    if !is_zlib(input) {
        return Ok(Cow::Borrowed(input));
    }

    let mut decoder = ZlibDecoder::new(input);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::Decompression(e.to_string()))?;

    // The decompressed stream carries its own 4-byte expected-length
    // prefix. Files in the wild disagree with it, so mismatch is a
    // warning, not an error.
    if out.len() >= 4 {
        let expected = LittleEndian::read_u32(&out[..4]) as usize;
        let actual = out.len() - 4;
        if expected != actual {
            warn!(expected, actual, "decompressed length prefix mismatch");
        }
        out.drain(..4);
    }

    Ok(Cow::Owned(out))
}

/// Detect a leading 4-byte length prefix: the stored value equals the
/// buffer size with or without the prefix itself.
fn leading_prefix_len(data: &[u8]) -> usize {
    if data.len() < 4 {
        return 0;
    }
    let first = LittleEndian::read_u32(&data[..4]) as usize;
    if first == data.len() - 4 || first == data.len() {
        4
    } else {
        0
    }
}

/// Read one chunk header, resolving its byte order.
///
/// The endian marker decides outright when present; otherwise the header
/// is accepted in whichever byte order passes bounds validation,
/// little-endian first.
fn read_chunk_header(data: &[u8], offset: usize) -> Result<(ChunkHeader, bool)> {
    let bytes = &data[offset..offset + CHUNK_HEADER_SIZE];
    let remaining = data.len() - offset;
    let marker = LittleEndian::read_u32(&bytes[12..16]);

    if marker == ENDIAN_MARKER {
        let header = ChunkHeader::read(bytes, true);
        if header.validates(remaining) {
            return Ok((header, true));
        }
        return Err(Error::MalformedContainer { offset });
    }

    let header = ChunkHeader::read(bytes, false);
    if header.validates(remaining) {
        return Ok((header, false));
    }

    let header = ChunkHeader::read(bytes, true);
    if header.validates(remaining) {
        return Ok((header, true));
    }

    Err(Error::MalformedContainer { offset })
}

/// Opportunistically read a RELO sub-chunk at `offset`.
///
/// Returns the harvested addresses and the sub-chunk's total size, or
/// `None` when no well-formed RELO chunk is present (the bytes then belong
/// to the next top-level chunk).
fn read_relocations(
    data: &[u8],
    offset: usize,
    owner_code: u32,
    big_endian: bool,
) -> Option<(Vec<u32>, usize)> {
    if data.len().saturating_sub(offset) < CHUNK_HEADER_SIZE {
        return None;
    }

    let bytes = &data[offset..offset + CHUNK_HEADER_SIZE];
    let header = ChunkHeader::read(bytes, big_endian);
    if header.type_code != ChunkKind::RELOCATION {
        return None;
    }
    if !header.validates(data.len() - offset) {
        return None;
    }

    let body_start = offset + CHUNK_HEADER_SIZE;
    let body = &data[body_start..body_start + header.data_size as usize];
    let endian = if big_endian { Endian::Big } else { Endian::Little };
    let mut reader = BinaryReader::with_endian(body, endian);

    // The body repeats the owning chunk's type code before the triples.
    let Ok(dup) = reader.read_u32() else {
        return Some((Vec::new(), header.chunk_size as usize));
    };
    if dup != owner_code {
        warn!(
            expected = owner_code,
            actual = dup,
            "RELO sub-chunk does not repeat its owner's type code"
        );
        return Some((Vec::new(), header.chunk_size as usize));
    }

    // (flag, pad, address) triples run until the first non-1 flag or
    // truncation.
    let mut relocations = Vec::new();
    while reader.remaining() >= 8 {
        let flag = reader.read_u16().unwrap_or(0);
        reader.advance(2);
        let address = reader.read_u32().unwrap_or(0);
        if flag != 1 {
            break;
        }
        relocations.push(address);
    }

    Some((relocations, header.chunk_size as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build one little-endian chunk with optional trailer padding.
    fn le_chunk(tag: &[u8; 4], payload: &[u8], trailer: usize) -> Vec<u8> {
        let chunk_size = (CHUNK_HEADER_SIZE + payload.len() + trailer) as u32;
        let mut out = Vec::new();
        out.extend_from_slice(&u32::from_le_bytes(*tag).to_le_bytes());
        out.extend_from_slice(&chunk_size.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(payload);
        out.extend(std::iter::repeat(0xAAu8).take(trailer));
        out
    }

    /// Build one big-endian chunk carrying the endian marker.
    fn be_chunk(tag: &[u8; 4], payload: &[u8], trailer: usize) -> Vec<u8> {
        let chunk_size = (CHUNK_HEADER_SIZE + payload.len() + trailer) as u32;
        let mut out = Vec::new();
        out.extend_from_slice(&u32::from_le_bytes(*tag).to_be_bytes());
        out.extend_from_slice(&chunk_size.to_be_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        // Stored so a little-endian read yields the marker value.
        out.extend_from_slice(&[0x44, 0x33, 0x22, 0x11]);
        out.extend_from_slice(payload);
        out.extend(std::iter::repeat(0xAAu8).take(trailer));
        out
    }

    #[test]
    fn test_single_chunk() {
        let buf = le_chunk(b"FRST", b"payload!", 0);
        let container = SifContainer::parse(&buf).unwrap();

        assert_eq!(container.len(), 1);
        let chunk = container.get(0).unwrap();
        assert_eq!(chunk.kind(), ChunkKind::Forest);
        assert!(!chunk.is_big_endian());
        assert_eq!(chunk.payload(), b"payload!");
    }

    #[test]
    fn test_chunk_offsets_with_trailer() {
        let mut buf = le_chunk(b"FRST", b"abcd", 12);
        buf.extend(le_chunk(b"COLL", b"efgh", 0));
        let container = SifContainer::parse(&buf).unwrap();

        assert_eq!(container.len(), 2);
        assert_eq!(container.get(0).unwrap().payload(), b"abcd");
        assert_eq!(container.get(0).unwrap().chunk_size(), 32);
        assert_eq!(container.get(0).unwrap().trailer(), &[0xAA; 12]);
        assert_eq!(container.get(1).unwrap().kind(), ChunkKind::Collision);
        assert_eq!(container.get(1).unwrap().payload(), b"efgh");
    }

    #[test]
    fn test_big_endian_marker() {
        let buf = be_chunk(b"FRST", b"\x00\x01\x02\x03", 0);
        let container = SifContainer::parse(&buf).unwrap();

        let chunk = container.get(0).unwrap();
        assert!(chunk.is_big_endian());
        assert_eq!(chunk.kind(), ChunkKind::Forest);
    }

    #[test]
    fn test_big_endian_without_marker() {
        // Big-endian fields, marker zeroed: little-endian validation sees a
        // huge chunk_size and the parser must fall back to big-endian.
        let payload = b"12345678";
        let chunk_size = (CHUNK_HEADER_SIZE + payload.len()) as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(&u32::from_le_bytes(*b"FRST").to_be_bytes());
        buf.extend_from_slice(&chunk_size.to_be_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(payload);

        let container = SifContainer::parse(&buf).unwrap();
        let chunk = container.get(0).unwrap();
        assert!(chunk.is_big_endian());
        assert_eq!(chunk.payload(), payload);
    }

    #[test]
    fn test_oversized_chunk_is_malformed() {
        let mut buf = le_chunk(b"FRST", b"abcd", 0);
        // Claim a chunk_size past the end of the buffer.
        buf[4..8].copy_from_slice(&1000u32.to_le_bytes());

        match SifContainer::parse(&buf) {
            Err(Error::MalformedContainer { offset }) => assert_eq!(offset, 0),
            other => panic!("expected MalformedContainer, got {:?}", other),
        }
    }

    #[test]
    fn test_leading_length_prefix() {
        let chunk = le_chunk(b"FRST", b"abcd", 0);
        let mut buf = Vec::new();
        buf.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        buf.extend_from_slice(&chunk);

        let container = SifContainer::parse(&buf).unwrap();
        assert_eq!(container.len(), 1);
        assert_eq!(container.get(0).unwrap().payload(), b"abcd");
    }

    #[test]
    fn test_zlib_with_wrong_length_prefix() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let chunk = le_chunk(b"FRST", b"abcd", 0);
        let mut plain = Vec::new();
        // Deliberately wrong expected-length prefix: must warn, not fail.
        plain.extend_from_slice(&0xDEADu32.to_le_bytes());
        plain.extend_from_slice(&chunk);

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&plain).unwrap();
        let compressed = encoder.finish().unwrap();

        let container = SifContainer::parse(&compressed).unwrap();
        assert_eq!(container.len(), 1);
        assert_eq!(container.get(0).unwrap().payload(), b"abcd");
    }

    #[test]
    fn test_relocation_subchunk() {
        let mut buf = le_chunk(b"FRST", b"abcdefgh", 0);

        // RELO body: owner type code, then (flag, pad, address) triples.
        let mut body = Vec::new();
        body.extend_from_slice(&u32::from_le_bytes(*b"FRST").to_le_bytes());
        for (flag, addr) in [(1u16, 0x10u32), (1, 0x20), (0, 0x30)] {
            body.extend_from_slice(&flag.to_le_bytes());
            body.extend_from_slice(&0u16.to_le_bytes());
            body.extend_from_slice(&addr.to_le_bytes());
        }
        buf.extend(le_chunk(b"RELO", &body, 0));

        let container = SifContainer::parse(&buf).unwrap();
        assert_eq!(container.len(), 1);
        let chunk = container.get(0).unwrap();
        assert_eq!(chunk.relocations(), &[0x10, 0x20]);
    }

    #[test]
    fn test_relocation_truncated_triples() {
        let mut buf = le_chunk(b"FRST", b"abcd", 0);

        let mut body = Vec::new();
        body.extend_from_slice(&u32::from_le_bytes(*b"FRST").to_le_bytes());
        body.extend_from_slice(&1u16.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&0x40u32.to_le_bytes());
        // Truncated second triple: flag only.
        body.extend_from_slice(&1u16.to_le_bytes());
        buf.extend(le_chunk(b"RELO", &body, 0));

        let container = SifContainer::parse(&buf).unwrap();
        assert_eq!(container.get(0).unwrap().relocations(), &[0x40]);
    }

    #[test]
    fn test_empty_input() {
        let container = SifContainer::parse(&[]).unwrap();
        assert!(container.is_empty());
    }
}
