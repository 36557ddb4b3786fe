//! Vertex streams and attribute declarations.
//!
//! Two declaration encodings exist in the wild. PC-class payloads carry a
//! compact 8-byte little-endian declaration per attribute. Console
//! payloads carry the GPU-native 16-byte big-endian declaration with a
//! different semantic/format numbering, and their vertex bytes are laid
//! out for the console GPU: those streams get a full byte-level remap
//! (byte swap, f16 widening, packed-normal decode) into the canonical
//! little-endian layout so consumers only ever see one format.

use std::borrow::Cow;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use half::f16;
use tracing::warn;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::context::{sanitize_count, LoadContext};

/// Maximum plausible vertex count for a single stream.
pub const MAX_VERTICES: usize = 1_000_000;

/// Maximum plausible attribute count for a single stream.
pub const MAX_ATTRIBUTES: usize = 16;

/// What a vertex attribute feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrSemantic {
    Position,
    Normal,
    Tangent,
    Color,
    TexCoord0,
    TexCoord1,
    BlendWeight,
    BlendIndices,
    Unknown(u32),
}

impl AttrSemantic {
    /// Decode the compact (PC) semantic numbering.
    pub const fn from_compact(code: u8) -> Self {
        match code {
            0 => AttrSemantic::Position,
            1 => AttrSemantic::Normal,
            2 => AttrSemantic::Tangent,
            3 => AttrSemantic::Color,
            4 => AttrSemantic::TexCoord0,
            5 => AttrSemantic::TexCoord1,
            6 => AttrSemantic::BlendWeight,
            7 => AttrSemantic::BlendIndices,
            other => AttrSemantic::Unknown(other as u32),
        }
    }

    /// Decode the wide (console) semantic numbering.
    pub const fn from_wide(code: u32) -> Self {
        match code {
            1 => AttrSemantic::Position,
            2 => AttrSemantic::BlendWeight,
            3 => AttrSemantic::BlendIndices,
            4 => AttrSemantic::Normal,
            5 => AttrSemantic::TexCoord0,
            6 => AttrSemantic::TexCoord1,
            7 => AttrSemantic::Tangent,
            8 => AttrSemantic::Color,
            other => AttrSemantic::Unknown(other),
        }
    }
}

/// Encoded type of a vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrFormat {
    F32x2,
    F32x3,
    F32x4,
    F16x2,
    F16x4,
    U8x4,
    U8x4Norm,
    I16x2Norm,
    I16x4Norm,
    /// Signed 10:10:10 packed normal in a u32 (top 2 bits unused).
    Dec3Norm,
}

impl AttrFormat {
    /// Decode the compact (PC) format numbering.
    pub const fn from_compact(code: u8) -> Option<Self> {
        Some(match code {
            0 => AttrFormat::F32x2,
            1 => AttrFormat::F32x3,
            2 => AttrFormat::F32x4,
            3 => AttrFormat::F16x2,
            4 => AttrFormat::F16x4,
            5 => AttrFormat::U8x4,
            6 => AttrFormat::U8x4Norm,
            7 => AttrFormat::I16x2Norm,
            8 => AttrFormat::I16x4Norm,
            9 => AttrFormat::Dec3Norm,
            _ => return None,
        })
    }

    /// Decode the wide (console) format numbering.
    pub const fn from_wide(code: u32) -> Option<Self> {
        Some(match code {
            1 => AttrFormat::F32x2,
            2 => AttrFormat::F32x3,
            3 => AttrFormat::F32x4,
            4 => AttrFormat::F16x2,
            5 => AttrFormat::F16x4,
            6 => AttrFormat::Dec3Norm,
            7 => AttrFormat::U8x4,
            8 => AttrFormat::U8x4Norm,
            9 => AttrFormat::I16x2Norm,
            10 => AttrFormat::I16x4Norm,
            _ => return None,
        })
    }

    /// Encoded size in bytes.
    pub const fn byte_size(self) -> usize {
        match self {
            AttrFormat::F32x2 => 8,
            AttrFormat::F32x3 => 12,
            AttrFormat::F32x4 => 16,
            AttrFormat::F16x2 => 4,
            AttrFormat::F16x4 => 8,
            AttrFormat::U8x4 | AttrFormat::U8x4Norm => 4,
            AttrFormat::I16x2Norm => 4,
            AttrFormat::I16x4Norm => 8,
            AttrFormat::Dec3Norm => 4,
        }
    }

    /// The canonical format this decodes to during the remap.
    ///
    /// Console-only encodings widen to plain floats; everything else
    /// survives as-is (byte-swapped where multi-byte).
    pub const fn canonical(self) -> Self {
        match self {
            AttrFormat::F16x2 => AttrFormat::F32x2,
            AttrFormat::F16x4 => AttrFormat::F32x4,
            AttrFormat::Dec3Norm => AttrFormat::F32x3,
            other => other,
        }
    }
}

/// One attribute of a vertex stream, in canonical form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexAttribute {
    pub semantic: AttrSemantic,
    pub format: AttrFormat,
    /// Byte offset within a vertex.
    pub offset: usize,
}

/// Compact 8-byte declaration as stored by PC payloads (little-endian
/// fields).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
struct CompactDeclRaw {
    semantic: u8,
    format: u8,
    offset: u16,
    _reserved: u32,
}

/// Wide 16-byte declaration as stored by console payloads (big-endian
/// fields).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
struct WideDeclRaw {
    semantic: u32,
    format: u32,
    offset: u32,
    _stream: u32,
}

/// A vertex buffer plus the declaration describing its bytes.
///
/// Always canonical little-endian after load; `data` borrows the chunk
/// buffer on PC payloads and owns the remapped copy on console payloads.
#[derive(Debug, Clone)]
pub struct VertexStream<'a> {
    pub num_vertices: usize,
    pub stride: usize,
    pub attributes: Vec<VertexAttribute>,
    pub data: Cow<'a, [u8]>,
    /// Detected position misalignment, already folded into the position
    /// attribute's offset.
    pub position_bias: usize,
}

impl<'a> VertexStream<'a> {
    /// Serialized size of a vertex stream header.
    pub const WIRE_SIZE: usize = 28;

    /// Load a vertex stream header at `base` and materialize its data.
    pub fn load(ctx: &LoadContext<'a>, base: usize) -> VertexStream<'a> {
        let num_vertices = sanitize_count(ctx.read_i32(base), MAX_VERTICES, "vertex count");
        let stride = ctx.read_u32(base + 4) as usize;
        let num_attributes =
            sanitize_count(ctx.read_i32(base + 8), MAX_ATTRIBUTES, "attribute count");
        let attributes_ptr = ctx.read_pointer(base + 12);
        let data_ptr = ctx.read_pointer(base + 16);
        let data_size = ctx.read_u32(base + 20) as usize;
        let flags = ctx.read_u32(base + 24);
        let gpu_resident = flags & 1 != 0;

        let raw_data = load_stream_data(ctx, data_ptr, data_size, gpu_resident);

        let mut stream = if ctx.platform().wide_vertex_decls() {
            Self::load_wide(ctx, attributes_ptr, num_attributes, num_vertices, stride, raw_data)
        } else {
            Self::load_compact(ctx, attributes_ptr, num_attributes, num_vertices, stride, raw_data)
        };

        stream.apply_position_bias();
        stream
    }

    fn load_compact(
        ctx: &LoadContext<'a>,
        attributes_ptr: i32,
        num_attributes: usize,
        num_vertices: usize,
        stride: usize,
        data: &'a [u8],
    ) -> VertexStream<'a> {
        let mut attributes = Vec::with_capacity(num_attributes);
        if let Some(mut at) = ctx.resolve_pointer(attributes_ptr) {
            for _ in 0..num_attributes {
                let bytes = ctx.load_buffer(at, 8, false);
                let Ok(raw) = CompactDeclRaw::read_from_bytes(bytes) else {
                    break;
                };
                match AttrFormat::from_compact(raw.format) {
                    Some(format) => attributes.push(VertexAttribute {
                        semantic: AttrSemantic::from_compact(raw.semantic),
                        format,
                        offset: u16::from_le(raw.offset) as usize,
                    }),
                    None => {
                        warn!(code = raw.format, "unknown compact attribute format, skipping");
                    }
                }
                at += 8;
            }
        }

        VertexStream {
            num_vertices,
            stride,
            attributes,
            data: Cow::Borrowed(data),
            position_bias: 0,
        }
    }

    fn load_wide(
        ctx: &LoadContext<'a>,
        attributes_ptr: i32,
        num_attributes: usize,
        num_vertices: usize,
        stride: usize,
        data: &'a [u8],
    ) -> VertexStream<'a> {
        let mut source = Vec::with_capacity(num_attributes);
        if let Some(mut at) = ctx.resolve_pointer(attributes_ptr) {
            for _ in 0..num_attributes {
                let bytes = ctx.load_buffer(at, 16, false);
                let Ok(raw) = WideDeclRaw::read_from_bytes(bytes) else {
                    break;
                };
                match AttrFormat::from_wide(u32::from_be(raw.format)) {
                    Some(format) => source.push(VertexAttribute {
                        semantic: AttrSemantic::from_wide(u32::from_be(raw.semantic)),
                        format,
                        offset: u32::from_be(raw.offset) as usize,
                    }),
                    None => {
                        warn!(
                            code = u32::from_be(raw.format),
                            "unknown wide attribute format, skipping"
                        );
                    }
                }
                at += 16;
            }
        }

        // Canonical attributes are packed sequentially in declaration order.
        let mut attributes = Vec::with_capacity(source.len());
        let mut canonical_stride = 0usize;
        for attr in &source {
            let format = attr.format.canonical();
            attributes.push(VertexAttribute {
                semantic: attr.semantic,
                format,
                offset: canonical_stride,
            });
            canonical_stride += format.byte_size();
        }

        let mut out = vec![0u8; num_vertices * canonical_stride];
        for v in 0..num_vertices {
            let src_base = v * stride;
            let dst_base = v * canonical_stride;
            if src_base + stride > data.len() {
                break;
            }
            for (src_attr, dst_attr) in source.iter().zip(&attributes) {
                remap_attribute(
                    &data[src_base..src_base + stride],
                    src_attr,
                    &mut out[dst_base..dst_base + canonical_stride],
                    dst_attr,
                );
            }
        }

        VertexStream {
            num_vertices,
            stride: canonical_stride,
            attributes,
            data: Cow::Owned(out),
            position_bias: 0,
        }
    }

    /// Find the position attribute, if any.
    pub fn position_attribute(&self) -> Option<&VertexAttribute> {
        self.attributes
            .iter()
            .find(|a| a.semantic == AttrSemantic::Position)
    }

    /// Probe decoded positions for the 4-byte stream bias some titles
    /// carry (a leading unused float the declarations do not describe),
    /// and fold the detected bias into the position attribute's offset.
    fn apply_position_bias(&mut self) {
        let Some(attr_index) = self
            .attributes
            .iter()
            .position(|a| a.semantic == AttrSemantic::Position)
        else {
            return;
        };
        let attr = self.attributes[attr_index];
        if !matches!(attr.format, AttrFormat::F32x3 | AttrFormat::F32x4) {
            return;
        }
        if attr.offset + 4 + attr.format.byte_size() > self.stride {
            return;
        }

        let plain = self.probe_positions(attr.offset);
        let biased = self.probe_positions(attr.offset + 4);
        if biased > plain {
            warn!("position stream bias detected, shifting position reads by 4 bytes");
            self.attributes[attr_index].offset += 4;
            self.position_bias = 4;
        }
    }

    /// Count plausible components over up to 16 sampled positions.
    fn probe_positions(&self, offset: usize) -> u32 {
        let mut score = 0;
        let samples = self.num_vertices.min(16);
        for v in 0..samples {
            let base = v * self.stride + offset;
            for c in 0..3 {
                let at = base + c * 4;
                let Some(bytes) = self.data.get(at..at + 4) else {
                    continue;
                };
                let value = LittleEndian::read_f32(bytes);
                if value.is_finite() && value.abs() < 1.0e6 {
                    score += 1;
                }
            }
        }
        score
    }

    /// Decode position `index` from the canonical buffer.
    pub fn position(&self, index: usize) -> Option<[f32; 3]> {
        let attr = self.position_attribute()?;
        let base = index * self.stride + attr.offset;
        let bytes = self.data.get(base..base + 12)?;
        Some([
            LittleEndian::read_f32(&bytes[0..4]),
            LittleEndian::read_f32(&bytes[4..8]),
            LittleEndian::read_f32(&bytes[8..12]),
        ])
    }
}

/// Fetch the raw vertex bytes, retrying the other buffer when the
/// preferred one does not hold the range.
fn load_stream_data<'a>(
    ctx: &LoadContext<'a>,
    data_ptr: i32,
    data_size: usize,
    gpu_resident: bool,
) -> &'a [u8] {
    if data_ptr < 0 {
        warn!(data_ptr, "vertex data pointer invalid, stream left empty");
        return &[];
    }
    let offset = data_ptr as usize;

    let preferred = ctx.load_buffer(offset, data_size, gpu_resident);
    if !preferred.is_empty() || data_size == 0 {
        return preferred;
    }
    let fallback = ctx.load_buffer(offset, data_size, !gpu_resident);
    if fallback.is_empty() {
        warn!(offset, data_size, "vertex data unavailable in either buffer");
    }
    fallback
}

/// Re-encode one attribute of one vertex into the canonical layout.
fn remap_attribute(src: &[u8], src_attr: &VertexAttribute, dst: &mut [u8], dst_attr: &VertexAttribute) {
    let Some(src_bytes) = src.get(src_attr.offset..src_attr.offset + src_attr.format.byte_size())
    else {
        return;
    };
    let dst_range = dst_attr.offset..dst_attr.offset + dst_attr.format.byte_size();
    let Some(dst_bytes) = dst.get_mut(dst_range) else {
        return;
    };

    match src_attr.format {
        AttrFormat::F32x2 | AttrFormat::F32x3 | AttrFormat::F32x4 => {
            for (s, d) in src_bytes.chunks_exact(4).zip(dst_bytes.chunks_exact_mut(4)) {
                LittleEndian::write_u32(d, BigEndian::read_u32(s));
            }
        }
        AttrFormat::F16x2 | AttrFormat::F16x4 => {
            for (s, d) in src_bytes.chunks_exact(2).zip(dst_bytes.chunks_exact_mut(4)) {
                let value = f16::from_bits(BigEndian::read_u16(s)).to_f32();
                LittleEndian::write_f32(d, value);
            }
        }
        AttrFormat::Dec3Norm => {
            let packed = BigEndian::read_u32(src_bytes);
            let [x, y, z] = unpack_dec3(packed);
            LittleEndian::write_f32(&mut dst_bytes[0..4], x);
            LittleEndian::write_f32(&mut dst_bytes[4..8], y);
            LittleEndian::write_f32(&mut dst_bytes[8..12], z);
        }
        AttrFormat::U8x4 | AttrFormat::U8x4Norm => {
            dst_bytes.copy_from_slice(src_bytes);
        }
        AttrFormat::I16x2Norm | AttrFormat::I16x4Norm => {
            for (s, d) in src_bytes.chunks_exact(2).zip(dst_bytes.chunks_exact_mut(2)) {
                LittleEndian::write_u16(d, BigEndian::read_u16(s));
            }
        }
    }
}

/// Unpack a signed 10:10:10 normal to floats in [-1, 1].
fn unpack_dec3(packed: u32) -> [f32; 3] {
    let extract = |shift: u32| {
        let raw = ((packed >> shift) & 0x3FF) as i32;
        // Sign-extend the 10-bit field.
        let signed = (raw << 22) >> 22;
        (signed as f32 / 511.0).clamp(-1.0, 1.0)
    };
    [extract(0), extract(10), extract(20)]
}
