//! Render meshes, primitives, and index-buffer recovery.
//!
//! A primitive's index buffer format is not declared anywhere in the
//! file: width (16 vs 32 bit), byte order, and topology all have to be
//! recovered. The loader trial-decodes the four width/swap hypotheses and
//! keeps the one referencing the fewest out-of-range vertices, then infers
//! list-vs-strip from the primitive type field and the observed restart
//! frequency.

use std::rc::Rc;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use glam::Mat4;
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::context::{sanitize_count, LoadContext};
use crate::material::Material;
use crate::vertex::VertexStream;

/// Maximum plausible primitive count per mesh.
pub const MAX_PRIMITIVES: usize = 1024;

/// Maximum plausible index count per primitive.
pub const MAX_INDICES: usize = 4_000_000;

/// Maximum plausible bone count per mesh.
pub const MAX_BONES: usize = 1024;

/// Fraction of restart indices above which a buffer is treated as a strip.
const STRIP_RESTART_THRESHOLD: f32 = 0.05;

/// Recovered index encoding, relative to the payload's platform byte
/// order (`Swapped` variants read the opposite order).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    U16,
    U16Swapped,
    U32,
    U32Swapped,
}

impl IndexFormat {
    /// All hypotheses in evaluation order. The order is the deterministic
    /// tie-break: earlier wins on equal score.
    pub const HYPOTHESES: [IndexFormat; 4] = [
        IndexFormat::U16,
        IndexFormat::U16Swapped,
        IndexFormat::U32,
        IndexFormat::U32Swapped,
    ];

    /// Width of one index in bytes.
    pub const fn width(self) -> usize {
        match self {
            IndexFormat::U16 | IndexFormat::U16Swapped => 2,
            IndexFormat::U32 | IndexFormat::U32Swapped => 4,
        }
    }

    /// The primitive-restart sentinel for this width.
    pub const fn restart(self) -> u32 {
        match self {
            IndexFormat::U16 | IndexFormat::U16Swapped => 0xFFFF,
            IndexFormat::U32 | IndexFormat::U32Swapped => 0xFFFF_FFFF,
        }
    }
}

/// Recovered primitive topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    TriangleList,
    TriangleStrip,
}

/// One drawable primitive.
#[derive(Debug, Clone)]
pub struct Primitive<'a> {
    pub prim_type: u32,
    pub vertex_stream: Rc<VertexStream<'a>>,
    pub material: Option<Rc<Material>>,
    pub index_format: IndexFormat,
    pub topology: Topology,
    /// Indices widened to u32, restart sentinels preserved.
    pub indices: Vec<u32>,
    /// The raw index bytes as stored.
    pub index_data: &'a [u8],
}

impl<'a> Primitive<'a> {
    /// Serialized size of a primitive record.
    pub const WIRE_SIZE: usize = 24;

    /// Load a primitive at `base`. Returns `None` when the vertex stream
    /// pointer is unusable; the primitive is skipped, not the mesh.
    pub fn load(
        ctx: &LoadContext<'a>,
        base: usize,
        pools: &mut SharedPools<'a>,
    ) -> Option<Primitive<'a>> {
        let prim_type = ctx.read_u32(base);
        let stream_ptr = ctx.read_pointer(base + 4);
        let material_ptr = ctx.read_pointer(base + 8);
        let num_indices = sanitize_count(ctx.read_i32(base + 12), MAX_INDICES, "index count");
        let index_data_ptr = ctx.read_pointer(base + 16);
        let index_data_size = ctx.read_i32(base + 20).max(0) as usize;

        let Some(vertex_stream) = pools.stream(ctx, stream_ptr) else {
            warn!(stream_ptr, "primitive has no usable vertex stream, skipping");
            return None;
        };
        let material = pools.material(ctx, material_ptr);

        let index_data = fetch_index_data(ctx, index_data_ptr, index_data_size);
        let (index_format, indices) =
            infer_index_format(index_data, num_indices, vertex_stream.num_vertices);
        let topology = infer_topology(prim_type, &indices, index_format);

        Some(Primitive {
            prim_type,
            vertex_stream,
            material,
            index_format,
            topology,
            indices,
            index_data,
        })
    }
}

/// A skinned render mesh: primitives plus the bone tables.
#[derive(Debug, Clone)]
pub struct RenderMesh<'a> {
    pub primitives: Vec<Primitive<'a>>,
    /// Per-bone indices into the owning tree's branch array.
    pub bone_matrix_indices: Vec<i32>,
    /// Per-bone inverse bind matrices.
    pub bone_inverse_matrices: Vec<Mat4>,
}

impl<'a> RenderMesh<'a> {
    /// Serialized size of a mesh record.
    pub const WIRE_SIZE: usize = 20;

    /// Load a mesh at `base`.
    pub fn load(ctx: &LoadContext<'a>, base: usize, pools: &mut SharedPools<'a>) -> RenderMesh<'a> {
        let num_primitives =
            sanitize_count(ctx.read_i32(base), MAX_PRIMITIVES, "primitive count");
        let primitives_ptr = ctx.read_pointer(base + 4);
        let num_bones = sanitize_count(ctx.read_i32(base + 8), MAX_BONES, "bone count");
        let bone_indices_ptr = ctx.read_pointer(base + 12);
        let bone_inverse_ptr = ctx.read_pointer(base + 16);

        let mut primitives = Vec::with_capacity(num_primitives);
        if let Some(table) = ctx.resolve_pointer(primitives_ptr) {
            for i in 0..num_primitives {
                let at = table + i * Primitive::WIRE_SIZE;
                if let Some(primitive) = Primitive::load(ctx, at, pools) {
                    primitives.push(primitive);
                }
            }
        }

        let mut bone_matrix_indices = Vec::with_capacity(num_bones);
        if let Some(table) = ctx.resolve_pointer(bone_indices_ptr) {
            for i in 0..num_bones {
                bone_matrix_indices.push(ctx.read_i32(table + i * 4));
            }
        }

        let mut bone_inverse_matrices = Vec::with_capacity(num_bones);
        if let Some(table) = ctx.resolve_pointer(bone_inverse_ptr) {
            for i in 0..num_bones {
                bone_inverse_matrices.push(ctx.read_matrix4x4(table + i * 64));
            }
        }

        RenderMesh {
            primitives,
            bone_matrix_indices,
            bone_inverse_matrices,
        }
    }
}

/// Dedup caches for resources shared across primitives.
///
/// Vertex streams and materials are referenced by address and reused
/// freely across primitives and meshes; loading each address once keeps
/// the sharing of the original file.
#[derive(Debug, Default)]
pub struct SharedPools<'a> {
    streams: FxHashMap<u32, Rc<VertexStream<'a>>>,
    materials: FxHashMap<u32, Rc<Material>>,
}

impl<'a> SharedPools<'a> {
    /// Get or load the vertex stream at `ptr`.
    pub fn stream(&mut self, ctx: &LoadContext<'a>, ptr: i32) -> Option<Rc<VertexStream<'a>>> {
        let addr = ctx.resolve_pointer(ptr)?;
        Some(
            self.streams
                .entry(addr as u32)
                .or_insert_with(|| Rc::new(VertexStream::load(ctx, addr)))
                .clone(),
        )
    }

    /// Get or load the material at `ptr`.
    pub fn material(&mut self, ctx: &LoadContext<'a>, ptr: i32) -> Option<Rc<Material>> {
        let addr = ctx.resolve_pointer(ptr)?;
        Some(
            self.materials
                .entry(addr as u32)
                .or_insert_with(|| Rc::new(Material::load(ctx, addr)))
                .clone(),
        )
    }
}

/// Fetch raw index bytes, GPU block first, CPU fallback.
fn fetch_index_data<'a>(ctx: &LoadContext<'a>, ptr: i32, size: usize) -> &'a [u8] {
    if ptr < 0 || size == 0 {
        return &[];
    }
    let offset = ptr as usize;
    let gpu = ctx.load_buffer(offset, size, true);
    if !gpu.is_empty() {
        return gpu;
    }
    ctx.load_buffer(offset, size, false)
}

/// Decode `count` indices under one hypothesis.
fn decode_indices(raw: &[u8], count: usize, format: IndexFormat) -> Vec<u32> {
    let width = format.width();
    let available = raw.len() / width;
    let count = count.min(available);
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let bytes = &raw[i * width..(i + 1) * width];
        let value = match format {
            IndexFormat::U16 => LittleEndian::read_u16(bytes) as u32,
            IndexFormat::U16Swapped => BigEndian::read_u16(bytes) as u32,
            IndexFormat::U32 => LittleEndian::read_u32(bytes),
            IndexFormat::U32Swapped => BigEndian::read_u32(bytes),
        };
        out.push(value);
    }
    out
}

/// Count indices referencing vertices that do not exist, ignoring
/// restart sentinels.
fn out_of_range(indices: &[u32], num_vertices: usize, restart: u32) -> usize {
    indices
        .iter()
        .filter(|&&i| i != restart && i as usize >= num_vertices)
        .count()
}

/// Evaluate the four width/swap hypotheses and keep the best decode.
///
/// Primary criterion is the out-of-range count; a hypothesis whose width
/// disagrees with the stored buffer size loses ties (an exact-width
/// decode of small values can look valid under the wrong width). Final
/// ties resolve to the earliest hypothesis in [`IndexFormat::HYPOTHESES`],
/// which keeps the selection deterministic.
pub fn infer_index_format(
    raw: &[u8],
    num_indices: usize,
    num_vertices: usize,
) -> (IndexFormat, Vec<u32>) {
    let mut best: Option<(IndexFormat, Vec<u32>, (usize, usize))> = None;
    for format in IndexFormat::HYPOTHESES {
        let indices = decode_indices(raw, num_indices, format);
        let bad = out_of_range(&indices, num_vertices, format.restart());
        let size_mismatch = raw.len().abs_diff(num_indices.saturating_mul(format.width()));
        let score = (bad, size_mismatch);
        match &best {
            Some((_, _, best_score)) if score >= *best_score => {}
            _ => best = Some((format, indices, score)),
        }
    }
    let Some((format, indices, (bad, _))) = best else {
        return (IndexFormat::U16, Vec::new());
    };
    if bad > 0 {
        warn!(
            bad,
            total = indices.len(),
            "best index decode still references out-of-range vertices"
        );
    }
    (format, indices)
}

/// Infer list-vs-strip from the primitive type field and restart
/// frequency.
fn infer_topology(prim_type: u32, indices: &[u32], format: IndexFormat) -> Topology {
    if prim_type == 1 {
        return Topology::TriangleStrip;
    }
    if indices.is_empty() {
        return Topology::TriangleList;
    }
    let restarts = indices.iter().filter(|&&i| i == format.restart()).count();
    if restarts as f32 / indices.len() as f32 > STRIP_RESTART_THRESHOLD {
        Topology::TriangleStrip
    } else {
        Topology::TriangleList
    }
}
