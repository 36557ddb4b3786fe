//! Branches: the nodes of a tree's rigid hierarchy.
//!
//! Branch linkage is index-based: `parent`, `first_child`, and `sibling`
//! index into the owning tree's flat branch array, with `-1` meaning
//! none. The tree array-owns every branch; a branch never owns another.

use tracing::warn;

use crate::context::{sanitize_count, LoadContext};
use crate::mesh::{RenderMesh, SharedPools};

/// Maximum plausible LOD level count.
pub const MAX_LOD_LEVELS: usize = 16;

/// Flag bit: the branch payload is an LOD set.
const FLAG_LOD: u32 = 0x1;

/// Flag bit: the branch payload is a single mesh.
const FLAG_MESH: u32 = 0x2;

/// What a branch renders, selected by its flag bits.
#[derive(Debug, Clone, Default)]
pub enum BranchPayload<'a> {
    /// Structural branch with no geometry of its own.
    #[default]
    None,
    /// Distance-thresholded mesh list.
    Lod(LodSet<'a>),
    /// A single mesh.
    Mesh(RenderMesh<'a>),
}

/// One node of the branch hierarchy.
#[derive(Debug, Clone)]
pub struct Branch<'a> {
    pub flags: u32,
    /// Index of the parent branch, -1 for roots.
    pub parent: i16,
    /// Index of the first child branch, -1 for none.
    pub first_child: i16,
    /// Index of the next sibling branch, -1 for none.
    pub sibling: i16,
    pub payload: BranchPayload<'a>,
}

impl<'a> Branch<'a> {
    /// Serialized size of a branch record.
    pub const WIRE_SIZE: usize = 16;

    /// Load a branch at `base`.
    pub fn load(ctx: &LoadContext<'a>, base: usize, pools: &mut SharedPools<'a>) -> Branch<'a> {
        let flags = ctx.read_u32(base);
        let parent = ctx.read_i16(base + 4);
        let first_child = ctx.read_i16(base + 6);
        let sibling = ctx.read_i16(base + 8);
        let payload_ptr = ctx.read_pointer(base + 12);

        let payload = match (flags & FLAG_LOD != 0, flags & FLAG_MESH != 0) {
            (false, false) => BranchPayload::None,
            (true, false) => match ctx.resolve_pointer(payload_ptr) {
                Some(at) => BranchPayload::Lod(LodSet::load(ctx, at, pools)),
                None => {
                    warn!(payload_ptr, "LOD payload pointer invalid, branch left bare");
                    BranchPayload::None
                }
            },
            (false, true) => match ctx.resolve_pointer(payload_ptr) {
                Some(at) => BranchPayload::Mesh(RenderMesh::load(ctx, at, pools)),
                None => {
                    warn!(payload_ptr, "mesh payload pointer invalid, branch left bare");
                    BranchPayload::None
                }
            },
            (true, true) => {
                // The two payload bits are exclusive by contract; files
                // with both set resolve as LOD, matching the original
                // loader's dispatch order.
                warn!(flags, "branch sets both payload flags, resolving as LOD");
                match ctx.resolve_pointer(payload_ptr) {
                    Some(at) => BranchPayload::Lod(LodSet::load(ctx, at, pools)),
                    None => BranchPayload::None,
                }
            }
        };

        Branch {
            flags,
            parent,
            first_child,
            sibling,
            payload,
        }
    }

    /// Whether this branch is a hierarchy root.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent < 0
    }
}

/// One level of an LOD set.
#[derive(Debug, Clone)]
pub struct LodLevel<'a> {
    /// Switch-in distance threshold.
    pub distance: f32,
    pub mesh: RenderMesh<'a>,
}

/// A distance-thresholded list of meshes.
#[derive(Debug, Clone, Default)]
pub struct LodSet<'a> {
    pub levels: Vec<LodLevel<'a>>,
}

impl<'a> LodSet<'a> {
    /// Serialized size of an LOD set record.
    pub const WIRE_SIZE: usize = 12;

    /// Load an LOD set at `base`.
    pub fn load(ctx: &LoadContext<'a>, base: usize, pools: &mut SharedPools<'a>) -> LodSet<'a> {
        let num_levels = sanitize_count(ctx.read_i32(base), MAX_LOD_LEVELS, "LOD level count");
        let meshes_ptr = ctx.read_pointer(base + 4);
        let distances_ptr = ctx.read_pointer(base + 8);

        let Some(meshes_table) = ctx.resolve_pointer(meshes_ptr) else {
            if num_levels > 0 {
                warn!(meshes_ptr, "LOD mesh table pointer invalid");
            }
            return LodSet::default();
        };
        let distances_table = ctx.resolve_pointer(distances_ptr);

        let mut levels = Vec::with_capacity(num_levels);
        for i in 0..num_levels {
            let mesh_ptr = ctx.read_pointer(meshes_table + i * 4);
            let Some(mesh_at) = ctx.resolve_pointer(mesh_ptr) else {
                warn!(level = i, mesh_ptr, "LOD level mesh pointer invalid, level skipped");
                continue;
            };
            let distance = distances_table
                .map(|at| ctx.read_f32(at + i * 4))
                .unwrap_or(0.0);
            levels.push(LodLevel {
                distance,
                mesh: RenderMesh::load(ctx, mesh_at, pools),
            });
        }

        LodSet { levels }
    }

    /// Pick the level for a view distance: the last level whose threshold
    /// the distance has passed.
    pub fn level_for_distance(&self, distance: f32) -> Option<&LodLevel<'a>> {
        self.levels
            .iter()
            .rev()
            .find(|level| distance >= level.distance)
            .or_else(|| self.levels.first())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leshy_common::Platform;

    fn bare_branch_bytes(flags: u32, parent: i16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&flags.to_le_bytes());
        buf.extend_from_slice(&parent.to_le_bytes());
        buf.extend_from_slice(&(-1i16).to_le_bytes());
        buf.extend_from_slice(&(-1i16).to_le_bytes());
        buf.extend_from_slice(&0i16.to_le_bytes());
        buf.extend_from_slice(&(-1i32).to_le_bytes());
        buf
    }

    #[test]
    fn test_bare_branch() {
        let buf = bare_branch_bytes(0, -1);
        let ctx = LoadContext::new(&buf, Platform::pc());
        let mut pools = SharedPools::default();
        let branch = Branch::load(&ctx, 0, &mut pools);

        assert!(branch.is_root());
        assert!(matches!(branch.payload, BranchPayload::None));
        assert_eq!(branch.first_child, -1);
    }

    #[test]
    fn test_invalid_mesh_pointer_degrades() {
        // Mesh flag set but the payload pointer is out of range: the
        // branch must survive without geometry.
        let buf = bare_branch_bytes(FLAG_MESH, 0);
        let ctx = LoadContext::new(&buf, Platform::pc());
        let mut pools = SharedPools::default();
        let branch = Branch::load(&ctx, 0, &mut pools);

        assert!(matches!(branch.payload, BranchPayload::None));
        assert_eq!(branch.parent, 0);
    }

    #[test]
    fn test_lod_level_selection() {
        let mk = |distance| LodLevel {
            distance,
            mesh: RenderMesh {
                primitives: Vec::new(),
                bone_matrix_indices: Vec::new(),
                bone_inverse_matrices: Vec::new(),
            },
        };
        let set = LodSet {
            levels: vec![mk(0.0), mk(10.0), mk(50.0)],
        };

        assert_eq!(set.level_for_distance(5.0).unwrap().distance, 0.0);
        assert_eq!(set.level_for_distance(12.0).unwrap().distance, 10.0);
        assert_eq!(set.level_for_distance(500.0).unwrap().distance, 50.0);
    }
}
