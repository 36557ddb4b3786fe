//! Trees: branch hierarchies with transforms, attachments, and
//! animations.

use glam::{Mat4, Quat, Vec4};
use tracing::warn;

use crate::anim::Animation;
use crate::branch::Branch;
use crate::context::{sanitize_count, LoadContext};
use crate::mesh::SharedPools;
use crate::scene::{Camera, CollisionMesh, Curve, Emitter, Light};

/// Maximum plausible branch count per tree.
pub const MAX_BRANCHES: usize = 4096;

/// Maximum plausible attachment table sizes.
pub const MAX_COLLISION_MESHES: usize = 256;
pub const MAX_LIGHTS: usize = 256;
pub const MAX_CAMERAS: usize = 256;
pub const MAX_EMITTERS: usize = 256;
pub const MAX_CURVES: usize = 256;

/// Maximum plausible animation count per tree.
pub const MAX_ANIMATIONS: usize = 512;

/// One vegetation instance: a flat branch arena plus parallel transform
/// arrays and attached resources.
///
/// Branch relationships are indices into `branches`; the per-branch
/// translation/rotation/scale arrays are indexed the same way.
#[derive(Debug)]
pub struct Tree<'a> {
    pub name: Option<String>,
    pub branches: Vec<Branch<'a>>,
    pub translations: Vec<Vec4>,
    pub rotations: Vec<Vec4>,
    pub scales: Vec<Vec4>,
    pub collision_meshes: Vec<CollisionMesh>,
    pub lights: Vec<Light>,
    pub cameras: Vec<Camera>,
    pub emitters: Vec<Emitter>,
    pub curves: Vec<Curve>,
    pub animations: Vec<Animation<'a>>,
}

impl<'a> Tree<'a> {
    /// Serialized size of a tree record for a given forest version.
    ///
    /// Version 2 inserted the curve table between the emitter and
    /// animation tables.
    pub const fn wire_size(version: u32) -> usize {
        if version >= 2 {
            72
        } else {
            64
        }
    }

    /// Load a tree record at `base`.
    pub fn load(
        ctx: &LoadContext<'a>,
        base: usize,
        version: u32,
        pools: &mut SharedPools<'a>,
    ) -> Tree<'a> {
        let num_branches = sanitize_count(ctx.read_i32(base), MAX_BRANCHES, "branch count");
        let branches_ptr = ctx.read_pointer(base + 4);
        let translations_ptr = ctx.read_pointer(base + 8);
        let rotations_ptr = ctx.read_pointer(base + 12);
        let scales_ptr = ctx.read_pointer(base + 16);
        let num_collision = ctx.read_i32(base + 20);
        let collision_ptr = ctx.read_pointer(base + 24);
        let num_lights = ctx.read_i32(base + 28);
        let lights_ptr = ctx.read_pointer(base + 32);
        let num_cameras = ctx.read_i32(base + 36);
        let cameras_ptr = ctx.read_pointer(base + 40);
        let num_emitters = ctx.read_i32(base + 44);
        let emitters_ptr = ctx.read_pointer(base + 48);

        let (num_curves, curves_ptr, num_animations, animations_ptr, name_ptr) = if version >= 2 {
            (
                ctx.read_i32(base + 52),
                ctx.read_pointer(base + 56),
                ctx.read_i32(base + 60),
                ctx.read_pointer(base + 64),
                base + 68,
            )
        } else {
            (
                0,
                -1,
                ctx.read_i32(base + 52),
                ctx.read_pointer(base + 56),
                base + 60,
            )
        };

        let mut branches = Vec::with_capacity(num_branches);
        if let Some(table) = ctx.resolve_pointer(branches_ptr) {
            for i in 0..num_branches {
                branches.push(Branch::load(ctx, table + i * Branch::WIRE_SIZE, pools));
            }
        } else if num_branches > 0 {
            warn!(branches_ptr, "branch table pointer invalid, tree left empty");
        }

        let read_vec4_table = |ptr: i32, what: &'static str| -> Vec<Vec4> {
            let Some(table) = ctx.resolve_pointer(ptr) else {
                if !branches.is_empty() {
                    warn!(ptr, what, "transform table pointer invalid");
                }
                return Vec::new();
            };
            (0..branches.len())
                .map(|i| ctx.read_vec4(table + i * 16))
                .collect()
        };
        let translations = read_vec4_table(translations_ptr, "translations");
        let rotations = read_vec4_table(rotations_ptr, "rotations");
        let scales = read_vec4_table(scales_ptr, "scales");

        let load_table = |count: i32, ptr: i32, max: usize, what: &'static str, wire: usize| {
            let count = sanitize_count(count, max, what);
            match ctx.resolve_pointer(ptr) {
                Some(table) => (0..count).map(|i| table + i * wire).collect(),
                None => {
                    if count > 0 {
                        warn!(ptr, what, "table pointer invalid");
                    }
                    Vec::new()
                }
            }
        };

        let collision_meshes = load_table(
            num_collision,
            collision_ptr,
            MAX_COLLISION_MESHES,
            "collision mesh count",
            CollisionMesh::WIRE_SIZE,
        )
        .into_iter()
        .map(|at: usize| CollisionMesh::load(ctx, at))
        .collect();
        let lights = load_table(num_lights, lights_ptr, MAX_LIGHTS, "light count", Light::WIRE_SIZE)
            .into_iter()
            .map(|at: usize| Light::load(ctx, at))
            .collect();
        let cameras = load_table(
            num_cameras,
            cameras_ptr,
            MAX_CAMERAS,
            "camera count",
            Camera::WIRE_SIZE,
        )
        .into_iter()
        .map(|at: usize| Camera::load(ctx, at))
        .collect();
        let emitters = load_table(
            num_emitters,
            emitters_ptr,
            MAX_EMITTERS,
            "emitter count",
            Emitter::WIRE_SIZE,
        )
        .into_iter()
        .map(|at: usize| Emitter::load(ctx, at))
        .collect();
        let curves = load_table(num_curves, curves_ptr, MAX_CURVES, "curve count", Curve::WIRE_SIZE)
            .into_iter()
            .map(|at: usize| Curve::load(ctx, at))
            .collect();
        let animations = load_table(
            num_animations,
            animations_ptr,
            MAX_ANIMATIONS,
            "animation count",
            Animation::WIRE_SIZE,
        )
        .into_iter()
        .map(|at: usize| Animation::load(ctx, at))
        .collect();

        Tree {
            name: ctx.read_string_pointer(name_ptr).map(str::to_owned),
            branches,
            translations,
            rotations,
            scales,
            collision_meshes,
            lights,
            cameras,
            emitters,
            curves,
            animations,
        }
    }

    /// The local transform of one branch, composed from the parallel
    /// translation/rotation/scale arrays.
    pub fn local_transform(&self, index: usize) -> Mat4 {
        let translation = self.translations.get(index).copied().unwrap_or(Vec4::ZERO);
        let rotation = self
            .rotations
            .get(index)
            .copied()
            .unwrap_or(Vec4::new(0.0, 0.0, 0.0, 1.0));
        let scale = self.scales.get(index).copied().unwrap_or(Vec4::ONE);

        let quat = Quat::from_xyzw(rotation.x, rotation.y, rotation.z, rotation.w);
        let quat = if quat.length_squared() > 1.0e-12 {
            quat.normalize()
        } else {
            Quat::IDENTITY
        };

        Mat4::from_scale_rotation_translation(scale.truncate(), quat, translation.truncate())
    }

    /// World transforms for every branch, composed root-down.
    ///
    /// The format does not guarantee an acyclic parent graph; a branch
    /// whose parent chain loops (including a self-parent) is treated as a
    /// root, and each branch is composed at most once.
    pub fn world_transforms(&self) -> Vec<Mat4> {
        let count = self.branches.len();
        let mut memo: Vec<Option<Mat4>> = vec![None; count];
        for index in 0..count {
            self.world_of(index, &mut memo, 0);
        }
        memo.into_iter()
            .map(|m| m.unwrap_or(Mat4::IDENTITY))
            .collect()
    }

    fn world_of(&self, index: usize, memo: &mut Vec<Option<Mat4>>, depth: usize) -> Mat4 {
        if let Some(m) = memo[index] {
            return m;
        }

        let local = self.local_transform(index);
        let parent = self.branches[index].parent;
        let world = if depth > self.branches.len() {
            // Parent chain longer than the arena: a cycle. Break it here.
            warn!(index, "branch parent chain loops, treating as root");
            local
        } else if parent < 0 || parent as usize >= self.branches.len() || parent as usize == index {
            local
        } else {
            self.world_of(parent as usize, memo, depth + 1) * local
        };

        memo[index] = Some(world);
        world
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::BranchPayload;
    use glam::Vec3;
    use leshy_common::Platform;

    /// Hand-build a tree with the given parent indices and unit-step
    /// translations, bypassing the wire format.
    fn tree_with_parents(parents: &[i16]) -> Tree<'static> {
        let branches = parents
            .iter()
            .map(|&parent| Branch {
                flags: 0,
                parent,
                first_child: -1,
                sibling: -1,
                payload: BranchPayload::None,
            })
            .collect::<Vec<_>>();
        let count = branches.len();
        Tree {
            name: None,
            branches,
            translations: (0..count)
                .map(|i| Vec4::new(i as f32, 0.0, 0.0, 0.0))
                .collect(),
            rotations: vec![Vec4::new(0.0, 0.0, 0.0, 1.0); count],
            scales: vec![Vec4::ONE; count],
            collision_meshes: Vec::new(),
            lights: Vec::new(),
            cameras: Vec::new(),
            emitters: Vec::new(),
            curves: Vec::new(),
            animations: Vec::new(),
        }
    }

    #[test]
    fn test_world_transform_composition() {
        // 0 -> 1 -> 2 chain with translations (0,0,0), (1,0,0), (2,0,0).
        let tree = tree_with_parents(&[-1, 0, 1]);
        let worlds = tree.world_transforms();

        let origin = |m: &Mat4| m.transform_point3(Vec3::ZERO);
        assert_eq!(origin(&worlds[0]), Vec3::new(0.0, 0.0, 0.0));
        assert_eq!(origin(&worlds[1]), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(origin(&worlds[2]), Vec3::new(3.0, 0.0, 0.0));
    }

    #[test]
    fn test_self_cycle_does_not_hang() {
        // branch[2].parent == 2: must terminate and treat it as a root.
        let tree = tree_with_parents(&[-1, 0, 2]);
        let worlds = tree.world_transforms();

        let origin = worlds[2].transform_point3(Vec3::ZERO);
        assert_eq!(origin, Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_mutual_cycle_does_not_hang() {
        // 1 and 2 parent each other.
        let tree = tree_with_parents(&[-1, 2, 1]);
        let worlds = tree.world_transforms();
        assert_eq!(worlds.len(), 3);
    }

    #[test]
    fn test_out_of_range_parent_is_root() {
        let tree = tree_with_parents(&[-1, 99]);
        let worlds = tree.world_transforms();

        let origin = worlds[1].transform_point3(Vec3::ZERO);
        assert_eq!(origin, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_missing_transform_arrays_default_to_identity() {
        let mut tree = tree_with_parents(&[-1]);
        tree.translations.clear();
        tree.rotations.clear();
        tree.scales.clear();

        assert_eq!(tree.local_transform(0), Mat4::IDENTITY);
    }
}
