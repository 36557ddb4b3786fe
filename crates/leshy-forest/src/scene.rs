//! Auxiliary per-tree scene objects: collision meshes, lights, cameras,
//! emitters, and curves.

use glam::Vec4;
use tracing::warn;

use crate::context::{sanitize_count, LoadContext};

/// Maximum plausible collision vertex count.
pub const MAX_COLLISION_VERTICES: usize = 65_536;

/// Maximum plausible collision index count.
pub const MAX_COLLISION_INDICES: usize = 262_144;

/// Maximum plausible curve point count.
pub const MAX_CURVE_POINTS: usize = 4096;

/// A convex collision mesh attached to a tree.
#[derive(Debug, Clone, Default)]
pub struct CollisionMesh {
    pub vertices: Vec<Vec4>,
    pub indices: Vec<u32>,
}

impl CollisionMesh {
    /// Serialized size of a collision mesh record.
    pub const WIRE_SIZE: usize = 16;

    /// Load a collision mesh at `base`.
    pub fn load(ctx: &LoadContext<'_>, base: usize) -> Self {
        let num_vertices = sanitize_count(
            ctx.read_i32(base),
            MAX_COLLISION_VERTICES,
            "collision vertex count",
        );
        let vertices_ptr = ctx.read_pointer(base + 4);
        let num_indices = sanitize_count(
            ctx.read_i32(base + 8),
            MAX_COLLISION_INDICES,
            "collision index count",
        );
        let indices_ptr = ctx.read_pointer(base + 12);

        let mut vertices = Vec::with_capacity(num_vertices);
        if let Some(table) = ctx.resolve_pointer(vertices_ptr) {
            for i in 0..num_vertices {
                vertices.push(ctx.read_vec4(table + i * 16));
            }
        } else if num_vertices > 0 {
            warn!(vertices_ptr, "collision vertex table pointer invalid");
        }

        let mut indices = Vec::with_capacity(num_indices);
        if let Some(table) = ctx.resolve_pointer(indices_ptr) {
            for i in 0..num_indices {
                indices.push(ctx.read_u16(table + i * 2) as u32);
            }
        } else if num_indices > 0 {
            warn!(indices_ptr, "collision index table pointer invalid");
        }

        Self { vertices, indices }
    }
}

/// A point light attached to a tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub kind: u32,
    pub color: Vec4,
    pub position: Vec4,
    pub radius: f32,
}

impl Light {
    /// Serialized size of a light record.
    pub const WIRE_SIZE: usize = 40;

    /// Load a light at `base`.
    pub fn load(ctx: &LoadContext<'_>, base: usize) -> Self {
        Self {
            kind: ctx.read_u32(base),
            color: ctx.read_vec4(base + 4),
            position: ctx.read_vec4(base + 20),
            radius: ctx.read_f32(base + 36),
        }
    }
}

/// A camera anchor attached to a tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec4,
    pub target: Vec4,
    pub fov: f32,
}

impl Camera {
    /// Serialized size of a camera record.
    pub const WIRE_SIZE: usize = 36;

    /// Load a camera at `base`.
    pub fn load(ctx: &LoadContext<'_>, base: usize) -> Self {
        Self {
            position: ctx.read_vec4(base),
            target: ctx.read_vec4(base + 16),
            fov: ctx.read_f32(base + 32),
        }
    }
}

/// A particle emitter anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct Emitter {
    pub kind: u32,
    pub position: Vec4,
    pub rate: f32,
}

impl Emitter {
    /// Serialized size of an emitter record.
    pub const WIRE_SIZE: usize = 24;

    /// Load an emitter at `base`.
    pub fn load(ctx: &LoadContext<'_>, base: usize) -> Self {
        Self {
            kind: ctx.read_u32(base),
            position: ctx.read_vec4(base + 4),
            rate: ctx.read_f32(base + 20),
        }
    }
}

/// A sampled spline curve (wind sway paths and similar).
#[derive(Debug, Clone, Default)]
pub struct Curve {
    pub points: Vec<Vec4>,
}

impl Curve {
    /// Serialized size of a curve record.
    pub const WIRE_SIZE: usize = 8;

    /// Load a curve at `base`.
    pub fn load(ctx: &LoadContext<'_>, base: usize) -> Self {
        let num_points =
            sanitize_count(ctx.read_i32(base), MAX_CURVE_POINTS, "curve point count");
        let points_ptr = ctx.read_pointer(base + 4);

        let mut points = Vec::with_capacity(num_points);
        if let Some(table) = ctx.resolve_pointer(points_ptr) {
            for i in 0..num_points {
                points.push(ctx.read_vec4(table + i * 16));
            }
        } else if num_points > 0 {
            warn!(points_ptr, "curve point table pointer invalid");
        }

        Self { points }
    }
}
