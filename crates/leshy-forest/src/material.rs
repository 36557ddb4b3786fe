//! Shared material and texture resources.

use glam::Vec4;

use crate::context::{sanitize_count, LoadContext};

/// Maximum plausible texture/material table size.
pub const MAX_TEXTURES: usize = 4096;

/// A material referenced by primitives.
///
/// Materials are shared: several primitives may point at the same
/// serialized material, which the loader dedupes by address.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: Option<String>,
    /// Index into the forest's texture table, -1 for untextured.
    pub texture_index: i32,
    pub blend_mode: u32,
    pub diffuse: Vec4,
}

impl Material {
    /// Serialized size of a material record.
    pub const WIRE_SIZE: usize = 28;

    /// Load a material at `base`.
    pub fn load(ctx: &LoadContext<'_>, base: usize) -> Self {
        Self {
            name: ctx.read_string_pointer(base).map(str::to_owned),
            texture_index: ctx.read_i32(base + 4),
            blend_mode: ctx.read_u32(base + 8),
            diffuse: ctx.read_vec4(base + 12),
        }
    }
}

/// A texture binding: name plus a reference into the resource pool.
#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    pub name: Option<String>,
    /// Index into the forest's texture resource pool, -1 if unresolved.
    pub resource_index: i32,
    pub wrap_mode: u32,
}

impl Texture {
    /// Serialized size of a texture record.
    pub const WIRE_SIZE: usize = 12;

    /// Load a texture record at `base`.
    pub fn load(ctx: &LoadContext<'_>, base: usize) -> Self {
        Self {
            name: ctx.read_string_pointer(base).map(str::to_owned),
            resource_index: ctx.read_i32(base + 4),
            wrap_mode: ctx.read_u32(base + 8),
        }
    }
}

/// Raw pixel data for a texture, usually GPU-resident.
#[derive(Debug, Clone)]
pub struct TextureResource<'a> {
    pub name: Option<String>,
    pub format: u32,
    pub width: u16,
    pub height: u16,
    /// Raw pixel bytes; empty when the payload was unavailable.
    pub data: &'a [u8],
}

impl<'a> TextureResource<'a> {
    /// Serialized size of a texture resource record.
    pub const WIRE_SIZE: usize = 20;

    /// Load a texture resource at `base`.
    pub fn load(ctx: &LoadContext<'a>, base: usize) -> Self {
        let name = ctx.read_string_pointer(base).map(str::to_owned);
        let data_ptr = ctx.read_pointer(base + 4);
        let data_size = ctx.read_u32(base + 8) as usize;
        let format = ctx.read_u32(base + 12);
        let width = ctx.read_u16(base + 16);
        let height = ctx.read_u16(base + 18);

        // Pixel payloads live in the GPU block; older files keep them on
        // the CPU side.
        let data = if data_ptr >= 0 {
            let offset = data_ptr as usize;
            let gpu = ctx.load_buffer(offset, data_size, true);
            if gpu.is_empty() && data_size > 0 {
                ctx.load_buffer(offset, data_size, false)
            } else {
                gpu
            }
        } else {
            &[]
        };

        Self {
            name,
            format,
            width,
            height,
            data,
        }
    }
}

/// Load a contiguous table of texture records.
pub fn load_texture_table(ctx: &LoadContext<'_>, count: i32, table_ptr: i32) -> Vec<Texture> {
    let count = sanitize_count(count, MAX_TEXTURES, "texture count");
    let Some(base) = ctx.resolve_pointer(table_ptr) else {
        return Vec::new();
    };
    (0..count)
        .map(|i| Texture::load(ctx, base + i * Texture::WIRE_SIZE))
        .collect()
}

/// Load a contiguous table of texture resource records.
pub fn load_texture_resource_table<'a>(
    ctx: &LoadContext<'a>,
    count: i32,
    table_ptr: i32,
) -> Vec<TextureResource<'a>> {
    let count = sanitize_count(count, MAX_TEXTURES, "texture resource count");
    let Some(base) = ctx.resolve_pointer(table_ptr) else {
        return Vec::new();
    };
    (0..count)
        .map(|i| TextureResource::load(ctx, base + i * TextureResource::WIRE_SIZE))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use leshy_common::Platform;

    #[test]
    fn test_material_load() {
        let mut buf = vec![0u8; Material::WIRE_SIZE];
        let name_ptr = buf.len() as i32;
        buf.extend_from_slice(b"bark\0");

        buf[0..4].copy_from_slice(&name_ptr.to_le_bytes());
        buf[4..8].copy_from_slice(&2i32.to_le_bytes());
        buf[8..12].copy_from_slice(&1u32.to_le_bytes());
        buf[12..16].copy_from_slice(&1.0f32.to_le_bytes());
        buf[16..20].copy_from_slice(&0.5f32.to_le_bytes());
        buf[20..24].copy_from_slice(&0.25f32.to_le_bytes());
        buf[24..28].copy_from_slice(&1.0f32.to_le_bytes());

        let ctx = LoadContext::new(&buf, Platform::pc());
        let material = Material::load(&ctx, 0);

        assert_eq!(material.name.as_deref(), Some("bark"));
        assert_eq!(material.texture_index, 2);
        assert_eq!(material.diffuse, Vec4::new(1.0, 0.5, 0.25, 1.0));
    }

    #[test]
    fn test_texture_resource_falls_back_to_cpu() {
        let mut buf = vec![0u8; TextureResource::WIRE_SIZE];
        let data_ptr = buf.len() as i32;
        buf.extend_from_slice(&[7u8; 8]);

        buf[4..8].copy_from_slice(&data_ptr.to_le_bytes());
        buf[8..12].copy_from_slice(&8u32.to_le_bytes());
        buf[16..18].copy_from_slice(&2u16.to_le_bytes());
        buf[18..20].copy_from_slice(&2u16.to_le_bytes());

        // No GPU buffer at all: the loader must degrade to the CPU side.
        let ctx = LoadContext::new(&buf, Platform::pc());
        let resource = TextureResource::load(&ctx, 0);

        assert_eq!(resource.data, &[7u8; 8]);
        assert_eq!(resource.width, 2);
    }

    #[test]
    fn test_table_count_clamped() {
        let buf = vec![0u8; 64];
        let ctx = LoadContext::new(&buf, Platform::pc());

        assert!(load_texture_table(&ctx, -5, 0).is_empty());
        assert!(load_texture_table(&ctx, i32::MAX, 0).is_empty());
    }
}
