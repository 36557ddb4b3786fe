//! Forest libraries: named bundles of trees plus shared texture
//! resources.

use rustc_hash::FxHashMap;
use tracing::warn;

use leshy_common::{crc, Platform};
use leshy_sif::Chunk;

use crate::context::{sanitize_count, LoadContext};
use crate::material::{load_texture_resource_table, load_texture_table, Texture, TextureResource};
use crate::mesh::SharedPools;
use crate::tree::Tree;

/// Maximum plausible entry count per library.
pub const MAX_ENTRIES: usize = 1024;

/// Maximum plausible tree count per forest.
pub const MAX_TREES: usize = 4096;

/// Maximum plausible group count per forest.
pub const MAX_GROUPS: usize = 256;

/// Maximum plausible member count per group.
pub const MAX_GROUP_MEMBERS: usize = 4096;

/// A named grouping of trees within a forest.
#[derive(Debug, Clone, Default)]
pub struct TreeGroup {
    pub name: Option<String>,
    /// Indices into the forest's tree array.
    pub members: Vec<i32>,
}

impl TreeGroup {
    /// Serialized size of a group record.
    pub const WIRE_SIZE: usize = 12;

    /// Load a group record at `base`.
    pub fn load(ctx: &LoadContext<'_>, base: usize) -> Self {
        let name = ctx.read_string_pointer(base).map(str::to_owned);
        let num_members = sanitize_count(
            ctx.read_i32(base + 4),
            MAX_GROUP_MEMBERS,
            "group member count",
        );
        let members_ptr = ctx.read_pointer(base + 8);

        let mut members = Vec::with_capacity(num_members);
        if let Some(table) = ctx.resolve_pointer(members_ptr) {
            for i in 0..num_members {
                members.push(ctx.read_i32(table + i * 4));
            }
        } else if num_members > 0 {
            warn!(members_ptr, "group member table pointer invalid");
        }

        Self { name, members }
    }
}

/// A flat pool of trees plus the texture resources they share.
#[derive(Debug)]
pub struct Forest<'a> {
    pub trees: Vec<Tree<'a>>,
    pub texture_resources: Vec<TextureResource<'a>>,
    pub textures: Vec<Texture>,
    pub tree_groups: Vec<TreeGroup>,
}

impl<'a> Forest<'a> {
    /// Load a forest at `base`.
    ///
    /// The pointer-field sequence is version-dependent: version 1 files
    /// have no group table.
    pub fn load(
        ctx: &LoadContext<'a>,
        base: usize,
        version: u32,
        pools: &mut SharedPools<'a>,
    ) -> Forest<'a> {
        let num_trees = sanitize_count(ctx.read_i32(base), MAX_TREES, "tree count");
        let trees_ptr = ctx.read_pointer(base + 4);
        let num_texture_resources = ctx.read_i32(base + 8);
        let texture_resources_ptr = ctx.read_pointer(base + 12);
        let num_textures = ctx.read_i32(base + 16);
        let textures_ptr = ctx.read_pointer(base + 20);

        let mut trees = Vec::with_capacity(num_trees);
        if let Some(table) = ctx.resolve_pointer(trees_ptr) {
            // Tree records are contiguous; the cursor advances by the
            // record's serialized size between siblings.
            let mut at = table;
            for _ in 0..num_trees {
                trees.push(Tree::load(ctx, at, version, pools));
                at += Tree::wire_size(version);
            }
        } else if num_trees > 0 {
            warn!(trees_ptr, "tree table pointer invalid, forest left empty");
        }

        let texture_resources =
            load_texture_resource_table(ctx, num_texture_resources, texture_resources_ptr);
        let textures = load_texture_table(ctx, num_textures, textures_ptr);

        let tree_groups = if version >= 2 {
            let num_groups =
                sanitize_count(ctx.read_i32(base + 24), MAX_GROUPS, "group count");
            let groups_ptr = ctx.read_pointer(base + 28);
            match ctx.resolve_pointer(groups_ptr) {
                Some(table) => (0..num_groups)
                    .map(|i| TreeGroup::load(ctx, table + i * TreeGroup::WIRE_SIZE))
                    .collect(),
                None => {
                    if num_groups > 0 {
                        warn!(groups_ptr, "group table pointer invalid");
                    }
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Forest {
            trees,
            texture_resources,
            textures,
            tree_groups,
        }
    }
}

/// One named forest within a library.
#[derive(Debug)]
pub struct ForestEntry<'a> {
    pub hash: u32,
    pub name: Option<String>,
    pub forest: Forest<'a>,
}

/// A Forest chunk's full contents: named forests indexed by name hash.
#[derive(Debug)]
pub struct ForestLibrary<'a> {
    pub version: u32,
    pub entries: Vec<ForestEntry<'a>>,
    index: FxHashMap<u32, usize>,
}

impl<'a> ForestLibrary<'a> {
    /// Load a library from a Forest chunk.
    ///
    /// One malformed entry never prevents the rest from loading: an
    /// entry whose forest pointer is structurally invalid is skipped with
    /// a warning and loading continues.
    pub fn load(chunk: &Chunk<'a>) -> ForestLibrary<'a> {
        let platform = Platform::from_big_endian(chunk.is_big_endian());
        let ctx = LoadContext::with_gpu(
            chunk.payload(),
            chunk.trailer(),
            platform,
            chunk.relocations(),
        );

        let version = ctx.read_u32(0);
        let num_entries = sanitize_count(ctx.read_i32(4), MAX_ENTRIES, "entry count");
        let entries_ptr = ctx.read_pointer(8);

        let mut entries = Vec::with_capacity(num_entries);
        let mut pools = SharedPools::default();
        if let Some(table) = ctx.resolve_pointer(entries_ptr) {
            let mut at = table;
            for _ in 0..num_entries {
                let hash = ctx.read_u32(at);
                let name = ctx.read_string_pointer(at + 4).map(str::to_owned);
                let forest_ptr = ctx.read_pointer(at + 8);
                at += 16;

                // The forest pointer is structural: without it there is
                // no entry to load, so this one is skipped.
                let Some(forest_at) = ctx.resolve_pointer(forest_ptr) else {
                    let err = crate::Error::StructuralPointerInvalid {
                        what: "forest entry",
                        address: forest_ptr,
                    };
                    warn!(?name, %err, "entry skipped");
                    continue;
                };
                entries.push(ForestEntry {
                    hash,
                    name,
                    forest: Forest::load(&ctx, forest_at, version, &mut pools),
                });
            }
        } else if num_entries > 0 {
            warn!(entries_ptr, "entry table pointer invalid, library left empty");
        }

        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.hash, i))
            .collect();

        ForestLibrary {
            version,
            entries,
            index,
        }
    }

    /// Look up an entry by its stored name hash.
    pub fn get_by_hash(&self, hash: u32) -> Option<&ForestEntry<'a>> {
        self.index.get(&hash).map(|&i| &self.entries[i])
    }

    /// Look up an entry by name (hashed case-insensitively).
    pub fn find(&self, name: &str) -> Option<&ForestEntry<'a>> {
        self.get_by_hash(crc::hash_name(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::BranchPayload;
    use glam::Vec4;
    use leshy_sif::{ChunkKind, SifContainer};

    fn put_u32(buf: &mut [u8], at: usize, v: u32) {
        buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }
    fn put_i32(buf: &mut [u8], at: usize, v: i32) {
        buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }
    fn put_i16(buf: &mut [u8], at: usize, v: i16) {
        buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
    }
    fn put_f32(buf: &mut [u8], at: usize, v: f32) {
        buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }
    fn put_vec4(buf: &mut [u8], at: usize, v: [f32; 4]) {
        for (i, c) in v.iter().enumerate() {
            put_f32(buf, at + i * 4, *c);
        }
    }

    /// Build a version-2 library payload: two entries, the second with a
    /// structurally invalid forest pointer; the first carries one tree
    /// with a root branch and a mesh branch (one triangle).
    fn build_library_payload() -> Vec<u8> {
        const ENTRIES: usize = 12;
        const STR0: usize = 44; // "oak\0"
        const STR1: usize = 48; // "bad\0"
        const FOREST: usize = 52;
        const TEXTURE: usize = 84;
        const GROUP: usize = 96;
        const MEMBERS: usize = 108;
        const TREE: usize = 112;
        const BRANCHES: usize = 184;
        const TRANSLATIONS: usize = 216;
        const ROTATIONS: usize = 248;
        const SCALES: usize = 280;
        const MESH: usize = 312;
        const PRIMITIVE: usize = 332;
        const MATERIAL: usize = 356;
        const STREAM: usize = 384;
        const ATTRS: usize = 412;
        const VERTEX_DATA: usize = 420;
        const INDEX_DATA: usize = 456;
        const TOTAL: usize = 462;

        let mut buf = vec![0u8; TOTAL];

        // Library header.
        put_u32(&mut buf, 0, 2);
        put_i32(&mut buf, 4, 2);
        put_i32(&mut buf, 8, ENTRIES as i32);

        // Entries.
        put_u32(&mut buf, ENTRIES, crc::hash_name("oak"));
        put_i32(&mut buf, ENTRIES + 4, STR0 as i32);
        put_i32(&mut buf, ENTRIES + 8, FOREST as i32);
        put_u32(&mut buf, ENTRIES + 16, crc::hash_name("bad"));
        put_i32(&mut buf, ENTRIES + 20, STR1 as i32);
        put_i32(&mut buf, ENTRIES + 24, -5);

        buf[STR0..STR0 + 4].copy_from_slice(b"oak\0");
        buf[STR1..STR1 + 4].copy_from_slice(b"bad\0");

        // Forest header (version 2 layout).
        put_i32(&mut buf, FOREST, 1);
        put_i32(&mut buf, FOREST + 4, TREE as i32);
        put_i32(&mut buf, FOREST + 8, 0);
        put_i32(&mut buf, FOREST + 12, -1);
        put_i32(&mut buf, FOREST + 16, 1);
        put_i32(&mut buf, FOREST + 20, TEXTURE as i32);
        put_i32(&mut buf, FOREST + 24, 1);
        put_i32(&mut buf, FOREST + 28, GROUP as i32);

        // Texture record.
        put_i32(&mut buf, TEXTURE, -1);
        put_i32(&mut buf, TEXTURE + 4, -1);
        put_u32(&mut buf, TEXTURE + 8, 0);

        // Group with one member: tree 0.
        put_i32(&mut buf, GROUP, -1);
        put_i32(&mut buf, GROUP + 4, 1);
        put_i32(&mut buf, GROUP + 8, MEMBERS as i32);
        put_i32(&mut buf, MEMBERS, 0);

        // Tree record (version 2 layout, 72 bytes).
        put_i32(&mut buf, TREE, 2);
        put_i32(&mut buf, TREE + 4, BRANCHES as i32);
        put_i32(&mut buf, TREE + 8, TRANSLATIONS as i32);
        put_i32(&mut buf, TREE + 12, ROTATIONS as i32);
        put_i32(&mut buf, TREE + 16, SCALES as i32);
        for field in (20..52).step_by(8) {
            put_i32(&mut buf, TREE + field, 0);
            put_i32(&mut buf, TREE + field + 4, -1);
        }
        put_i32(&mut buf, TREE + 52, 0); // curves
        put_i32(&mut buf, TREE + 56, -1);
        put_i32(&mut buf, TREE + 60, 0); // animations
        put_i32(&mut buf, TREE + 64, -1);
        put_i32(&mut buf, TREE + 68, STR0 as i32); // name: "oak"

        // Branch 0: root. Branch 1: mesh payload.
        put_u32(&mut buf, BRANCHES, 0);
        put_i16(&mut buf, BRANCHES + 4, -1);
        put_i16(&mut buf, BRANCHES + 6, 1);
        put_i16(&mut buf, BRANCHES + 8, -1);
        put_i32(&mut buf, BRANCHES + 12, -1);
        put_u32(&mut buf, BRANCHES + 16, 0x2);
        put_i16(&mut buf, BRANCHES + 20, 0);
        put_i16(&mut buf, BRANCHES + 22, -1);
        put_i16(&mut buf, BRANCHES + 24, -1);
        put_i32(&mut buf, BRANCHES + 28, MESH as i32);

        put_vec4(&mut buf, TRANSLATIONS, [0.0, 0.0, 0.0, 0.0]);
        put_vec4(&mut buf, TRANSLATIONS + 16, [0.0, 2.5, 0.0, 0.0]);
        put_vec4(&mut buf, ROTATIONS, [0.0, 0.0, 0.0, 1.0]);
        put_vec4(&mut buf, ROTATIONS + 16, [0.0, 0.0, 0.0, 1.0]);
        put_vec4(&mut buf, SCALES, [1.0, 1.0, 1.0, 1.0]);
        put_vec4(&mut buf, SCALES + 16, [1.0, 1.0, 1.0, 1.0]);

        // Mesh with one primitive, no bones.
        put_i32(&mut buf, MESH, 1);
        put_i32(&mut buf, MESH + 4, PRIMITIVE as i32);
        put_i32(&mut buf, MESH + 8, 0);
        put_i32(&mut buf, MESH + 12, -1);
        put_i32(&mut buf, MESH + 16, -1);

        // Primitive: triangle list over 3 vertices.
        put_u32(&mut buf, PRIMITIVE, 0);
        put_i32(&mut buf, PRIMITIVE + 4, STREAM as i32);
        put_i32(&mut buf, PRIMITIVE + 8, MATERIAL as i32);
        put_i32(&mut buf, PRIMITIVE + 12, 3);
        put_i32(&mut buf, PRIMITIVE + 16, INDEX_DATA as i32);
        put_i32(&mut buf, PRIMITIVE + 20, 6);

        // Material.
        put_i32(&mut buf, MATERIAL, -1);
        put_i32(&mut buf, MATERIAL + 4, 0);
        put_u32(&mut buf, MATERIAL + 8, 0);
        put_vec4(&mut buf, MATERIAL + 12, [1.0, 1.0, 1.0, 1.0]);

        // Vertex stream: 3 vertices, position-only, CPU resident.
        put_i32(&mut buf, STREAM, 3);
        put_u32(&mut buf, STREAM + 4, 12);
        put_i32(&mut buf, STREAM + 8, 1);
        put_i32(&mut buf, STREAM + 12, ATTRS as i32);
        put_i32(&mut buf, STREAM + 16, VERTEX_DATA as i32);
        put_u32(&mut buf, STREAM + 20, 36);
        put_u32(&mut buf, STREAM + 24, 0);

        buf[ATTRS] = 0; // semantic: position
        buf[ATTRS + 1] = 1; // format: f32x3
        for (i, v) in [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]
            .iter()
            .enumerate()
        {
            for (c, value) in v.iter().enumerate() {
                put_f32(&mut buf, VERTEX_DATA + i * 12 + c * 4, *value);
            }
        }
        for (i, index) in [0u16, 1, 2].iter().enumerate() {
            buf[INDEX_DATA + i * 2..INDEX_DATA + i * 2 + 2]
                .copy_from_slice(&index.to_le_bytes());
        }

        buf
    }

    /// Wrap a payload in a single little-endian FRST chunk.
    fn wrap_in_chunk(payload: &[u8]) -> Vec<u8> {
        let chunk_size = (16 + payload.len()) as u32;
        let mut out = Vec::new();
        out.extend_from_slice(&u32::from_le_bytes(*b"FRST").to_le_bytes());
        out.extend_from_slice(&chunk_size.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_library_loads_graph() {
        let data = wrap_in_chunk(&build_library_payload());
        let container = SifContainer::parse(&data).unwrap();
        let chunk = container.find(ChunkKind::Forest).unwrap();
        let library = ForestLibrary::load(&chunk);

        // The entry with the invalid forest pointer is skipped, the rest
        // of the library still loads.
        assert_eq!(library.version, 2);
        assert_eq!(library.entries.len(), 1);

        let entry = library.find("oak").unwrap();
        assert_eq!(entry.name.as_deref(), Some("oak"));
        let forest = &entry.forest;
        assert_eq!(forest.trees.len(), 1);
        assert_eq!(forest.textures.len(), 1);
        assert_eq!(forest.tree_groups.len(), 1);
        assert_eq!(forest.tree_groups[0].members, vec![0]);

        let tree = &forest.trees[0];
        assert_eq!(tree.name.as_deref(), Some("oak"));
        assert_eq!(tree.branches.len(), 2);
        assert!(tree.branches[0].is_root());
        assert_eq!(tree.branches[1].parent, 0);
        assert_eq!(tree.translations[1], Vec4::new(0.0, 2.5, 0.0, 0.0));

        let BranchPayload::Mesh(mesh) = &tree.branches[1].payload else {
            panic!("expected mesh payload");
        };
        assert_eq!(mesh.primitives.len(), 1);
        let primitive = &mesh.primitives[0];
        assert_eq!(primitive.indices, vec![0, 1, 2]);
        assert_eq!(primitive.vertex_stream.num_vertices, 3);
        assert_eq!(
            primitive.vertex_stream.position(1),
            Some([1.0, 0.0, 0.0])
        );
        assert!(primitive.material.is_some());
    }

    #[test]
    fn test_find_unknown_name() {
        let data = wrap_in_chunk(&build_library_payload());
        let container = SifContainer::parse(&data).unwrap();
        let chunk = container.find(ChunkKind::Forest).unwrap();
        let library = ForestLibrary::load(&chunk);

        assert!(library.find("willow").is_none());
        // The skipped entry's hash is not in the index either.
        assert!(library.find("bad").is_none());
    }
}
