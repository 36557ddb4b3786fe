//! Forest vegetation resource decoding.
//!
//! A Forest chunk bundles named vegetation assets: trees built from a
//! flat, index-linked branch arena, each branch carrying either an LOD
//! mesh set or a single mesh, plus shared vertex streams, materials,
//! textures, and per-bone skeletal animations.
//!
//! The format was recovered by reverse engineering and several of its
//! details are ambiguous on the wire: index buffer width and byte order,
//! console vertex layouts, and the Type-6 animation stream parameters are
//! all resolved heuristically at load time. Malformed sub-resources are
//! recovered locally (skipped with a warning); only container-level
//! framing aborts a load.
//!
//! # Example
//!
//! ```no_run
//! use leshy_forest::ForestLibrary;
//! use leshy_sif::{ChunkKind, SifFile};
//!
//! let file = SifFile::open("vegetation.sif")?;
//! let container = file.parse()?;
//! let chunk = container.find(ChunkKind::Forest).expect("no forest chunk");
//! let library = ForestLibrary::load(&chunk);
//!
//! for entry in &library.entries {
//!     let name = entry.name.as_deref().unwrap_or("<unnamed>");
//!     println!("{}: {} trees", name, entry.forest.trees.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod anim;
pub mod branch;
pub mod context;
mod error;
pub mod forest;
pub mod material;
pub mod mesh;
pub mod scene;
pub mod tree;
pub mod vertex;

pub use anim::{Animation, DecodeDiagnostics, DecodeOutcome, DecodeStatus, Sample};
pub use branch::{Branch, BranchPayload, LodLevel, LodSet};
pub use context::{sanitize_count, LoadContext};
pub use error::{Error, Result};
pub use forest::{Forest, ForestEntry, ForestLibrary, TreeGroup};
pub use material::{Material, Texture, TextureResource};
pub use mesh::{IndexFormat, Primitive, RenderMesh, SharedPools, Topology};
pub use scene::{Camera, CollisionMesh, Curve, Emitter, Light};
pub use tree::Tree;
pub use vertex::{AttrFormat, AttrSemantic, VertexAttribute, VertexStream};
