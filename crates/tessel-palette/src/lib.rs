//! Palette crate: block keys, unit geometry, materials, and the per-palette precompute cache.
#![forbid(unsafe_code)]

pub mod cache;
pub mod error;
pub mod geometry;
pub mod library;
pub mod material;
pub mod occlusion;
pub mod resolver;
pub mod types;

pub use cache::{MaterialGroup, PaletteCache, PaletteEntry, PaletteSnapshot, PrecomputeOutcome};
pub use error::{ConfigError, PrecomputeError, ResolveError};
pub use geometry::UnitGeometry;
pub use library::{ModelLibrary, PaletteFile};
pub use material::{MaterialDesc, MaterialRegistry, MaterialSignature, RenderMode, SharedMaterial};
pub use resolver::{GeometryResolver, ResolvedBlock, ResolvedPart};
pub use types::{BlockKey, Category, PaletteIndex};
