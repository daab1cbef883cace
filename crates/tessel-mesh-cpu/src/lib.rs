//! Palette-indexed block arrays to per-category triangle buffers.
#![forbid(unsafe_code)]

mod buffers;
mod builder;
pub mod constants;
mod emit;
mod error;
mod greedy;
pub mod quantize;
mod voxel_map;

pub use buffers::{
    CategoryBuffer, ChunkMesh, IndexData, MaterialRange, MeshAccumulator, PositionData, SourceMesh,
};
pub use builder::{MeshBuilder, MeshOptions};
pub use emit::{instance_order, neighbor_occludes, visible_triangles};
pub use error::BuildError;
pub use voxel_map::VoxelMap;

/// Version string of the meshing library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
