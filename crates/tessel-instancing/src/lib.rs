//! Instanced rendering path: one transform buffer per block type and material group, with the
//! occurrences past a buffer's capacity baked into plain meshes.
#![forbid(unsafe_code)]

mod planner;
mod scene;

pub use planner::{InstancePlanner, InstancingError};
pub use scene::{InstanceBatch, InstanceKey, InstanceTransform, InstancedScene, OverflowCopy};
