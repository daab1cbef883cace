//! Compute-shader execution of the chunk expansion and culling pass.
#![forbid(unsafe_code)]

mod error;
pub mod layout;
mod mesher;

pub use error::GpuError;
pub use layout::{PackedPalette, Params, Plan, PlannedInstance, plan_instances};
pub use mesher::GpuMesher;
