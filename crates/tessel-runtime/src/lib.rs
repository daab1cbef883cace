//! Chunk meshing runtime: backends, orchestration, batching and the host-facing session.
#![forbid(unsafe_code)]

pub mod backend;
pub mod batch;
pub mod config;
mod error;
pub mod geometry;
mod gpu_backend;
pub mod orchestrator;
pub mod session;
mod slots;
pub mod source;
pub mod task;
pub mod transport;
mod worker_pool;

pub use backend::{BackendKind, Backends, ExecutionBackend, select_backends};
pub use batch::BatchId;
pub use config::MesherConfig;
pub use error::MeshingError;
pub use geometry::{RenderableGeometry, RenderableMesh};
pub use gpu_backend::GpuBackend;
pub use orchestrator::{Completion, Orchestrator, OrchestratorOptions, RuntimeStats};
pub use session::MeshingSession;
pub use source::ChunkSource;
pub use task::{ChunkCoords, ChunkTask, TaskId};
pub use worker_pool::WorkerPool;
