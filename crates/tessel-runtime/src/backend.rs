use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Sender;
use tessel_mesh_cpu::ChunkMesh;
use tessel_palette::PaletteSnapshot;

use crate::config::MesherConfig;
use crate::error::MeshingError;
use crate::gpu_backend::GpuBackend;
use crate::task::TaskId;
use crate::transport::BlockPayload;
use crate::worker_pool::WorkerPool;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    WorkerPool,
    GpuCompute,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::WorkerPool => "worker-pool",
            BackendKind::GpuCompute => "gpu-compute",
        })
    }
}

/// Work sent to one backend slot. Batch messages for a cycle all go to the same slot.
#[derive(Debug)]
pub enum BackendRequest {
    Build {
        task: TaskId,
        payload: BlockPayload,
        origin: [i32; 3],
    },
    StartBatch {
        task: TaskId,
    },
    Accumulate {
        task: TaskId,
        payload: BlockPayload,
        origin: [i32; 3],
    },
    FinishBatch {
        task: TaskId,
    },
}

impl BackendRequest {
    pub fn task(&self) -> TaskId {
        match self {
            BackendRequest::Build { task, .. }
            | BackendRequest::StartBatch { task }
            | BackendRequest::Accumulate { task, .. }
            | BackendRequest::FinishBatch { task } => *task,
        }
    }
}

#[derive(Debug)]
pub enum ReplyBody {
    PaletteInstalled { generation: u64 },
    Built(ChunkMesh),
    BatchStarted,
    Accumulated { chunks: usize },
    Finished(ChunkMesh),
    Failed(String),
}

/// Completion message from a backend slot. `task` is `None` for palette acknowledgements.
#[derive(Debug)]
pub struct BackendReply {
    pub backend: BackendKind,
    pub slot: usize,
    pub task: Option<TaskId>,
    pub body: ReplyBody,
}

/// A chunk compiler with a fixed number of slots, each running one request at a time.
///
/// Replies travel over the channel handed to the backend at construction.
pub trait ExecutionBackend: Send {
    fn kind(&self) -> BackendKind;

    fn slot_count(&self) -> usize;

    /// Broadcasts a palette; returns how many acknowledgements will follow.
    fn install_palette(&self, palette: Arc<PaletteSnapshot>) -> Result<usize, MeshingError>;

    fn set_greedy(&self, greedy: bool);

    /// Whether the backend takes batch messages and greedy builds.
    fn supports_batches(&self) -> bool;

    fn dispatch(&self, slot: usize, request: BackendRequest) -> Result<(), MeshingError>;

    fn shutdown(&mut self);
}

/// Backends picked for a session: the worker pool always, the GPU when it is enabled and
/// comes up.
pub struct Backends {
    pub workers: Box<dyn ExecutionBackend>,
    pub gpu: Option<Box<dyn ExecutionBackend>>,
}

pub fn select_backends(
    config: &MesherConfig,
    replies: Sender<BackendReply>,
) -> Result<Backends, MeshingError> {
    let gpu = if config.gpu_compute_enabled {
        match GpuBackend::start(replies.clone(), config.quantization_enabled) {
            Ok(gpu) => {
                log::info!(target: "events", "backend: gpu-compute on {}", gpu.adapter_name());
                Some(Box::new(gpu) as Box<dyn ExecutionBackend>)
            }
            Err(e) => {
                log::warn!(target: "events", "gpu-compute unavailable, using worker pool: {e}");
                None
            }
        }
    } else {
        None
    };
    let workers = WorkerPool::new(
        config.worker_count,
        config.greedy_meshing,
        config.quantization_enabled,
        replies,
    )?;
    if gpu.is_none() {
        log::info!(
            target: "events",
            "backend: worker-pool with {} workers",
            workers.slot_count()
        );
    }
    Ok(Backends {
        workers: Box::new(workers),
        gpu,
    })
}
