use std::sync::Arc;

use crossbeam_channel::{Sender, unbounded};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tessel_mesh_cpu::{MeshBuilder, MeshOptions};
use tessel_palette::PaletteSnapshot;

use crate::backend::{BackendKind, BackendReply, BackendRequest, ExecutionBackend, ReplyBody};
use crate::error::MeshingError;
use crate::task::TaskId;

enum WorkerCommand {
    SetPalette(Arc<PaletteSnapshot>),
    SetGreedy(bool),
    Run(BackendRequest),
}

/// Fixed set of CPU workers. Each owns a [`MeshBuilder`] with its own palette reference and
/// its own command channel, so requests to one worker run strictly in order.
pub struct WorkerPool {
    senders: Vec<Sender<WorkerCommand>>,
    _pool: Option<ThreadPool>,
}

fn reply(tx: &Sender<BackendReply>, slot: usize, task: Option<TaskId>, body: ReplyBody) {
    let _ = tx.send(BackendReply {
        backend: BackendKind::WorkerPool,
        slot,
        task,
        body,
    });
}

fn run_request(
    builder: &mut MeshBuilder,
    slot: usize,
    req: BackendRequest,
    tx: &Sender<BackendReply>,
) {
    let task = req.task();
    let body = match req {
        BackendRequest::Build { payload, origin, .. } => {
            let out = builder.build_chunk(payload.blocks(), origin);
            // the region goes back to the pool only once no worker holds it
            drop(payload);
            match out {
                Ok(mesh) => ReplyBody::Built(mesh),
                Err(e) => ReplyBody::Failed(e.to_string()),
            }
        }
        BackendRequest::StartBatch { .. } => {
            builder.start_batch();
            ReplyBody::BatchStarted
        }
        BackendRequest::Accumulate { payload, origin, .. } => {
            let out = builder.accumulate_chunk(payload.blocks(), origin);
            drop(payload);
            match out {
                Ok(chunks) => ReplyBody::Accumulated { chunks },
                Err(e) => ReplyBody::Failed(e.to_string()),
            }
        }
        BackendRequest::FinishBatch { .. } => match builder.finish_batch() {
            Ok(mesh) => ReplyBody::Finished(mesh),
            Err(e) => ReplyBody::Failed(e.to_string()),
        },
    };
    reply(tx, slot, Some(task), body);
}

impl WorkerPool {
    pub fn new(
        workers: usize,
        greedy: bool,
        quantize: bool,
        replies: Sender<BackendReply>,
    ) -> Result<Self, MeshingError> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("tessel-mesh-{i}"))
            .build()
            .map_err(|e| MeshingError::InvalidConfig(format!("worker pool: {e}")))?;
        let mut senders = Vec::with_capacity(workers);
        for slot in 0..workers {
            let (tx, rx) = unbounded::<WorkerCommand>();
            senders.push(tx);
            let replies = replies.clone();
            pool.spawn(move || {
                let mut builder = MeshBuilder::new(MeshOptions { greedy, quantize });
                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        WorkerCommand::SetPalette(palette) => {
                            let generation = palette.generation;
                            builder.set_palette(palette);
                            reply(&replies, slot, None, ReplyBody::PaletteInstalled { generation });
                        }
                        WorkerCommand::SetGreedy(g) => builder.set_greedy(g),
                        WorkerCommand::Run(req) => run_request(&mut builder, slot, req, &replies),
                    }
                }
            });
        }
        Ok(Self {
            senders,
            _pool: Some(pool),
        })
    }

    fn send(&self, slot: usize, cmd: WorkerCommand) -> Result<(), MeshingError> {
        self.senders
            .get(slot)
            .ok_or(MeshingError::Disconnected)?
            .send(cmd)
            .map_err(|_| MeshingError::Disconnected)
    }
}

impl ExecutionBackend for WorkerPool {
    fn kind(&self) -> BackendKind {
        BackendKind::WorkerPool
    }

    fn slot_count(&self) -> usize {
        self.senders.len()
    }

    fn install_palette(&self, palette: Arc<PaletteSnapshot>) -> Result<usize, MeshingError> {
        for slot in 0..self.senders.len() {
            self.send(slot, WorkerCommand::SetPalette(Arc::clone(&palette)))?;
        }
        Ok(self.senders.len())
    }

    fn set_greedy(&self, greedy: bool) {
        for slot in 0..self.senders.len() {
            let _ = self.send(slot, WorkerCommand::SetGreedy(greedy));
        }
    }

    fn supports_batches(&self) -> bool {
        true
    }

    fn dispatch(&self, slot: usize, request: BackendRequest) -> Result<(), MeshingError> {
        self.send(slot, WorkerCommand::Run(request))
    }

    fn shutdown(&mut self) {
        // closing the channels ends each worker loop
        self.senders.clear();
        self._pool = None;
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
