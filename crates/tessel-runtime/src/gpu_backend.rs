use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, bounded, unbounded};
use tessel_mesh_gpu::{GpuError, GpuMesher};
use tessel_palette::PaletteSnapshot;

use crate::backend::{BackendKind, BackendReply, BackendRequest, ExecutionBackend, ReplyBody};
use crate::error::MeshingError;

enum GpuCommand {
    SetPalette(Arc<PaletteSnapshot>),
    Run(BackendRequest),
}

/// The compute device, driven from one dedicated thread. It has a single slot and handles
/// plain chunk builds only.
pub struct GpuBackend {
    tx: Option<Sender<GpuCommand>>,
    handle: Option<JoinHandle<()>>,
    adapter_name: String,
}

fn reply(tx: &Sender<BackendReply>, task: Option<crate::task::TaskId>, body: ReplyBody) {
    let _ = tx.send(BackendReply {
        backend: BackendKind::GpuCompute,
        slot: 0,
        task,
        body,
    });
}

impl GpuBackend {
    /// Starts the device thread and waits for it to report whether the device came up.
    pub fn start(replies: Sender<BackendReply>, quantize: bool) -> Result<Self, GpuError> {
        let (tx, rx) = unbounded::<GpuCommand>();
        let (init_tx, init_rx) = bounded::<Result<String, GpuError>>(1);
        let handle = thread::Builder::new()
            .name("tessel-gpu".into())
            .spawn(move || {
                let mut mesher = match GpuMesher::new() {
                    Ok(m) => {
                        let _ = init_tx.send(Ok(m.adapter_name().to_string()));
                        m
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        GpuCommand::SetPalette(palette) => {
                            let generation = palette.generation;
                            let body = match mesher.upload_palette(palette) {
                                Ok(()) => ReplyBody::PaletteInstalled { generation },
                                Err(e) => ReplyBody::Failed(e.to_string()),
                            };
                            reply(&replies, None, body);
                        }
                        GpuCommand::Run(req) => {
                            let task = req.task();
                            let body = match req {
                                BackendRequest::Build { payload, origin, .. } => {
                                    let out =
                                        mesher.build_chunk(payload.blocks(), origin, quantize);
                                    drop(payload);
                                    match out {
                                        Ok(mesh) => ReplyBody::Built(mesh),
                                        Err(e) => ReplyBody::Failed(e.to_string()),
                                    }
                                }
                                _ => {
                                    ReplyBody::Failed("batch requests need the worker pool".into())
                                }
                            };
                            reply(&replies, Some(task), body);
                        }
                    }
                }
            })
            .map_err(|e| GpuError::NoAdapter(format!("device thread: {e}")))?;
        let adapter_name = match init_rx.recv() {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(GpuError::NoAdapter("device thread exited during init".into()));
            }
        };
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            adapter_name,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn send(&self, cmd: GpuCommand) -> Result<(), MeshingError> {
        self.tx
            .as_ref()
            .ok_or(MeshingError::Disconnected)?
            .send(cmd)
            .map_err(|_| MeshingError::Disconnected)
    }
}

impl ExecutionBackend for GpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::GpuCompute
    }

    fn slot_count(&self) -> usize {
        1
    }

    fn install_palette(&self, palette: Arc<PaletteSnapshot>) -> Result<usize, MeshingError> {
        self.send(GpuCommand::SetPalette(palette))?;
        Ok(1)
    }

    fn set_greedy(&self, _greedy: bool) {}

    fn supports_batches(&self) -> bool {
        false
    }

    fn dispatch(&self, _slot: usize, request: BackendRequest) -> Result<(), MeshingError> {
        self.send(GpuCommand::Run(request))
    }

    fn shutdown(&mut self) {
        self.tx = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for GpuBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
