use std::collections::{BTreeMap, VecDeque};
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use hashbrown::HashMap;
use tessel_mesh_cpu::ChunkMesh;
use tessel_palette::PaletteSnapshot;

use crate::backend::{
    BackendKind, BackendReply, BackendRequest, Backends, ExecutionBackend, ReplyBody,
};
use crate::batch::{BatchId, BatchPlan};
use crate::config::MesherConfig;
use crate::error::MeshingError;
use crate::geometry::RenderableMesh;
use crate::slots::SlotPool;
use crate::task::{ChunkCoords, ChunkTask, TaskId};
use crate::transport::{BlockPayload, BufferLease, SharedBufferPool};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrchestratorOptions {
    pub timeout: Duration,
    pub chunk_size: u32,
    pub greedy: bool,
    /// Shared transport capacity; `None` moves every block array.
    pub shared_buffers: Option<usize>,
}

impl From<&MesherConfig> for OrchestratorOptions {
    fn from(cfg: &MesherConfig) -> Self {
        Self {
            timeout: Duration::from_millis(cfg.task_timeout_ms),
            chunk_size: cfg.chunk_size,
            greedy: cfg.greedy_meshing,
            shared_buffers: cfg.use_shared_memory().then(|| cfg.shared_buffers()),
        }
    }
}

/// Result handed back to the host. Failed work still yields an (empty) mesh.
#[derive(Debug)]
pub enum Completion {
    Chunk {
        task: TaskId,
        coords: ChunkCoords,
        backend: BackendKind,
        mesh: RenderableMesh,
        error: Option<MeshingError>,
    },
    Batch {
        batch: BatchId,
        cycle: usize,
        cycles: usize,
        chunks: usize,
        mesh: RenderableMesh,
        error: Option<MeshingError>,
    },
}

impl Completion {
    pub fn mesh(&self) -> &RenderableMesh {
        match self {
            Completion::Chunk { mesh, .. } | Completion::Batch { mesh, .. } => mesh,
        }
    }

    pub fn error(&self) -> Option<&MeshingError> {
        match self {
            Completion::Chunk { error, .. } | Completion::Batch { error, .. } => error.as_ref(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub gpu_fallbacks: u64,
    pub batch_cycles: u64,
    pub late_replies: u64,
    pub peak_workers_in_use: usize,
    pub leases_outstanding: usize,
    pub in_flight: usize,
    pub queued: usize,
}

enum ChunkInput {
    Raw(Vec<i32>),
    Prepared {
        payload: BlockPayload,
        lease: Option<BufferLease>,
    },
}

enum Job {
    Chunk {
        coords: ChunkCoords,
        origin: [i32; 3],
        input: ChunkInput,
        retried: bool,
    },
    Cycle {
        batch: BatchId,
        cycle: usize,
        chunks: Vec<ChunkTask>,
    },
}

struct Queued {
    task: TaskId,
    job: Job,
}

enum PendingKind {
    Chunk {
        coords: ChunkCoords,
        origin: [i32; 3],
        /// Kept only for GPU requests, which are retried once on the worker pool.
        retry: Option<BlockPayload>,
        lease: Option<BufferLease>,
        retried: bool,
    },
    Cycle {
        batch: BatchId,
        cycle: usize,
        chunks: usize,
        acks: usize,
        leases: Vec<BufferLease>,
    },
}

struct Pending {
    lane: BackendKind,
    slot: usize,
    deadline: Instant,
    kind: PendingKind,
}

struct Lane {
    backend: Box<dyn ExecutionBackend>,
    slots: SlotPool<Queued>,
}

impl Lane {
    fn new(backend: Box<dyn ExecutionBackend>) -> Self {
        let slots = SlotPool::new(backend.slot_count());
        Self { backend, slots }
    }
}

/// Dispatches chunk and batch work to backend slots and turns replies into [`Completion`]s.
///
/// Runs on the host's control thread and never blocks except in [`Orchestrator::poll_timeout`]
/// and [`Orchestrator::wait_palette`]. Each slot runs one request at a time; a slot is freed
/// only once its result, failure or timeout has been observed.
pub struct Orchestrator {
    workers: Lane,
    gpu: Option<Lane>,
    replies: Receiver<BackendReply>,
    transport: Option<Arc<SharedBufferPool>>,
    pending: HashMap<TaskId, Pending>,
    /// Work held back while a palette broadcast is unacknowledged.
    held: VecDeque<(BackendKind, Queued)>,
    batches: BTreeMap<BatchId, BatchPlan>,
    options: OrchestratorOptions,
    next_task: u64,
    next_batch: u64,
    palette_generation: Option<u64>,
    awaiting_acks: usize,
    stats: RuntimeStats,
    out: Vec<Completion>,
}

impl Orchestrator {
    pub fn new(
        backends: Backends,
        replies: Receiver<BackendReply>,
        options: OrchestratorOptions,
    ) -> Self {
        let transport = options.shared_buffers.map(SharedBufferPool::new);
        Self {
            workers: Lane::new(backends.workers),
            gpu: backends.gpu.map(Lane::new),
            replies,
            transport,
            pending: HashMap::new(),
            held: VecDeque::new(),
            batches: BTreeMap::new(),
            options,
            next_task: 1,
            next_batch: 1,
            palette_generation: None,
            awaiting_acks: 0,
            stats: RuntimeStats::default(),
            out: Vec::new(),
        }
    }

    pub fn active_backend(&self) -> BackendKind {
        self.gpu
            .as_ref()
            .map_or(BackendKind::WorkerPool, |g| g.backend.kind())
    }

    pub fn stats(&self) -> RuntimeStats {
        let mut s = self.stats;
        s.peak_workers_in_use = self.workers.slots.peak_in_use();
        s.leases_outstanding = self.transport.as_ref().map_or(0, |t| t.outstanding());
        s.in_flight = self.pending.len();
        s.queued = self.held.len()
            + self.workers.slots.waiting()
            + self.gpu.as_ref().map_or(0, |g| g.slots.waiting());
        s
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
            && self.held.is_empty()
            && self.batches.is_empty()
            && self.workers.slots.waiting() == 0
            && self.gpu.as_ref().is_none_or(|g| g.slots.waiting() == 0)
    }

    fn next_task_id(&mut self) -> TaskId {
        let id = TaskId(self.next_task);
        self.next_task += 1;
        id
    }

    fn lane_mut(&mut self, kind: BackendKind) -> Option<&mut Lane> {
        match kind {
            BackendKind::WorkerPool => Some(&mut self.workers),
            BackendKind::GpuCompute => self.gpu.as_mut(),
        }
    }

    fn lane(&self, kind: BackendKind) -> Option<&Lane> {
        match kind {
            BackendKind::WorkerPool => Some(&self.workers),
            BackendKind::GpuCompute => self.gpu.as_ref(),
        }
    }

    // ---- palette ----

    /// Broadcasts `palette` to every backend. Dispatch pauses until all have acknowledged it.
    pub fn install_palette(&mut self, palette: Arc<PaletteSnapshot>) -> Result<(), MeshingError> {
        let mut expected = self.workers.backend.install_palette(Arc::clone(&palette))?;
        let gpu_result = self
            .gpu
            .as_ref()
            .map(|g| g.backend.install_palette(Arc::clone(&palette)));
        match gpu_result {
            Some(Ok(n)) => expected += n,
            Some(Err(e)) => {
                log::warn!(target: "events", "gpu palette broadcast failed: {e}");
                self.retire_gpu();
            }
            None => {}
        }
        for lane in [Some(&mut self.workers), self.gpu.as_mut()].into_iter().flatten() {
            for q in lane.slots.drain_waiters() {
                self.held.push_back((lane.backend.kind(), q));
            }
        }
        self.palette_generation = Some(palette.generation);
        self.awaiting_acks = expected;
        log::debug!(
            target: "events",
            "palette gen={} broadcast, awaiting {} acks",
            palette.generation,
            expected
        );
        Ok(())
    }

    pub fn palette_acknowledged(&self) -> bool {
        self.palette_generation.is_some() && self.awaiting_acks == 0
    }

    /// Processes replies until every backend has acknowledged the last broadcast.
    pub fn wait_palette(&mut self, timeout: Duration) -> Result<(), MeshingError> {
        let deadline = Instant::now() + timeout;
        while !self.palette_acknowledged() {
            let now = Instant::now();
            if now >= deadline {
                return Err(MeshingError::BroadcastTimeout);
            }
            match self.replies.recv_timeout(deadline - now) {
                Ok(reply) => self.handle_reply(reply),
                Err(RecvTimeoutError::Timeout) => return Err(MeshingError::BroadcastTimeout),
                Err(RecvTimeoutError::Disconnected) => return Err(MeshingError::Disconnected),
            }
        }
        Ok(())
    }

    pub fn set_greedy(&mut self, greedy: bool) {
        self.options.greedy = greedy;
        self.workers.backend.set_greedy(greedy);
        if let Some(gpu) = &self.gpu {
            gpu.backend.set_greedy(greedy);
        }
    }

    fn retire_gpu(&mut self) {
        if let Some(mut lane) = self.gpu.take() {
            for q in lane.slots.drain_waiters() {
                self.held.push_back((BackendKind::WorkerPool, q));
            }
            lane.backend.shutdown();
            log::warn!(target: "events", "gpu-compute retired, continuing on the worker pool");
        }
    }

    // ---- submission ----

    /// Queues one chunk build. The GPU takes it when active and greedy meshing is off.
    pub fn submit_chunk(&mut self, task: ChunkTask) -> TaskId {
        let id = self.next_task_id();
        self.stats.submitted += 1;
        let kind = match &self.gpu {
            Some(g) if !self.options.greedy || g.backend.supports_batches() => g.backend.kind(),
            _ => BackendKind::WorkerPool,
        };
        let origin = task.coords.origin(self.options.chunk_size);
        let job = Job::Chunk {
            coords: task.coords,
            origin,
            input: ChunkInput::Raw(task.blocks),
            retried: false,
        };
        self.enqueue(kind, Queued { task: id, job });
        id
    }

    /// Splits `tasks` into cycles of at most `sub_batch` chunks, each merged on one worker.
    pub fn submit_batch(&mut self, tasks: Vec<ChunkTask>, sub_batch: usize) -> BatchId {
        let id = BatchId(self.next_batch);
        self.next_batch += 1;
        self.stats.submitted += tasks.len() as u64;
        let plan = BatchPlan::new(id, tasks, sub_batch);
        log::debug!(target: "events", "{id}: {} cycles", plan.cycles());
        if !plan.is_done() {
            self.batches.insert(id, plan);
            self.start_cycle(id);
        }
        id
    }

    fn start_cycle(&mut self, id: BatchId) {
        let Some((cycle, chunks)) = self.batches.get_mut(&id).and_then(|p| p.next_cycle()) else {
            return;
        };
        let task = self.next_task_id();
        let job = Job::Cycle {
            batch: id,
            cycle,
            chunks,
        };
        self.enqueue(BackendKind::WorkerPool, Queued { task, job });
    }

    fn enqueue(&mut self, kind: BackendKind, q: Queued) {
        let kind = if kind == BackendKind::GpuCompute && self.gpu.is_none() {
            BackendKind::WorkerPool
        } else {
            kind
        };
        if !self.palette_acknowledged() {
            self.held.push_back((kind, q));
            return;
        }
        let granted = self.lane_mut(kind).and_then(|lane| lane.slots.request(q));
        if let Some((slot, q)) = granted {
            self.dispatch(kind, slot, q);
        }
    }

    fn release_held(&mut self) {
        for (kind, q) in mem::take(&mut self.held) {
            self.enqueue(kind, q);
        }
    }

    /// Frees `slot` and hands it straight to the lane's oldest waiter, if any.
    fn release_slot(&mut self, kind: BackendKind, slot: usize) {
        let Some(lane) = self.lane_mut(kind) else {
            return;
        };
        if let Some((slot, q)) = lane.slots.release(slot) {
            self.dispatch(kind, slot, q);
        }
    }

    // ---- dispatch ----

    fn prepare(
        &self,
        task: TaskId,
        origin: [i32; 3],
        input: ChunkInput,
    ) -> (BlockPayload, Option<BufferLease>) {
        match input {
            ChunkInput::Prepared { payload, lease } => (payload, lease),
            ChunkInput::Raw(blocks) => {
                let leased = self
                    .transport
                    .as_ref()
                    .and_then(|pool| pool.try_lease(task, origin, &blocks));
                if let Some(lease) = leased {
                    if let Some(payload) = lease.payload() {
                        return (payload, Some(lease));
                    }
                }
                (BlockPayload::Moved(Arc::new(blocks)), None)
            }
        }
    }

    fn send(
        &self,
        kind: BackendKind,
        slot: usize,
        req: BackendRequest,
    ) -> Result<(), MeshingError> {
        self.lane(kind)
            .ok_or(MeshingError::Disconnected)?
            .backend
            .dispatch(slot, req)
    }

    fn dispatch(&mut self, kind: BackendKind, slot: usize, q: Queued) {
        let Queued { task, job } = q;
        let deadline = Instant::now() + self.options.timeout;
        match job {
            Job::Chunk {
                coords,
                origin,
                input,
                retried,
            } => {
                let (payload, lease) = self.prepare(task, origin, input);
                let retry = (kind == BackendKind::GpuCompute).then(|| payload.clone());
                let shared = payload.is_shared();
                let req = BackendRequest::Build {
                    task,
                    payload,
                    origin,
                };
                match self.send(kind, slot, req) {
                    Ok(()) => {
                        log::debug!(
                            target: "events",
                            "dispatch {task} chunk {coords} -> {kind}[{slot}] shared={shared}"
                        );
                        self.pending.insert(
                            task,
                            Pending {
                                lane: kind,
                                slot,
                                deadline,
                                kind: PendingKind::Chunk {
                                    coords,
                                    origin,
                                    retry,
                                    lease,
                                    retried,
                                },
                            },
                        );
                    }
                    Err(e) => {
                        drop(lease);
                        self.release_slot(kind, slot);
                        self.fail_chunk(task, coords, kind, e);
                    }
                }
            }
            Job::Cycle {
                batch,
                cycle,
                chunks,
            } => {
                let n = chunks.len();
                let mut leases = Vec::new();
                let mut sent = self.send(kind, slot, BackendRequest::StartBatch { task });
                for chunk in chunks {
                    if sent.is_err() {
                        break;
                    }
                    let origin = chunk.coords.origin(self.options.chunk_size);
                    let (payload, lease) =
                        self.prepare(task, origin, ChunkInput::Raw(chunk.blocks));
                    leases.extend(lease);
                    sent = self.send(
                        kind,
                        slot,
                        BackendRequest::Accumulate {
                            task,
                            payload,
                            origin,
                        },
                    );
                }
                if sent.is_ok() {
                    sent = self.send(kind, slot, BackendRequest::FinishBatch { task });
                }
                match sent {
                    Ok(()) => {
                        log::debug!(
                            target: "events",
                            "dispatch {task} {batch} cycle {cycle} ({n} chunks) -> {kind}[{slot}]"
                        );
                        self.pending.insert(
                            task,
                            Pending {
                                lane: kind,
                                slot,
                                deadline,
                                kind: PendingKind::Cycle {
                                    batch,
                                    cycle,
                                    chunks: n,
                                    acks: 0,
                                    leases,
                                },
                            },
                        );
                    }
                    Err(e) => {
                        drop(leases);
                        self.release_slot(kind, slot);
                        self.fail_cycle(batch, cycle, n, e);
                    }
                }
            }
        }
    }

    // ---- completion ----

    /// Starts due batch cycles, drains backend replies and expires overdue tasks.
    pub fn poll(&mut self) -> Vec<Completion> {
        let due: Vec<BatchId> = self
            .batches
            .iter()
            .filter(|(_, p)| p.is_due())
            .map(|(id, _)| *id)
            .collect();
        for id in due {
            self.start_cycle(id);
        }
        while let Ok(reply) = self.replies.try_recv() {
            self.handle_reply(reply);
        }
        self.expire(Instant::now());
        mem::take(&mut self.out)
    }

    /// Like [`Orchestrator::poll`], but first waits up to `wait` for a reply when work is in
    /// flight.
    pub fn poll_timeout(&mut self, wait: Duration) -> Vec<Completion> {
        if !self.pending.is_empty() {
            let now = Instant::now();
            let next_deadline = self
                .pending
                .values()
                .map(|p| p.deadline.saturating_duration_since(now))
                .min()
                .unwrap_or(wait);
            if let Ok(reply) = self.replies.recv_timeout(wait.min(next_deadline)) {
                self.handle_reply(reply);
            }
        }
        self.poll()
    }

    fn handle_reply(&mut self, reply: BackendReply) {
        let Some(task) = reply.task else {
            self.handle_ack(reply);
            return;
        };
        let Some(p) = self.pending.get_mut(&task) else {
            self.stats.late_replies += 1;
            log::debug!(target: "events", "ignoring late reply for {task} from {}", reply.backend);
            return;
        };
        if p.lane != reply.backend || p.slot != reply.slot {
            self.stats.late_replies += 1;
            return;
        }
        match (&mut p.kind, &reply.body) {
            (PendingKind::Cycle { acks, .. }, ReplyBody::Accumulated { .. }) => {
                *acks += 1;
                return;
            }
            (PendingKind::Cycle { .. }, ReplyBody::BatchStarted) => return,
            _ => {}
        }
        let Some(p) = self.pending.remove(&task) else {
            return;
        };
        self.release_slot(p.lane, p.slot);
        match p.kind {
            PendingKind::Chunk {
                coords,
                origin,
                retry,
                lease,
                retried,
            } => match reply.body {
                ReplyBody::Built(mesh) => {
                    drop(retry);
                    drop(lease);
                    self.complete_chunk(task, coords, p.lane, &mesh);
                }
                ReplyBody::Failed(reason) if p.lane == BackendKind::GpuCompute && !retried => {
                    match retry {
                        Some(payload) => {
                            self.stats.gpu_fallbacks += 1;
                            log::warn!(
                                target: "events",
                                "gpu failed {task} chunk {coords}: {reason}; retrying on workers"
                            );
                            let job = Job::Chunk {
                                coords,
                                origin,
                                input: ChunkInput::Prepared { payload, lease },
                                retried: true,
                            };
                            self.enqueue(BackendKind::WorkerPool, Queued { task, job });
                        }
                        None => {
                            drop(lease);
                            let err = MeshingError::BackendFailure { task, reason };
                            self.fail_chunk(task, coords, p.lane, err);
                        }
                    }
                }
                ReplyBody::Failed(reason) => {
                    drop(retry);
                    drop(lease);
                    let err = MeshingError::BackendFailure { task, reason };
                    self.fail_chunk(task, coords, p.lane, err);
                }
                other => {
                    let reason = format!("unexpected reply {other:?}");
                    let err = MeshingError::BackendFailure { task, reason };
                    self.fail_chunk(task, coords, p.lane, err);
                }
            },
            PendingKind::Cycle {
                batch,
                cycle,
                chunks,
                acks,
                leases,
            } => {
                drop(leases);
                match reply.body {
                    ReplyBody::Finished(mesh) => {
                        debug_assert_eq!(acks, chunks);
                        self.complete_cycle(batch, cycle, chunks, &mesh);
                    }
                    ReplyBody::Failed(reason) => {
                        let err = MeshingError::BackendFailure { task, reason };
                        self.fail_cycle(batch, cycle, chunks, err)
                    }
                    other => {
                        let reason = format!("unexpected reply {other:?}");
                        let err = MeshingError::BackendFailure { task, reason };
                        self.fail_cycle(batch, cycle, chunks, err)
                    }
                }
            }
        }
    }

    fn handle_ack(&mut self, reply: BackendReply) {
        match reply.body {
            ReplyBody::PaletteInstalled { generation } => {
                if Some(generation) != self.palette_generation || self.awaiting_acks == 0 {
                    return;
                }
                self.awaiting_acks -= 1;
            }
            ReplyBody::Failed(reason) => {
                log::warn!(target: "events", "{} rejected the palette: {reason}", reply.backend);
                self.awaiting_acks = self.awaiting_acks.saturating_sub(1);
                if reply.backend == BackendKind::GpuCompute {
                    self.retire_gpu();
                }
            }
            _ => return,
        }
        if self.awaiting_acks == 0 {
            log::debug!(target: "events", "palette acknowledged by every backend");
            self.release_held();
        }
    }

    fn expire(&mut self, now: Instant) {
        let mut overdue: Vec<TaskId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(t, _)| *t)
            .collect();
        overdue.sort();
        for task in overdue {
            let Some(p) = self.pending.remove(&task) else {
                continue;
            };
            self.stats.timed_out += 1;
            log::warn!(target: "events", "{task} timed out on {}[{}]", p.lane, p.slot);
            // buffers are reclaimed here; the worker itself keeps running
            self.release_slot(p.lane, p.slot);
            match p.kind {
                PendingKind::Chunk { coords, lease, retry, .. } => {
                    drop(retry);
                    drop(lease);
                    self.fail_chunk(task, coords, p.lane, MeshingError::Timeout { task });
                }
                PendingKind::Cycle {
                    batch,
                    cycle,
                    chunks,
                    leases,
                    ..
                } => {
                    drop(leases);
                    self.fail_cycle(batch, cycle, chunks, MeshingError::Timeout { task });
                }
            }
        }
    }

    fn complete_chunk(
        &mut self,
        task: TaskId,
        coords: ChunkCoords,
        backend: BackendKind,
        mesh: &ChunkMesh,
    ) {
        self.stats.completed += 1;
        log::debug!(
            target: "events",
            "{task} chunk {coords} done on {backend}: tris={} verts={}",
            mesh.triangle_count(),
            mesh.vertex_count()
        );
        self.out.push(Completion::Chunk {
            task,
            coords,
            backend,
            mesh: RenderableMesh::from(mesh),
            error: None,
        });
    }

    fn fail_chunk(
        &mut self,
        task: TaskId,
        coords: ChunkCoords,
        backend: BackendKind,
        err: MeshingError,
    ) {
        self.stats.failed += 1;
        log::warn!(target: "events", "chunk {coords} rendered empty: {err}");
        self.out.push(Completion::Chunk {
            task,
            coords,
            backend,
            mesh: RenderableMesh::empty(),
            error: Some(err),
        });
    }

    fn end_cycle(&mut self, batch: BatchId) -> usize {
        let Some(plan) = self.batches.get_mut(&batch) else {
            return 0;
        };
        plan.cycle_finished();
        let cycles = plan.cycles();
        if plan.is_done() {
            self.batches.remove(&batch);
        }
        cycles
    }

    fn complete_cycle(&mut self, batch: BatchId, cycle: usize, chunks: usize, mesh: &ChunkMesh) {
        self.stats.batch_cycles += 1;
        self.stats.completed += chunks as u64;
        let cycles = self.end_cycle(batch);
        log::debug!(
            target: "events",
            "{batch} cycle {}/{cycles} merged {chunks} chunks: tris={} verts={}",
            cycle + 1,
            mesh.triangle_count(),
            mesh.vertex_count()
        );
        self.out.push(Completion::Batch {
            batch,
            cycle,
            cycles,
            chunks,
            mesh: RenderableMesh::from(mesh),
            error: None,
        });
    }

    fn fail_cycle(&mut self, batch: BatchId, cycle: usize, chunks: usize, err: MeshingError) {
        self.stats.batch_cycles += 1;
        self.stats.failed += chunks as u64;
        let cycles = self.end_cycle(batch);
        log::warn!(target: "events", "{batch} cycle {} rendered empty: {err}", cycle + 1);
        self.out.push(Completion::Batch {
            batch,
            cycle,
            cycles,
            chunks,
            mesh: RenderableMesh::empty(),
            error: Some(err),
        });
    }

    /// Stops every backend and drops queued work. Outstanding leases return to the pool.
    pub fn shutdown(&mut self) {
        self.pending.clear();
        self.held.clear();
        self.batches.clear();
        self.workers.slots.drain_waiters();
        self.workers.backend.shutdown();
        if let Some(mut gpu) = self.gpu.take() {
            gpu.slots.drain_waiters();
            gpu.backend.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{Sender, unbounded};
    use std::sync::Mutex;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Op {
        Build,
        Start,
        Accumulate,
        Finish,
    }

    #[derive(Clone, Debug)]
    struct Sent {
        slot: usize,
        task: TaskId,
        op: Op,
        shared: bool,
        blocks: Vec<i32>,
    }

    /// Records requests instead of running them; the test plays the backend's replies.
    struct Scripted {
        kind: BackendKind,
        slots: usize,
        log: Arc<Mutex<Vec<Sent>>>,
    }

    impl ExecutionBackend for Scripted {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn slot_count(&self) -> usize {
            self.slots
        }

        fn install_palette(&self, _palette: Arc<PaletteSnapshot>) -> Result<usize, MeshingError> {
            Ok(self.slots)
        }

        fn set_greedy(&self, _greedy: bool) {}

        fn supports_batches(&self) -> bool {
            self.kind == BackendKind::WorkerPool
        }

        fn dispatch(&self, slot: usize, request: BackendRequest) -> Result<(), MeshingError> {
            let task = request.task();
            let (op, payload) = match request {
                BackendRequest::Build { payload, .. } => (Op::Build, Some(payload)),
                BackendRequest::StartBatch { .. } => (Op::Start, None),
                BackendRequest::Accumulate { payload, .. } => (Op::Accumulate, Some(payload)),
                BackendRequest::FinishBatch { .. } => (Op::Finish, None),
            };
            self.log.lock().unwrap().push(Sent {
                slot,
                task,
                op,
                shared: payload.as_ref().is_some_and(|p| p.is_shared()),
                blocks: payload.map(|p| p.blocks().to_vec()).unwrap_or_default(),
            });
            Ok(())
        }

        fn shutdown(&mut self) {}
    }

    struct Harness {
        orch: Orchestrator,
        tx: Sender<BackendReply>,
        workers: Arc<Mutex<Vec<Sent>>>,
        gpu: Arc<Mutex<Vec<Sent>>>,
    }

    impl Harness {
        fn new(worker_slots: usize, with_gpu: bool, options: OrchestratorOptions) -> Self {
            let (tx, rx) = unbounded();
            let workers = Arc::new(Mutex::new(Vec::new()));
            let gpu = Arc::new(Mutex::new(Vec::new()));
            let backends = Backends {
                workers: Box::new(Scripted {
                    kind: BackendKind::WorkerPool,
                    slots: worker_slots,
                    log: Arc::clone(&workers),
                }),
                gpu: with_gpu.then(|| {
                    Box::new(Scripted {
                        kind: BackendKind::GpuCompute,
                        slots: 1,
                        log: Arc::clone(&gpu),
                    }) as Box<dyn ExecutionBackend>
                }),
            };
            Self {
                orch: Orchestrator::new(backends, rx, options),
                tx,
                workers,
                gpu,
            }
        }

        fn install(&mut self, ack: bool) {
            let palette = Arc::new(PaletteSnapshot {
                generation: 1,
                entries: Vec::new(),
                materials: Vec::new(),
            });
            self.orch.install_palette(palette).unwrap();
            if ack {
                self.ack_all();
            }
        }

        fn ack_all(&mut self) {
            for slot in 0..self.orch.workers.backend.slot_count() {
                let ack = ReplyBody::PaletteInstalled { generation: 1 };
                self.reply(BackendKind::WorkerPool, slot, None, ack);
            }
            if self.orch.gpu.is_some() {
                let ack = ReplyBody::PaletteInstalled { generation: 1 };
                self.reply(BackendKind::GpuCompute, 0, None, ack);
            }
            self.orch.poll();
            assert!(self.orch.palette_acknowledged());
        }

        fn reply(&self, backend: BackendKind, slot: usize, task: Option<TaskId>, body: ReplyBody) {
            self.tx
                .send(BackendReply {
                    backend,
                    slot,
                    task,
                    body,
                })
                .unwrap();
        }

        fn sent(&self) -> Vec<Sent> {
            self.workers.lock().unwrap().clone()
        }
    }

    fn options() -> OrchestratorOptions {
        OrchestratorOptions {
            timeout: Duration::from_secs(30),
            chunk_size: 16,
            greedy: false,
            shared_buffers: None,
        }
    }

    fn chunk(x: i32) -> ChunkTask {
        ChunkTask::new(ChunkCoords::new(x, 0, 0), vec![0, 0, 0, 1])
    }

    fn built(origin: [i32; 3]) -> ReplyBody {
        ReplyBody::Built(ChunkMesh {
            meshes: Vec::new(),
            origin,
        })
    }

    #[test]
    fn work_waits_for_every_palette_ack() {
        let mut h = Harness::new(2, false, options());
        h.install(false);
        let task = h.orch.submit_chunk(chunk(1));
        assert!(h.sent().is_empty());
        assert_eq!(h.orch.stats().queued, 1);

        h.reply(BackendKind::WorkerPool, 0, None, ReplyBody::PaletteInstalled { generation: 1 });
        h.orch.poll();
        assert!(h.sent().is_empty(), "one worker still has no palette");

        h.reply(BackendKind::WorkerPool, 1, None, ReplyBody::PaletteInstalled { generation: 1 });
        h.orch.poll();
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!((sent[0].task, sent[0].op), (task, Op::Build));

        h.reply(BackendKind::WorkerPool, sent[0].slot, Some(task), built([16, 0, 0]));
        let done = h.orch.poll();
        assert_eq!(done.len(), 1);
        match &done[0] {
            Completion::Chunk {
                task: t,
                coords,
                mesh,
                error,
                ..
            } => {
                assert_eq!(*t, task);
                assert_eq!(*coords, ChunkCoords::new(1, 0, 0));
                assert_eq!(mesh.origin, [16, 0, 0]);
                assert!(error.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(h.orch.is_idle());
    }

    #[test]
    fn stale_generation_acks_are_ignored() {
        let mut h = Harness::new(1, false, options());
        h.install(false);
        h.reply(BackendKind::WorkerPool, 0, None, ReplyBody::PaletteInstalled { generation: 0 });
        h.orch.poll();
        assert!(!h.orch.palette_acknowledged());
    }

    #[test]
    fn single_slot_serves_requests_in_order() {
        let mut h = Harness::new(1, false, options());
        h.install(true);
        let a = h.orch.submit_chunk(chunk(0));
        let b = h.orch.submit_chunk(chunk(1));
        let c = h.orch.submit_chunk(chunk(2));
        assert_eq!(h.sent().len(), 1);
        assert_eq!(h.orch.stats().queued, 2);

        for (i, task) in [a, b, c].into_iter().enumerate() {
            let sent = h.sent();
            assert_eq!(sent.len(), i + 1);
            assert_eq!(sent[i].task, task);
            assert_eq!(sent[i].slot, 0);
            h.reply(BackendKind::WorkerPool, 0, Some(task), built([0; 3]));
            assert_eq!(h.orch.poll().len(), 1);
        }
        assert_eq!(h.orch.stats().peak_workers_in_use, 1);
        assert_eq!(h.orch.stats().completed, 3);
    }

    #[test]
    fn timeout_frees_the_slot_and_late_replies_are_dropped() {
        let mut h = Harness::new(
            1,
            false,
            OrchestratorOptions {
                timeout: Duration::ZERO,
                ..options()
            },
        );
        h.install(true);
        let task = h.orch.submit_chunk(chunk(0));
        let done = h.orch.poll();
        assert_eq!(done.len(), 1);
        assert!(matches!(done[0].error(), Some(MeshingError::Timeout { task: t }) if *t == task));
        assert!(done[0].mesh().is_empty());
        assert_eq!(h.orch.stats().timed_out, 1);

        h.reply(BackendKind::WorkerPool, 0, Some(task), built([0; 3]));
        assert!(h.orch.poll().is_empty());
        assert_eq!(h.orch.stats().late_replies, 1);
        assert!(h.orch.is_idle());
    }

    #[test]
    fn gpu_failure_is_retried_once_on_workers() {
        let mut h = Harness::new(2, true, options());
        h.install(true);
        assert_eq!(h.orch.active_backend(), BackendKind::GpuCompute);
        let task = h.orch.submit_chunk(chunk(3));
        let gpu_sent = h.gpu.lock().unwrap().clone();
        assert_eq!(gpu_sent.len(), 1);
        assert!(h.sent().is_empty());

        h.reply(BackendKind::GpuCompute, 0, Some(task), ReplyBody::Failed("device lost".into()));
        assert!(h.orch.poll().is_empty());
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].task, task);
        assert_eq!(sent[0].blocks, gpu_sent[0].blocks);

        h.reply(BackendKind::WorkerPool, sent[0].slot, Some(task), ReplyBody::Failed("bad".into()));
        let done = h.orch.poll();
        assert_eq!(done.len(), 1);
        assert!(matches!(done[0].error(), Some(MeshingError::BackendFailure { .. })));
        assert_eq!(h.orch.stats().gpu_fallbacks, 1);
        assert_eq!(h.sent().len(), 1, "no second retry");
    }

    #[test]
    fn greedy_work_skips_the_gpu() {
        let mut h = Harness::new(1, true, options());
        h.install(true);
        h.orch.set_greedy(true);
        h.orch.submit_chunk(chunk(0));
        assert!(h.gpu.lock().unwrap().is_empty());
        assert_eq!(h.sent().len(), 1);
    }

    #[test]
    fn rejected_gpu_palette_retires_the_gpu() {
        let mut h = Harness::new(1, true, options());
        h.install(false);
        h.orch.submit_chunk(chunk(0));
        h.reply(BackendKind::GpuCompute, 0, None, ReplyBody::Failed("upload".into()));
        h.reply(BackendKind::WorkerPool, 0, None, ReplyBody::PaletteInstalled { generation: 1 });
        h.orch.poll();
        assert!(h.orch.palette_acknowledged());
        assert_eq!(h.orch.active_backend(), BackendKind::WorkerPool);
        assert_eq!(h.sent().len(), 1);
    }

    #[test]
    fn shared_buffers_fall_back_to_moves_and_are_recycled() {
        let mut h = Harness::new(
            2,
            false,
            OrchestratorOptions {
                shared_buffers: Some(1),
                ..options()
            },
        );
        h.install(true);
        let a = h.orch.submit_chunk(chunk(0));
        let b = h.orch.submit_chunk(chunk(1));
        let sent = h.sent();
        assert!(sent[0].shared);
        assert!(!sent[1].shared);
        assert_eq!(h.orch.stats().leases_outstanding, 1);

        h.reply(BackendKind::WorkerPool, sent[0].slot, Some(a), built([0; 3]));
        h.reply(BackendKind::WorkerPool, sent[1].slot, Some(b), built([16, 0, 0]));
        assert_eq!(h.orch.poll().len(), 2);
        assert_eq!(h.orch.stats().leases_outstanding, 0);

        h.orch.submit_chunk(chunk(2));
        assert!(h.sent()[2].shared);
    }

    #[test]
    fn batch_runs_one_cycle_per_poll() {
        let mut h = Harness::new(1, false, options());
        h.install(true);
        let tasks: Vec<ChunkTask> = (0..5).map(chunk).collect();
        let batch = h.orch.submit_batch(tasks, 2);

        let mut cycles = Vec::new();
        for _ in 0..3 {
            let sent = h.sent();
            let start = sent.iter().rposition(|s| s.op == Op::Start).unwrap();
            let cycle = &sent[start..];
            assert_eq!(cycle.last().unwrap().op, Op::Finish);
            let accumulates = cycle.iter().filter(|s| s.op == Op::Accumulate).count();
            let task = cycle[0].task;
            h.reply(BackendKind::WorkerPool, 0, Some(task), ReplyBody::BatchStarted);
            for n in 1..=accumulates {
                let body = ReplyBody::Accumulated { chunks: n };
                h.reply(BackendKind::WorkerPool, 0, Some(task), body);
            }
            let body = ReplyBody::Finished(ChunkMesh::empty());
            h.reply(BackendKind::WorkerPool, 0, Some(task), body);
            let done = h.orch.poll();
            assert_eq!(done.len(), 1);
            match &done[0] {
                Completion::Batch {
                    batch: b,
                    cycle,
                    cycles: total,
                    chunks,
                    error,
                    ..
                } => {
                    assert_eq!(*b, batch);
                    assert_eq!(*total, 3);
                    assert!(error.is_none());
                    cycles.push((*cycle, *chunks));
                }
                other => panic!("unexpected {other:?}"),
            }
            // next cycle starts on the following poll
            let before = h.sent().len();
            h.orch.poll();
            assert!(h.sent().len() > before || cycles.len() == 3);
        }
        assert_eq!(cycles, vec![(0, 2), (1, 2), (2, 1)]);
        assert_eq!(h.orch.stats().batch_cycles, 3);
        assert_eq!(h.orch.stats().completed, 5);
        assert!(h.orch.is_idle());
    }
}
