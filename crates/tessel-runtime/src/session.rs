use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use tessel_palette::{
    BlockKey, GeometryResolver, MaterialRegistry, PaletteCache, PaletteSnapshot, PrecomputeOutcome,
};

use crate::backend::{BackendKind, select_backends};
use crate::batch::BatchId;
use crate::config::MesherConfig;
use crate::error::MeshingError;
use crate::orchestrator::{Completion, Orchestrator, OrchestratorOptions, RuntimeStats};
use crate::source::ChunkSource;
use crate::task::{ChunkTask, TaskId};

/// Host-facing entry point: owns the palette cache, the material registry and the
/// orchestrator with its backends.
///
/// Typical use: [`MeshingSession::precompute_palette`] once per palette, then submit chunks
/// or batches and drain [`Completion`]s with [`MeshingSession::poll`].
pub struct MeshingSession {
    config: MesherConfig,
    resolver: Arc<dyn GeometryResolver>,
    registry: MaterialRegistry,
    cache: PaletteCache,
    orchestrator: Orchestrator,
}

impl MeshingSession {
    pub fn new(
        config: MesherConfig,
        resolver: Arc<dyn GeometryResolver>,
    ) -> Result<Self, MeshingError> {
        config.validate()?;
        let (reply_tx, reply_rx) = unbounded();
        let backends = select_backends(&config, reply_tx)?;
        let cache = PaletteCache::new(config.resolve_concurrency)?;
        let options = OrchestratorOptions::from(&config);
        let orchestrator = Orchestrator::new(backends, reply_rx, options);
        log::info!(
            target: "events",
            "meshing session: backend={} workers={} shared_memory={} greedy={} quantize={}",
            orchestrator.active_backend(),
            config.worker_count,
            config.use_shared_memory(),
            config.greedy_meshing,
            config.quantization_enabled
        );
        Ok(Self {
            config,
            resolver,
            registry: MaterialRegistry::new(),
            cache,
            orchestrator,
        })
    }

    pub fn config(&self) -> &MesherConfig {
        &self.config
    }

    /// Resolves `keys` into a palette snapshot and installs it on every backend.
    ///
    /// A palette equal to the installed one is not resolved again. Returns once every backend
    /// has acknowledged the snapshot.
    pub fn precompute_palette(&mut self, keys: &[BlockKey]) -> Result<(), MeshingError> {
        let outcome = self
            .cache
            .precompute(keys, self.resolver.as_ref(), &self.registry)?;
        if matches!(outcome, PrecomputeOutcome::Unchanged) && self.cache.is_ready() {
            return Ok(());
        }
        let Some(snapshot) = self.cache.snapshot() else {
            return Err(MeshingError::NotReady);
        };
        let start = Instant::now();
        self.orchestrator.install_palette(snapshot)?;
        self.orchestrator
            .wait_palette(Duration::from_millis(self.config.task_timeout_ms))?;
        self.cache.mark_ready();
        log::info!(
            target: "perf",
            "ms={} palette_broadcast backend={}",
            start.elapsed().as_millis(),
            self.orchestrator.active_backend()
        );
        Ok(())
    }

    pub fn palette(&self) -> Option<Arc<PaletteSnapshot>> {
        self.cache.ready_snapshot()
    }

    pub fn registry(&self) -> &MaterialRegistry {
        &self.registry
    }

    pub fn active_backend(&self) -> BackendKind {
        self.orchestrator.active_backend()
    }

    pub fn stats(&self) -> RuntimeStats {
        self.orchestrator.stats()
    }

    pub fn set_greedy_meshing(&mut self, greedy: bool) {
        self.config.greedy_meshing = greedy;
        self.orchestrator.set_greedy(greedy);
    }

    fn ensure_ready(&self) -> Result<(), MeshingError> {
        if self.cache.is_ready() && self.orchestrator.palette_acknowledged() {
            Ok(())
        } else {
            Err(MeshingError::NotReady)
        }
    }

    pub fn submit_chunk(&mut self, task: ChunkTask) -> Result<TaskId, MeshingError> {
        self.ensure_ready()?;
        Ok(self.orchestrator.submit_chunk(task))
    }

    /// Queues every chunk of a `width x height x length` volume taken from `source`.
    pub fn submit_source(
        &mut self,
        source: &dyn ChunkSource,
        dims: [u32; 3],
    ) -> Result<Vec<TaskId>, MeshingError> {
        self.ensure_ready()?;
        let [w, h, l] = dims;
        Ok(source
            .chunks(w, h, l)
            .into_iter()
            .map(|task| self.orchestrator.submit_chunk(task))
            .collect())
    }

    /// Merges `tasks` in cycles of at most `sub_batch` chunks (the configured size when `None`).
    pub fn submit_batch(
        &mut self,
        tasks: Vec<ChunkTask>,
        sub_batch: Option<usize>,
    ) -> Result<BatchId, MeshingError> {
        self.ensure_ready()?;
        let sub_batch = sub_batch.unwrap_or(self.config.sub_batch_size);
        Ok(self.orchestrator.submit_batch(tasks, sub_batch))
    }

    pub fn poll(&mut self) -> Vec<Completion> {
        self.orchestrator.poll()
    }

    pub fn is_idle(&self) -> bool {
        self.orchestrator.is_idle()
    }

    /// Polls until nothing is queued or in flight, or `timeout` passes. Returns everything
    /// that completed meanwhile.
    pub fn wait_idle(&mut self, timeout: Duration) -> Vec<Completion> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        loop {
            let now = Instant::now();
            let wait = deadline
                .saturating_duration_since(now)
                .min(Duration::from_millis(50));
            out.extend(self.orchestrator.poll_timeout(wait));
            if self.orchestrator.is_idle() || Instant::now() >= deadline {
                break;
            }
        }
        out
    }

    /// Stops the backends and releases every material the palette held.
    pub fn dispose(&mut self) {
        self.orchestrator.shutdown();
        self.cache.dispose(&self.registry);
        log::debug!(
            target: "events",
            "session disposed, {} materials still registered",
            self.registry.len()
        );
    }
}

impl Drop for MeshingSession {
    fn drop(&mut self) {
        self.orchestrator.shutdown();
    }
}
