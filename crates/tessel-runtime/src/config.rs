use std::fs;
use std::path::Path;
use std::thread;

use serde::Deserialize;
use tessel_palette::ConfigError;

use crate::error::MeshingError;

pub const MAX_CHUNK_SIZE: u32 = 64;
pub const MAX_SUB_BATCH: usize = 64;

/// Runtime options. Every field has a default, so a TOML file only names what it changes.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct MesherConfig {
    /// Edge length of a chunk, used to derive chunk origins.
    pub chunk_size: u32,
    pub quantization_enabled: bool,
    pub greedy_meshing: bool,
    pub gpu_compute_enabled: bool,
    pub worker_count: usize,
    /// `None` picks the shared buffer transport whenever it is available.
    pub shared_memory_enabled: Option<bool>,
    pub task_timeout_ms: u64,
    pub sub_batch_size: usize,
    pub max_instances_per_type: usize,
    pub resolve_concurrency: usize,
    /// Defaults to twice the worker count.
    pub shared_buffer_count: Option<usize>,
}

fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(8)
}

impl Default for MesherConfig {
    fn default() -> Self {
        Self {
            chunk_size: 16,
            quantization_enabled: true,
            greedy_meshing: false,
            gpu_compute_enabled: false,
            worker_count: default_workers(),
            shared_memory_enabled: None,
            task_timeout_ms: 30_000,
            sub_batch_size: MAX_SUB_BATCH,
            max_instances_per_type: 50_000,
            resolve_concurrency: 8,
            shared_buffer_count: None,
        }
    }
}

impl MesherConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<Self, MeshingError> {
        let cfg: MesherConfig = toml::from_str(toml_str).map_err(ConfigError::from)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, MeshingError> {
        let path = path.as_ref();
        let s = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&s)
    }

    pub fn validate(&self) -> Result<(), MeshingError> {
        let bad = |msg: String| Err(MeshingError::InvalidConfig(msg));
        if !(1..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return bad(format!("chunk_size {} outside 1..={MAX_CHUNK_SIZE}", self.chunk_size));
        }
        if !(1..=MAX_SUB_BATCH).contains(&self.sub_batch_size) {
            return bad(format!(
                "sub_batch_size {} outside 1..={MAX_SUB_BATCH}",
                self.sub_batch_size
            ));
        }
        if self.worker_count == 0 {
            return bad("worker_count must be at least 1".into());
        }
        if self.task_timeout_ms == 0 {
            return bad("task_timeout_ms must be positive".into());
        }
        if self.max_instances_per_type == 0 {
            return bad("max_instances_per_type must be positive".into());
        }
        if self.resolve_concurrency == 0 {
            return bad("resolve_concurrency must be at least 1".into());
        }
        if self.shared_buffer_count == Some(0) {
            return bad("shared_buffer_count must be positive".into());
        }
        Ok(())
    }

    pub fn shared_buffers(&self) -> usize {
        self.shared_buffer_count
            .unwrap_or(self.worker_count * 2)
            .max(1)
    }

    /// Threads share an address space, so the shared transport is always available here.
    pub fn use_shared_memory(&self) -> bool {
        self.shared_memory_enabled.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = MesherConfig::from_toml_str("greedy_meshing = true\nworker_count = 3\n").unwrap();
        assert!(cfg.greedy_meshing);
        assert_eq!(cfg.worker_count, 3);
        assert_eq!(cfg.chunk_size, 16);
        assert_eq!(cfg.sub_batch_size, 64);
        assert_eq!(cfg.shared_buffers(), 6);
        assert!(cfg.use_shared_memory());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for src in [
            "chunk_size = 0",
            "chunk_size = 65",
            "sub_batch_size = 100",
            "worker_count = 0",
            "task_timeout_ms = 0",
            "shared_buffer_count = 0",
        ] {
            assert!(
                matches!(
                    MesherConfig::from_toml_str(src),
                    Err(MeshingError::InvalidConfig(_))
                ),
                "{src}"
            );
        }
    }

    #[test]
    fn syntax_errors_surface_as_config_errors() {
        assert!(matches!(
            MesherConfig::from_toml_str("chunk_size = \"big\""),
            Err(MeshingError::Config(_))
        ));
    }
}
