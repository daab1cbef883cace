use std::sync::Arc;
use std::time::Instant;

use tessel_palette::{Category, PaletteSnapshot};

use crate::buffers::{ChunkMesh, MeshAccumulator};
use crate::emit::{EmitStats, emit_chunk};
use crate::error::BuildError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshOptions {
    pub greedy: bool,
    pub quantize: bool,
}

impl Default for MeshOptions {
    fn default() -> Self {
        Self {
            greedy: false,
            quantize: true,
        }
    }
}

#[derive(Default)]
struct BatchState {
    origin: Option<[i32; 3]>,
    accs: [MeshAccumulator; 5],
    chunks: usize,
}

/// Compiles block arrays against an installed palette snapshot.
///
/// Single chunks go through [`MeshBuilder::build_chunk`]. Batch mode merges several chunks
/// into one set of category buffers, positioned relative to the first accumulated origin.
#[derive(Default)]
pub struct MeshBuilder {
    palette: Option<Arc<PaletteSnapshot>>,
    options: MeshOptions,
    batch: Option<BatchState>,
}

fn elapsed_ms(start: Instant) -> u32 {
    start.elapsed().as_millis().min(u128::from(u32::MAX)) as u32
}

fn finish_accs(accs: [MeshAccumulator; 5], origin: [i32; 3], quantize: bool) -> ChunkMesh {
    let meshes = Category::ALL
        .into_iter()
        .zip(accs)
        .filter_map(|(category, acc)| acc.finish(category, quantize))
        .collect();
    ChunkMesh { meshes, origin }
}

fn check_stride(blocks: &[i32]) -> Result<(), BuildError> {
    if blocks.len() % 4 != 0 {
        return Err(BuildError::BadStride(blocks.len()));
    }
    Ok(())
}

impl MeshBuilder {
    pub fn new(options: MeshOptions) -> Self {
        Self {
            palette: None,
            options,
            batch: None,
        }
    }

    pub fn set_palette(&mut self, palette: Arc<PaletteSnapshot>) {
        self.palette = Some(palette);
    }

    pub fn palette(&self) -> Option<&Arc<PaletteSnapshot>> {
        self.palette.as_ref()
    }

    pub fn set_greedy(&mut self, greedy: bool) {
        self.options.greedy = greedy;
    }

    pub fn options(&self) -> MeshOptions {
        self.options
    }

    fn installed(&self) -> Result<&PaletteSnapshot, BuildError> {
        self.palette.as_deref().ok_or(BuildError::NoPalette)
    }

    /// Builds one chunk of `[x, y, z, palette_index]` records; positions come out relative to
    /// `origin`. An empty array yields an empty mesh at origin `(0, 0, 0)`.
    pub fn build_chunk(&self, blocks: &[i32], origin: [i32; 3]) -> Result<ChunkMesh, BuildError> {
        let palette = self.installed()?;
        check_stride(blocks)?;
        if blocks.is_empty() {
            return Ok(ChunkMesh::empty());
        }
        let start = Instant::now();
        let mut accs: [MeshAccumulator; 5] = Default::default();
        let stats = emit_chunk(palette, blocks, origin, self.options.greedy, &mut accs);
        let mesh = finish_accs(accs, origin, self.options.quantize);
        log_build(start, blocks.len() / 4, &stats, &mesh, origin);
        Ok(mesh)
    }

    /// Enters batch mode, dropping any unfinished batch.
    pub fn start_batch(&mut self) {
        self.batch = Some(BatchState::default());
    }

    pub fn is_batch_mode(&self) -> bool {
        self.batch.is_some()
    }

    /// Adds one chunk to the running batch; returns the number of chunks accumulated so far.
    pub fn accumulate_chunk(
        &mut self,
        blocks: &[i32],
        origin: [i32; 3],
    ) -> Result<usize, BuildError> {
        check_stride(blocks)?;
        let palette = self.palette.clone().ok_or(BuildError::NoPalette)?;
        let greedy = self.options.greedy;
        let batch = self.batch.as_mut().ok_or(BuildError::NotInBatch)?;
        let base = *batch.origin.get_or_insert(origin);
        emit_chunk(&palette, blocks, base, greedy, &mut batch.accs);
        batch.chunks += 1;
        Ok(batch.chunks)
    }

    /// Closes the batch. The mesh origin is the first accumulated chunk's origin, or
    /// `(0, 0, 0)` when nothing was accumulated.
    pub fn finish_batch(&mut self) -> Result<ChunkMesh, BuildError> {
        let batch = self.batch.take().ok_or(BuildError::NotInBatch)?;
        let origin = batch.origin.unwrap_or([0, 0, 0]);
        let mesh = finish_accs(batch.accs, origin, self.options.quantize);
        log::debug!(
            target: "perf",
            "batch_finish chunks={} tris={} verts={}",
            batch.chunks,
            mesh.triangle_count(),
            mesh.vertex_count()
        );
        Ok(mesh)
    }

    pub fn clear_batch(&mut self) {
        self.batch = None;
    }
}

fn log_build(
    start: Instant,
    blocks: usize,
    stats: &EmitStats,
    mesh: &ChunkMesh,
    origin: [i32; 3],
) {
    log::debug!(
        target: "perf",
        "ms={} build_chunk blocks={} instances={} culled_tris={} greedy_quads={} tris={} verts={} origin={:?}",
        elapsed_ms(start),
        blocks,
        stats.instances,
        stats.culled_triangles,
        stats.greedy_quads,
        mesh.triangle_count(),
        mesh.vertex_count(),
        origin
    );
}
