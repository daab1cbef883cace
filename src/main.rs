mod scene;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use tessel_instancing::InstancePlanner;
use tessel_palette::{ModelLibrary, PaletteFile};
use tessel_runtime::{ChunkSource, Completion, MesherConfig, MeshingSession};

use crate::scene::{CheckerSource, ShellSource, TerrainSource};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SceneArg {
    Terrain,
    Shell,
    Checker,
}

#[derive(Parser, Debug)]
#[command(version, about = "Compile palette-indexed voxel chunks into meshes", long_about = None)]
struct Args {
    /// Mesher settings (TOML); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Block model library (TOML)
    #[arg(long, default_value = "assets/models.toml")]
    models: PathBuf,

    /// Palette listing (TOML)
    #[arg(long, default_value = "assets/palette.toml")]
    palette: PathBuf,

    #[arg(long, value_enum, default_value_t = SceneArg::Terrain)]
    scene: SceneArg,

    /// Region size in chunks: width, height, length
    #[arg(long, num_args = 3, value_names = ["W", "H", "L"], default_values_t = [8, 2, 8])]
    size: Vec<u32>,

    #[arg(long, default_value_t = 1337)]
    seed: i32,

    #[arg(long)]
    greedy: bool,

    /// Try the compute-shader backend first
    #[arg(long)]
    gpu: bool,

    /// Merge chunks in sub-batches instead of one result per chunk
    #[arg(long)]
    batch: bool,

    #[arg(long)]
    sub_batch: Option<usize>,

    /// Render through per-type instance buffers instead of merged chunk meshes
    #[arg(long)]
    instanced: bool,

    /// Skip blocks enclosed on all sides (instanced mode)
    #[arg(long)]
    cull_hidden: bool,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    no_shared_memory: bool,

    #[arg(long)]
    timeout_ms: Option<u64>,
}

impl Args {
    fn mesher_config(&self) -> Result<MesherConfig, Box<dyn Error>> {
        let mut cfg = match &self.config {
            Some(path) => MesherConfig::from_path(path)?,
            None => MesherConfig::default(),
        };
        cfg.greedy_meshing |= self.greedy;
        cfg.gpu_compute_enabled |= self.gpu;
        if let Some(n) = self.workers {
            cfg.worker_count = n;
        }
        if self.no_shared_memory {
            cfg.shared_memory_enabled = Some(false);
        }
        if let Some(ms) = self.timeout_ms {
            cfg.task_timeout_ms = ms;
        }
        if let Some(n) = self.sub_batch {
            cfg.sub_batch_size = n;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let config = args.mesher_config()?;
    let library = ModelLibrary::from_path(&args.models)?;
    let keys = PaletteFile::from_path(&args.palette)?.keys()?;
    log::info!(
        "{} models, {} palette entries, tessel-mesh-cpu {}",
        library.model_count(),
        keys.len(),
        tessel_mesh_cpu::version()
    );

    let chunk_size = config.chunk_size;
    let source: Box<dyn ChunkSource> = match args.scene {
        SceneArg::Terrain => Box::new(TerrainSource::new(args.seed, chunk_size)),
        SceneArg::Shell => Box::new(ShellSource {
            chunk_size,
            block: scene::STONE,
        }),
        SceneArg::Checker => Box::new(CheckerSource { chunk_size }),
    };
    let [w, h, l] = [args.size[0], args.size[1], args.size[2]];
    let t0 = Instant::now();
    let tasks = source.chunks(w, h, l);
    let blocks: usize = tasks.iter().map(|t| t.block_count()).sum();
    log::info!(
        target: "perf",
        "ms={} scene_gen chunks={} blocks={}",
        t0.elapsed().as_millis(),
        tasks.len(),
        blocks
    );

    let timeout = Duration::from_millis(config.task_timeout_ms);
    let max_instances = config.max_instances_per_type;
    let sub_batch = config.sub_batch_size;
    let quantize = config.quantization_enabled;
    let mut session = MeshingSession::new(config, Arc::new(library))?;
    session.precompute_palette(&keys)?;

    let t0 = Instant::now();
    if args.instanced {
        let palette = session.palette().ok_or("palette is not ready")?;
        let mut planner =
            InstancePlanner::new(palette, max_instances).with_hidden_culling(args.cull_hidden);
        for task in &tasks {
            planner.add_blocks(&task.blocks)?;
        }
        let scene = planner.finish();
        let overflow = scene.overflow_mesh(quantize);
        log::info!(
            target: "perf",
            "ms={} instanced types={} instances={} overflow={} overflow_tris={} draw_calls={}",
            t0.elapsed().as_millis(),
            scene.batches.len(),
            scene.instanced_count(),
            scene.overflow_count(),
            overflow.triangle_count(),
            scene.draw_calls(&overflow)
        );
    } else {
        let submitted = tasks.len();
        if args.batch {
            session.submit_batch(tasks, Some(sub_batch))?;
        } else {
            for task in tasks {
                session.submit_chunk(task)?;
            }
        }
        let done = session.wait_idle(timeout.saturating_mul(submitted.max(1) as u32));
        let (mut tris, mut verts, mut ranges, mut failed) = (0, 0, 0, 0);
        for c in &done {
            tris += c.mesh().triangle_count();
            verts += c.mesh().vertex_count();
            ranges += c.mesh().draw_ranges();
            if c.error().is_some() {
                failed += 1;
            }
            if let Completion::Batch {
                batch,
                cycle,
                cycles,
                chunks,
                mesh,
                ..
            } = c
            {
                log::info!(
                    "{batch} cycle {}/{cycles}: {chunks} chunks, {} tris",
                    cycle + 1,
                    mesh.triangle_count()
                );
            }
        }
        log::info!(
            target: "perf",
            "ms={} mesh backend={} results={} failed={} tris={} verts={} draw_ranges={}",
            t0.elapsed().as_millis(),
            session.active_backend(),
            done.len(),
            failed,
            tris,
            verts,
            ranges
        );
        let stats = session.stats();
        log::info!(
            "stats: submitted={} completed={} failed={} timed_out={} gpu_fallbacks={} batch_cycles={} peak_workers={} late_replies={}",
            stats.submitted,
            stats.completed,
            stats.failed,
            stats.timed_out,
            stats.gpu_fallbacks,
            stats.batch_cycles,
            stats.peak_workers_in_use,
            stats.late_replies
        );
    }
    log::info!("{} shared materials", session.registry().len());
    session.dispose();
    Ok(())
}
