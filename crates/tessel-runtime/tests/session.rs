use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tessel_palette::{BlockKey, Category, GeometryResolver, ModelLibrary};
use tessel_runtime::{
    BackendKind, ChunkCoords, ChunkTask, Completion, MesherConfig, MeshingError, MeshingSession,
};

const LIB: &str = r#"
[materials.stone]
texture = "block/stone"

[materials.glass]
mode = "translucent"
opacity = 0.4
texture = "block/glass"

[models.stone]
material = "stone"

[models.glass]
material = "glass"
"#;

const STONE: i32 = 0;

fn keys() -> Vec<BlockKey> {
    vec![BlockKey::new("minecraft:stone"), BlockKey::new("minecraft:glass")]
}

fn config() -> MesherConfig {
    MesherConfig {
        worker_count: 2,
        task_timeout_ms: 10_000,
        ..MesherConfig::default()
    }
}

fn session() -> MeshingSession {
    let lib = ModelLibrary::from_toml_str(LIB).unwrap();
    let mut s = MeshingSession::new(config(), Arc::new(lib)).unwrap();
    s.precompute_palette(&keys()).unwrap();
    s
}

fn solid_box(lo: i32, hi: i32, idx: i32) -> Vec<i32> {
    let mut out = Vec::new();
    for z in lo..hi {
        for y in lo..hi {
            for x in lo..hi {
                out.extend_from_slice(&[x, y, z, idx]);
            }
        }
    }
    out
}

fn drain(s: &mut MeshingSession) -> Vec<Completion> {
    let done = s.wait_idle(Duration::from_secs(10));
    assert!(s.is_idle(), "session did not settle");
    done
}

#[test]
fn shell_chunk_compiles_on_the_worker_pool() {
    let mut s = session();
    assert_eq!(s.active_backend(), BackendKind::WorkerPool);
    let task = ChunkTask::new(ChunkCoords::new(0, 0, 0), solid_box(1, 15, STONE));
    let id = s.submit_chunk(task).unwrap();
    let done = drain(&mut s);
    assert_eq!(done.len(), 1);
    match &done[0] {
        Completion::Chunk {
            task, mesh, error, ..
        } => {
            assert_eq!(*task, id);
            assert!(error.is_none());
            assert_eq!(mesh.triangle_count(), 6 * 14 * 14 * 2);
            assert_eq!(mesh.geometries.len(), 1);
            assert_eq!(mesh.geometries[0].category, Category::Solid);
        }
        other => panic!("unexpected {other:?}"),
    }

    s.set_greedy_meshing(true);
    s.submit_chunk(ChunkTask::new(ChunkCoords::new(0, 0, 0), solid_box(1, 15, STONE)))
        .unwrap();
    let done = drain(&mut s);
    assert_eq!(done[0].mesh().triangle_count(), 12);
    assert_eq!(s.stats().completed, 2);
}

#[test]
fn adjacent_blocks_hide_their_shared_faces() {
    let mut s = session();
    s.submit_chunk(ChunkTask::new(
        ChunkCoords::new(0, 0, 0),
        vec![0, 0, 0, STONE, 1, 0, 0, STONE],
    ))
    .unwrap();
    let done = drain(&mut s);
    assert_eq!(done[0].mesh().triangle_count(), 20);
}

#[test]
fn chunks_come_back_relative_to_their_origin() {
    let mut s = session();
    s.submit_chunk(ChunkTask::new(ChunkCoords::new(1, 0, -1), vec![16, 0, -16, STONE]))
        .unwrap();
    let done = drain(&mut s);
    let mesh = done[0].mesh();
    assert_eq!(mesh.origin, [16, 0, -16]);
    let positions = &mesh.geometries[0].positions;
    assert!(positions.iter().all(|p| (0.0..=1.0).contains(p)));
}

#[test]
fn submitting_before_precompute_is_refused() {
    let lib = ModelLibrary::from_toml_str(LIB).unwrap();
    let mut s = MeshingSession::new(config(), Arc::new(lib)).unwrap();
    let err = s
        .submit_chunk(ChunkTask::new(ChunkCoords::default(), vec![0, 0, 0, STONE]))
        .unwrap_err();
    assert!(matches!(err, MeshingError::NotReady));
    assert!(s.palette().is_none());
}

#[test]
fn unchanged_palette_is_not_resolved_again() {
    let lib = ModelLibrary::from_toml_str(LIB).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let resolver = move |k: &BlockKey| {
        counter.fetch_add(1, Ordering::SeqCst);
        lib.resolve(k)
    };
    let mut s = MeshingSession::new(config(), Arc::new(resolver)).unwrap();
    s.precompute_palette(&keys()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let generation = s.palette().unwrap().generation;

    s.precompute_palette(&keys()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(s.palette().unwrap().generation, generation);

    s.precompute_palette(&keys()[..1]).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(s.palette().unwrap().generation, generation + 1);
}

#[test]
fn batch_is_merged_in_bounded_cycles() {
    let mut s = session();
    let tasks: Vec<ChunkTask> = (0..5)
        .map(|cx| ChunkTask::new(ChunkCoords::new(cx, 0, 0), vec![cx * 16, 0, 0, STONE]))
        .collect();
    let batch = s.submit_batch(tasks, Some(2)).unwrap();
    let done = drain(&mut s);
    assert_eq!(done.len(), 3);
    let mut merged = Vec::new();
    for c in &done {
        match c {
            Completion::Batch {
                batch: b,
                cycle,
                cycles,
                chunks,
                mesh,
                error,
            } => {
                assert_eq!(*b, batch);
                assert_eq!(*cycles, 3);
                assert!(error.is_none());
                assert_eq!(mesh.triangle_count(), chunks * 12);
                merged.push((*cycle, *chunks, mesh.origin));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(
        merged,
        vec![(0, 2, [0, 0, 0]), (1, 2, [32, 0, 0]), (2, 1, [64, 0, 0])]
    );
    assert_eq!(s.stats().batch_cycles, 3);
}

#[test]
fn shared_transport_leases_are_returned() {
    let mut s = session();
    for cx in 0..8 {
        s.submit_chunk(ChunkTask::new(ChunkCoords::new(cx, 0, 0), vec![cx * 16, 0, 0, STONE]))
            .unwrap();
    }
    let done = drain(&mut s);
    assert_eq!(done.len(), 8);
    assert!(done.iter().all(|c| c.error().is_none()));
    assert_eq!(s.stats().leases_outstanding, 0);
    assert!(s.stats().peak_workers_in_use <= 2);
}

#[test]
fn dispose_releases_palette_materials() {
    let mut s = session();
    assert_eq!(s.registry().len(), 2);
    s.dispose();
    assert_eq!(s.registry().len(), 0);
}
