use std::sync::Arc;

use tessel_geom::{FaceMask, Vec3};
use tessel_mesh_cpu::{ChunkMesh, MeshBuilder, MeshOptions};
use tessel_mesh_gpu::{GpuError, GpuMesher};
use tessel_palette::{
    BlockKey, MaterialDesc, MaterialRegistry, PaletteCache, PaletteSnapshot, RenderMode,
    ResolveError, ResolvedBlock, UnitGeometry,
};

fn resolve(k: &BlockKey) -> Result<ResolvedBlock, ResolveError> {
    match k.name.as_str() {
        "stone" => Ok(ResolvedBlock::single(UnitGeometry::cube(), MaterialDesc::default())),
        "glass" => Ok(ResolvedBlock::single(
            UnitGeometry::cube(),
            MaterialDesc {
                mode: RenderMode::Translucent,
                opacity: 0.3,
                ..MaterialDesc::default()
            },
        )),
        "slab" => Ok(ResolvedBlock::single(
            UnitGeometry::cuboid(Vec3::ZERO, Vec3::new(1.0, 0.5, 1.0), FaceMask::ALL),
            MaterialDesc::default(),
        )),
        "flower" => Ok(ResolvedBlock::single(
            UnitGeometry::cross(),
            MaterialDesc {
                mode: RenderMode::Cutout,
                ..MaterialDesc::default()
            },
        )),
        _ => Err(ResolveError::UnknownBlock(k.to_string())),
    }
}

fn palette() -> Arc<PaletteSnapshot> {
    let keys: Vec<BlockKey> = ["stone", "glass", "slab", "flower", "missing"]
        .iter()
        .map(|n| BlockKey::new(*n))
        .collect();
    let reg = MaterialRegistry::new();
    let mut cache = PaletteCache::new(2).unwrap();
    cache.precompute(&keys, &resolve, &reg).unwrap();
    cache.snapshot().unwrap()
}

fn gpu() -> Option<GpuMesher> {
    match GpuMesher::new() {
        Ok(m) => Some(m),
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            None
        }
    }
}

fn scene(origin: [i32; 3]) -> Vec<i32> {
    let mut out = Vec::new();
    for z in 0..6 {
        for y in 0..4 {
            for x in 0..6 {
                let idx = (x * 7 + y * 3 + z) % 6;
                if idx == 5 {
                    continue;
                }
                out.extend_from_slice(&[origin[0] + x, origin[1] + y, origin[2] + z, idx]);
            }
        }
    }
    out
}

fn assert_close(gpu: &ChunkMesh, cpu: &ChunkMesh) {
    assert_eq!(gpu.origin, cpu.origin);
    assert_eq!(gpu.meshes.len(), cpu.meshes.len());
    for (g, c) in gpu.meshes.iter().zip(&cpu.meshes) {
        assert_eq!(g.category, c.category);
        assert_eq!(g.groups, c.groups);
        assert_eq!(g.indices, c.indices);
        assert_eq!(g.normals, c.normals);
        assert_eq!(g.vertex_count, c.vertex_count);
        let (gp, cp) = (g.positions.to_f32(), c.positions.to_f32());
        assert!(gp.iter().zip(&cp).all(|(a, b)| (a - b).abs() < 1e-5));
    }
}

#[test]
fn gpu_output_matches_cpu_output() {
    let Some(mut mesher) = gpu() else {
        return;
    };
    let snap = palette();
    mesher.upload_palette(snap.clone()).unwrap();
    let mut cpu = MeshBuilder::new(MeshOptions::default());
    cpu.set_palette(snap);
    for origin in [[0, 0, 0], [-32, 16, 48]] {
        let blocks = scene(origin);
        let g = mesher.build_chunk(&blocks, origin, true).unwrap();
        let c = cpu.build_chunk(&blocks, origin).unwrap();
        assert_close(&g, &c);
    }
}

#[test]
fn gpu_rejects_bad_input() {
    let Some(mut mesher) = gpu() else {
        return;
    };
    assert!(matches!(
        mesher.build_chunk(&[0, 0, 0, 0], [0; 3], true),
        Err(GpuError::NoPalette)
    ));
    mesher.upload_palette(palette()).unwrap();
    assert!(matches!(
        mesher.build_chunk(&[0, 0], [0; 3], true),
        Err(GpuError::BadStride(2))
    ));
    let empty = mesher.build_chunk(&[], [4, 4, 4], true).unwrap();
    assert!(empty.is_empty());
    assert_eq!(empty.origin, [0, 0, 0]);
}
