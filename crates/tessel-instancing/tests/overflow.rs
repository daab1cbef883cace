use std::sync::Arc;

use proptest::prelude::*;
use tessel_geom::{FaceMask, Vec3};
use tessel_instancing::{InstanceKey, InstancePlanner};
use tessel_palette::{
    BlockKey, Category, MaterialDesc, MaterialRegistry, PaletteCache, PaletteSnapshot, RenderMode,
    ResolveError, ResolvedBlock, ResolvedPart, UnitGeometry,
};

fn resolve(k: &BlockKey) -> Result<ResolvedBlock, ResolveError> {
    match k.name.as_str() {
        "stone" => Ok(ResolvedBlock::single(UnitGeometry::cube(), MaterialDesc::default())),
        "lamp" => Ok(ResolvedBlock {
            parts: vec![
                ResolvedPart {
                    geometry: UnitGeometry::cuboid(
                        Vec3::ZERO,
                        Vec3::new(1.0, 0.5, 1.0),
                        FaceMask::ALL,
                    ),
                    material: MaterialDesc::default(),
                },
                ResolvedPart {
                    geometry: UnitGeometry::cuboid(
                        Vec3::new(0.25, 0.5, 0.25),
                        Vec3::new(0.75, 1.0, 0.75),
                        FaceMask::ALL,
                    ),
                    material: MaterialDesc {
                        mode: RenderMode::Emissive,
                        emissive: [255, 200, 120],
                        emissive_intensity: 2.0,
                        ..MaterialDesc::default()
                    },
                },
            ],
            ..ResolvedBlock::empty()
        }),
        _ => Err(ResolveError::UnknownBlock(k.to_string())),
    }
}

fn palette() -> Arc<PaletteSnapshot> {
    let keys = [BlockKey::new("stone"), BlockKey::new("lamp")];
    let mut cache = PaletteCache::new(1).unwrap();
    cache.precompute(&keys, &resolve, &MaterialRegistry::new()).unwrap();
    cache.snapshot().unwrap()
}

fn spaced(count: usize, idx: i32) -> Vec<i32> {
    (0..count as i32).flat_map(|i| [i * 3, 0, idx * 3, idx]).collect()
}

#[test]
fn each_material_group_gets_its_own_buffer() {
    let palette = palette();
    let mut p = InstancePlanner::new(Arc::clone(&palette), 4);
    p.add_blocks(&spaced(6, 1)).unwrap();
    let scene = p.finish();
    assert_eq!(scene.batches.len(), 2);
    for g in 0..2 {
        let key = InstanceKey {
            palette_index: 1,
            group: g,
        };
        assert_eq!(scene.count_for(key), (4, 2));
    }
    let overflow = scene.overflow_mesh(true);
    assert_eq!(overflow.origin, [12, 0, 3]);
    assert_eq!(overflow.triangle_count(), 2 * 2 * 12);
    assert!(overflow.category(Category::Emissive).is_some());
    // two instance buffers plus one range per material in the emissive overflow buffer
    assert_eq!(scene.draw_calls(&overflow), 4);
}

#[test]
fn nothing_overflows_under_capacity() {
    let mut p = InstancePlanner::new(palette(), 50_000);
    p.add_blocks(&spaced(100, 0)).unwrap();
    let scene = p.finish();
    assert_eq!(scene.overflow_count(), 0);
    assert!(scene.overflow_mesh(true).is_empty());
}

proptest! {
    #[test]
    fn every_occurrence_is_rendered_exactly_once(count in 0usize..400, cap in 0usize..120) {
        let mut p = InstancePlanner::new(palette(), cap);
        p.add_blocks(&spaced(count, 0)).unwrap();
        let scene = p.finish();
        let key = InstanceKey { palette_index: 0, group: 0 };
        let (instanced, overflow) = scene.count_for(key);
        prop_assert_eq!(instanced, count.min(cap));
        prop_assert_eq!(overflow, count.saturating_sub(cap));
        prop_assert_eq!(scene.total(), count);
        prop_assert!(scene.batches.iter().all(|b| b.len() <= cap));
        prop_assert_eq!(scene.overflow_mesh(false).triangle_count(), overflow * 12);
    }
}
