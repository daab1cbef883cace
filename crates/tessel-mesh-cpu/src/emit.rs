use tessel_geom::{Face, Vec3};
use tessel_palette::{Category, MaterialGroup, PaletteIndex, PaletteSnapshot};

use crate::buffers::MeshAccumulator;
use crate::greedy::emit_greedy;
use crate::voxel_map::VoxelMap;

#[derive(Default, Debug, Clone, Copy)]
pub(crate) struct EmitStats {
    pub instances: usize,
    pub culled_triangles: usize,
    pub greedy_quads: usize,
    pub skipped_records: usize,
}

/// True when the block across `face` hides it completely.
#[inline]
pub fn neighbor_occludes(
    palette: &PaletteSnapshot,
    map: &VoxelMap,
    (x, y, z): (i32, i32, i32),
    face: Face,
) -> bool {
    let (dx, dy, dz) = face.delta();
    map.get(x + dx, y + dy, z + dz)
        .and_then(|i| palette.get(i))
        .is_some_and(|e| e.occludes(face.opposite()))
}

/// Pushes the triangle numbers of `group` that survive culling at block `at`; returns how many
/// were culled.
pub fn visible_triangles(
    palette: &PaletteSnapshot,
    map: &VoxelMap,
    at: (i32, i32, i32),
    group: &MaterialGroup,
    out: &mut Vec<u32>,
) -> usize {
    out.clear();
    let mut culled = 0;
    for (t, face) in group.triangle_faces.iter().enumerate() {
        match face {
            Some(f) if neighbor_occludes(palette, map, at, *f) => culled += 1,
            _ => out.push(t as u32),
        }
    }
    culled
}

/// Record order for emission: by category, then palette index, then input order.
/// Also returns how many records were skipped for an unknown palette index.
pub fn instance_order(
    palette: &PaletteSnapshot,
    blocks: &[i32],
) -> (Vec<(Category, PaletteIndex, usize)>, usize) {
    let mut skipped = 0;
    let mut order = Vec::with_capacity(blocks.len() / 4);
    for (i, rec) in blocks.chunks_exact(4).enumerate() {
        let Ok(pi) = PaletteIndex::try_from(rec[3]) else {
            skipped += 1;
            continue;
        };
        match palette.get(pi) {
            Some(entry) => order.push((entry.category, pi, i)),
            None => skipped += 1,
        }
    }
    order.sort_by_key(|&(c, p, _)| (c, p));
    (order, skipped)
}

/// Emits one chunk's blocks into per-category accumulators, positions relative to `base`.
pub(crate) fn emit_chunk(
    palette: &PaletteSnapshot,
    blocks: &[i32],
    base: [i32; 3],
    greedy: bool,
    accs: &mut [MeshAccumulator; 5],
) -> EmitStats {
    let mut stats = EmitStats::default();
    let Some(map) = VoxelMap::from_records(blocks) else {
        return stats;
    };
    let (order, skipped) = instance_order(palette, blocks);
    stats.skipped_records = skipped;
    if skipped > 0 {
        log::debug!(target: "events", "skipped {skipped} block records with unknown palette index");
    }

    let mut visible = Vec::new();
    for (category, pi, rec) in order {
        let Some(entry) = palette.get(pi) else {
            continue;
        };
        if greedy && entry.face_materials.is_some() {
            continue;
        }
        let r = &blocks[rec * 4..rec * 4 + 4];
        let at = (r[0], r[1], r[2]);
        let offset = Vec3::new(
            (r[0] - base[0]) as f32,
            (r[1] - base[1]) as f32,
            (r[2] - base[2]) as f32,
        );
        stats.instances += 1;
        let acc = &mut accs[category.index()];
        for group in &entry.groups {
            stats.culled_triangles += visible_triangles(palette, &map, at, group, &mut visible);
            if !visible.is_empty() {
                acc.push_instance(
                    group.geometry.as_ref().into(),
                    offset,
                    &visible,
                    group.material_index,
                );
            }
        }
    }

    if greedy {
        stats.greedy_quads = emit_greedy(palette, &map, base, accs);
    }
    stats
}
