use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;
use hashbrown::hash_map::Entry;
use tessel_geom::Face;
use tessel_palette::{PaletteIndex, PaletteSnapshot};
use thiserror::Error;

use crate::scene::{InstanceBatch, InstanceKey, InstanceTransform, InstancedScene, OverflowCopy};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InstancingError {
    #[error("block array length {0} is not a multiple of 4")]
    BadStride(usize),
}

/// Collects blocks from any number of chunks and assigns each visible occurrence to its
/// instance buffer, or to the overflow list once that buffer holds `capacity` transforms.
pub struct InstancePlanner {
    palette: Arc<PaletteSnapshot>,
    capacity: usize,
    cull_hidden: bool,
    /// Position to record index; a later record at the same position replaces the earlier one.
    cells: HashMap<[i32; 3], usize>,
    records: Vec<([i32; 3], PaletteIndex)>,
    skipped: usize,
}

impl InstancePlanner {
    pub fn new(palette: Arc<PaletteSnapshot>, capacity: usize) -> Self {
        Self {
            palette,
            capacity,
            cull_hidden: false,
            cells: HashMap::new(),
            records: Vec::new(),
            skipped: 0,
        }
    }

    /// Skip blocks enclosed on all six sides by occluding neighbours.
    pub fn with_hidden_culling(mut self, cull: bool) -> Self {
        self.cull_hidden = cull;
        self
    }

    pub fn block_count(&self) -> usize {
        self.records.len()
    }

    /// Adds `[x, y, z, palette_index]` records in world coordinates. Negative and unknown
    /// indices are skipped. Returns the number of records taken.
    pub fn add_blocks(&mut self, blocks: &[i32]) -> Result<usize, InstancingError> {
        if blocks.len() % 4 != 0 {
            return Err(InstancingError::BadStride(blocks.len()));
        }
        let mut taken = 0;
        for rec in blocks.chunks_exact(4) {
            let Ok(pi) = PaletteIndex::try_from(rec[3]) else {
                continue;
            };
            if self.palette.get(pi).is_none() {
                self.skipped += 1;
                continue;
            }
            let pos = [rec[0], rec[1], rec[2]];
            match self.cells.entry(pos) {
                Entry::Occupied(e) => self.records[*e.get()].1 = pi,
                Entry::Vacant(e) => {
                    e.insert(self.records.len());
                    self.records.push((pos, pi));
                }
            }
            taken += 1;
        }
        Ok(taken)
    }

    fn index_at(&self, pos: [i32; 3]) -> Option<PaletteIndex> {
        self.cells.get(&pos).map(|&i| self.records[i].1)
    }

    /// A neighbour past the edge of the i32 range counts as absent.
    fn is_hidden(&self, pos: [i32; 3]) -> bool {
        Face::ALL.into_iter().all(|face| {
            let (dx, dy, dz) = face.delta();
            let neighbor = pos[0]
                .checked_add(dx)
                .zip(pos[1].checked_add(dy))
                .zip(pos[2].checked_add(dz))
                .map(|((x, y), z)| [x, y, z]);
            neighbor
                .and_then(|n| self.index_at(n))
                .and_then(|i| self.palette.get(i))
                .is_some_and(|n| n.occludes(face.opposite()))
        })
    }

    pub fn finish(self) -> InstancedScene {
        let start = Instant::now();
        let mut order: Vec<usize> = (0..self.records.len()).collect();
        // palette order first, insertion order within a type
        order.sort_by_key(|&i| self.records[i].1);

        let mut batches: BTreeMap<InstanceKey, InstanceBatch> = BTreeMap::new();
        let mut overflow = Vec::new();
        let mut hidden = 0;
        for i in order {
            let (pos, pi) = self.records[i];
            let Some(entry) = self.palette.get(pi) else {
                continue;
            };
            if self.cull_hidden && self.is_hidden(pos) {
                hidden += 1;
                continue;
            }
            for (g, group) in entry.groups.iter().enumerate() {
                if group.geometry.is_empty() {
                    continue;
                }
                let key = InstanceKey {
                    palette_index: pi,
                    group: g as u32,
                };
                let batch = batches.entry(key).or_insert_with(|| InstanceBatch {
                    key,
                    category: entry.category,
                    material_index: group.material_index,
                    geometry: Arc::clone(&group.geometry),
                    transforms: Vec::new(),
                    capacity: self.capacity,
                });
                if batch.is_full() {
                    overflow.push(OverflowCopy { key, position: pos });
                } else {
                    batch.transforms.push(InstanceTransform::at(pos));
                }
            }
        }
        let mut batches: Vec<InstanceBatch> =
            batches.into_values().filter(|b| !b.is_empty()).collect();
        batches.sort_by_key(|b| (b.category, b.key));

        let scene = InstancedScene {
            batches,
            overflow,
            hidden,
            skipped: self.skipped,
            palette: self.palette,
        };
        log::info!(
            target: "perf",
            "ms={} instance_plan batches={} instanced={} overflow={} hidden={} skipped={}",
            start.elapsed().as_millis(),
            scene.batches.len(),
            scene.instanced_count(),
            scene.overflow_count(),
            scene.hidden,
            scene.skipped
        );
        if !scene.overflow.is_empty() {
            log::warn!(
                target: "events",
                "{} occurrences exceeded the instance capacity of {} and render as plain meshes",
                scene.overflow.len(),
                self.capacity
            );
        }
        scene
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_palette::{
        BlockKey, MaterialDesc, MaterialRegistry, PaletteCache, ResolveError, ResolvedBlock,
        UnitGeometry,
    };

    fn palette() -> Arc<PaletteSnapshot> {
        let resolve = |k: &BlockKey| -> Result<ResolvedBlock, ResolveError> {
            match k.name.as_str() {
                "stone" => Ok(ResolvedBlock::single(UnitGeometry::cube(), MaterialDesc::default())),
                "air" => Ok(ResolvedBlock::empty()),
                _ => Err(ResolveError::UnknownBlock(k.to_string())),
            }
        };
        let keys = [BlockKey::new("stone"), BlockKey::new("air")];
        let mut cache = PaletteCache::new(1).unwrap();
        cache.precompute(&keys, &resolve, &MaterialRegistry::new()).unwrap();
        cache.snapshot().unwrap()
    }

    #[test]
    fn capacity_splits_instances_and_overflow() {
        let mut p = InstancePlanner::new(palette(), 3);
        let blocks: Vec<i32> = (0..5).flat_map(|x| [x * 2, 0, 0, 0]).collect();
        assert_eq!(p.add_blocks(&blocks).unwrap(), 5);
        let scene = p.finish();
        assert_eq!(scene.batches.len(), 1);
        assert_eq!(scene.instanced_count(), 3);
        assert_eq!(scene.overflow_count(), 2);
        assert_eq!(scene.batches[0].transforms[0], InstanceTransform::at([0, 0, 0]));
        assert_eq!(scene.overflow[0].position, [6, 0, 0]);
        assert_eq!(scene.batches[0].as_bytes().len(), 3 * 16);
    }

    #[test]
    fn enclosed_blocks_are_culled_on_request() {
        let mut blocks = Vec::new();
        for z in 0..3 {
            for y in 0..3 {
                for x in 0..3 {
                    blocks.extend_from_slice(&[x, y, z, 0]);
                }
            }
        }
        let mut p = InstancePlanner::new(palette(), 100).with_hidden_culling(true);
        p.add_blocks(&blocks).unwrap();
        let scene = p.finish();
        assert_eq!(scene.hidden, 1);
        assert_eq!(scene.total(), 26);

        let mut p = InstancePlanner::new(palette(), 100);
        p.add_blocks(&blocks).unwrap();
        assert_eq!(p.finish().total(), 27);
    }

    #[test]
    fn blocks_at_the_coordinate_limit_are_never_hidden() {
        let m = i32::MAX;
        let mut blocks = vec![m, 0, 0, 0, m - 1, 0, 0, 0];
        for [dy, dz] in [[1, 0], [-1, 0], [0, 1], [0, -1]] {
            blocks.extend_from_slice(&[m, dy, dz, 0]);
        }
        // the +X neighbour of the first block would wrap to i32::MIN
        blocks.extend_from_slice(&[i32::MIN, 0, 0, 0]);
        let mut p = InstancePlanner::new(palette(), 100).with_hidden_culling(true);
        p.add_blocks(&blocks).unwrap();
        let scene = p.finish();
        assert_eq!(scene.hidden, 0);
        assert_eq!(scene.total(), 7);
    }

    #[test]
    fn empty_unknown_and_repeated_records() {
        let mut p = InstancePlanner::new(palette(), 10);
        let n = p
            .add_blocks(&[0, 0, 0, 1, 1, 0, 0, 9, 2, 0, 0, -1, 3, 0, 0, 0, 3, 0, 0, 0])
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(p.block_count(), 2);
        let scene = p.finish();
        assert_eq!(scene.skipped, 1);
        // air has no geometry, and the repeated stone record counts once
        assert_eq!(scene.total(), 1);
        assert!(matches!(
            InstancePlanner::new(palette(), 1).add_blocks(&[0, 0, 0]),
            Err(InstancingError::BadStride(3))
        ));
    }
}
