use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tessel_geom::{Face, FaceMask};

use crate::error::{PrecomputeError, ResolveError};
use crate::geometry::UnitGeometry;
use crate::material::{MaterialDesc, MaterialRegistry, MaterialSignature, SharedMaterial};
use crate::occlusion::{cube_face_parts, occlusion_mask, triangle_faces};
use crate::resolver::{GeometryResolver, ResolvedBlock};
use crate::types::{BlockKey, Category, PaletteIndex};

/// Geometry of one entry that renders with a single material.
#[derive(Clone, Debug)]
pub struct MaterialGroup {
    pub geometry: Arc<UnitGeometry>,
    /// Flush face of each triangle, in index order.
    pub triangle_faces: Arc<[Option<Face>]>,
    /// Index into [`PaletteSnapshot::materials`].
    pub material_index: u32,
}

#[derive(Clone, Debug)]
pub struct PaletteEntry {
    pub key: BlockKey,
    pub category: Category,
    pub occlusion: FaceMask,
    pub groups: Vec<MaterialGroup>,
    /// Material drawn on each face, for cubic entries that are plain six-quad cubes.
    pub face_materials: Option<[u32; 6]>,
    /// True when the resolver failed and the placeholder was substituted.
    pub fallback: bool,
}

impl PaletteEntry {
    #[inline]
    pub fn is_cubic(&self) -> bool {
        self.occlusion.is_full()
    }

    #[inline]
    pub fn occludes(&self, face: Face) -> bool {
        self.occlusion.contains(face)
    }
}

/// Immutable result of one precompute. Workers and the GPU backend each hold an `Arc` of it.
#[derive(Debug)]
pub struct PaletteSnapshot {
    pub generation: u64,
    pub entries: Vec<PaletteEntry>,
    pub materials: Vec<Arc<SharedMaterial>>,
}

impl PaletteSnapshot {
    #[inline]
    pub fn get(&self, index: PaletteIndex) -> Option<&PaletteEntry> {
        self.entries.get(index as usize)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn fallback_count(&self) -> usize {
        self.entries.iter().filter(|e| e.fallback).count()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrecomputeReport {
    pub entries: usize,
    pub materials: usize,
    pub fallbacks: usize,
    pub cubic: usize,
    pub elapsed_ms: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrecomputeOutcome {
    /// The palette matched the installed one; the resolver was not called.
    Unchanged,
    Rebuilt(PrecomputeReport),
}

/// Owns the installed palette snapshot and the pool that resolves entries.
///
/// A freshly built snapshot is not ready until [`PaletteCache::mark_ready`] is called, which
/// the caller does once every execution backend has acknowledged it.
pub struct PaletteCache {
    pool: ThreadPool,
    snapshot: Option<Arc<PaletteSnapshot>>,
    ready: bool,
    generation: u64,
}

impl PaletteCache {
    pub fn new(resolve_concurrency: usize) -> Result<Self, PrecomputeError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(resolve_concurrency.max(1))
            .thread_name(|i| format!("tessel-resolve-{i}"))
            .build()
            .map_err(|e| PrecomputeError::Pool(e.to_string()))?;
        Ok(Self {
            pool,
            snapshot: None,
            ready: false,
            generation: 0,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.ready && self.snapshot.is_some()
    }

    pub fn mark_ready(&mut self) {
        self.ready = self.snapshot.is_some();
    }

    pub fn snapshot(&self) -> Option<Arc<PaletteSnapshot>> {
        self.snapshot.clone()
    }

    /// Snapshot, only once it has been marked ready.
    pub fn ready_snapshot(&self) -> Option<Arc<PaletteSnapshot>> {
        if self.ready { self.snapshot.clone() } else { None }
    }

    /// Cheap identity check: same length and the same first and last keys.
    pub fn matches(&self, keys: &[BlockKey]) -> bool {
        let Some(snap) = &self.snapshot else {
            return false;
        };
        snap.entries.len() == keys.len()
            && snap.entries.first().map(|e| &e.key) == keys.first()
            && snap.entries.last().map(|e| &e.key) == keys.last()
    }

    pub fn precompute(
        &mut self,
        keys: &[BlockKey],
        resolver: &dyn GeometryResolver,
        registry: &MaterialRegistry,
    ) -> Result<PrecomputeOutcome, PrecomputeError> {
        if keys.is_empty() {
            return Err(PrecomputeError::EmptyPalette);
        }
        if self.matches(keys) {
            log::debug!(target: "events", "palette unchanged ({} entries)", keys.len());
            return Ok(PrecomputeOutcome::Unchanged);
        }
        let start = Instant::now();
        self.ready = false;

        let resolved: Vec<Result<ResolvedBlock, ResolveError>> = self
            .pool
            .install(|| keys.par_iter().map(|k| resolver.resolve(k)).collect());

        let mut builder = SnapshotBuilder::new(registry);
        let mut fallbacks = 0usize;
        for (key, result) in keys.iter().zip(resolved) {
            let (block, fallback) = match result {
                Ok(block) => (block, false),
                Err(err) => {
                    log::warn!(
                        target: "events",
                        "palette entry {key} fell back to placeholder: {err}"
                    );
                    fallbacks += 1;
                    (placeholder_block(), true)
                }
            };
            builder.push(key.clone(), block, fallback);
        }
        if fallbacks == keys.len() {
            builder.abandon();
            return Err(PrecomputeError::AllEntriesFailed(keys.len()));
        }

        self.generation += 1;
        let snapshot = builder.finish(self.generation);
        let report = PrecomputeReport {
            entries: snapshot.entries.len(),
            materials: snapshot.materials.len(),
            fallbacks,
            cubic: snapshot.entries.iter().filter(|e| e.is_cubic()).count(),
            elapsed_ms: start.elapsed().as_millis().min(u128::from(u32::MAX)) as u32,
        };
        // New references are taken before the old ones drop so shared materials survive.
        if let Some(old) = self.snapshot.replace(Arc::new(snapshot)) {
            release_all(&old, registry);
        }
        log::info!(
            target: "perf",
            "ms={} palette_precompute entries={} materials={} fallbacks={} cubic={} gen={}",
            report.elapsed_ms,
            report.entries,
            report.materials,
            report.fallbacks,
            report.cubic,
            self.generation
        );
        Ok(PrecomputeOutcome::Rebuilt(report))
    }

    /// Releases every material reference and forgets the snapshot.
    pub fn dispose(&mut self, registry: &MaterialRegistry) {
        if let Some(old) = self.snapshot.take() {
            release_all(&old, registry);
        }
        self.ready = false;
    }
}

fn release_all(snapshot: &PaletteSnapshot, registry: &MaterialRegistry) {
    for m in &snapshot.materials {
        registry.release(m);
    }
}

fn placeholder_block() -> ResolvedBlock {
    ResolvedBlock::single(
        UnitGeometry::wireframe_placeholder(),
        MaterialDesc::placeholder(),
    )
    .with_category(Category::Solid)
}

struct SnapshotBuilder<'r> {
    registry: &'r MaterialRegistry,
    materials: Vec<Arc<SharedMaterial>>,
    by_signature: HashMap<MaterialSignature, u32>,
    entries: Vec<PaletteEntry>,
}

impl<'r> SnapshotBuilder<'r> {
    fn new(registry: &'r MaterialRegistry) -> Self {
        Self {
            registry,
            materials: Vec::new(),
            by_signature: HashMap::new(),
            entries: Vec::new(),
        }
    }

    /// One registry reference per distinct signature per snapshot.
    fn material_index(&mut self, desc: &MaterialDesc) -> u32 {
        let sig = desc.signature();
        if let Some(&i) = self.by_signature.get(&sig) {
            return i;
        }
        let i = self.materials.len() as u32;
        self.materials.push(self.registry.acquire(desc));
        self.by_signature.insert(sig, i);
        i
    }

    fn push(&mut self, key: BlockKey, block: ResolvedBlock, fallback: bool) {
        let category = block.category_for(&key);
        let occlusion = if fallback {
            FaceMask::NONE
        } else {
            occlusion_mask(&block, category)
        };

        let mut merged: Vec<(u32, UnitGeometry)> = Vec::new();
        let mut part_material = Vec::with_capacity(block.parts.len());
        for part in &block.parts {
            let mi = self.material_index(&part.material);
            part_material.push(mi);
            if part.geometry.is_empty() {
                continue;
            }
            match merged.iter_mut().find(|(m, _)| *m == mi) {
                Some((_, g)) => g.append(&part.geometry),
                None => merged.push((mi, part.geometry.clone())),
            }
        }
        let groups = merged
            .into_iter()
            .map(|(material_index, geometry)| MaterialGroup {
                triangle_faces: triangle_faces(&geometry).into(),
                geometry: Arc::new(geometry),
                material_index,
            })
            .collect();

        let face_materials = if occlusion.is_full() {
            cube_face_parts(&block).map(|parts| parts.map(|p| part_material[p]))
        } else {
            None
        };

        self.entries.push(PaletteEntry {
            key,
            category,
            occlusion,
            groups,
            face_materials,
            fallback,
        });
    }

    fn abandon(self) {
        for m in &self.materials {
            self.registry.release(m);
        }
    }

    fn finish(self, generation: u64) -> PaletteSnapshot {
        PaletteSnapshot {
            generation,
            entries: self.entries,
            materials: self.materials,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::RenderMode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn keys(names: &[&str]) -> Vec<BlockKey> {
        names.iter().map(|n| BlockKey::new(*n)).collect()
    }

    fn cube_resolver(k: &BlockKey) -> Result<ResolvedBlock, ResolveError> {
        match k.short_name() {
            "bad" => Err(ResolveError::UnknownBlock(k.to_string())),
            "glass" => Ok(ResolvedBlock::single(
                UnitGeometry::cube(),
                MaterialDesc {
                    mode: RenderMode::Translucent,
                    opacity: 0.5,
                    ..MaterialDesc::default()
                },
            )),
            _ => Ok(ResolvedBlock::single(
                UnitGeometry::cube(),
                MaterialDesc::default(),
            )),
        }
    }

    #[test]
    fn entries_follow_palette_order_and_dedupe_materials() {
        let reg = MaterialRegistry::new();
        let mut cache = PaletteCache::new(2).unwrap();
        let out = cache
            .precompute(&keys(&["stone", "dirt", "glass"]), &cube_resolver, &reg)
            .unwrap();
        let PrecomputeOutcome::Rebuilt(report) = out else {
            panic!("expected rebuild");
        };
        assert_eq!(report.entries, 3);
        assert_eq!(report.materials, 2);
        assert_eq!(report.cubic, 2);
        let snap = cache.snapshot().unwrap();
        assert_eq!(snap.entries[0].key.name, "stone");
        assert_eq!(
            snap.entries[0].groups[0].material_index,
            snap.entries[1].groups[0].material_index
        );
        assert_eq!(snap.entries[2].category, Category::Transparent);
        assert_eq!(snap.entries[2].occlusion, FaceMask::NONE);
        assert!(snap.entries[0].face_materials.is_some());
        assert!(!cache.is_ready());
        cache.mark_ready();
        assert!(cache.is_ready());
    }

    #[test]
    fn failed_entries_become_placeholders() {
        let reg = MaterialRegistry::new();
        let mut cache = PaletteCache::new(1).unwrap();
        cache
            .precompute(&keys(&["stone", "bad"]), &cube_resolver, &reg)
            .unwrap();
        let snap = cache.snapshot().unwrap();
        assert!(snap.entries[1].fallback);
        assert!(!snap.entries[1].groups.is_empty());
        assert_eq!(snap.entries[1].occlusion, FaceMask::NONE);
        assert_eq!(snap.fallback_count(), 1);
    }

    #[test]
    fn all_failed_is_fatal_and_leaks_nothing() {
        let reg = MaterialRegistry::new();
        let mut cache = PaletteCache::new(1).unwrap();
        let err = cache
            .precompute(&keys(&["bad", "bad"]), &cube_resolver, &reg)
            .unwrap_err();
        assert!(matches!(err, PrecomputeError::AllEntriesFailed(2)));
        assert!(reg.is_empty());
        assert!(cache.snapshot().is_none());
    }

    #[test]
    fn unchanged_palette_skips_the_resolver() {
        let calls = AtomicUsize::new(0);
        let counting = |k: &BlockKey| {
            calls.fetch_add(1, Ordering::SeqCst);
            cube_resolver(k)
        };
        let reg = MaterialRegistry::new();
        let mut cache = PaletteCache::new(2).unwrap();
        let p = keys(&["stone", "dirt"]);
        cache.precompute(&p, &counting, &reg).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let again = cache.precompute(&p, &counting, &reg).unwrap();
        assert_eq!(again, PrecomputeOutcome::Unchanged);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn replacing_a_palette_keeps_shared_materials_alive() {
        let reg = MaterialRegistry::new();
        let mut cache = PaletteCache::new(1).unwrap();
        cache
            .precompute(&keys(&["stone", "glass"]), &cube_resolver, &reg)
            .unwrap();
        let stone_mat = Arc::clone(&cache.snapshot().unwrap().materials[0]);
        cache
            .precompute(&keys(&["dirt", "stone", "cobble"]), &cube_resolver, &reg)
            .unwrap();
        assert!(!stone_mat.is_disposed());
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.disposed_count(), 1);
        cache.dispose(&reg);
        assert!(reg.is_empty());
        assert!(stone_mat.is_disposed());
    }
}
