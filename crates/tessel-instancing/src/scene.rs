use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use tessel_geom::Vec3;
use tessel_mesh_cpu::{ChunkMesh, MeshAccumulator, SourceMesh};
use tessel_palette::{Category, PaletteIndex, PaletteSnapshot, UnitGeometry};

/// One block type's material group; the unit of instanced drawing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    pub palette_index: PaletteIndex,
    pub group: u32,
}

/// Per-instance vertex data: the block's world position.
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct InstanceTransform {
    pub translation: [f32; 3],
    pub padding: f32,
}

impl InstanceTransform {
    pub fn at(pos: [i32; 3]) -> Self {
        Self {
            translation: pos.map(|v| v as f32),
            padding: 0.0,
        }
    }
}

/// A fixed-capacity instance buffer for one [`InstanceKey`].
#[derive(Clone, Debug)]
pub struct InstanceBatch {
    pub key: InstanceKey,
    pub category: Category,
    pub material_index: u32,
    pub geometry: Arc<UnitGeometry>,
    pub transforms: Vec<InstanceTransform>,
    pub capacity: usize,
}

impl InstanceBatch {
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.transforms.len() >= self.capacity
    }

    /// Transform data as uploaded to the instance buffer.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.transforms)
    }
}

/// An occurrence that did not fit its instance buffer and renders as an ordinary mesh copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverflowCopy {
    pub key: InstanceKey,
    pub position: [i32; 3],
}

#[derive(Debug)]
pub struct InstancedScene {
    pub batches: Vec<InstanceBatch>,
    pub overflow: Vec<OverflowCopy>,
    /// Blocks skipped because every neighbour hides them.
    pub hidden: usize,
    /// Records with a palette index the snapshot does not know.
    pub skipped: usize,
    pub(crate) palette: Arc<PaletteSnapshot>,
}

impl InstancedScene {
    pub fn instanced_count(&self) -> usize {
        self.batches.iter().map(InstanceBatch::len).sum()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow.len()
    }

    /// Every rendered occurrence, instanced or not.
    pub fn total(&self) -> usize {
        self.instanced_count() + self.overflow_count()
    }

    pub fn count_for(&self, key: InstanceKey) -> (usize, usize) {
        let instanced = self
            .batches
            .iter()
            .find(|b| b.key == key)
            .map_or(0, InstanceBatch::len);
        let overflow = self.overflow.iter().filter(|o| o.key == key).count();
        (instanced, overflow)
    }

    /// Instanced draws plus one draw range per material in the overflow mesh.
    pub fn draw_calls(&self, overflow: &ChunkMesh) -> usize {
        self.batches.len()
            + overflow
                .meshes
                .iter()
                .map(|m| m.groups.len())
                .sum::<usize>()
    }

    /// Bakes the overflow copies into per-category buffers, positioned relative to the
    /// smallest overflow position.
    pub fn overflow_mesh(&self, quantize: bool) -> ChunkMesh {
        let Some(origin) = self
            .overflow
            .iter()
            .map(|o| o.position)
            .reduce(|a, b| [a[0].min(b[0]), a[1].min(b[1]), a[2].min(b[2])])
        else {
            return ChunkMesh::empty();
        };
        let mut accs: [MeshAccumulator; 5] = Default::default();
        let mut tris = Vec::new();
        for copy in &self.overflow {
            let Some(entry) = self.palette.get(copy.key.palette_index) else {
                continue;
            };
            let Some(group) = entry.groups.get(copy.key.group as usize) else {
                continue;
            };
            tris.clear();
            tris.extend(0..group.geometry.triangle_count() as u32);
            let offset = Vec3::new(
                (copy.position[0] - origin[0]) as f32,
                (copy.position[1] - origin[1]) as f32,
                (copy.position[2] - origin[2]) as f32,
            );
            accs[entry.category.index()].push_instance(
                SourceMesh::from(group.geometry.as_ref()),
                offset,
                &tris,
                group.material_index,
            );
        }
        let meshes = Category::ALL
            .into_iter()
            .zip(accs)
            .filter_map(|(category, acc)| acc.finish(category, quantize))
            .collect();
        ChunkMesh { meshes, origin }
    }
}
