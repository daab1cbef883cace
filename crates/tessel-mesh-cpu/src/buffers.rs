use tessel_geom::Vec3;
use tessel_palette::{Category, UnitGeometry};

use crate::constants::U16_INDEX_LIMIT;
use crate::quantize::{
    dequantize_position, fits_quantized, pack_normal, quantize_position, unpack_normal,
};

/// A run of indices `start..start + count` drawn with one material.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaterialRange {
    pub start: u32,
    pub count: u32,
    pub material_index: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PositionData {
    /// Fixed point, see [`crate::constants::POSITION_SCALE`].
    Quantized(Vec<i16>),
    Float(Vec<f32>),
}

impl PositionData {
    pub fn len(&self) -> usize {
        match self {
            PositionData::Quantized(v) => v.len(),
            PositionData::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_quantized(&self) -> bool {
        matches!(self, PositionData::Quantized(_))
    }

    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            PositionData::Quantized(v) => v.iter().copied().map(dequantize_position).collect(),
            PositionData::Float(v) => v.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum IndexData {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexData {
    pub fn len(&self) -> usize {
        match self {
            IndexData::U16(v) => v.len(),
            IndexData::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn get(&self, i: usize) -> u32 {
        match self {
            IndexData::U16(v) => u32::from(v[i]),
            IndexData::U32(v) => v[i],
        }
    }

    pub fn to_u32(&self) -> Vec<u32> {
        match self {
            IndexData::U16(v) => v.iter().copied().map(u32::from).collect(),
            IndexData::U32(v) => v.clone(),
        }
    }

    fn narrowed(idx: Vec<u32>, vertex_count: usize) -> Self {
        if vertex_count > U16_INDEX_LIMIT {
            IndexData::U32(idx)
        } else {
            IndexData::U16(idx.into_iter().map(|i| i as u16).collect())
        }
    }
}

/// Merged geometry of one category.
#[derive(Clone, Debug, PartialEq)]
pub struct CategoryBuffer {
    pub category: Category,
    pub positions: PositionData,
    /// Signed bytes, see [`crate::constants::NORMAL_SCALE`].
    pub normals: Vec<i8>,
    pub uvs: Vec<f32>,
    pub indices: IndexData,
    pub groups: Vec<MaterialRange>,
    pub vertex_count: u32,
}

impl CategoryBuffer {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn normals_f32(&self) -> Vec<f32> {
        self.normals.iter().copied().map(unpack_normal).collect()
    }
}

/// Output of one chunk build or one finished batch. Positions are relative to `origin`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkMesh {
    pub meshes: Vec<CategoryBuffer>,
    pub origin: [i32; 3],
}

impl ChunkMesh {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.meshes.iter().map(CategoryBuffer::triangle_count).sum()
    }

    pub fn vertex_count(&self) -> usize {
        self.meshes.iter().map(|m| m.vertex_count as usize).sum()
    }

    pub fn category(&self, category: Category) -> Option<&CategoryBuffer> {
        self.meshes.iter().find(|m| m.category == category)
    }
}

/// Borrowed vertex data to copy triangles from.
#[derive(Clone, Copy, Debug)]
pub struct SourceMesh<'a> {
    pub positions: &'a [f32],
    pub normals: &'a [f32],
    pub uvs: &'a [f32],
    pub indices: &'a [u32],
}

impl<'a> From<&'a UnitGeometry> for SourceMesh<'a> {
    fn from(g: &'a UnitGeometry) -> Self {
        SourceMesh {
            positions: &g.positions,
            normals: &g.normals,
            uvs: &g.uvs,
            indices: &g.indices,
        }
    }
}

/// Growable category buffer. Consecutive appends with the same material extend one range.
#[derive(Default, Clone, Debug)]
pub struct MeshAccumulator {
    pos: Vec<f32>,
    norm: Vec<i8>,
    uv: Vec<f32>,
    idx: Vec<u32>,
    groups: Vec<MaterialRange>,
    remap: Vec<u32>,
}

impl MeshAccumulator {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.idx.is_empty()
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.pos.len() / 3
    }

    #[inline]
    pub fn index_count(&self) -> usize {
        self.idx.len()
    }

    /// Clears all arrays but retains capacity for reuse.
    pub fn clear_keep_capacity(&mut self) {
        self.pos.clear();
        self.norm.clear();
        self.uv.clear();
        self.idx.clear();
        self.groups.clear();
    }

    fn extend_group(&mut self, material_index: u32, start: u32, count: u32) {
        if count == 0 {
            return;
        }
        if let Some(last) = self.groups.last_mut() {
            if last.material_index == material_index && last.start + last.count == start {
                last.count += count;
                return;
            }
        }
        self.groups.push(MaterialRange {
            start,
            count,
            material_index,
        });
    }

    fn push_vertex(&mut self, p: Vec3, n: [i8; 3], uv: [f32; 2]) -> u32 {
        let i = self.vertex_count() as u32;
        self.pos.extend_from_slice(&p.to_array());
        self.norm.extend_from_slice(&n);
        self.uv.extend_from_slice(&uv);
        i
    }

    /// Copies the listed triangles of `src`, translated by `offset`. Only vertices referenced by
    /// those triangles are copied. Missing normals default to up and missing uvs to zero.
    pub fn push_instance(
        &mut self,
        src: SourceMesh<'_>,
        offset: Vec3,
        triangles: &[u32],
        material_index: u32,
    ) {
        let vcount = src.positions.len() / 3;
        self.remap.clear();
        self.remap.resize(vcount, u32::MAX);
        let start = self.idx.len() as u32;
        for &t in triangles {
            let base = t as usize * 3;
            let Some(tri) = src.indices.get(base..base + 3) else {
                continue;
            };
            if tri.iter().any(|&v| v as usize >= vcount) {
                continue;
            }
            for &v in tri {
                let v = v as usize;
                if self.remap[v] == u32::MAX {
                    let p = Vec3::from_slice(src.positions, v) + offset;
                    let n = if src.normals.len() >= (v + 1) * 3 {
                        [
                            pack_normal(src.normals[v * 3]),
                            pack_normal(src.normals[v * 3 + 1]),
                            pack_normal(src.normals[v * 3 + 2]),
                        ]
                    } else {
                        [0, 127, 0]
                    };
                    let uv = if src.uvs.len() >= (v + 1) * 2 {
                        [src.uvs[v * 2], src.uvs[v * 2 + 1]]
                    } else {
                        [0.0, 0.0]
                    };
                    let nv = self.push_vertex(p, n, uv);
                    self.remap[v] = nv;
                }
                let mapped = self.remap[v];
                self.idx.push(mapped);
            }
        }
        let count = self.idx.len() as u32 - start;
        self.extend_group(material_index, start, count);
    }

    /// Appends a quad; corners are reordered if needed so the front face points along `n`.
    pub fn push_quad(
        &mut self,
        corners: [Vec3; 4],
        n: Vec3,
        mut uvs: [[f32; 2]; 4],
        material_index: u32,
    ) {
        let mut vs = corners;
        if (vs[1] - vs[0]).cross(vs[2] - vs[0]).dot(n) < 0.0 {
            vs.swap(1, 3);
            uvs.swap(1, 3);
        }
        let packed = [pack_normal(n.x), pack_normal(n.y), pack_normal(n.z)];
        let base = self.vertex_count() as u32;
        for i in 0..4 {
            self.push_vertex(vs[i], packed, uvs[i]);
        }
        let start = self.idx.len() as u32;
        self.idx
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        self.extend_group(material_index, start, 6);
    }

    /// Closes the buffer. Positions are quantized when asked and every coordinate fits;
    /// otherwise they stay as floats. Empty accumulators give `None`.
    pub fn finish(self, category: Category, quantize: bool) -> Option<CategoryBuffer> {
        if self.idx.is_empty() {
            return None;
        }
        let vertex_count = self.vertex_count();
        let positions = if quantize && self.pos.iter().all(|&v| fits_quantized(v)) {
            PositionData::Quantized(self.pos.iter().copied().map(quantize_position).collect())
        } else {
            PositionData::Float(self.pos)
        };
        Some(CategoryBuffer {
            category,
            positions,
            normals: self.norm,
            uvs: self.uv,
            indices: IndexData::narrowed(self.idx, vertex_count),
            groups: self.groups,
            vertex_count: vertex_count as u32,
        })
    }
}
