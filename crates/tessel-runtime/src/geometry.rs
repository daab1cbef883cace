use tessel_mesh_cpu::{CategoryBuffer, ChunkMesh, MaterialRange};
use tessel_palette::Category;

/// Float vertex data ready for upload, one per category.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderableGeometry {
    pub category: Category,
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    pub uvs: Vec<f32>,
    pub indices: Vec<u32>,
    /// Draw ranges; `material_index` refers to the palette snapshot's material list.
    pub groups: Vec<MaterialRange>,
}

impl RenderableGeometry {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }
}

impl From<&CategoryBuffer> for RenderableGeometry {
    fn from(buf: &CategoryBuffer) -> Self {
        RenderableGeometry {
            category: buf.category,
            positions: buf.positions.to_f32(),
            normals: buf.normals_f32(),
            uvs: buf.uvs.clone(),
            indices: buf.indices.to_u32(),
            groups: buf.groups.clone(),
        }
    }
}

/// A chunk or batch result with local positions; place it at `translation`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderableMesh {
    pub geometries: Vec<RenderableGeometry>,
    pub origin: [i32; 3],
}

impl RenderableMesh {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty()
    }

    pub fn translation(&self) -> [f32; 3] {
        self.origin.map(|v| v as f32)
    }

    pub fn triangle_count(&self) -> usize {
        self.geometries.iter().map(|g| g.triangle_count()).sum()
    }

    pub fn vertex_count(&self) -> usize {
        self.geometries.iter().map(|g| g.vertex_count()).sum()
    }

    pub fn draw_ranges(&self) -> usize {
        self.geometries.iter().map(|g| g.groups.len()).sum()
    }
}

impl From<&ChunkMesh> for RenderableMesh {
    fn from(mesh: &ChunkMesh) -> Self {
        RenderableMesh {
            geometries: mesh.meshes.iter().map(RenderableGeometry::from).collect(),
            origin: mesh.origin,
        }
    }
}
