//! Host-side packing of palette geometry and per-dispatch instance tables.

use bytemuck::{Pod, Zeroable};
use tessel_mesh_cpu::{VoxelMap, instance_order};
use tessel_palette::{Category, PaletteSnapshot};

/// Face code for triangles that are never culled.
pub const NO_FACE: u32 = 6;
/// Index value written for a culled triangle.
pub const CULLED: u32 = u32::MAX;
/// Floats per packed source vertex: position, normal, uv.
pub const VERTEX_STRIDE: usize = 8;
pub const INSTANCE_WORDS: usize = 8;
pub const GROUP_WORDS: usize = 5;

/// Uniform block shared by every invocation of one dispatch.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct Params {
    pub map_min: [i32; 4],
    /// `w` is the instance count.
    pub map_size: [u32; 4],
    pub origin: [i32; 4],
    /// Groups base, faces base, entry count, total output vertices.
    pub layout: [u32; 4],
}

impl Params {
    pub fn new(map: &VoxelMap, origin: [i32; 3], packed: &PackedPalette, plan: &Plan) -> Self {
        let [mx, my, mz] = map.min();
        let [sx, sy, sz] = map.size();
        Params {
            map_min: [mx, my, mz, 0],
            map_size: [sx as u32, sy as u32, sz as u32, plan.instances.len() as u32],
            origin: [origin[0], origin[1], origin[2], 0],
            layout: [
                packed.groups_base,
                packed.faces_base,
                packed.entry_count(),
                plan.total_vertices,
            ],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupInfo {
    pub vertex_start: u32,
    pub vertex_count: u32,
    pub index_start: u32,
    pub index_count: u32,
    pub face_start: u32,
    pub material_index: u32,
}

/// Palette geometry flattened into the three read-only GPU buffers.
///
/// `meta` holds, in order: one occlusion word per entry, [`GROUP_WORDS`] words per group, and
/// one face code per source triangle.
#[derive(Clone, Debug, Default)]
pub struct PackedPalette {
    pub meta: Vec<u32>,
    pub vertices: Vec<f32>,
    pub indices: Vec<u32>,
    pub groups: Vec<GroupInfo>,
    /// `(first group, group count)` per entry.
    pub entry_groups: Vec<(u32, u32)>,
    pub groups_base: u32,
    pub faces_base: u32,
}

impl PackedPalette {
    pub fn pack(snapshot: &PaletteSnapshot) -> Self {
        let mut out = PackedPalette::default();
        let mut faces: Vec<u32> = Vec::new();
        for entry in &snapshot.entries {
            out.meta.push(u32::from(entry.occlusion.bits()));
            let first = out.groups.len() as u32;
            for group in &entry.groups {
                let g = &group.geometry;
                let vertex_count = g.vertex_count();
                let vertex_start = (out.vertices.len() / VERTEX_STRIDE) as u32;
                for v in 0..vertex_count {
                    out.vertices.extend_from_slice(&g.positions[v * 3..v * 3 + 3]);
                    match g.normals.get(v * 3..v * 3 + 3) {
                        Some(n) => out.vertices.extend_from_slice(n),
                        None => out.vertices.extend_from_slice(&[0.0, 1.0, 0.0]),
                    }
                    match g.uvs.get(v * 2..v * 2 + 2) {
                        Some(uv) => out.vertices.extend_from_slice(uv),
                        None => out.vertices.extend_from_slice(&[0.0, 0.0]),
                    }
                }
                let index_start = out.indices.len() as u32;
                let whole = g.indices.len() / 3 * 3;
                // out-of-range indices are kept; the host drops those triangles on readback
                out.indices.extend_from_slice(&g.indices[..whole]);
                let face_start = faces.len() as u32;
                faces.extend(
                    group
                        .triangle_faces
                        .iter()
                        .map(|f| f.map_or(NO_FACE, |f| f.index() as u32)),
                );
                out.groups.push(GroupInfo {
                    vertex_start,
                    vertex_count: vertex_count as u32,
                    index_start,
                    index_count: whole as u32,
                    face_start,
                    material_index: group.material_index,
                });
            }
            out.entry_groups
                .push((first, out.groups.len() as u32 - first));
        }
        out.groups_base = out.meta.len() as u32;
        for g in &out.groups {
            out.meta.extend_from_slice(&[
                g.vertex_start,
                g.vertex_count,
                g.index_start,
                g.index_count,
                g.face_start,
            ]);
        }
        out.faces_base = out.meta.len() as u32;
        out.meta.extend_from_slice(&faces);
        out
    }

    pub fn entry_count(&self) -> u32 {
        self.entry_groups.len() as u32
    }
}

/// One `(block, group)` expansion handled by one shader invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlannedInstance {
    pub category: Category,
    pub block: [i32; 3],
    pub group: u32,
    pub out_vertex: u32,
    pub out_index: u32,
}

#[derive(Clone, Debug, Default)]
pub struct Plan {
    pub instances: Vec<PlannedInstance>,
    /// [`INSTANCE_WORDS`] words per instance, as uploaded.
    pub words: Vec<u32>,
    pub total_vertices: u32,
    pub total_indices: u32,
}

/// Lays out every instance in emission order (category, palette index, input order, group)
/// and assigns output ranges by prefix sum.
pub fn plan_instances(snapshot: &PaletteSnapshot, packed: &PackedPalette, blocks: &[i32]) -> Plan {
    let (order, _) = instance_order(snapshot, blocks);
    let mut plan = Plan::default();
    for (category, pi, rec) in order {
        let Some(&(first, count)) = packed.entry_groups.get(pi as usize) else {
            continue;
        };
        let r = &blocks[rec * 4..rec * 4 + 4];
        for group in first..first + count {
            let info = packed.groups[group as usize];
            if info.index_count == 0 {
                continue;
            }
            let inst = PlannedInstance {
                category,
                block: [r[0], r[1], r[2]],
                group,
                out_vertex: plan.total_vertices,
                out_index: plan.total_indices,
            };
            plan.words.extend_from_slice(&[
                r[0] as u32,
                r[1] as u32,
                r[2] as u32,
                group,
                inst.out_vertex,
                inst.out_index,
                0,
                0,
            ]);
            plan.total_vertices += info.vertex_count;
            plan.total_indices += info.index_count;
            plan.instances.push(inst);
        }
    }
    plan
}
