//! Greedy merging of coplanar faces of plain cubes.
//!
//! For each face direction and slice, visible faces are laid on a 2D mask keyed by
//! category and material, and maximal rectangles are grown row by row.

use tessel_geom::{Axis, Face, Vec3};
use tessel_palette::PaletteSnapshot;

use crate::buffers::MeshAccumulator;
use crate::emit::neighbor_occludes;
use crate::voxel_map::{PAD, VoxelMap};

#[derive(Clone, Copy, PartialEq, Eq)]
struct Key {
    category: usize,
    material: u32,
}

struct Quad {
    key: Key,
    corners: [Vec3; 4],
    normal: Vec3,
    uvs: [[f32; 2]; 4],
}

fn coord(axis: Axis, v: [i32; 3]) -> i32 {
    v[axis.index()]
}

/// Emits merged quads for every greedy-eligible block in `map`; returns the quad count.
pub(crate) fn emit_greedy(
    palette: &PaletteSnapshot,
    map: &VoxelMap,
    base: [i32; 3],
    accs: &mut [MeshAccumulator; 5],
) -> usize {
    let min = map.min().map(|v| v + PAD);
    let size = map.size().map(|s| s as i32 - 2 * PAD);
    let mut quads: Vec<Quad> = Vec::new();
    let mut mask: Vec<Option<Key>> = Vec::new();

    for face in Face::ALL {
        let axis = face.axis();
        let (ua, va) = face.plane_axes();
        let (nu, nv) = (coord(ua, size), coord(va, size));
        for s in 0..coord(axis, size) {
            mask.clear();
            mask.resize((nu * nv) as usize, None);
            let mut any = false;
            for v in 0..nv {
                for u in 0..nu {
                    let mut p = min;
                    p[axis.index()] += s;
                    p[ua.index()] += u;
                    p[va.index()] += v;
                    let at = (p[0], p[1], p[2]);
                    let Some(entry) = map.get(p[0], p[1], p[2]).and_then(|i| palette.get(i)) else {
                        continue;
                    };
                    let Some(mats) = entry.face_materials else {
                        continue;
                    };
                    if neighbor_occludes(palette, map, at, face) {
                        continue;
                    }
                    mask[(u + v * nu) as usize] = Some(Key {
                        category: entry.category.index(),
                        material: mats[face.index()],
                    });
                    any = true;
                }
            }
            if !any {
                continue;
            }
            let plane = coord(axis, min) + s + i32::from(face.is_positive()) - coord(axis, base);
            merge_slice(&mut mask, nu, nv, |key, u0, v0, w, h| {
                let u0 = (coord(ua, min) + u0 - coord(ua, base)) as f32;
                let v0 = (coord(va, min) + v0 - coord(va, base)) as f32;
                let (w, h) = (w as f32, h as f32);
                let at = |u: f32, v: f32| {
                    Vec3::ZERO
                        .with_axis(axis, plane as f32)
                        .with_axis(ua, u)
                        .with_axis(va, v)
                };
                quads.push(Quad {
                    key,
                    corners: [at(u0, v0), at(u0 + w, v0), at(u0 + w, v0 + h), at(u0, v0 + h)],
                    normal: face.normal(),
                    uvs: [[0.0, 0.0], [w, 0.0], [w, h], [0.0, h]],
                });
            });
        }
    }

    quads.sort_by_key(|q| (q.key.category, q.key.material));
    let n = quads.len();
    for q in quads {
        accs[q.key.category].push_quad(q.corners, q.normal, q.uvs, q.key.material);
    }
    n
}

/// Consumes `mask`, calling `emit(key, u, v, width, height)` for each maximal rectangle.
fn merge_slice(
    mask: &mut [Option<Key>],
    nu: i32,
    nv: i32,
    mut emit: impl FnMut(Key, i32, i32, i32, i32),
) {
    let at = |u: i32, v: i32| (u + v * nu) as usize;
    for v in 0..nv {
        let mut u = 0;
        while u < nu {
            let Some(key) = mask[at(u, v)] else {
                u += 1;
                continue;
            };
            let mut w = 1;
            while u + w < nu && mask[at(u + w, v)] == Some(key) {
                w += 1;
            }
            let mut h = 1;
            'grow: while v + h < nv {
                for k in 0..w {
                    if mask[at(u + k, v + h)] != Some(key) {
                        break 'grow;
                    }
                }
                h += 1;
            }
            for dv in 0..h {
                for du in 0..w {
                    mask[at(u + du, v + dv)] = None;
                }
            }
            emit(key, u, v, w, h);
            u += w;
        }
    }
}
