//! Per-entry face analysis: which triangles lie flush on a block face, and which faces
//! fully hide the neighbour behind them.

use tessel_geom::{Axis, Face, FaceMask, Vec3};

use crate::geometry::UnitGeometry;
use crate::resolver::ResolvedBlock;
use crate::types::Category;

/// Tolerance for a vertex to count as lying on a block boundary.
pub const FLUSH_EPSILON: f32 = 0.01;
const COVERAGE_EPSILON: f32 = 1e-3;

/// Lower boundary of the unit cell a geometry is authored in: `0.0` for `0..1`, `-0.5` for
/// the centered convention.
pub fn cell_offset(geometry: &UnitGeometry) -> f32 {
    match geometry.bounds() {
        Some(bb) if bb.min.x.min(bb.min.y).min(bb.min.z) < -FLUSH_EPSILON => -0.5,
        _ => 0.0,
    }
}

/// Face a triangle lies flush against, judged by its first vertex's normal and position.
/// Triangles without normals, with diagonal normals, or set back from the boundary give `None`.
pub fn flush_face(geometry: &UnitGeometry, tri: &[u32], offset: f32) -> Option<Face> {
    let first = *tri.first()?;
    let face = Face::from_normal(geometry.normal(first)?)?;
    let boundary = if face.is_positive() {
        offset + 1.0
    } else {
        offset
    };
    let axis = face.axis();
    let on_plane = tri.iter().all(|&v| {
        (v as usize) < geometry.vertex_count()
            && (geometry.position(v).axis(axis) - boundary).abs() <= FLUSH_EPSILON
    });
    on_plane.then_some(face)
}

/// Flush face of every triangle, in index order.
pub fn triangle_faces(geometry: &UnitGeometry) -> Vec<Option<Face>> {
    let offset = cell_offset(geometry);
    geometry
        .indices
        .chunks_exact(3)
        .map(|tri| flush_face(geometry, tri, offset))
        .collect()
}

#[derive(Clone, Copy, Debug)]
struct Footprint {
    area: f32,
    u: (f32, f32),
    v: (f32, f32),
}

impl Footprint {
    const EMPTY: Footprint = Footprint {
        area: 0.0,
        u: (f32::INFINITY, f32::NEG_INFINITY),
        v: (f32::INFINITY, f32::NEG_INFINITY),
    };

    fn add_triangle(&mut self, pts: [Vec3; 3], (ua, va): (Axis, Axis)) {
        let p: [(f32, f32); 3] = pts.map(|p| (p.axis(ua), p.axis(va)));
        let twice = (p[1].0 - p[0].0) * (p[2].1 - p[0].1) - (p[2].0 - p[0].0) * (p[1].1 - p[0].1);
        self.area += twice.abs() * 0.5;
        for (u, v) in p {
            self.u = (self.u.0.min(u), self.u.1.max(u));
            self.v = (self.v.0.min(v), self.v.1.max(v));
        }
    }

    fn covers_unit_square(&self) -> bool {
        self.area >= 1.0 - COVERAGE_EPSILON
            && self.u.1 - self.u.0 >= 1.0 - FLUSH_EPSILON
            && self.v.1 - self.v.0 >= 1.0 - FLUSH_EPSILON
    }
}

fn footprints(geometry: &UnitGeometry, faces: &[Option<Face>]) -> [Footprint; 6] {
    let mut out = [Footprint::EMPTY; 6];
    for (tri, face) in geometry.indices.chunks_exact(3).zip(faces) {
        if let Some(face) = face {
            let pts = [
                geometry.position(tri[0]),
                geometry.position(tri[1]),
                geometry.position(tri[2]),
            ];
            out[face.index()].add_triangle(pts, face.plane_axes());
        }
    }
    out
}

/// Six-bit occlusion mask for a resolved block in a given category.
///
/// A face occludes when the opaque parts' flush triangles on it cover the whole unit square.
/// Blocks without any measurable positions fall back to `full_cube_hint`. See-through
/// categories never occlude.
pub fn occlusion_mask(block: &ResolvedBlock, category: Category) -> FaceMask {
    if category.is_see_through() {
        return FaceMask::NONE;
    }
    if !block.has_measurable_geometry() {
        return if block.full_cube_hint {
            FaceMask::ALL
        } else {
            FaceMask::NONE
        };
    }
    let mut coverage = [Footprint::EMPTY; 6];
    for part in block.parts.iter().filter(|p| p.material.is_opaque()) {
        let faces = triangle_faces(&part.geometry);
        for (acc, fp) in coverage.iter_mut().zip(footprints(&part.geometry, &faces)) {
            acc.area += fp.area;
            acc.u = (acc.u.0.min(fp.u.0), acc.u.1.max(fp.u.1));
            acc.v = (acc.v.0.min(fp.v.0), acc.v.1.max(fp.v.1));
        }
    }
    let mut mask = FaceMask::NONE;
    for face in Face::ALL {
        if coverage[face.index()].covers_unit_square() {
            mask.insert(face);
        }
    }
    mask
}

/// For a plain cube (every triangle flush, each face covered by exactly one part) returns the
/// part index drawn on each face. Anything else gives `None`.
pub fn cube_face_parts(block: &ResolvedBlock) -> Option<[usize; 6]> {
    let mut owner: [Option<usize>; 6] = [None; 6];
    for (pi, part) in block.parts.iter().enumerate() {
        let faces = triangle_faces(&part.geometry);
        if faces.iter().any(Option::is_none) {
            return None;
        }
        let prints = footprints(&part.geometry, &faces);
        for face in Face::ALL {
            let fp = &prints[face.index()];
            if fp.area == 0.0 {
                continue;
            }
            if owner[face.index()].is_some() || !fp.covers_unit_square() {
                return None;
            }
            if fp.area > 1.0 + COVERAGE_EPSILON {
                return None;
            }
            owner[face.index()] = Some(pi);
        }
    }
    let mut out = [0usize; 6];
    for (slot, o) in out.iter_mut().zip(owner) {
        *slot = o?;
    }
    Some(out)
}
