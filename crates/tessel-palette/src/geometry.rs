use tessel_geom::{Aabb, Axis, Face, FaceMask, Vec3};

/// Indexed triangle geometry for one block in unit space.
///
/// Positions are interleaved xyz in either the `0..1` or the centered `-0.5..0.5`
/// convention; normals are interleaved xyz; uvs interleaved uv. Both `normals` and `uvs`
/// may be empty, in which case consumers fall back to an up normal and zero uv.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnitGeometry {
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    pub uvs: Vec<f32>,
    pub indices: Vec<u32>,
}

impl UnitGeometry {
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty() || self.positions.is_empty()
    }

    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_positions(&self.positions)
    }

    #[inline]
    pub fn position(&self, vertex: u32) -> Vec3 {
        Vec3::from_slice(&self.positions, vertex as usize)
    }

    /// Normal of a vertex, or `None` when the geometry carries no normals.
    #[inline]
    pub fn normal(&self, vertex: u32) -> Option<Vec3> {
        let i = vertex as usize * 3;
        (i + 2 < self.normals.len()).then(|| Vec3::from_slice(&self.normals, vertex as usize))
    }

    /// Appends a quad; corners are reordered if needed so the front face points along `n`.
    pub fn push_quad(&mut self, corners: [Vec3; 4], n: Vec3, mut uvs: [(f32, f32); 4]) {
        let base = self.vertex_count() as u32;
        let mut vs = corners;
        let winding = (vs[1] - vs[0]).cross(vs[2] - vs[0]);
        if winding.dot(n) < 0.0 {
            vs.swap(1, 3);
            uvs.swap(1, 3);
        }
        for i in 0..4 {
            self.positions.extend_from_slice(&vs[i].to_array());
            self.normals.extend_from_slice(&n.to_array());
            self.uvs.extend_from_slice(&[uvs[i].0, uvs[i].1]);
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    /// Axis-aligned box with one quad per face in `faces`.
    pub fn cuboid(min: Vec3, max: Vec3, faces: FaceMask) -> Self {
        let mut g = UnitGeometry::default();
        for face in Face::ALL {
            if faces.contains(face) {
                g.push_box_face(min, max, face);
            }
        }
        g
    }

    pub fn cube() -> Self {
        Self::cuboid(Vec3::ZERO, Vec3::ONE, FaceMask::ALL)
    }

    /// One face of the unit cube.
    pub fn cube_face(face: Face) -> Self {
        let mut g = UnitGeometry::default();
        g.push_box_face(Vec3::ZERO, Vec3::ONE, face);
        g
    }

    fn push_box_face(&mut self, min: Vec3, max: Vec3, face: Face) {
        let axis = face.axis();
        let plane = if face.is_positive() {
            max.axis(axis)
        } else {
            min.axis(axis)
        };
        let (ua, va) = face.plane_axes();
        let (u0, u1) = (min.axis(ua), max.axis(ua));
        let (v0, v1) = (min.axis(va), max.axis(va));
        let at = |u: f32, v: f32| {
            Vec3::ZERO
                .with_axis(axis, plane)
                .with_axis(ua, u)
                .with_axis(va, v)
        };
        self.push_quad(
            [at(u0, v0), at(u1, v0), at(u1, v1), at(u0, v1)],
            face.normal(),
            [(u0, v0), (u1, v0), (u1, v1), (u0, v1)],
        );
    }

    /// Two crossed diagonal planes, visible from both sides.
    pub fn cross() -> Self {
        let mut g = UnitGeometry::default();
        let h = std::f32::consts::FRAC_1_SQRT_2;
        let planes = [
            (
                [
                    Vec3::new(0.0, 0.0, 0.0),
                    Vec3::new(1.0, 0.0, 1.0),
                    Vec3::new(1.0, 1.0, 1.0),
                    Vec3::new(0.0, 1.0, 0.0),
                ],
                Vec3::new(h, 0.0, -h),
            ),
            (
                [
                    Vec3::new(1.0, 0.0, 0.0),
                    Vec3::new(0.0, 0.0, 1.0),
                    Vec3::new(0.0, 1.0, 1.0),
                    Vec3::new(1.0, 1.0, 0.0),
                ],
                Vec3::new(h, 0.0, h),
            ),
        ];
        let uvs = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];
        for (corners, n) in planes {
            g.push_quad(corners, n, uvs);
            g.push_quad(corners, n * -1.0, uvs);
        }
        g
    }

    /// Thin bars along the twelve edges of the unit cube, shown for blocks that failed to resolve.
    pub fn wireframe_placeholder() -> Self {
        const T: f32 = 0.06;
        let mut g = UnitGeometry::default();
        for axis in Axis::ALL {
            for (a, b) in [(0.0, 0.0), (1.0 - T, 0.0), (0.0, 1.0 - T), (1.0 - T, 1.0 - T)] {
                let (pa, pb) = match axis {
                    Axis::X => (Axis::Y, Axis::Z),
                    Axis::Y => (Axis::X, Axis::Z),
                    Axis::Z => (Axis::X, Axis::Y),
                };
                let min = Vec3::ZERO.with_axis(pa, a).with_axis(pb, b);
                let max = Vec3::ONE
                    .with_axis(pa, a + T)
                    .with_axis(pb, b + T);
                g.append(&UnitGeometry::cuboid(min, max, FaceMask::ALL));
            }
        }
        g
    }

    pub fn append(&mut self, other: &UnitGeometry) {
        let base = self.vertex_count() as u32;
        self.positions.extend_from_slice(&other.positions);
        self.normals.extend_from_slice(&other.normals);
        self.uvs.extend_from_slice(&other.uvs);
        self.indices.extend(other.indices.iter().map(|i| i + base));
    }

    /// Rotates by quarter turns about `axis` through the block center `(0.5, 0.5, 0.5)`.
    pub fn rotated(&self, axis: Axis, quarter_turns: u8) -> Self {
        let turns = quarter_turns % 4;
        let mut out = self.clone();
        if turns == 0 {
            return out;
        }
        let center = Vec3::new(0.5, 0.5, 0.5);
        for _ in 0..turns {
            for i in 0..out.vertex_count() {
                let p = Vec3::from_slice(&out.positions, i) - center;
                let r = quarter_turn(axis, p) + center;
                out.positions[i * 3..i * 3 + 3].copy_from_slice(&r.to_array());
            }
            for i in 0..out.normals.len() / 3 {
                let n = quarter_turn(axis, Vec3::from_slice(&out.normals, i));
                out.normals[i * 3..i * 3 + 3].copy_from_slice(&n.to_array());
            }
        }
        out
    }
}

#[inline]
fn quarter_turn(axis: Axis, p: Vec3) -> Vec3 {
    match axis {
        Axis::X => Vec3::new(p.x, -p.z, p.y),
        Axis::Y => Vec3::new(-p.z, p.y, p.x),
        Axis::Z => Vec3::new(-p.y, p.x, p.z),
    }
}
