//! Small geometry vocabulary shared by the palette, meshing and instancing crates.
#![forbid(unsafe_code)]

use core::ops::{Add, AddAssign, Mul, Sub};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
    pub const ONE: Vec3 = Vec3 {
        x: 1.0,
        y: 1.0,
        z: 1.0,
    };

    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Reads the `i`-th vertex out of an interleaved xyz slice.
    #[inline]
    pub fn from_slice(data: &[f32], i: usize) -> Self {
        Self::new(data[i * 3], data[i * 3 + 1], data[i * 3 + 2])
    }

    #[inline]
    pub fn dot(self, rhs: Vec3) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    #[inline]
    pub fn cross(self, rhs: Vec3) -> Vec3 {
        Vec3 {
            x: self.y * rhs.z - self.z * rhs.y,
            y: self.z * rhs.x - self.x * rhs.z,
            z: self.x * rhs.y - self.y * rhs.x,
        }
    }

    #[inline]
    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    #[inline]
    pub fn min(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x.min(rhs.x), self.y.min(rhs.y), self.z.min(rhs.z))
    }

    #[inline]
    pub fn max(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x.max(rhs.x), self.y.max(rhs.y), self.z.max(rhs.z))
    }

    #[inline]
    pub fn axis(self, axis: Axis) -> f32 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    #[inline]
    pub fn with_axis(mut self, axis: Axis, value: f32) -> Vec3 {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
        }
        self
    }

    #[inline]
    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    #[inline]
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    #[inline]
    fn add_assign(&mut self, rhs: Vec3) {
        self.x += rhs.x;
        self.y += rhs.y;
        self.z += rhs.z;
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    #[inline]
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;
    #[inline]
    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// An inverted box that any `include` call will snap onto.
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY),
        max: Vec3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
    };

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    #[inline]
    pub fn include(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Bounds of an interleaved xyz position buffer; `None` when the buffer is empty.
    pub fn from_positions(positions: &[f32]) -> Option<Aabb> {
        let mut bb = Aabb::EMPTY;
        for i in 0..positions.len() / 3 {
            bb.include(Vec3::from_slice(positions, i));
        }
        (!bb.is_empty()).then_some(bb)
    }

    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Axis-aligned block faces. The discriminant is the bit position in an occlusion mask.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Face {
    West = 0,
    East = 1,
    Down = 2,
    Up = 3,
    North = 4,
    South = 5,
}

impl Face {
    pub const ALL: [Face; 6] = [
        Face::West,
        Face::East,
        Face::Down,
        Face::Up,
        Face::North,
        Face::South,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn bit(self) -> u8 {
        1u8 << self.index()
    }

    #[inline]
    pub fn from_index(i: usize) -> Option<Face> {
        Face::ALL.get(i).copied()
    }

    /// Grid step taken when leaving the block through this face.
    #[inline]
    pub fn delta(self) -> (i32, i32, i32) {
        match self {
            Face::West => (-1, 0, 0),
            Face::East => (1, 0, 0),
            Face::Down => (0, -1, 0),
            Face::Up => (0, 1, 0),
            Face::North => (0, 0, -1),
            Face::South => (0, 0, 1),
        }
    }

    #[inline]
    pub fn normal(self) -> Vec3 {
        let (x, y, z) = self.delta();
        Vec3::new(x as f32, y as f32, z as f32)
    }

    #[inline]
    pub fn opposite(self) -> Face {
        match self {
            Face::West => Face::East,
            Face::East => Face::West,
            Face::Down => Face::Up,
            Face::Up => Face::Down,
            Face::North => Face::South,
            Face::South => Face::North,
        }
    }

    #[inline]
    pub fn axis(self) -> Axis {
        match self {
            Face::West | Face::East => Axis::X,
            Face::Down | Face::Up => Axis::Y,
            Face::North | Face::South => Axis::Z,
        }
    }

    #[inline]
    pub fn is_positive(self) -> bool {
        matches!(self, Face::East | Face::Up | Face::South)
    }

    /// Maps a rounded integer direction back to a face; diagonal or zero directions give `None`.
    #[inline]
    pub fn from_delta(dx: i32, dy: i32, dz: i32) -> Option<Face> {
        match (dx, dy, dz) {
            (-1, 0, 0) => Some(Face::West),
            (1, 0, 0) => Some(Face::East),
            (0, -1, 0) => Some(Face::Down),
            (0, 1, 0) => Some(Face::Up),
            (0, 0, -1) => Some(Face::North),
            (0, 0, 1) => Some(Face::South),
            _ => None,
        }
    }

    /// Rounds a normal to the nearest axis face, if it is axis aligned.
    #[inline]
    pub fn from_normal(n: Vec3) -> Option<Face> {
        Face::from_delta(n.x.round() as i32, n.y.round() as i32, n.z.round() as i32)
    }

    /// The two in-plane axes `(u, v)` of a face.
    #[inline]
    pub fn plane_axes(self) -> (Axis, Axis) {
        match self.axis() {
            Axis::X => (Axis::Z, Axis::Y),
            Axis::Y => (Axis::X, Axis::Z),
            Axis::Z => (Axis::X, Axis::Y),
        }
    }
}

/// 6-bit set of faces in `Face` bit order.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct FaceMask(pub u8);

impl FaceMask {
    pub const NONE: FaceMask = FaceMask(0);
    pub const ALL: FaceMask = FaceMask(0b11_1111);

    #[inline]
    pub fn contains(self, face: Face) -> bool {
        self.0 & face.bit() != 0
    }

    #[inline]
    pub fn insert(&mut self, face: Face) {
        self.0 |= face.bit();
    }

    #[inline]
    pub fn is_full(self) -> bool {
        self.0 & Self::ALL.0 == Self::ALL.0
    }

    #[inline]
    pub fn bits(self) -> u8 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn opposite_faces_step_back() {
        for face in Face::ALL {
            let (dx, dy, dz) = face.delta();
            let (ox, oy, oz) = face.opposite().delta();
            assert_eq!((dx + ox, dy + oy, dz + oz), (0, 0, 0));
            assert_eq!(Face::from_delta(dx, dy, dz), Some(face));
        }
    }

    #[test]
    fn face_bits_follow_west_east_down_up_north_south() {
        assert_eq!(Face::West.bit(), 0b00_0001);
        assert_eq!(Face::East.bit(), 0b00_0010);
        assert_eq!(Face::Down.bit(), 0b00_0100);
        assert_eq!(Face::Up.bit(), 0b00_1000);
        assert_eq!(Face::North.bit(), 0b01_0000);
        assert_eq!(Face::South.bit(), 0b10_0000);
    }

    #[test]
    fn diagonal_normals_have_no_face() {
        assert_eq!(Face::from_normal(Vec3::new(0.7, 0.7, 0.0)), None);
        assert_eq!(Face::from_normal(Vec3::new(0.0, 0.2, 0.0)), None);
        assert_eq!(Face::from_normal(Vec3::new(0.0, -0.9, 0.1)), Some(Face::Down));
    }

    proptest! {
        #[test]
        fn aabb_from_positions_contains_every_point(
            points in proptest::collection::vec(-100.0f32..100.0, 3..60)
        ) {
            let n = points.len() / 3 * 3;
            let bb = Aabb::from_positions(&points[..n]).unwrap();
            for i in 0..n / 3 {
                let p = Vec3::from_slice(&points, i);
                prop_assert!(p.x >= bb.min.x && p.x <= bb.max.x);
                prop_assert!(p.y >= bb.min.y && p.y <= bb.max.y);
                prop_assert!(p.z >= bb.min.z && p.z <= bb.max.z);
            }
        }
    }
}
