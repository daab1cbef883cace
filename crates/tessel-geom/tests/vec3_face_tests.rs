use tessel_geom::{Aabb, Axis, Face, FaceMask, Vec3};

fn approx_eq(a: f32, b: f32, eps: f32) -> bool {
    (a - b).abs() <= eps
}

#[test]
fn vec3_arithmetic() {
    let a = Vec3::new(1.0, 2.0, 3.0);
    let b = Vec3::new(-4.0, 5.0, -6.0);
    assert_eq!(a + b, Vec3::new(-3.0, 7.0, -3.0));
    assert_eq!((a + b) - a, b);
    assert_eq!(a * 2.0, Vec3::new(2.0, 4.0, 6.0));
    assert!(approx_eq(Vec3::new(3.0, 4.0, 0.0).length(), 5.0, 1e-6));
}

#[test]
fn cross_of_face_plane_axes_points_along_the_axis() {
    let x = Vec3::new(1.0, 0.0, 0.0);
    let y = Vec3::new(0.0, 1.0, 0.0);
    let z = x.cross(y);
    assert_eq!(z, Vec3::new(0.0, 0.0, 1.0));
    assert!(approx_eq(z.dot(x), 0.0, 1e-6));
}

#[test]
fn aabb_of_unit_cube_corners() {
    let corners = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.5, 0.25, 0.75];
    let bb = Aabb::from_positions(&corners).unwrap();
    assert_eq!(bb.min, Vec3::ZERO);
    assert_eq!(bb.max, Vec3::ONE);
    assert_eq!(bb.size(), Vec3::ONE);
    assert!(Aabb::from_positions(&[]).is_none());
}

#[test]
fn face_mask_full_only_with_all_six_bits() {
    let mut m = FaceMask::NONE;
    for face in Face::ALL {
        assert!(!m.is_full());
        m.insert(face);
        assert!(m.contains(face));
    }
    assert!(m.is_full());
    assert_eq!(m.bits(), 0b11_1111);
}

#[test]
fn plane_axes_exclude_the_face_axis() {
    for face in Face::ALL {
        let (u, v) = face.plane_axes();
        assert_ne!(u, face.axis());
        assert_ne!(v, face.axis());
        assert_ne!(u, v);
    }
    assert_eq!(Vec3::new(1.0, 2.0, 3.0).axis(Axis::Y), 2.0);
}
