//! Zero-allocation 4×4 matrix routines.
//!
//! All functions operate on column-major `[f32; 16]` slots and write their
//! result in place. The slots come from [`MatrixStorage`](super::storage)
//! pools; `glam` does the arithmetic on the stack and the result is written
//! back through `write_cols_to_slice`, so nothing here touches the heap.
//!
//! Euler composition order is X→Y→Z, matching the transform component.

use glam::{EulerRot, Mat3, Mat4, Quat, Vec3};

/// Floats per 4×4 matrix row.
pub const MAT4_SIZE: usize = 16;

/// Floats per normal matrix: the inverse-transpose 3×3 stored as three
/// columns each padded to a vec4, matching std140 `mat3x3<f32>` layout.
pub const NORMAL_MATRIX_SIZE: usize = 12;

const SINGULAR_EPS: f32 = 1e-8;

/// Writes the identity matrix into `out`.
#[inline]
pub fn identity_to(out: &mut [f32; 16]) {
    Mat4::IDENTITY.write_cols_to_slice(out);
}

/// Writes `a × b` into `out`.
///
/// `out` may alias `a` or `b`; the product is accumulated on the stack
/// before being written back.
#[inline]
pub fn mul_to(out: &mut [f32; 16], a: &[f32; 16], b: &[f32; 16]) {
    let m = Mat4::from_cols_slice(a) * Mat4::from_cols_slice(b);
    m.write_cols_to_slice(out);
}

/// Composes `T(position) × R(euler XYZ) × S(scale)` into `out`.
#[inline]
pub fn compose_trs_to(out: &mut [f32; 16], position: Vec3, euler: Vec3, scale: Vec3) {
    let rotation = Quat::from_euler(EulerRot::XYZ, euler.x, euler.y, euler.z);
    Mat4::from_scale_rotation_translation(scale, rotation, position).write_cols_to_slice(out);
}

/// Writes the inverse of `m` into `out`.
///
/// Returns `false` and leaves identity in `out` when `m` is singular.
pub fn invert_to(out: &mut [f32; 16], m: &[f32; 16]) -> bool {
    let mat = Mat4::from_cols_slice(m);
    if mat.determinant().abs() < SINGULAR_EPS {
        identity_to(out);
        return false;
    }
    mat.inverse().write_cols_to_slice(out);
    true
}

/// Writes the normal matrix of `world` into `out`.
///
/// The normal matrix is the inverse-transpose of the top-left 3×3, laid out
/// as three vec4-padded columns (12 floats). Returns `false` without writing
/// when the 3×3 block is singular, e.g. any scale component near zero.
pub fn normal_matrix_to(out: &mut [f32; 12], world: &[f32; 16]) -> bool {
    let m3 = Mat3::from_cols(
        Vec3::new(world[0], world[1], world[2]),
        Vec3::new(world[4], world[5], world[6]),
        Vec3::new(world[8], world[9], world[10]),
    );
    if m3.determinant().abs() < SINGULAR_EPS {
        return false;
    }
    let n = m3.inverse().transpose();
    for (col, chunk) in [n.x_axis, n.y_axis, n.z_axis].iter().zip(out.chunks_exact_mut(4)) {
        chunk[0] = col.x;
        chunk[1] = col.y;
        chunk[2] = col.z;
        chunk[3] = 0.0;
    }
    true
}

/// Transforms a point by `m` (w = 1).
#[inline]
#[must_use]
pub fn transform_point(m: &[f32; 16], p: Vec3) -> Vec3 {
    Mat4::from_cols_slice(m).transform_point3(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn compose_translation_lands_in_last_column() {
        let mut m = [0.0; 16];
        compose_trs_to(&mut m, Vec3::new(1.0, 2.0, 3.0), Vec3::ZERO, Vec3::ONE);
        assert!(approx(m[12], 1.0) && approx(m[13], 2.0) && approx(m[14], 3.0));
    }

    #[test]
    fn mul_aliasing_is_safe() {
        let mut a = [0.0; 16];
        compose_trs_to(&mut a, Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO, Vec3::ONE);
        let b = a;
        let a2 = a;
        mul_to(&mut a, &a2, &b);
        assert!(approx(a[12], 2.0));
    }

    #[test]
    fn invert_roundtrip() {
        let mut m = [0.0; 16];
        compose_trs_to(
            &mut m,
            Vec3::new(4.0, -1.0, 2.0),
            Vec3::new(0.3, 0.5, 0.1),
            Vec3::new(2.0, 2.0, 2.0),
        );
        let mut inv = [0.0; 16];
        assert!(invert_to(&mut inv, &m));
        let mut id = [0.0; 16];
        mul_to(&mut id, &m, &inv);
        for (i, v) in id.iter().enumerate() {
            let expected = if i % 5 == 0 { 1.0 } else { 0.0 };
            assert!(approx(*v, expected), "element {i}: {v}");
        }
    }

    #[test]
    fn invert_singular_reports_failure() {
        let mut m = [0.0; 16];
        compose_trs_to(&mut m, Vec3::ZERO, Vec3::ZERO, Vec3::new(1.0, 0.0, 1.0));
        let mut inv = [0.0; 16];
        assert!(!invert_to(&mut inv, &m));
        assert!(approx(inv[0], 1.0));
    }

    #[test]
    fn normal_matrix_rejects_zero_scale() {
        let mut m = [0.0; 16];
        compose_trs_to(&mut m, Vec3::ZERO, Vec3::ZERO, Vec3::new(1.0, 1.0, 0.0));
        let mut n = [0.0; 12];
        assert!(!normal_matrix_to(&mut n, &m));
    }

    #[test]
    fn normal_matrix_of_uniform_scale_rescales() {
        let mut m = [0.0; 16];
        compose_trs_to(&mut m, Vec3::ZERO, Vec3::ZERO, Vec3::splat(2.0));
        let mut n = [0.0; 12];
        assert!(normal_matrix_to(&mut n, &m));
        // Inverse-transpose of 2·I is 0.5·I
        assert!(approx(n[0], 0.5) && approx(n[5], 0.5) && approx(n[10], 0.5));
        assert!(approx(n[3], 0.0) && approx(n[7], 0.0) && approx(n[11], 0.0));
    }
}
