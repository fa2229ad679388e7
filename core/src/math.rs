//! Math type aliases and camera helpers.
//!
//! Rendering math is always `f32`. Matrices follow nalgebra's column-major
//! storage, which is also the layout the GPU-side `mat4` expects.

pub use nalgebra;

/// 3D vector (f32).
pub type Vec3 = nalgebra::Vector3<f32>;

/// 4D vector (f32).
pub type Vec4 = nalgebra::Vector4<f32>;

/// 4x4 matrix (f32).
pub type Mat4 = nalgebra::Matrix4<f32>;

/// Build a right-handed perspective projection with depth range [0, 1] (Vulkan convention).
pub fn perspective_rh(yfov: f32, aspect: f32, znear: f32, zfar: f32) -> Mat4 {
    let f = 1.0 / (yfov / 2.0).tan();
    let nf = 1.0 / (znear - zfar);
    #[rustfmt::skip]
    let result = Mat4::new(
        f / aspect, 0.0,  0.0,              0.0,
        0.0,        f,    0.0,              0.0,
        0.0,        0.0,  zfar * nf,        znear * zfar * nf,
        0.0,        0.0,  -1.0,             0.0,
    );
    result
}

/// Right-handed look-at view matrix.
pub fn look_at_rh(eye: &Vec3, target: &Vec3, up: &Vec3) -> Mat4 {
    let eye_point = nalgebra::Point3::from(*eye);
    let target_point = nalgebra::Point3::from(*target);
    nalgebra::Isometry3::look_at_rh(&eye_point, &target_point, up).to_homogeneous()
}

/// Build a translation-only 4x4 matrix.
pub fn mat4_from_translation(t: Vec3) -> Mat4 {
    Mat4::new_translation(&t)
}

/// Convert a 4x4 matrix to a column-major `[[f32; 4]; 4]` array.
pub fn mat4_to_cols_array_2d(m: &Mat4) -> [[f32; 4]; 4] {
    let s = m.as_slice();
    [
        [s[0], s[1], s[2], s[3]],
        [s[4], s[5], s[6], s[7]],
        [s[8], s[9], s[10], s[11]],
        [s[12], s[13], s[14], s[15]],
    ]
}

/// Rebuild a matrix from a column-major `[[f32; 4]; 4]` array.
pub fn mat4_from_cols_array_2d(cols: &[[f32; 4]; 4]) -> Mat4 {
    Mat4::from_column_slice(&[
        cols[0][0], cols[0][1], cols[0][2], cols[0][3], cols[1][0], cols[1][1], cols[1][2],
        cols[1][3], cols[2][0], cols[2][1], cols[2][2], cols[2][3], cols[3][0], cols[3][1],
        cols[3][2], cols[3][3],
    ])
}

/// Convert a 4D vector to a `[x, y, z, w]` array.
pub fn vec4_to_array(v: &Vec4) -> [f32; 4] {
    [v.x, v.y, v.z, v.w]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cols_array_is_column_major() {
        let m = mat4_from_translation(Vec3::new(1.0, 2.0, 3.0));
        let cols = mat4_to_cols_array_2d(&m);
        // Translation lives in the last column.
        assert_eq!(cols[3], [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(cols[0], [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_cols_array_inverse() {
        let m = perspective_rh(1.0, 1.5, 0.1, 100.0);
        let back = mat4_from_cols_array_2d(&mat4_to_cols_array_2d(&m));
        assert_eq!(m, back);
    }

    #[test]
    fn test_look_at_moves_eye_to_origin() {
        let eye = Vec3::new(0.0, 0.0, 5.0);
        let view = look_at_rh(&eye, &Vec3::zeros(), &Vec3::y());
        let p = view * Vec4::new(eye.x, eye.y, eye.z, 1.0);
        assert!(p.xyz().norm() < 1e-5);
    }

    #[test]
    fn test_perspective_depth_range() {
        let proj = perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 1.0, 10.0);
        let near = proj * Vec4::new(0.0, 0.0, -1.0, 1.0);
        let far = proj * Vec4::new(0.0, 0.0, -10.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-5);
    }
}
