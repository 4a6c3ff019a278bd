use bytemuck::{Pod, Zeroable};

/// 4×4 matrix in column-major order (the wgpu/WGSL convention).
///
/// Only the constructors the compositor needs are provided; this is not a
/// general linear-algebra type. The raw array uploads directly as a
/// `mat4x4<f32>` uniform.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Mat4(pub [f32; 16]);

impl Mat4 {
    pub const IDENTITY: Self = Self::scale(1.0, 1.0, 1.0);

    /// Diagonal scale matrix.
    #[inline]
    pub const fn scale(x: f32, y: f32, z: f32) -> Self {
        Self([
            x, 0.0, 0.0, 0.0, //
            0.0, y, 0.0, 0.0, //
            0.0, 0.0, z, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ])
    }

    /// Uniform scale on all three axes.
    #[inline]
    pub const fn scale_uniform(s: f32) -> Self {
        Self::scale(s, s, s)
    }

    /// Pure translation matrix.
    #[inline]
    pub const fn translation(x: f32, y: f32, z: f32) -> Self {
        Self([
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            x, y, z, 1.0,
        ])
    }

    /// Column-major element access (col, row), for tests and diagnostics.
    #[inline]
    pub fn at(&self, col: usize, row: usize) -> f32 {
        self.0[col * 4 + row]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_diagonal() {
        let m = Mat4::IDENTITY;
        for i in 0..4 {
            for j in 0..4 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_eq!(m.at(i, j), expected);
            }
        }
    }

    #[test]
    fn scale_hits_diagonal_only() {
        let m = Mat4::scale(2.0, 3.0, 4.0);
        assert_eq!(m.at(0, 0), 2.0);
        assert_eq!(m.at(1, 1), 3.0);
        assert_eq!(m.at(2, 2), 4.0);
        assert_eq!(m.at(3, 3), 1.0);
        assert_eq!(m.at(3, 0), 0.0);
    }

    #[test]
    fn translation_lives_in_last_column() {
        let m = Mat4::translation(5.0, -6.0, 7.0);
        assert_eq!(m.at(3, 0), 5.0);
        assert_eq!(m.at(3, 1), -6.0);
        assert_eq!(m.at(3, 2), 7.0);
        assert_eq!(m.at(0, 0), 1.0);
    }
}
