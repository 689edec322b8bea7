//! Matrix helpers for the LDraw coordinate system.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// Scale used when turning floats into hashable integers.
const SIGNATURE_SCALE: f32 = 10_000.0;

/// Axis convention of the resolved output.
///
/// LDraw documents are Y-down. `ZUp` rotates the root by -90 degrees around X
/// so the output is Z-up; part geometry is kept in that frame and each
/// placement has the rotation factored back out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisConvention {
    Native,
    #[default]
    ZUp,
}

impl AxisConvention {
    /// Rotation applied once at the root of a resolution.
    pub fn twist(self) -> Mat4 {
        match self {
            AxisConvention::Native => Mat4::IDENTITY,
            AxisConvention::ZUp => Mat4::from_rotation_x(-std::f32::consts::FRAC_PI_2),
        }
    }

    pub fn untwist(self) -> Mat4 {
        self.twist().transpose()
    }
}

/// Build a transform from the twelve numbers of a type 1 line
/// (`x y z a b c d e f g h i`).
pub fn parse_matrix(values: &[f32; 12]) -> Mat4 {
    let [x, y, z, a, b, c, d, e, f, g, h, i] = *values;
    Mat4::from_cols_array(&[a, d, g, 0.0, b, e, h, 0.0, c, f, i, 0.0, x, y, z, 1.0])
}

pub fn determinant(matrix: &Mat4) -> f32 {
    matrix.determinant()
}

/// A matrix whose determinant is exactly zero.
pub fn is_degenerate(matrix: &Mat4) -> bool {
    matrix.determinant() == 0.0
}

/// A matrix that reverses handedness.
pub fn is_mirrored(matrix: &Mat4) -> bool {
    matrix.determinant() < 0.0
}

/// Round every component to `decimals` places.
pub fn round_matrix(matrix: &Mat4, decimals: u32) -> Mat4 {
    let factor = 10f32.powi(decimals as i32);
    let mut cols = matrix.to_cols_array();
    for v in cols.iter_mut() {
        let rounded = (*v * factor).round() / factor;
        // no negative zero
        *v = if rounded == 0.0 { 0.0 } else { rounded };
    }
    Mat4::from_cols_array(&cols)
}

/// Integer form of a float for use in hash keys.
pub fn quantize(value: f32) -> i64 {
    (value * SIGNATURE_SCALE).round() as i64
}

/// Hashable fingerprint of a matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatrixSignature(pub [i64; 12]);

impl MatrixSignature {
    pub fn of(matrix: &Mat4) -> Self {
        let c = matrix.to_cols_array();
        let mut out = [0i64; 12];
        // the bottom row is constant for affine transforms
        for (slot, idx) in out.iter_mut().zip([0, 1, 2, 4, 5, 6, 8, 9, 10, 12, 13, 14]) {
            *slot = quantize(c[idx]);
        }
        Self(out)
    }

    pub fn of_point(point: Vec3) -> [i64; 3] {
        [quantize(point.x), quantize(point.y), quantize(point.z)]
    }
}
