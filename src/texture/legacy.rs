//! Legacy `PE_TEX` bounding-box projection.
//!
//! `PE_TEX_INFO` carries an embedded PNG and optionally a box transform plus
//! the UV rectangle the box maps to. A polygon takes UVs from the first box
//! it intersects while facing the projection direction.

use crate::types::{is_degenerate, quantize, MatrixSignature};
use glam::{Mat4, Vec2, Vec3};
use serde::Serialize;

/// Boxes project along +Y; a polygon must face against it.
pub const PROJECTION_FORWARD: Vec3 = Vec3::Y;

const FACING_EPSILON: f32 = 0.001;

/// Oriented box of a `PE_TEX_INFO` line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeTexBox {
    /// Maps the unit box `[-1, 1]^3` into the walk frame.
    pub matrix: Mat4,
    pub min: Vec2,
    pub max: Vec2,
}

/// One `PE_TEX_INFO` entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeTexInfo {
    /// Name the decoded image is registered under.
    pub image: String,
    pub bounds: Option<PeTexBox>,
    /// Set when `PE_TEX_NEXT_SHEAR` preceded the entry. Recorded only.
    pub shear: bool,
}

/// Hashable identity of a legacy descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PeTexSignature {
    pub image: String,
    pub matrix: Option<MatrixSignature>,
    pub rect: Option<[i64; 4]>,
}

impl PeTexBox {
    /// Parse the sixteen numbers `x y z a b c d e f g h i min.x min.y max.x max.y`.
    pub fn parse(values: &[f32; 16]) -> Self {
        let mut transform = [0f32; 12];
        transform.copy_from_slice(&values[..12]);
        Self {
            matrix: crate::types::parse_matrix(&transform),
            min: Vec2::new(values[12], values[13]),
            max: Vec2::new(values[14], values[15]),
        }
    }

    pub fn transformed(&self, matrix: &Mat4) -> Self {
        Self {
            matrix: *matrix * self.matrix,
            ..self.clone()
        }
    }

    /// UVs for a polygon, or `None` if it misses the box or faces away.
    pub fn project(&self, vertices: &[Vec3]) -> Option<Vec<Vec2>> {
        if is_degenerate(&self.matrix) || !(vertices.len() == 3 || vertices.len() == 4) {
            return None;
        }
        let diff = self.max - self.min;
        if diff.x == 0.0 || diff.y == 0.0 {
            return None;
        }

        // rigid part of the box transform; scale becomes the half extents
        let (scale, rotation, translation) = self.matrix.to_scale_rotation_translation();
        let extents = scale.abs();
        let mirroring = Vec3::select(scale.cmplt(Vec3::ZERO), Vec3::splat(-1.0), Vec3::ONE);
        let frame = Mat4::from_scale_rotation_translation(mirroring, rotation, translation);
        let to_box = frame.inverse();
        let local: Vec<Vec3> = vertices.iter().map(|v| to_box.transform_point3(*v)).collect();

        if !intersects(&local, extents) {
            return None;
        }

        // a mirrored frame reverses the apparent winding
        let handedness = mirroring.x * mirroring.y * mirroring.z;
        let normal = (local[1] - local[0]).cross(local[2] - local[1]).normalize_or_zero() * handedness;
        if normal.dot(PROJECTION_FORWARD) > -FACING_EPSILON {
            return None;
        }

        Some(
            local
                .iter()
                .map(|v| Vec2::new((v.x - self.min.x) / diff.x, (-v.z - self.min.y) / diff.y))
                .collect(),
        )
    }
}

impl PeTexInfo {
    pub fn image_only(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            bounds: None,
            shear: false,
        }
    }

    pub fn transformed(&self, matrix: &Mat4) -> Self {
        Self {
            bounds: self.bounds.as_ref().map(|b| b.transformed(matrix)),
            ..self.clone()
        }
    }

    pub fn project(&self, vertices: &[Vec3]) -> Option<Vec<Vec2>> {
        self.bounds.as_ref()?.project(vertices)
    }

    pub fn signature(&self) -> PeTexSignature {
        PeTexSignature {
            image: self.image.clone(),
            matrix: self.bounds.as_ref().map(|b| MatrixSignature::of(&b.matrix)),
            rect: self
                .bounds
                .as_ref()
                .map(|b| [quantize(b.min.x), quantize(b.min.y), quantize(b.max.x), quantize(b.max.y)]),
        }
    }
}

/// Try candidates in order; the first box that both intersects and faces
/// the projection wins.
pub fn project_first<'a, I>(candidates: I, vertices: &[Vec3]) -> Option<(&'a PeTexInfo, Vec<Vec2>)>
where
    I: IntoIterator<Item = &'a PeTexInfo>,
{
    candidates
        .into_iter()
        .find_map(|info| info.project(vertices).map(|uvs| (info, uvs)))
}

/// Separating axis test between a triangle or quad and the box
/// `[-extents, extents]`. Quads are split into two triangles.
pub fn intersects(polygon: &[Vec3], extents: Vec3) -> bool {
    match polygon {
        [a, b, c] => triangle_intersects(*a, *b, *c, extents),
        [a, b, c, d] => {
            triangle_intersects(*a, *b, *c, extents) || triangle_intersects(*c, *d, *a, extents)
        }
        _ => false,
    }
}

fn triangle_intersects(a: Vec3, b: Vec3, c: Vec3, extents: Vec3) -> bool {
    let edges = [b - a, c - b, a - c];

    // cross products of the box axes with the triangle edges
    for axis in [Vec3::X, Vec3::Y, Vec3::Z] {
        for edge in edges {
            let separating = axis.cross(edge);
            let radius = extents.dot(separating.abs());
            let p = [a.dot(separating), b.dot(separating), c.dot(separating)];
            let max = p[0].max(p[1]).max(p[2]);
            let min = p[0].min(p[1]).min(p[2]);
            if (-max).max(min) > radius {
                return false;
            }
        }
    }

    // box face normals
    for dim in 0..3 {
        let max = a[dim].max(b[dim]).max(c[dim]);
        let min = a[dim].min(b[dim]).min(c[dim]);
        if max < -extents[dim] || min > extents[dim] {
            return false;
        }
    }

    // triangle normal
    let normal = edges[0].cross(edges[1]);
    normal.dot(a).abs() <= normal.abs().dot(extents)
}
