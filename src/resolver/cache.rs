//! Instancing keys and the per-run geometry cache.

use crate::texture::legacy::PeTexSignature;
use crate::texture::TexmapSignature;
use crate::types::ColorCode;
use glam::{Mat4, Vec2, Vec3};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything that changes the contents of a bucket.
///
/// Placement is deliberately absent: it lives on the [`Instance`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GeometryKey {
    pub document: String,
    pub color: ColorCode,
    pub texmap: Option<TexmapSignature>,
    /// Inherited `PE_TEX` entries; `None` marks the document-wide list,
    /// `Some(i)` the table for the document's `i`-th subfile reference.
    pub legacy: Vec<(Option<usize>, PeTexSignature)>,
    /// Only the document's own geometry, without its sub-parts.
    pub residual: bool,
    /// Placed with a singular matrix, so nothing in the bucket is culled.
    pub uncertified: bool,
}

/// Texture coordinates of one face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceUv {
    pub texture: String,
    pub coords: Vec<Vec2>,
}

/// A triangle or quad in bucket space.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Face {
    /// Three or four vertices, counter-clockwise when `double_sided` is false.
    pub vertices: Vec<Vec3>,
    pub color: ColorCode,
    /// Culling does not apply; render both sides.
    pub double_sided: bool,
    pub uv: Option<FaceUv>,
}

impl Face {
    pub fn is_quad(&self) -> bool {
        self.vertices.len() == 4
    }

    pub fn normal(&self) -> Vec3 {
        match self.vertices.as_slice() {
            [a, b, c, ..] => (*b - *a).cross(*c - *a).normalize_or_zero(),
            _ => Vec3::ZERO,
        }
    }
}

/// An edge line, or a conditional line when `controls` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeRecord {
    pub vertices: [Vec3; 2],
    pub controls: Option<[Vec3; 2]>,
    pub color: ColorCode,
}

/// Accumulated geometry for one [`GeometryKey`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeometryBucket {
    pub faces: Vec<Face>,
    pub edges: Vec<EdgeRecord>,
}

impl GeometryBucket {
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty() && self.edges.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.faces.iter().map(|f| if f.is_quad() { 2 } else { 1 }).sum()
    }

    pub fn conditional_count(&self) -> usize {
        self.edges.iter().filter(|e| e.controls.is_some()).count()
    }

    /// Axis-aligned bounds of every face vertex, or `None` when empty.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let mut points = self.faces.iter().flat_map(|f| f.vertices.iter().copied());
        let first = points.next()?;
        Some(points.fold((first, first), |(min, max), p| (min.min(p), max.max(p))))
    }
}

/// One placed occurrence of a bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instance {
    pub key: GeometryKey,
    /// Maps bucket space to world space.
    pub placement: Mat4,
    pub color: ColorCode,
    /// The placement reverses handedness; face winding must be flipped.
    pub mirrored: bool,
}

/// Finished buckets of one resolution run, in creation order.
#[derive(Debug, Clone, Default)]
pub struct GeometryCache {
    buckets: HashMap<GeometryKey, Arc<GeometryBucket>>,
    order: Vec<GeometryKey>,
}

impl GeometryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &GeometryKey) -> Option<&Arc<GeometryBucket>> {
        self.buckets.get(key)
    }

    pub fn contains(&self, key: &GeometryKey) -> bool {
        self.buckets.contains_key(key)
    }

    /// Store a finished bucket. A key is only ever filled once.
    pub fn insert(&mut self, key: GeometryKey, bucket: GeometryBucket) -> Arc<GeometryBucket> {
        if let Some(existing) = self.buckets.get(&key) {
            return existing.clone();
        }
        let bucket = Arc::new(bucket);
        self.order.push(key.clone());
        self.buckets.insert(key, bucket.clone());
        bucket
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GeometryKey, &Arc<GeometryBucket>)> {
        self.order
            .iter()
            .filter_map(move |key| self.buckets.get(key).map(|bucket| (key, bucket)))
    }
}
