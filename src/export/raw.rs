//! Raw world-space export for custom rendering.

use crate::color::{ColorDefinition, ColorTable};
use crate::resolver::{Face, Instance, ResolveOutput};
use crate::types::ColorCode;
use glam::{Vec2, Vec3};
use std::collections::HashMap;
use std::sync::Arc;

/// Every instance baked into one triangle soup.
#[derive(Debug, Default)]
pub struct RawSceneData {
    /// Vertex positions (3 floats per vertex).
    pub positions: Vec<[f32; 3]>,
    /// Vertex normals (3 floats per vertex).
    pub normals: Vec<[f32; 3]>,
    /// Texture coordinates, zero for untextured faces.
    pub uvs: Vec<[f32; 2]>,
    /// Linear RGBA per vertex.
    pub colors: Vec<[f32; 4]>,
    /// Triangle indices (3 per triangle).
    pub indices: Vec<u32>,
    /// Index into `textures` per triangle.
    pub triangle_textures: Vec<Option<u32>>,
    /// Texture names in first-use order.
    pub textures: Vec<String>,
    /// Edge line segments (2 points per line), conditional lines excluded.
    pub lines: Vec<[[f32; 3]; 2]>,
    /// Linear RGB per line.
    pub line_colors: Vec<[f32; 3]>,
}

/// Export every instance as world-space triangles.
///
/// Quads are split into two triangles. Faces of mirrored instances are
/// rewound so they keep facing outward, and double-sided faces are emitted
/// once per side.
pub fn export_raw(output: &ResolveOutput, colors: &ColorTable) -> RawSceneData {
    let mut raw = RawSceneData::default();
    let mut palette = Palette {
        output,
        table: colors,
        cache: HashMap::new(),
    };
    let mut texture_slots: HashMap<String, u32> = HashMap::new();

    for instance in &output.instances {
        let Some(bucket) = output.bucket(instance) else {
            continue;
        };
        for face in &bucket.faces {
            let rgba = palette.face(face, instance);
            let texture = face.uv.as_ref().map(|uv| {
                let next = texture_slots.len() as u32;
                *texture_slots.entry(uv.texture.clone()).or_insert_with(|| {
                    raw.textures.push(uv.texture.clone());
                    next
                })
            });

            let mut corners: Vec<(Vec3, Vec2)> = face
                .vertices
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    let uv = face.uv.as_ref().and_then(|uv| uv.coords.get(i).copied());
                    (instance.placement.transform_point3(*v), uv.unwrap_or(Vec2::ZERO))
                })
                .collect();
            if instance.mirrored {
                corners[1..].reverse();
            }

            raw.push_polygon(&corners, rgba, texture);
            if face.double_sided {
                corners[1..].reverse();
                raw.push_polygon(&corners, rgba, texture);
            }
        }

        for edge in bucket.edges.iter().filter(|e| e.controls.is_none()) {
            let [a, b] = edge.vertices.map(|v| instance.placement.transform_point3(v).to_array());
            raw.lines.push([a, b]);
            raw.line_colors.push(palette.edge(&edge.color, instance));
        }
    }

    tracing::debug!(
        triangles = raw.triangle_count(),
        lines = raw.lines.len(),
        textures = raw.textures.len(),
        "exported raw scene"
    );
    raw
}

impl RawSceneData {
    fn push_polygon(&mut self, corners: &[(Vec3, Vec2)], rgba: [f32; 4], texture: Option<u32>) {
        let normal = match corners {
            [(a, _), (b, _), (c, _), ..] => (*b - *a).cross(*c - *a).normalize_or_zero(),
            _ => return,
        };
        let base = self.positions.len() as u32;
        for (position, uv) in corners {
            self.positions.push(position.to_array());
            self.normals.push(normal.to_array());
            self.uvs.push(uv.to_array());
            self.colors.push(rgba);
        }
        self.indices.extend([base, base + 1, base + 2]);
        self.triangle_textures.push(texture);
        if corners.len() == 4 {
            self.indices.extend([base, base + 2, base + 3]);
            self.triangle_textures.push(texture);
        }
    }

    /// Get positions as a flat array.
    pub fn positions_flat(&self) -> Vec<f32> {
        self.positions.iter().flat_map(|p| p.iter().copied()).collect()
    }

    /// Get normals as a flat array.
    pub fn normals_flat(&self) -> Vec<f32> {
        self.normals.iter().flat_map(|n| n.iter().copied()).collect()
    }

    /// Get UVs as a flat array.
    pub fn uvs_flat(&self) -> Vec<f32> {
        self.uvs.iter().flat_map(|uv| uv.iter().copied()).collect()
    }

    /// Get colors as a flat array.
    pub fn colors_flat(&self) -> Vec<f32> {
        self.colors.iter().flat_map(|c| c.iter().copied()).collect()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Colour lookups for one export, preferring the run's own snapshot.
struct Palette<'a> {
    output: &'a ResolveOutput,
    table: &'a ColorTable,
    cache: HashMap<ColorCode, Arc<ColorDefinition>>,
}

impl Palette<'_> {
    fn definition(&mut self, code: &ColorCode) -> Arc<ColorDefinition> {
        if let Some(def) = self.cache.get(code) {
            return def.clone();
        }
        let def = match self.output.colors.get(code) {
            Some(def) => Arc::new(def.clone()),
            None => self.table.resolve(code),
        };
        self.cache.insert(code.clone(), def.clone());
        def
    }

    fn face(&mut self, face: &Face, instance: &Instance) -> [f32; 4] {
        let code = face.color.resolve_against(&instance.color);
        self.definition(&code).linear_rgba()
    }

    fn edge(&mut self, code: &ColorCode, instance: &Instance) -> [f32; 3] {
        if code.is_edge() {
            let main = self.definition(&instance.color);
            return crate::color::linear_rgb(self.table.edge_rgb(&main));
        }
        let code = code.resolve_against(&instance.color);
        crate::color::linear_rgb(self.definition(&code).rgb)
    }
}
