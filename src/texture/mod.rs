//! Texture coordinate assignment.
//!
//! Two mechanisms coexist. `!TEXMAP` projects a named image onto geometry
//! with a planar, cylindrical or spherical mapping defined by three points.
//! The legacy `PE_TEX` extension ([`legacy`]) places an embedded image using
//! an oriented bounding box. Both take polygon vertices in the frame of the
//! geometry bucket and return one UV per vertex, or `None` when the mapping
//! does not apply.

pub mod image;
pub mod legacy;

pub use self::image::{decode_base64_png, decode_png, TextureImage};
pub use legacy::{PeTexBox, PeTexInfo};

use crate::types::MatrixSignature;
use glam::{Mat4, Vec2, Vec3};
use serde::Serialize;

/// Shape of a `!TEXMAP` projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum TexmapMethod {
    Planar,
    /// `angle` is the angular extent of the image in degrees.
    Cylindrical { angle: f32 },
    /// `longitude` and `latitude` are angular extents in degrees.
    Spherical { longitude: f32, latitude: f32 },
}

/// A parsed `!TEXMAP START|NEXT` projection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TexmapDescriptor {
    pub method: TexmapMethod,
    pub points: [Vec3; 3],
    pub texture: String,
    pub glossmap: Option<String>,
}

/// Hashable identity of a texmap as it affects UVs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TexmapSignature {
    pub method: u8,
    pub params: [i64; 2],
    pub points: [[i64; 3]; 3],
    pub texture: String,
    pub glossmap: Option<String>,
}

impl TexmapDescriptor {
    /// Parse the words after `START` or `NEXT`: the method name, nine point
    /// coordinates, the method's angles and the texture file names.
    pub fn parse(args: &[&str]) -> Result<Self, String> {
        let method_name = args.first().ok_or("missing TEXMAP method")?.to_ascii_uppercase();
        let angle_count = match method_name.as_str() {
            "PLANAR" => 0,
            "CYLINDRICAL" => 1,
            "SPHERICAL" => 2,
            other => return Err(format!("unknown TEXMAP method '{}'", other)),
        };

        let numeric = 9 + angle_count;
        if args.len() < 1 + numeric + 1 {
            return Err(format!("TEXMAP {} needs {} numbers and a texture", method_name, numeric));
        }
        let mut values = [0f32; 11];
        for (slot, raw) in values.iter_mut().zip(&args[1..1 + numeric]) {
            *slot = raw
                .parse()
                .map_err(|_| format!("invalid TEXMAP number '{}'", raw))?;
        }

        let method = match angle_count {
            0 => TexmapMethod::Planar,
            1 => TexmapMethod::Cylindrical { angle: values[9] },
            _ => TexmapMethod::Spherical {
                longitude: values[9],
                latitude: values[10],
            },
        };
        let points = [
            Vec3::new(values[0], values[1], values[2]),
            Vec3::new(values[3], values[4], values[5]),
            Vec3::new(values[6], values[7], values[8]),
        ];

        let names = split_file_names(&args[1 + numeric..].join(" "));
        let mut names = names.into_iter();
        let texture = names.next().filter(|t| !t.is_empty()).ok_or("missing TEXMAP texture")?;
        let glossmap = names.next().filter(|g| !g.is_empty());

        Ok(Self {
            method,
            points,
            texture,
            glossmap,
        })
    }

    /// Copy with the reference points moved by `matrix`.
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        Self {
            points: self.points.map(|p| matrix.transform_point3(p)),
            ..self.clone()
        }
    }

    pub fn signature(&self) -> TexmapSignature {
        let (method, params) = match self.method {
            TexmapMethod::Planar => (0, [0, 0]),
            TexmapMethod::Cylindrical { angle } => (1, [crate::types::quantize(angle), 0]),
            TexmapMethod::Spherical { longitude, latitude } => (
                2,
                [crate::types::quantize(longitude), crate::types::quantize(latitude)],
            ),
        };
        TexmapSignature {
            method,
            params,
            points: self.points.map(MatrixSignature::of_point),
            texture: self.texture.clone(),
            glossmap: self.glossmap.clone(),
        }
    }

    /// UV for every vertex. UVs use image space: `u` grows to the right and
    /// `v` grows downward from the top edge.
    pub fn project(&self, vertices: &[Vec3]) -> Option<Vec<Vec2>> {
        match self.method {
            TexmapMethod::Planar => self.project_planar(vertices),
            TexmapMethod::Cylindrical { angle } => self.project_cylindrical(vertices, angle),
            TexmapMethod::Spherical {
                longitude,
                latitude,
            } => self.project_spherical(vertices, longitude, latitude),
        }
    }

    fn project_planar(&self, vertices: &[Vec3]) -> Option<Vec<Vec2>> {
        let [p1, p2, p3] = self.points;
        let (u_axis, v_axis) = (p2 - p1, p3 - p1);
        let (u_len2, v_len2) = (u_axis.length_squared(), v_axis.length_squared());
        if u_len2 <= f32::EPSILON || v_len2 <= f32::EPSILON {
            return None;
        }
        Some(
            vertices
                .iter()
                .map(|v| {
                    let d = *v - p1;
                    Vec2::new(d.dot(u_axis) / u_len2, d.dot(v_axis) / v_len2)
                })
                .collect(),
        )
    }

    // p1 is the bottom center, p2 the top center, p3 lies on the surface
    // where u is 0.5.
    fn project_cylindrical(&self, vertices: &[Vec3], angle: f32) -> Option<Vec<Vec2>> {
        let [p1, p2, p3] = self.points;
        let axis = p2 - p1;
        let height2 = axis.length_squared();
        let up = axis.try_normalize()?;
        let forward = reject(p3 - p1, up).try_normalize()?;
        let side = up.cross(forward);
        let extent = angle.to_radians();
        if extent.abs() <= f32::EPSILON {
            return None;
        }

        Some(
            vertices
                .iter()
                .map(|v| {
                    let d = *v - p1;
                    let radial = reject(d, up);
                    let theta = radial.dot(side).atan2(radial.dot(forward));
                    Vec2::new(0.5 + theta / extent, 1.0 - d.dot(axis) / height2)
                })
                .collect(),
        )
    }

    // p1 is the center, p2 the point at the image center and p3 with the
    // other two spans the plane that bisects the image vertically.
    fn project_spherical(&self, vertices: &[Vec3], longitude: f32, latitude: f32) -> Option<Vec<Vec2>> {
        let [p1, p2, p3] = self.points;
        let forward = (p2 - p1).try_normalize()?;
        let up = reject(p3 - p1, forward).try_normalize()?;
        let side = up.cross(forward);
        let (lon_extent, lat_extent) = (longitude.to_radians(), latitude.to_radians());
        if lon_extent.abs() <= f32::EPSILON || lat_extent.abs() <= f32::EPSILON {
            return None;
        }

        Some(
            vertices
                .iter()
                .map(|v| {
                    let d = (*v - p1).normalize_or_zero();
                    let lon = d.dot(side).atan2(d.dot(forward));
                    let lat = d.dot(up).clamp(-1.0, 1.0).asin();
                    Vec2::new(0.5 + lon / lon_extent, 0.5 - lat / lat_extent)
                })
                .collect(),
        )
    }
}

/// Component of `v` perpendicular to the unit vector `axis`.
fn reject(v: Vec3, axis: Vec3) -> Vec3 {
    v - axis * v.dot(axis)
}

/// Split up to two file names, either of which may be double-quoted.
fn split_file_names(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = text.trim();
    while !rest.is_empty() && names.len() < 2 {
        if let Some(quoted) = rest.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => {
                    names.push(quoted[..end].to_string());
                    rest = quoted[end + 1..].trim_start();
                }
                None => {
                    names.push(quoted.to_string());
                    rest = "";
                }
            }
        } else {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            names.push(rest[..end].to_string());
            rest = rest[end..].trim_start();
        }
    }
    names
}
