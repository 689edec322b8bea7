//! JSON summary of a resolve run.

use crate::color::ColorDefinition;
use crate::diagnostics::Diagnostic;
use crate::error::Result;
use crate::resolver::{GeometryBucket, GeometryKey, Instance, ResolveOutput, SceneEvent};
use crate::types::ColorCode;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize)]
struct SceneSummary<'a> {
    root: &'a str,
    cancelled: bool,
    triangles: usize,
    instances: &'a [Instance],
    buckets: Vec<BucketEntry<'a>>,
    events: &'a [SceneEvent],
    diagnostics: &'a [Diagnostic],
    colors: &'a BTreeMap<ColorCode, ColorDefinition>,
    textures: Vec<TextureEntry<'a>>,
}

#[derive(Serialize)]
struct BucketEntry<'a> {
    key: &'a GeometryKey,
    #[serde(flatten)]
    bucket: &'a GeometryBucket,
}

#[derive(Serialize)]
struct TextureEntry<'a> {
    name: &'a str,
    width: u32,
    height: u32,
}

/// Serialize instances, buckets, events, diagnostics and colours.
///
/// Texture pixels are left out; only names and sizes are listed.
pub fn export_json(output: &ResolveOutput) -> Result<String> {
    let summary = SceneSummary {
        root: &output.root,
        cancelled: output.cancelled,
        triangles: output.triangle_count(),
        instances: &output.instances,
        buckets: output
            .geometry
            .iter()
            .map(|(key, bucket)| BucketEntry { key, bucket })
            .collect(),
        events: &output.events,
        diagnostics: &output.diagnostics,
        colors: &output.colors,
        textures: output
            .textures
            .iter()
            .map(|(name, image)| TextureEntry {
                name,
                width: image.width,
                height: image.height,
            })
            .collect(),
    };
    Ok(serde_json::to_string_pretty(&summary)?)
}
