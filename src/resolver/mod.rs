//! Document resolution into instanced geometry.
//!
//! The resolver walks a root document depth first, threading transform,
//! color, BFC and texture state through a [`ResolutionContext`] per frame.
//! Every part-like document reached from model level becomes an
//! [`Instance`]; its geometry is collected once per [`GeometryKey`] into a
//! [`GeometryBucket`] and shared by every instance with the same key.

pub mod cache;
pub mod context;
pub mod events;
mod walk;

pub use cache::{EdgeRecord, Face, FaceUv, GeometryBucket, GeometryCache, GeometryKey, Instance};
pub use context::{PeTexState, ResolutionContext, TexmapState};
pub use events::{SceneEvent, SceneEventKind};

use crate::color::{ColorDefinition, ColorTable};
use crate::diagnostics::Diagnostic;
use crate::document::{ClassificationTable, DocumentCache};
use crate::error::{ResolveError, Result};
use crate::texture::TextureImage;
use crate::types::{AxisConvention, ColorCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Resolution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveOptions {
    /// Honour BFC directives. When off nothing is culled.
    pub meta_bfc: bool,
    /// Honour `!TEXMAP`. When off fallback geometry is used.
    pub meta_texmap: bool,
    /// Honour `PE_TEX_*`.
    pub meta_pe_tex: bool,
    /// Collect scene events.
    pub record_events: bool,
    /// Skip references to stud primitives.
    pub no_studs: bool,
    /// Replace studs with their logo variant, e.g. `logo5`.
    pub stud_logo: Option<String>,
    pub classification: ClassificationTable,
    pub convention: AxisConvention,
    /// Decimal places placements are rounded to.
    pub placement_precision: u32,
    /// Maximum nesting of document references.
    pub max_depth: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            meta_bfc: true,
            meta_texmap: true,
            meta_pe_tex: true,
            record_events: true,
            no_studs: false,
            stud_logo: None,
            classification: ClassificationTable::default(),
            convention: AxisConvention::ZUp,
            placement_precision: 6,
            max_depth: 128,
        }
    }
}

impl ResolveOptions {
    pub fn with_convention(mut self, convention: AxisConvention) -> Self {
        self.convention = convention;
        self
    }

    pub fn with_stud_logo(mut self, logo: impl Into<String>) -> Self {
        self.stud_logo = Some(logo.into());
        self
    }

    pub fn with_no_studs(mut self, no_studs: bool) -> Self {
        self.no_studs = no_studs;
        self
    }

    pub fn with_shortcuts_as_models(mut self, enabled: bool) -> Self {
        self.classification.treat_shortcuts_as_models = enabled;
        self
    }

    pub fn with_classification(mut self, classification: ClassificationTable) -> Self {
        self.classification = classification;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn without_meta(mut self) -> Self {
        self.meta_bfc = false;
        self.meta_texmap = false;
        self.meta_pe_tex = false;
        self
    }
}

/// Cooperative cancellation shared with the host.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Result of one resolution run.
#[derive(Debug, Clone, Default)]
pub struct ResolveOutput {
    pub root: String,
    pub instances: Vec<Instance>,
    pub geometry: GeometryCache,
    pub events: Vec<SceneEvent>,
    pub diagnostics: Vec<Diagnostic>,
    /// Every color code used by instances, faces and edges.
    pub colors: BTreeMap<ColorCode, ColorDefinition>,
    /// Decoded images referenced by face UVs.
    pub textures: BTreeMap<String, Arc<TextureImage>>,
    /// The run stopped early; instances so far are complete.
    pub cancelled: bool,
}

impl ResolveOutput {
    pub fn bucket(&self, instance: &Instance) -> Option<&Arc<GeometryBucket>> {
        self.geometry.get(&instance.key)
    }

    pub fn triangle_count(&self) -> usize {
        self.instances
            .iter()
            .filter_map(|i| self.bucket(i))
            .map(|b| b.triangle_count())
            .sum()
    }
}

/// Resolves models against a shared document cache and color table.
pub struct Resolver {
    documents: Arc<DocumentCache>,
    colors: Arc<ColorTable>,
    options: ResolveOptions,
    cancel: CancelFlag,
}

impl Resolver {
    pub fn new(documents: Arc<DocumentCache>, colors: Arc<ColorTable>) -> Self {
        Self {
            documents,
            colors,
            options: ResolveOptions::default(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_options(mut self, options: ResolveOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    pub fn documents(&self) -> &Arc<DocumentCache> {
        &self.documents
    }

    pub fn colors(&self) -> &Arc<ColorTable> {
        &self.colors
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Resolve `root` with `color` as the working color.
    ///
    /// Fails only when `root` is empty or cannot be found; every other
    /// problem is reported in [`ResolveOutput::diagnostics`].
    pub fn resolve(&self, root: &str, color: impl Into<ColorCode>) -> Result<ResolveOutput> {
        let root = root.trim();
        if root.is_empty() {
            return Err(ResolveError::InvalidRequest("empty root document name".to_string()));
        }
        let document = self
            .documents
            .get(root)
            .ok_or_else(|| ResolveError::InvalidRequest(format!("root document {} not found", root)))?;

        let color = color.into();
        tracing::debug!(root = %document.name, color = %color, "resolving");
        let output = walk::Walk::new(&self.documents, &self.colors, &self.options, &self.cancel)
            .run(document, color);
        tracing::debug!(
            instances = output.instances.len(),
            buckets = output.geometry.len(),
            diagnostics = output.diagnostics.len(),
            cancelled = output.cancelled,
            "resolved"
        );
        Ok(output)
    }
}
