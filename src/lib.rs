//! # LDraw Resolver
//!
//! Resolves LDraw models into instanced, deduplicated geometry.
//!
//! ## Overview
//!
//! A root document is walked depth first. Every part reached from model level
//! becomes an [`Instance`] with a world placement; the part's geometry is
//! collected once into a [`GeometryBucket`] shared by every instance with the
//! same [`GeometryKey`]. Back-face culling, `!TEXMAP` and legacy `PE_TEX`
//! texturing are applied while the geometry is collected.
//!
//! ## Quick Start
//!
//! ```ignore
//! use ldraw_resolver::{load_color_table, load_library, ColorScheme, Resolver};
//! use std::sync::Arc;
//!
//! let documents = Arc::new(load_library("path/to/ldraw.zip")?);
//! let colors = Arc::new(load_color_table(&documents, ColorScheme::Ldraw));
//! let output = Resolver::new(documents, colors).resolve("car.mpd", 16)?;
//!
//! for instance in &output.instances {
//!     let bucket = output.bucket(instance);
//!     // hand placement and bucket to a renderer
//! }
//! ```
//!
//! ## Sources
//!
//! Documents come from a [`DocumentSource`]. [`LibrarySource`] reads an
//! LDraw library directory or archive, [`MemorySource`] holds text directly
//! and [`SourceChain`] layers several of them.

pub mod bfc;
pub mod color;
pub mod diagnostics;
pub mod document;
pub mod error;
pub mod export;
pub mod resolver;
pub mod source;
pub mod texture;
pub mod types;

pub use color::{ColorDefinition, ColorScheme, ColorTable, Finish};
pub use diagnostics::{Diagnostic, DiagnosticKind, Severity};
pub use document::{Classification, ClassificationTable, CommandNode, Document, DocumentCache, MetaCommand};
pub use error::{ResolveError, Result};
pub use export::{export_json, export_raw, RawSceneData};
pub use resolver::{
    CancelFlag, GeometryBucket, GeometryCache, GeometryKey, Instance, ResolveOptions, ResolveOutput, Resolver,
    SceneEvent, SceneEventKind,
};
pub use source::{DocumentSource, LibrarySource, MemorySource, SourceChain};
pub use types::{AxisConvention, ColorCode, Winding};

/// Open a library directory or ZIP archive behind a fresh document cache.
pub fn load_library<P: AsRef<std::path::Path>>(path: P) -> Result<DocumentCache> {
    let library = LibrarySource::open(path)?;
    tracing::info!(origin = %library.origin().display(), files = library.len(), "opened library");
    Ok(DocumentCache::new(library))
}

/// Color table for `scheme`, seeded from the library's configuration file.
///
/// A missing configuration leaves only direct and blended colours.
pub fn load_color_table(documents: &DocumentCache, scheme: ColorScheme) -> ColorTable {
    let table = ColorTable::new();
    let source = documents.source();
    let text = source
        .fetch(scheme.config_file())
        .or_else(|| source.fetch(ColorScheme::Ldraw.config_file()));
    match text {
        Some(text) => {
            let added = table.seed(&text);
            tracing::debug!(scheme = ?scheme, colours = added, "seeded colour table");
        }
        None => tracing::warn!(file = scheme.config_file(), "colour configuration not found"),
    }
    if let Some(overrides) = scheme.overrides() {
        table.apply_overrides(overrides);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_color_table_schemes() {
        let documents = DocumentCache::new(MemorySource::new().with_document(
            "LDConfig.ldr",
            "0 !COLOUR Red CODE 4 VALUE #C91A09 EDGE #333333\n0 !COLOUR Black CODE 0 VALUE #1B2A34 EDGE #2B4354\n",
        ));
        let ldraw = load_color_table(&documents, ColorScheme::Ldraw);
        assert_eq!(ldraw.len(), 2);
        assert_eq!(ldraw.resolve(&ColorCode::from(4)).rgb, [0xC9, 0x1A, 0x09]);

        // no LDCfgalt.ldr, so the standard file is used
        let alternate = load_color_table(&documents, ColorScheme::Alternate);
        assert_eq!(alternate.len(), 2);

        let realistic = load_color_table(&documents, ColorScheme::Realistic);
        let overrides = ColorScheme::Realistic.overrides().unwrap();
        let (code, rgb) = overrides[0];
        assert_eq!(realistic.resolve(&ColorCode::from(code)).rgb, rgb);
    }

    #[test]
    fn test_load_library_rejects_missing_path() {
        assert!(load_library("/definitely/not/a/library").is_err());
    }
}
