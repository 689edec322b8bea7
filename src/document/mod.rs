//! Parsed LDraw documents.
//!
//! A document is one named unit of the format: a model, part, subpart or
//! primitive. Each line becomes a typed [`CommandNode`]; meta commands this
//! crate knows are parsed into [`MetaCommand`] variants and everything else
//! is kept as [`MetaCommand::Opaque`].

pub mod cache;
pub mod classify;
pub mod parser;

pub use cache::DocumentCache;
pub use classify::{Classification, ClassificationTable};
pub use parser::{parse, parse_line, ParsedFile};

use crate::bfc::BfcDirective;
use crate::color::ColorDefinition;
use crate::texture::{PeTexBox, TexmapDescriptor};
use crate::types::ColorCode;
use glam::{Mat4, Vec2, Vec3};
use serde::Serialize;

/// One line of a document.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandNode {
    /// Line type 1.
    SubfileRef {
        target: String,
        color: ColorCode,
        matrix: Mat4,
    },
    /// Line type 2.
    Edge { color: ColorCode, vertices: [Vec3; 2] },
    /// Line type 3, optionally followed by one UV per vertex.
    Triangle {
        color: ColorCode,
        vertices: [Vec3; 3],
        uvs: Option<[Vec2; 3]>,
    },
    /// Line type 4, optionally followed by one UV per vertex.
    Quad {
        color: ColorCode,
        vertices: [Vec3; 4],
        uvs: Option<[Vec2; 4]>,
    },
    /// Line type 5. Drawn only when both control points are on the same side
    /// of the line as seen by the viewer.
    Line {
        color: ColorCode,
        vertices: [Vec3; 2],
        controls: [Vec3; 2],
    },
    Meta(MetaCommand),
    /// A `0 !: ` line: geometry that only exists while a texmap is active.
    TexmapGeometry(Box<CommandNode>),
}

impl CommandNode {
    pub fn is_geometry(&self) -> bool {
        matches!(
            self,
            CommandNode::Edge { .. }
                | CommandNode::Triangle { .. }
                | CommandNode::Quad { .. }
                | CommandNode::Line { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TexmapCommand {
    Start(TexmapDescriptor),
    Next(TexmapDescriptor),
    Fallback,
    End,
}

/// Meta commands the resolver understands.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaCommand {
    Bfc(BfcDirective),
    Texmap(TexmapCommand),
    PeTexPath {
        path: i32,
        subpath: Option<i32>,
    },
    PeTexInfo {
        bounds: Option<PeTexBox>,
        payload: String,
    },
    PeTexNextShear,
    Colour(ColorDefinition),
    Step,
    Save,
    Clear,
    Print(String),
    GroupDef {
        id: Option<String>,
        name: Option<String>,
    },
    GroupNext {
        id: Option<String>,
    },
    GroupBegin(String),
    GroupEnd,
    Camera(String),
    Light(String),
    Comment(String),
    Opaque(String),
}

/// Header lines at the top of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentHeader {
    pub description: Option<String>,
    pub name: Option<String>,
    pub author: Option<String>,
    /// Type text from `!LDRAW_ORG` and friends, e.g. `Part` or `Unofficial_Subpart`.
    pub part_type: Option<String>,
    pub qualifiers: Vec<String>,
    pub license: Option<String>,
    pub category: Option<String>,
    pub keywords: Vec<String>,
    pub help: Vec<String>,
    pub history: Vec<String>,
}

/// A line that was skipped while parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MalformedLine {
    pub line: usize,
    pub reason: String,
}

/// A parsed document. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Normalized (lower-case, forward slash) name.
    pub name: String,
    pub header: DocumentHeader,
    pub classification: Classification,
    pub commands: Vec<CommandNode>,
    /// Whether the document draws anything at its own top level.
    pub has_geometry: bool,
    pub malformed: Vec<MalformedLine>,
}

impl Document {
    pub fn subfile_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, CommandNode::SubfileRef { .. }))
            .count()
    }

    pub fn geometry_count(&self) -> usize {
        self.commands.iter().filter(|c| c.is_geometry()).count()
    }
}

/// Binary data embedded with `0 !DATA`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedData {
    pub name: String,
    pub bytes: Vec<u8>,
}
