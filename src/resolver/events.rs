//! Scene events passed through to the consumer in walk order.

use crate::document::MetaCommand;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SceneEventKind {
    SubmodelBegin { name: String },
    SubmodelEnd { name: String },
    Step,
    Save,
    Clear,
    Print { text: String },
    GroupDef { id: Option<String>, name: Option<String> },
    GroupNext { id: Option<String> },
    GroupBegin { name: String },
    GroupEnd,
    Camera { args: String },
    Light { args: String },
}

impl SceneEventKind {
    /// The event a meta command produces, if any.
    pub fn from_meta(meta: &MetaCommand) -> Option<Self> {
        let kind = match meta {
            MetaCommand::Step => SceneEventKind::Step,
            MetaCommand::Save => SceneEventKind::Save,
            MetaCommand::Clear => SceneEventKind::Clear,
            MetaCommand::Print(text) => SceneEventKind::Print { text: text.clone() },
            MetaCommand::GroupDef { id, name } => SceneEventKind::GroupDef {
                id: id.clone(),
                name: name.clone(),
            },
            MetaCommand::GroupNext { id } => SceneEventKind::GroupNext { id: id.clone() },
            MetaCommand::GroupBegin(name) => SceneEventKind::GroupBegin { name: name.clone() },
            MetaCommand::GroupEnd => SceneEventKind::GroupEnd,
            MetaCommand::Camera(args) => SceneEventKind::Camera { args: args.clone() },
            MetaCommand::Light(args) => SceneEventKind::Light { args: args.clone() },
            _ => return None,
        };
        Some(kind)
    }
}

/// A model-level meta command or submodel boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SceneEvent {
    pub document: String,
    /// Submodel nesting depth; the root model is 0.
    pub depth: usize,
    /// Number of instances emitted before this event.
    pub instances_before: usize,
    #[serde(flatten)]
    pub kind: SceneEventKind,
}
