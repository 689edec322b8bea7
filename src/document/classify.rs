//! Document classification and the part/instance boundary table.

use super::{Document, DocumentHeader};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Model,
    Part,
    Subpart,
    Primitive,
    Shortcut,
    Configuration,
}

impl Classification {
    /// Classify from the header type text. No type at all means a model.
    pub fn from_header(header: &DocumentHeader) -> Self {
        let Some(part_type) = header.part_type.as_deref() else {
            return Classification::Model;
        };
        let lower = part_type.to_ascii_lowercase();
        if lower.contains("primitive") {
            Classification::Primitive
        } else if lower.contains("subpart") {
            Classification::Subpart
        } else if lower.contains("part") {
            Classification::Part
        } else if lower.contains("shortcut") {
            Classification::Shortcut
        } else if lower.contains("model") {
            Classification::Model
        } else if lower.contains("configuration") {
            Classification::Configuration
        } else {
            Classification::Part
        }
    }
}

/// Studs that `no_studs` drops and `stud_logo` replaces.
pub const STUD_NAMES: &[&str] = &[
    "stud.dat",
    "stud2.dat",
    "stud6.dat",
    "stud7.dat",
    "stud10.dat",
    "stud13.dat",
    "stud15.dat",
    "stud20.dat",
    "studa.dat",
    "stud2a.dat",
    "stud6a.dat",
    "stud15a.dat",
];

pub fn is_stud(name: &str) -> bool {
    STUD_NAMES.contains(&name)
}

/// `stud2.dat` with logo `logo5` becomes `stud2-logo5.dat`.
pub fn stud_logo_variant(name: &str, logo: &str) -> Option<String> {
    if !is_stud(name) {
        return None;
    }
    let (stem, ext) = name.rsplit_once('.')?;
    Some(format!("{}-{}.{}", stem, logo, ext))
}

fn default_split() -> BTreeSet<String> {
    ["u9158.dat", "4493c04.dat", "99141c01.dat"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Decides which documents start a new instance.
///
/// A document is part-like when its header says part, when it is a shortcut
/// (unless shortcuts are treated as models) or when it has geometry of its
/// own. Names in `split` are never part-like, so their sub-parts become
/// separate instances; names in `merge` are always part-like, so the whole
/// document becomes one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationTable {
    pub split: BTreeSet<String>,
    pub merge: BTreeSet<String>,
    pub treat_shortcuts_as_models: bool,
}

impl Default for ClassificationTable {
    fn default() -> Self {
        Self {
            split: default_split(),
            merge: BTreeSet::new(),
            treat_shortcuts_as_models: false,
        }
    }
}

impl ClassificationTable {
    pub fn with_split(mut self, name: &str) -> Self {
        self.split.insert(crate::types::normalize_name(name));
        self
    }

    pub fn with_merge(mut self, name: &str) -> Self {
        self.merge.insert(crate::types::normalize_name(name));
        self
    }

    pub fn is_split(&self, document: &Document) -> bool {
        self.split.contains(&document.name)
    }

    pub fn is_part_like(&self, document: &Document) -> bool {
        if self.is_split(document) {
            return false;
        }
        if self.merge.contains(&document.name) {
            return true;
        }
        let by_type = match document.classification {
            Classification::Part => true,
            Classification::Shortcut => !self.treat_shortcuts_as_models,
            _ => false,
        };
        by_type || document.has_geometry
    }
}
