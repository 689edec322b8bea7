//! Shared types used throughout the library.

mod transform;

pub use transform::{
    determinant, is_degenerate, is_mirrored, parse_matrix, quantize, round_matrix,
    AxisConvention, MatrixSignature,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// A color code as written in a document.
///
/// Numeric codes (`4`), direct colors (`#FF0000`, `0x2FF0000`) and the
/// two special codes are all carried verbatim; the Color Table decides
/// what they mean.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColorCode(String);

impl ColorCode {
    /// The "use the current color" code.
    pub const INHERIT: &'static str = "16";
    /// The "use the edge color of the current color" code.
    pub const EDGE: &'static str = "24";

    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_string())
    }

    pub fn inherit() -> Self {
        Self(Self::INHERIT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_inherit(&self) -> bool {
        self.0 == Self::INHERIT
    }

    pub fn is_edge(&self) -> bool {
        self.0 == Self::EDGE
    }

    /// Substitute the working color for code 16.
    pub fn resolve_against(&self, working: &ColorCode) -> ColorCode {
        if self.is_inherit() {
            working.clone()
        } else {
            self.clone()
        }
    }

    /// The numeric value of the code, if it is a plain decimal.
    pub fn as_number(&self) -> Option<u32> {
        self.0.parse().ok()
    }
}

impl Default for ColorCode {
    fn default() -> Self {
        Self::inherit()
    }
}

impl fmt::Display for ColorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ColorCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

impl From<u32> for ColorCode {
    fn from(code: u32) -> Self {
        Self(code.to_string())
    }
}

/// Polygon vertex winding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Winding {
    #[default]
    Ccw,
    Cw,
}

impl Winding {
    pub fn flipped(self) -> Self {
        match self {
            Winding::Ccw => Winding::Cw,
            Winding::Cw => Winding::Ccw,
        }
    }

    /// Flip when `invert` is set.
    pub fn flipped_if(self, invert: bool) -> Self {
        if invert {
            self.flipped()
        } else {
            self
        }
    }
}

/// Normalize a document name for lookups.
///
/// Names are case-insensitive, may use either slash, and sometimes carry
/// doubled separators or stray whitespace.
pub fn normalize_name(name: &str) -> String {
    let mut normalized = name.trim().to_lowercase().replace('\\', "/");
    while normalized.contains("//") {
        normalized = normalized.replace("//", "/");
    }
    normalized
}
