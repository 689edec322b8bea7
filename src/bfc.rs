//! Back-face culling state machine.
//!
//! Each document walk owns one [`BfcState`]. Directives move it forward with
//! [`apply`], and polygons ask it for their final winding with
//! [`BfcState::face_winding`]. Inversion is tracked as a single parity bit:
//! the `INVERTNEXT` chain of the path so far XOR whether the accumulated
//! matrix mirrors space. A negative determinant therefore flips the winding
//! on its own and cancels out when `INVERTNEXT` was also given.

use crate::types::{is_degenerate, is_mirrored, Winding};
use glam::Mat4;
use serde::Serialize;

/// One `0 BFC ...` line. Several options may share a line (`CERTIFY CCW`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BfcDirective {
    pub certify: Option<bool>,
    pub clip: Option<bool>,
    pub winding: Option<Winding>,
    pub invert_next: bool,
}

impl BfcDirective {
    /// Parse the words after `BFC`. Returns `None` if no word is recognized.
    pub fn parse(args: &[&str]) -> Option<Self> {
        let mut directive = Self::default();
        let mut recognized = false;
        for arg in args {
            recognized = true;
            match arg.to_ascii_uppercase().as_str() {
                "CERTIFY" => directive.certify = Some(true),
                "NOCERTIFY" => directive.certify = Some(false),
                "CLIP" => directive.clip = Some(true),
                "NOCLIP" => directive.clip = Some(false),
                "CCW" => directive.winding = Some(Winding::Ccw),
                "CW" => directive.winding = Some(Winding::Cw),
                "INVERTNEXT" => directive.invert_next = true,
                _ => recognized = false,
            }
            if !recognized {
                return None;
            }
        }
        recognized.then_some(directive)
    }
}

/// Culling state of one document walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BfcState {
    /// Unknown until the first directive or a degenerate matrix decides it.
    pub certified: Option<bool>,
    pub local_cull: bool,
    /// Effective winding, already corrected for inversion.
    pub winding: Winding,
    pub invert_next: bool,
    /// Whether every ancestor since the part boundary allows culling.
    pub inherited_cull: bool,
    /// `INVERTNEXT` parity along the path to this document.
    pub accumulated_invert: bool,
}

impl BfcState {
    /// Fresh state for a part boundary.
    pub fn new() -> Self {
        Self::for_document(&Mat4::IDENTITY, false, true)
    }

    /// State for a document reached under `matrix`.
    pub fn for_document(matrix: &Mat4, accumulated_invert: bool, inherited_cull: bool) -> Self {
        let invert = accumulated_invert ^ is_mirrored(matrix);
        Self {
            certified: if is_degenerate(matrix) { Some(false) } else { None },
            local_cull: true,
            winding: Winding::Ccw.flipped_if(invert),
            invert_next: false,
            inherited_cull,
            accumulated_invert,
        }
    }

    /// Winding to emit a polygon with, or `None` when culling does not apply.
    pub fn face_winding(&self) -> Option<Winding> {
        self.culls().then_some(self.winding)
    }

    fn culls(&self) -> bool {
        self.certified == Some(true) && self.local_cull && self.inherited_cull
    }

    /// Inversion parity handed to a referenced document.
    pub fn child_invert(&self) -> bool {
        self.accumulated_invert ^ self.invert_next
    }

    /// Whether a referenced document may cull at all.
    pub fn child_cull(&self) -> bool {
        self.culls()
    }

    /// Clear `INVERTNEXT` after a command that did not set it.
    pub fn end_command(&mut self, set_invert_next: bool) {
        if !set_invert_next {
            self.invert_next = false;
        }
    }
}

impl Default for BfcState {
    fn default() -> Self {
        Self::new()
    }
}

/// Transition function for one directive.
///
/// `matrix` is the accumulated matrix of the document the directive belongs
/// to and `accumulated_invert` its `INVERTNEXT` parity.
pub fn apply(state: BfcState, directive: &BfcDirective, matrix: &Mat4, accumulated_invert: bool) -> BfcState {
    let mut next = state;

    if next.certified.is_none() {
        next.certified = Some(directive.certify.unwrap_or(true));
    }
    if is_degenerate(matrix) {
        next.certified = Some(false);
    }

    if let Some(clip) = directive.clip {
        next.local_cull = clip;
    }

    if let Some(winding) = directive.winding {
        next.winding = winding.flipped_if(accumulated_invert ^ is_mirrored(matrix));
    }

    if directive.invert_next {
        next.invert_next = true;
    }

    next.accumulated_invert = accumulated_invert;
    next
}
