//! Per-frame walk state.
//!
//! Every document walk owns a [`ResolutionContext`]. Children get a derived
//! copy, so nothing a child does is visible to its siblings.

use crate::bfc::BfcState;
use crate::texture::legacy::PeTexSignature;
use crate::texture::{PeTexInfo, TexmapDescriptor, TexmapSignature};
use crate::types::ColorCode;
use glam::Mat4;
use std::collections::BTreeMap;

/// `!TEXMAP` state of one document walk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TexmapState {
    stack: Vec<TexmapDescriptor>,
    next: Option<TexmapDescriptor>,
    inherited: Option<TexmapDescriptor>,
    fallback: bool,
}

impl TexmapState {
    pub fn inherit(active: Option<TexmapDescriptor>) -> Self {
        Self {
            inherited: active,
            ..Default::default()
        }
    }

    /// `NEXT` wins over the innermost `START`, which wins over the parent's.
    pub fn active(&self) -> Option<&TexmapDescriptor> {
        self.next
            .as_ref()
            .or(self.stack.last())
            .or(self.inherited.as_ref())
    }

    pub fn inherited(&self) -> Option<&TexmapDescriptor> {
        self.inherited.as_ref()
    }

    pub fn start(&mut self, descriptor: TexmapDescriptor) {
        self.stack.push(descriptor);
        self.fallback = false;
    }

    pub fn set_next(&mut self, descriptor: TexmapDescriptor) {
        self.next = Some(descriptor);
    }

    pub fn begin_fallback(&mut self) {
        if !self.stack.is_empty() {
            self.fallback = true;
        }
    }

    pub fn end(&mut self) {
        self.stack.pop();
        self.fallback = false;
    }

    /// Inside `FALLBACK ... END` of a mapping that is in effect.
    pub fn in_fallback(&self) -> bool {
        self.fallback && !self.stack.is_empty()
    }

    /// Drop a pending `NEXT` once a line has used it.
    pub fn consume_next(&mut self) {
        self.next = None;
    }
}

/// `PE_TEX` descriptors visible to one document walk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeTexState {
    /// `PE_TEX_PATH -1` entries declared by this document.
    own: Vec<PeTexInfo>,
    inherited: Vec<PeTexInfo>,
    /// Entries for the document's n-th subfile reference.
    by_index: BTreeMap<usize, Vec<PeTexInfo>>,
    /// `PE_TEX_PATH n m` entries, handed to subfile n as its own table.
    nested: BTreeMap<usize, BTreeMap<usize, Vec<PeTexInfo>>>,
    path: Option<(i32, Option<i32>)>,
    shear: bool,
    subfile_index: usize,
    ordinal: usize,
}

impl PeTexState {
    pub fn inherit(list: Vec<PeTexInfo>, table: BTreeMap<usize, Vec<PeTexInfo>>) -> Self {
        Self {
            inherited: list,
            by_index: table,
            ..Default::default()
        }
    }

    /// Candidates for this document's own polygons.
    pub fn candidates(&self) -> &[PeTexInfo] {
        if self.own.is_empty() {
            &self.inherited
        } else {
            &self.own
        }
    }

    pub fn is_empty(&self) -> bool {
        self.own.is_empty() && self.inherited.is_empty() && self.by_index.is_empty() && self.nested.is_empty()
    }

    pub fn set_path(&mut self, path: i32, subpath: Option<i32>) {
        self.path = Some((path, subpath));
    }

    pub fn path(&self) -> Option<(i32, Option<i32>)> {
        self.path
    }

    pub fn set_shear(&mut self) {
        self.shear = true;
    }

    /// Index of the next `PE_TEX_INFO` in this document.
    pub fn next_ordinal(&mut self) -> usize {
        let ordinal = self.ordinal;
        self.ordinal += 1;
        ordinal
    }

    pub fn subfile_index(&self) -> usize {
        self.subfile_index
    }

    pub fn advance_subfile(&mut self) {
        self.subfile_index += 1;
    }

    /// File an entry under the current path. Returns false when there is no
    /// usable path.
    pub fn add(&mut self, mut info: PeTexInfo) -> bool {
        let Some((path, subpath)) = self.path else {
            return false;
        };
        info.shear = std::mem::take(&mut self.shear);
        match (path, subpath) {
            (-1, _) => self.own.push(info),
            (p, None) if p >= 0 => self.by_index.entry(p as usize).or_default().push(info),
            (p, Some(s)) if p >= 0 && s >= 0 => self
                .nested
                .entry(p as usize)
                .or_default()
                .entry(s as usize)
                .or_default()
                .push(info),
            _ => return false,
        }
        true
    }

    /// Candidate list handed to subfile `index`: its specific entries first,
    /// then this document's list.
    pub fn child_list(&self, index: usize) -> Vec<PeTexInfo> {
        self.by_index
            .get(&index)
            .into_iter()
            .flatten()
            .chain(self.candidates())
            .cloned()
            .collect()
    }

    pub fn child_table(&self, index: usize) -> BTreeMap<usize, Vec<PeTexInfo>> {
        self.nested.get(&index).cloned().unwrap_or_default()
    }

    /// Identity of what this walk inherited.
    pub fn signature(&self) -> Vec<(Option<usize>, PeTexSignature)> {
        let list = self.inherited.iter().map(|info| (None, info.signature()));
        let table = self
            .by_index
            .iter()
            .flat_map(|(index, infos)| infos.iter().map(move |info| (Some(*index), info.signature())));
        list.chain(table).collect()
    }
}

/// Stack-threaded state of one document walk.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionContext {
    /// Maps document space into the frame geometry is collected in.
    pub matrix: Mat4,
    pub color: ColorCode,
    pub bfc: BfcState,
    pub texmap: TexmapState,
    pub pe_tex: PeTexState,
}

impl ResolutionContext {
    pub fn new(matrix: Mat4, color: ColorCode) -> Self {
        Self {
            matrix,
            color,
            bfc: BfcState::for_document(&matrix, false, true),
            texmap: TexmapState::default(),
            pe_tex: PeTexState::default(),
        }
    }

    /// Context for the subfile about to be walked in the same frame.
    pub fn derive(&self, matrix: Mat4, color: ColorCode) -> Self {
        let index = self.pe_tex.subfile_index();
        Self {
            matrix,
            color,
            bfc: BfcState::for_document(&matrix, self.bfc.child_invert(), self.bfc.child_cull()),
            texmap: TexmapState::inherit(self.texmap.active().cloned()),
            pe_tex: PeTexState::inherit(self.pe_tex.child_list(index), self.pe_tex.child_table(index)),
        }
    }

    /// Context for a part that starts a new bucket at `origin`.
    ///
    /// Texture descriptors are moved into the bucket frame with `to_bucket`;
    /// `None` (a degenerate placement) drops them. BFC starts fresh.
    pub fn boundary(&self, origin: Mat4, color: ColorCode, to_bucket: Option<Mat4>) -> Self {
        let index = self.pe_tex.subfile_index();
        let (texmap, pe_tex) = match to_bucket {
            Some(m) => {
                let texmap = self.texmap.active().map(|t| t.transformed(&m));
                let list = self.pe_tex.child_list(index).iter().map(|i| i.transformed(&m)).collect();
                let table = self
                    .pe_tex
                    .child_table(index)
                    .into_iter()
                    .map(|(i, infos)| (i, infos.iter().map(|info| info.transformed(&m)).collect()))
                    .collect();
                (TexmapState::inherit(texmap), PeTexState::inherit(list, table))
            }
            None => (TexmapState::default(), PeTexState::default()),
        };
        Self {
            matrix: origin,
            color,
            bfc: BfcState::for_document(&origin, false, true),
            texmap,
            pe_tex,
        }
    }

    pub fn texmap_signature(&self) -> Option<TexmapSignature> {
        self.texmap.inherited().map(TexmapDescriptor::signature)
    }
}
