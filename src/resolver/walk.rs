//! The document walk behind [`Resolver::resolve`](super::Resolver::resolve).
//!
//! The walk keeps an explicit stack of frames instead of recursing, so deep
//! or adversarial inputs cannot exhaust the thread stack. At most one bucket
//! is collected at a time: a part that starts a bucket is walked to the end,
//! sub-parts included, before the next instance at model level begins.

use super::cache::{EdgeRecord, Face, FaceUv, GeometryBucket, GeometryCache, GeometryKey, Instance};
use super::context::ResolutionContext;
use super::events::{SceneEvent, SceneEventKind};
use super::{CancelFlag, ResolveOptions, ResolveOutput};
use crate::bfc;
use crate::color::ColorTable;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Severity};
use crate::document::classify::{is_stud, stud_logo_variant};
use crate::document::{Classification, CommandNode, Document, DocumentCache, MetaCommand, TexmapCommand};
use crate::texture::legacy::project_first;
use crate::texture::{decode_base64_png, PeTexBox, PeTexInfo};
use crate::types::{is_degenerate, is_mirrored, round_matrix, ColorCode, Winding};
use glam::{Mat4, Vec2, Vec3};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Model level, nothing is collected.
    Model,
    /// Adds to the pending bucket. The owner started it.
    Part { owner: bool },
    /// Collects a split document's own lines, skipping its references.
    Residual,
}

impl Role {
    fn collects(self) -> bool {
        !matches!(self, Role::Model)
    }

    fn owns_bucket(self) -> bool {
        matches!(self, Role::Part { owner: true } | Role::Residual)
    }
}

struct Frame {
    document: Arc<Document>,
    cursor: usize,
    ctx: ResolutionContext,
    role: Role,
    /// Submodel nesting, only meaningful for model frames.
    depth: usize,
    /// Emits `SubmodelEnd` when popped.
    announced: bool,
}

struct InstancePlan {
    instance: Instance,
    /// Set when the bucket still has to be built.
    ctx: Option<ResolutionContext>,
    degenerate: bool,
}

pub(super) struct Walk<'a> {
    documents: &'a DocumentCache,
    colors: &'a ColorTable,
    options: &'a ResolveOptions,
    cancel: &'a CancelFlag,
    twist: Mat4,
    untwist: Mat4,
    stack: Vec<Frame>,
    pending: Option<(GeometryKey, GeometryBucket)>,
    geometry: GeometryCache,
    instances: Vec<Instance>,
    events: Vec<SceneEvent>,
    diagnostics: Diagnostics,
    reported: HashSet<DiagnosticKind>,
    cancelled: bool,
}

impl<'a> Walk<'a> {
    pub(super) fn new(
        documents: &'a DocumentCache,
        colors: &'a ColorTable,
        options: &'a ResolveOptions,
        cancel: &'a CancelFlag,
    ) -> Self {
        Self {
            documents,
            colors,
            options,
            cancel,
            twist: options.convention.twist(),
            untwist: options.convention.untwist(),
            stack: Vec::new(),
            pending: None,
            geometry: GeometryCache::new(),
            instances: Vec::new(),
            events: Vec::new(),
            diagnostics: Diagnostics::new(),
            reported: HashSet::new(),
            cancelled: false,
        }
    }

    pub(super) fn run(mut self, root: Arc<Document>, color: ColorCode) -> ResolveOutput {
        let name = root.name.clone();
        self.report_malformed(&root);
        let matrix = self.twist;
        self.enter(None, root, color, matrix);

        loop {
            let Some(index) = self.stack.len().checked_sub(1) else {
                break;
            };
            // never leave a bucket half built
            if self.pending.is_none() && self.cancel.is_cancelled() {
                tracing::debug!(root = %name, instances = self.instances.len(), "resolve cancelled");
                self.cancelled = true;
                break;
            }
            let frame = &mut self.stack[index];
            let document = frame.document.clone();
            let cursor = frame.cursor;
            frame.cursor += 1;
            match document.commands.get(cursor) {
                Some(command) => self.execute(index, command),
                None => self.leave(),
            }
        }

        self.finish(name)
    }

    fn execute(&mut self, index: usize, command: &CommandNode) {
        if self.stack[index].ctx.texmap.in_fallback()
            && !matches!(command, CommandNode::Meta(MetaCommand::Texmap(TexmapCommand::End)))
        {
            if matches!(command, CommandNode::SubfileRef { .. }) {
                self.stack[index].ctx.pe_tex.advance_subfile();
            }
            return;
        }

        match command {
            CommandNode::SubfileRef { target, color, matrix } => {
                self.subfile(index, target, color, matrix);
                self.finish_line(index, true);
            }
            CommandNode::Triangle { color, vertices, uvs } => {
                self.polygon(index, vertices, color, uvs.as_ref().map(|uvs| uvs.as_slice()));
                self.finish_line(index, false);
            }
            CommandNode::Quad { color, vertices, uvs } => {
                self.polygon(index, vertices, color, uvs.as_ref().map(|uvs| uvs.as_slice()));
                self.finish_line(index, false);
            }
            CommandNode::Edge { color, vertices } => {
                self.edge(index, vertices, None, color);
                self.finish_line(index, false);
            }
            CommandNode::Line {
                color,
                vertices,
                controls,
            } => {
                self.edge(index, vertices, Some(controls), color);
                self.finish_line(index, false);
            }
            CommandNode::Meta(meta) => {
                let set_invert_next = self.meta(index, meta);
                self.stack[index].ctx.bfc.end_command(set_invert_next);
            }
            CommandNode::TexmapGeometry(inner) => {
                if self.options.meta_texmap && self.stack[index].ctx.texmap.active().is_some() {
                    self.execute(index, inner);
                }
            }
        }
    }

    fn finish_line(&mut self, index: usize, subfile: bool) {
        let ctx = &mut self.stack[index].ctx;
        ctx.texmap.consume_next();
        ctx.bfc.end_command(false);
        if subfile {
            ctx.pe_tex.advance_subfile();
        }
    }

    fn subfile(&mut self, index: usize, target: &str, color: &ColorCode, matrix: &Mat4) {
        if self.stack[index].role == Role::Residual {
            return;
        }
        let Some(name) = self.reference_name(target) else {
            return;
        };

        if self.stack.iter().any(|frame| frame.document.name == name) {
            let message = format!("{} references itself through {}", name, self.stack[index].document.name);
            self.report_once(Severity::Warning, DiagnosticKind::RecursiveReference { name }, message);
            return;
        }
        if self.stack.len() >= self.options.max_depth {
            let message = format!("{} exceeds the nesting limit of {}", name, self.options.max_depth);
            self.report_once(Severity::Warning, DiagnosticKind::DepthLimit { name }, message);
            return;
        }
        let Some(document) = self.documents.get(&name) else {
            let from = self.stack[index].document.name.clone();
            self.diagnostics.missing_reference(&name, &from);
            return;
        };
        self.report_malformed(&document);

        let ctx = &self.stack[index].ctx;
        let color = color.resolve_against(&ctx.color);
        let child_matrix = ctx.matrix * *matrix;
        self.enter(Some(index), document, color, child_matrix);
    }

    /// Name to load for a reference, after stud options. `None` skips it.
    fn reference_name(&self, target: &str) -> Option<String> {
        if is_stud(target) {
            if self.options.no_studs {
                return None;
            }
            if let Some(logo) = &self.options.stud_logo {
                if let Some(variant) = stud_logo_variant(target, logo) {
                    if self.documents.get(&variant).is_some() {
                        return Some(variant);
                    }
                }
            }
        }
        Some(target.to_string())
    }

    /// Push the frame for `document`, reached from the frame at `parent`.
    fn enter(&mut self, parent: Option<usize>, document: Arc<Document>, color: ColorCode, child_matrix: Mat4) {
        let origin;
        let (parent_ctx, parent_role, parent_depth) = match parent {
            Some(i) => (&self.stack[i].ctx, self.stack[i].role, self.stack[i].depth),
            None => {
                origin = ResolutionContext::new(self.twist, color.clone());
                (&origin, Role::Model, 0)
            }
        };
        let degenerate = is_degenerate(&child_matrix);

        if parent_role.collects() {
            let ctx = parent_ctx.derive(child_matrix, color);
            if degenerate {
                self.report_degenerate(&document.name);
            }
            self.stack.push(Frame {
                document,
                cursor: 0,
                ctx,
                role: Role::Part { owner: false },
                depth: parent_depth,
                announced: false,
            });
            return;
        }

        if self.options.classification.is_part_like(&document) {
            let plan = self.plan_instance(parent_ctx, &document, color, child_matrix, false);
            self.start_instance(document, plan, Role::Part { owner: true });
            return;
        }

        let residual = (self.options.classification.is_split(&document) && document.has_geometry)
            .then(|| self.plan_instance(parent_ctx, &document, color.clone(), child_matrix, true));
        let ctx = parent_ctx.derive(child_matrix, color);
        let depth = if parent.is_some() { parent_depth + 1 } else { 0 };
        let announced = parent.is_some() && document.classification == Classification::Model;

        if announced {
            let name = document.name.clone();
            self.push_event(&name, depth, SceneEventKind::SubmodelBegin { name: name.clone() });
        }
        if degenerate {
            self.report_degenerate(&document.name);
        }
        tracing::trace!(document = %document.name, depth, "entering model");
        self.stack.push(Frame {
            document: document.clone(),
            cursor: 0,
            ctx,
            role: Role::Model,
            depth,
            announced,
        });
        if let Some(plan) = residual {
            self.start_instance(document, plan, Role::Residual);
        }
    }

    fn plan_instance(
        &self,
        parent: &ResolutionContext,
        document: &Document,
        color: ColorCode,
        child_matrix: Mat4,
        residual: bool,
    ) -> InstancePlan {
        let degenerate = is_degenerate(&child_matrix);
        let to_bucket = (!degenerate).then(|| self.twist * child_matrix.inverse());
        let mut ctx = parent.boundary(self.twist, color.clone(), to_bucket);
        if degenerate {
            ctx.bfc.certified = Some(false);
        }
        let key = GeometryKey {
            document: document.name.clone(),
            color: color.clone(),
            texmap: ctx.texmap_signature(),
            legacy: ctx.pe_tex.signature(),
            residual,
            uncertified: degenerate,
        };
        let placement = round_matrix(&(child_matrix * self.untwist), self.options.placement_precision);
        let build = !self.geometry.contains(&key);
        InstancePlan {
            instance: Instance {
                key,
                placement,
                color,
                mirrored: is_mirrored(&placement),
            },
            ctx: build.then_some(ctx),
            degenerate,
        }
    }

    fn start_instance(&mut self, document: Arc<Document>, plan: InstancePlan, role: Role) {
        if plan.degenerate {
            self.report_degenerate(&document.name);
        }
        if let Some(ctx) = plan.ctx {
            tracing::trace!(document = %document.name, color = %plan.instance.color, "building bucket");
            self.pending = Some((plan.instance.key.clone(), GeometryBucket::default()));
            self.stack.push(Frame {
                document,
                cursor: 0,
                ctx,
                role,
                depth: 0,
                announced: false,
            });
        }
        self.instances.push(plan.instance);
    }

    fn leave(&mut self) {
        let Some(frame) = self.stack.pop() else {
            return;
        };
        if frame.role.owns_bucket() {
            if let Some((key, bucket)) = self.pending.take() {
                tracing::trace!(
                    document = %key.document,
                    faces = bucket.faces.len(),
                    edges = bucket.edges.len(),
                    "bucket complete"
                );
                self.geometry.insert(key, bucket);
            }
        }
        if frame.announced {
            let name = frame.document.name.clone();
            self.push_event(&name, frame.depth, SceneEventKind::SubmodelEnd { name: name.clone() });
        }
    }

    fn polygon(&mut self, index: usize, vertices: &[Vec3], color: &ColorCode, explicit: Option<&[Vec2]>) {
        let frame = &self.stack[index];
        if !frame.role.collects() {
            return;
        }
        let ctx = &frame.ctx;
        let mut points: Vec<Vec3> = vertices.iter().map(|v| ctx.matrix.transform_point3(*v)).collect();
        let mut coords = explicit.map(<[Vec2]>::to_vec);
        if points.len() == 4 {
            repair_bowtie(&mut points, coords.as_deref_mut());
        }

        let winding = if self.options.meta_bfc {
            ctx.bfc.face_winding()
        } else {
            None
        };
        if winding == Some(Winding::Cw) {
            points[1..].reverse();
            if let Some(coords) = coords.as_mut() {
                coords[1..].reverse();
            }
        }

        let uv = self.face_uv(ctx, &points, coords);
        let face = Face {
            vertices: points,
            color: color.resolve_against(&ctx.color),
            double_sided: winding.is_none(),
            uv,
        };
        if let Some((_, bucket)) = self.pending.as_mut() {
            bucket.faces.push(face);
        }
    }

    fn face_uv(&self, ctx: &ResolutionContext, points: &[Vec3], explicit: Option<Vec<Vec2>>) -> Option<FaceUv> {
        if let Some(coords) = explicit {
            let texture = ctx
                .pe_tex
                .candidates()
                .first()
                .map(|info| info.image.clone())
                .or_else(|| ctx.texmap.active().map(|t| t.texture.clone()))?;
            return Some(FaceUv { texture, coords });
        }
        if self.options.meta_texmap {
            if let Some(texmap) = ctx.texmap.active() {
                return texmap.project(points).map(|coords| FaceUv {
                    texture: texmap.texture.clone(),
                    coords,
                });
            }
        }
        if self.options.meta_pe_tex {
            return project_first(ctx.pe_tex.candidates(), points).map(|(info, coords)| FaceUv {
                texture: info.image.clone(),
                coords,
            });
        }
        None
    }

    fn edge(&mut self, index: usize, vertices: &[Vec3; 2], controls: Option<&[Vec3; 2]>, color: &ColorCode) {
        let frame = &self.stack[index];
        if !frame.role.collects() {
            return;
        }
        let m = frame.ctx.matrix;
        let record = EdgeRecord {
            vertices: vertices.map(|v| m.transform_point3(v)),
            controls: controls.map(|c| c.map(|v| m.transform_point3(v))),
            color: color.resolve_against(&frame.ctx.color),
        };
        if let Some((_, bucket)) = self.pending.as_mut() {
            bucket.edges.push(record);
        }
    }

    /// Apply a meta command. Returns whether it set `INVERTNEXT`.
    fn meta(&mut self, index: usize, meta: &MetaCommand) -> bool {
        let options = self.options;
        match meta {
            MetaCommand::Bfc(directive) if options.meta_bfc => {
                let ctx = &mut self.stack[index].ctx;
                ctx.bfc = bfc::apply(ctx.bfc, directive, &ctx.matrix, ctx.bfc.accumulated_invert);
                return directive.invert_next;
            }
            MetaCommand::Texmap(command) if options.meta_texmap => {
                let ctx = &mut self.stack[index].ctx;
                match command {
                    TexmapCommand::Start(descriptor) => {
                        let descriptor = descriptor.transformed(&ctx.matrix);
                        ctx.texmap.start(descriptor);
                    }
                    TexmapCommand::Next(descriptor) => {
                        let descriptor = descriptor.transformed(&ctx.matrix);
                        ctx.texmap.set_next(descriptor);
                    }
                    TexmapCommand::Fallback => ctx.texmap.begin_fallback(),
                    TexmapCommand::End => ctx.texmap.end(),
                }
            }
            MetaCommand::PeTexPath { path, subpath } if options.meta_pe_tex => {
                self.stack[index].ctx.pe_tex.set_path(*path, *subpath);
            }
            MetaCommand::PeTexNextShear if options.meta_pe_tex => {
                self.stack[index].ctx.pe_tex.set_shear();
            }
            MetaCommand::PeTexInfo { bounds, payload } if options.meta_pe_tex => {
                self.pe_tex_info(index, bounds.as_ref(), payload);
            }
            MetaCommand::Colour(definition) => {
                if self.colors.register_if_absent(definition.clone()) {
                    tracing::debug!(code = %definition.code, name = ?definition.name, "colour defined by document");
                }
            }
            other => {
                if let Some(kind) = SceneEventKind::from_meta(other) {
                    self.model_event(index, kind);
                }
            }
        }
        false
    }

    fn pe_tex_info(&mut self, index: usize, bounds: Option<&PeTexBox>, payload: &str) {
        let frame = &mut self.stack[index];
        let Some((path, subpath)) = frame.ctx.pe_tex.path() else {
            tracing::debug!(document = %frame.document.name, "PE_TEX_INFO without PE_TEX_PATH ignored");
            return;
        };
        let ordinal = frame.ctx.pe_tex.next_ordinal();
        let label = match subpath {
            Some(subpath) => format!("{}-{}", path, subpath),
            None => path.to_string(),
        };
        let name = format!("{}/pe_tex/{}/{}.png", frame.document.name, label, ordinal);

        let mut failure = None;
        let image = self.documents.texture_with(&name, || match decode_base64_png(payload) {
            Ok(image) => Some(image),
            Err(e) => {
                failure = Some(e);
                None
            }
        });
        if let Some(e) = failure {
            let message = format!("undecodable PE_TEX_INFO image {}: {}", name, e);
            self.report_once(Severity::Warning, DiagnosticKind::InvalidTexture { name: name.clone() }, message);
        }
        if image.is_none() {
            return;
        }

        let ctx = &mut self.stack[index].ctx;
        let info = PeTexInfo {
            image: name,
            bounds: bounds.map(|b| b.transformed(&ctx.matrix)),
            shear: false,
        };
        ctx.pe_tex.add(info);
    }

    fn model_event(&mut self, index: usize, kind: SceneEventKind) {
        let frame = &self.stack[index];
        if frame.role != Role::Model {
            return;
        }
        let (name, depth) = (frame.document.name.clone(), frame.depth);
        self.push_event(&name, depth, kind);
    }

    fn push_event(&mut self, document: &str, depth: usize, kind: SceneEventKind) {
        if !self.options.record_events {
            return;
        }
        self.events.push(SceneEvent {
            document: document.to_string(),
            depth,
            instances_before: self.instances.len(),
            kind,
        });
    }

    fn report_once(&mut self, severity: Severity, kind: DiagnosticKind, message: String) {
        if self.reported.insert(kind.clone()) {
            self.diagnostics.push(Diagnostic::new(severity, kind, message));
        }
    }

    fn report_malformed(&mut self, document: &Document) {
        for malformed in &document.malformed {
            let kind = DiagnosticKind::MalformedLine {
                document: document.name.clone(),
                line: malformed.line,
            };
            let message = format!("{}:{}: {}", document.name, malformed.line, malformed.reason);
            self.report_once(Severity::Warning, kind, message);
        }
    }

    fn report_degenerate(&mut self, document: &str) {
        let message = format!("{} is placed with a singular matrix, culling disabled", document);
        self.report_once(
            Severity::Warning,
            DiagnosticKind::DegenerateMatrix {
                document: document.to_string(),
            },
            message,
        );
    }

    fn finish(self, root: String) -> ResolveOutput {
        let mut diagnostics = self.diagnostics;

        let mut codes: BTreeSet<&ColorCode> = self.instances.iter().map(|i| &i.color).collect();
        let mut textures: BTreeSet<&str> = BTreeSet::new();
        for (_, bucket) in self.geometry.iter() {
            for face in &bucket.faces {
                codes.insert(&face.color);
                if let Some(uv) = &face.uv {
                    textures.insert(&uv.texture);
                }
            }
            codes.extend(bucket.edges.iter().map(|e| &e.color));
        }

        let mut colors = BTreeMap::new();
        for code in codes {
            let definition = self.colors.resolve(code);
            if definition.is_fallback {
                diagnostics.push(Diagnostic::new(
                    Severity::Warning,
                    DiagnosticKind::UnknownColorCode {
                        code: code.to_string(),
                    },
                    format!("unknown colour code {}, using a placeholder", code),
                ));
            }
            colors.insert(code.clone(), (*definition).clone());
        }

        let mut images = BTreeMap::new();
        for name in textures {
            match self.documents.texture(name) {
                Some(image) => {
                    images.insert(name.to_string(), image);
                }
                None => diagnostics.push(Diagnostic::new(
                    Severity::Warning,
                    DiagnosticKind::InvalidTexture {
                        name: name.to_string(),
                    },
                    format!("texture {} is missing or not a PNG", name),
                )),
            }
        }

        ResolveOutput {
            root,
            instances: self.instances,
            geometry: self.geometry,
            events: self.events,
            diagnostics: diagnostics.into_vec(),
            colors,
            textures: images,
            cancelled: self.cancelled,
        }
    }
}

/// Reorder a self-intersecting quad into a simple one.
fn repair_bowtie(points: &mut [Vec3], coords: Option<&mut [Vec2]>) {
    let corner = |a: Vec3, b: Vec3, c: Vec3| (b - a).cross(c - b);
    let n_a = corner(points[0], points[1], points[2]);
    let n_b = corner(points[1], points[2], points[3]);
    let n_c = corner(points[2], points[3], points[0]);
    let swap = if n_a.dot(n_b) < 0.0 {
        Some((2, 3))
    } else if n_b.dot(n_c) < 0.0 {
        Some((1, 2))
    } else {
        None
    };
    if let Some((i, j)) = swap {
        points.swap(i, j);
        if let Some(coords) = coords {
            coords.swap(i, j);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ClassificationTable;
    use crate::resolver::Resolver;
    use crate::source::MemorySource;
    use crate::texture::image::tests::{sample_png, sample_png_base64};
    use crate::types::AxisConvention;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    const COLORS: &str = "0 !COLOUR Blue CODE 1 VALUE #0055BF EDGE #333333\n\
0 !COLOUR Green CODE 2 VALUE #257A3E EDGE #333333\n\
0 !COLOUR Red CODE 4 VALUE #C91A09 EDGE #333333\n\
0 !COLOUR Light_Grey CODE 7 VALUE #9BA19D EDGE #333333\n\
0 !COLOUR Edge_Colour CODE 24 VALUE #7F7F7F EDGE #333333\n";

    const PART: &str = "0 Plate\n0 !LDRAW_ORG Part\n3 16 0 0 0 1 0 0 0 0 1\n2 24 0 0 0 1 0 0\n";

    fn source(files: &[(&str, &str)]) -> MemorySource {
        files
            .iter()
            .fold(MemorySource::new(), |source, (name, text)| source.with_document(name, *text))
    }

    fn resolver(source: MemorySource) -> Resolver {
        Resolver::new(
            Arc::new(DocumentCache::new(source)),
            Arc::new(ColorTable::from_config(COLORS)),
        )
            .with_options(ResolveOptions::default().with_convention(AxisConvention::Native))
    }

    fn resolve(files: &[(&str, &str)]) -> ResolveOutput {
        resolver(source(files)).resolve("main.ldr", 7).unwrap()
    }

    fn kinds(output: &ResolveOutput) -> Vec<&DiagnosticKind> {
        output.diagnostics.iter().map(|d| &d.kind).collect()
    }

    fn only_face(output: &ResolveOutput, document: &str) -> Face {
        let instance = output
            .instances
            .iter()
            .find(|i| i.key.document == document)
            .unwrap();
        let bucket = output.bucket(instance).unwrap();
        assert_eq!(bucket.faces.len(), 1);
        bucket.faces[0].clone()
    }

    #[test]
    fn test_identical_references_share_a_bucket() {
        let output = resolve(&[
            (
                "main.ldr",
                "0 Main\n\
1 4 0 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n\
1 4 20 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n\
1 1 0 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n",
            ),
            ("plate.dat", PART),
        ]);
        assert_eq!(output.instances.len(), 3);
        assert_eq!(output.geometry.len(), 2);
        assert_eq!(output.instances[0].key, output.instances[1].key);
        assert_eq!(
            output.instances[1].placement.transform_point3(Vec3::ZERO),
            Vec3::new(20.0, 0.0, 0.0)
        );
        let bucket = output.bucket(&output.instances[0]).unwrap();
        assert_eq!(bucket.faces[0].color, ColorCode::new("4"));
        // edge colour 24 is left for the consumer
        assert_eq!(bucket.edges[0].color, ColorCode::new("24"));
        assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
    }

    #[test]
    fn test_missing_reference_reported_once() {
        let output = resolve(&[
            (
                "main.ldr",
                "0 Main\n\
1 4 0 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n\
1 4 0 0 0 1 0 0 0 1 0 0 0 1 gone.dat\n\
1 4 0 0 0 1 0 0 0 1 0 0 0 1 gone.dat\n\
1 2 0 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n",
            ),
            ("plate.dat", PART),
        ]);
        assert_eq!(output.instances.len(), 2);
        assert_eq!(
            kinds(&output),
            vec![&DiagnosticKind::MissingReference {
                name: "gone.dat".into()
            }]
        );
    }

    #[test]
    fn test_resolution_is_repeatable() {
        let files = [
            ("main.ldr", "0 Main\n1 4 0 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n0 STEP\n"),
            ("plate.dat", PART),
        ];
        let resolver = resolver(source(&files));
        let first = resolver.resolve("main.ldr", 7).unwrap();
        let second = resolver.resolve("main.ldr", 7).unwrap();
        assert_eq!(first.instances, second.instances);
        assert_eq!(first.events, second.events);
        assert_eq!(
            first.bucket(&first.instances[0]).unwrap(),
            second.bucket(&second.instances[0]).unwrap()
        );
    }

    #[test]
    fn test_same_content_gives_equal_geometry() {
        let output = resolve(&[
            (
                "main.ldr",
                "0 Main\n1 4 0 0 0 1 0 0 0 1 0 0 0 1 a.dat\n1 4 0 0 0 1 0 0 0 1 0 0 0 1 b.dat\n",
            ),
            ("a.dat", PART),
            ("b.dat", PART),
        ]);
        let a = output.bucket(&output.instances[0]).unwrap();
        let b = output.bucket(&output.instances[1]).unwrap();
        assert_ne!(output.instances[0].key, output.instances[1].key);
        assert_eq!(a, b);
    }

    const SUB: &str = "0 Sub\n0 !LDRAW_ORG Subpart\n0 BFC CERTIFY CCW\n3 16 0 0 0 1 0 0 0 0 1\n";

    fn winding_files(reference: &str) -> Vec<(&'static str, String)> {
        vec![
            ("main.ldr", "0 Main\n1 4 0 0 0 1 0 0 0 1 0 0 0 1 p.dat\n".to_string()),
            ("p.dat", format!("0 P\n0 !LDRAW_ORG Part\n0 BFC CERTIFY CCW\n{}\n", reference)),
            ("s.dat", SUB.to_string()),
        ]
    }

    fn resolve_owned(files: Vec<(&'static str, String)>) -> ResolveOutput {
        let source = files
            .into_iter()
            .fold(MemorySource::new(), |source, (name, text)| source.with_document(name, text));
        resolver(source).resolve("main.ldr", 7).unwrap()
    }

    #[test]
    fn test_certified_face_keeps_winding() {
        let output = resolve_owned(winding_files("1 16 0 0 0 1 0 0 0 1 0 0 0 1 s.dat"));
        let face = only_face(&output, "p.dat");
        assert!(!face.double_sided);
        assert_eq!(face.vertices, vec![Vec3::ZERO, Vec3::X, Vec3::Z]);
        assert_eq!(face.normal(), Vec3::NEG_Y);
    }

    #[test]
    fn test_mirrored_reference_flips_winding() {
        let output = resolve_owned(winding_files("1 16 0 0 0 -1 0 0 0 1 0 0 0 1 s.dat"));
        let face = only_face(&output, "p.dat");
        assert!(!face.double_sided);
        assert_eq!(face.vertices, vec![Vec3::ZERO, Vec3::Z, Vec3::NEG_X]);
        // same outward side as the unmirrored face
        assert_eq!(face.normal(), Vec3::NEG_Y);
    }

    #[test]
    fn test_invertnext_cancels_mirror() {
        let output = resolve_owned(winding_files("0 BFC INVERTNEXT\n1 16 0 0 0 -1 0 0 0 1 0 0 0 1 s.dat"));
        let face = only_face(&output, "p.dat");
        assert!(!face.double_sided);
        assert_eq!(face.vertices, vec![Vec3::ZERO, Vec3::NEG_X, Vec3::Z]);
    }

    #[test]
    fn test_degenerate_reference_disables_culling() {
        let output = resolve_owned(winding_files("1 16 0 0 0 1 0 0 0 0 0 0 0 1 s.dat"));
        let face = only_face(&output, "p.dat");
        assert!(face.double_sided);
        assert_eq!(
            kinds(&output),
            vec![&DiagnosticKind::DegenerateMatrix {
                document: "s.dat".into()
            }]
        );
    }

    #[test]
    fn test_degenerate_placement_is_never_culled() {
        let mut files = winding_files("1 16 0 0 0 1 0 0 0 1 0 0 0 1 s.dat");
        files[0].1 = "0 Main\n\
1 4 0 0 0 1 0 0 0 1 0 0 0 1 p.dat\n\
1 4 0 0 0 1 0 0 0 0 0 0 0 1 p.dat\n\
1 4 10 0 0 1 0 0 0 0 0 0 0 1 p.dat\n"
            .to_string();
        let output = resolve_owned(files);
        assert_eq!(output.instances.len(), 3);
        assert_eq!(output.geometry.len(), 2);

        let [normal, flat, flat_again] = [0, 1, 2].map(|i| &output.instances[i]);
        assert!(!normal.key.uncertified);
        assert!(flat.key.uncertified);
        assert_eq!(flat.key, flat_again.key);
        assert!(output.bucket(normal).unwrap().faces.iter().all(|f| !f.double_sided));
        let faces = &output.bucket(flat).unwrap().faces;
        assert_eq!(faces.len(), 1);
        assert!(faces[0].double_sided);
        assert_eq!(
            kinds(&output),
            vec![&DiagnosticKind::DegenerateMatrix {
                document: "p.dat".into()
            }]
        );
    }

    #[test]
    fn test_colour_defined_after_an_earlier_fallback() {
        let resolver = resolver(source(&[
            ("a.ldr", "0 A\n1 1000 0 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n"),
            (
                "b.ldr",
                "0 B\n0 !COLOUR Custom CODE 1000 VALUE #112233 EDGE #333333\n\
1 1000 0 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n",
            ),
            ("plate.dat", PART),
        ]));
        let code = ColorCode::from(1000);

        let first = resolver.resolve("a.ldr", 7).unwrap();
        assert!(first.colors[&code].is_fallback);
        assert_eq!(
            kinds(&first),
            vec![&DiagnosticKind::UnknownColorCode { code: "1000".into() }]
        );

        let second = resolver.resolve("b.ldr", 7).unwrap();
        assert!(second.diagnostics.is_empty(), "{:?}", second.diagnostics);
        assert!(!second.colors[&code].is_fallback);
        assert_eq!(second.colors[&code].rgb, [0x11, 0x22, 0x33]);
    }

    #[test]
    fn test_meta_off_means_double_sided() {
        let source = winding_files("1 16 0 0 0 -1 0 0 0 1 0 0 0 1 s.dat")
            .into_iter()
            .fold(MemorySource::new(), |source, (name, text)| source.with_document(name, text));
        let output = resolver(source)
            .with_options(
                ResolveOptions::default()
                    .with_convention(AxisConvention::Native)
                    .without_meta(),
            )
            .resolve("main.ldr", 7)
            .unwrap();
        let face = only_face(&output, "p.dat");
        assert!(face.double_sided);
        assert_eq!(face.vertices, vec![Vec3::ZERO, Vec3::NEG_X, Vec3::Z]);
    }

    #[test]
    fn test_bowtie_quad_is_repaired() {
        let mut points = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
        ];
        let mut coords = [Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0), Vec2::new(1.0, 1.0)];
        repair_bowtie(&mut points, Some(&mut coords));
        assert_eq!(points[2], Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(coords[3], Vec2::new(0.0, 1.0));

        let mut simple = [Vec3::ZERO, Vec3::X, Vec3::new(1.0, 1.0, 0.0), Vec3::Y];
        let before = simple;
        repair_bowtie(&mut simple, None);
        assert_eq!(simple, before);
    }

    #[test]
    fn test_texmap_projection_and_fallback() {
        let part = "0 Tex\n0 !LDRAW_ORG Part\n\
0 !TEXMAP START PLANAR 0 0 0 10 0 0 0 0 10 logo.png\n\
3 16 0 0 0 10 0 0 0 0 10\n\
0 !: 3 16 0 0 0 5 0 0 0 0 5\n\
0 !TEXMAP FALLBACK\n\
3 16 0 0 0 1 0 0 0 0 1\n\
0 !TEXMAP END\n\
3 16 0 0 0 2 0 0 0 0 2\n";
        let source = source(&[("main.ldr", "0 Main\n1 4 0 0 0 1 0 0 0 1 0 0 0 1 tex.dat\n"), ("tex.dat", part)])
            .with_asset("logo.png", sample_png());
        let output = resolver(source).resolve("main.ldr", 7).unwrap();
        let bucket = output.bucket(&output.instances[0]).unwrap();
        assert_eq!(bucket.faces.len(), 3);
        let uv = bucket.faces[0].uv.as_ref().unwrap();
        assert_eq!(uv.texture, "logo.png");
        assert_eq!(uv.coords, vec![Vec2::ZERO, Vec2::X, Vec2::Y]);
        let inner = bucket.faces[1].uv.as_ref().unwrap();
        assert_eq!(inner.coords[1], Vec2::new(0.5, 0.0));
        assert!(bucket.faces[2].uv.is_none());
        assert_eq!(bucket.faces[2].vertices[1], Vec3::new(2.0, 0.0, 0.0));
        assert!(output.textures.contains_key("logo.png"));
    }

    #[test]
    fn test_texmap_disabled_uses_fallback() {
        let part = "0 Tex\n0 !LDRAW_ORG Part\n\
0 !TEXMAP START PLANAR 0 0 0 10 0 0 0 0 10 logo.png\n\
0 !: 3 16 0 0 0 5 0 0 0 0 5\n\
0 !TEXMAP FALLBACK\n\
3 16 0 0 0 1 0 0 0 0 1\n\
0 !TEXMAP END\n";
        let source = source(&[("main.ldr", "0 Main\n1 4 0 0 0 1 0 0 0 1 0 0 0 1 tex.dat\n"), ("tex.dat", part)]);
        let output = resolver(source)
            .with_options(ResolveOptions {
                meta_texmap: false,
                convention: AxisConvention::Native,
                ..ResolveOptions::default()
            })
            .resolve("main.ldr", 7)
            .unwrap();
        let face = only_face(&output, "tex.dat");
        assert!(face.uv.is_none());
        assert_eq!(face.vertices[1], Vec3::X);
    }

    #[test]
    fn test_pe_tex_info_projects_front_faces() {
        let part = format!(
            "0 Printed\n0 !LDRAW_ORG Part\n\
0 PE_TEX_PATH -1\n\
0 PE_TEX_INFO 0 0 0 10 0 0 0 1 0 0 0 10 -10 -10 10 10 {}\n\
3 16 -5 0 -5 5 0 -5 0 0 5\n\
3 16 -5 0 -5 0 0 5 5 0 -5\n",
            sample_png_base64()
        );
        let source = MemorySource::new()
            .with_document("main.ldr", "0 Main\n1 4 0 0 0 1 0 0 0 1 0 0 0 1 printed.dat\n")
            .with_document("printed.dat", part);
        let output = resolver(source).resolve("main.ldr", 7).unwrap();
        let bucket = output.bucket(&output.instances[0]).unwrap();
        let uv = bucket.faces[0].uv.as_ref().unwrap();
        assert_eq!(uv.texture, "printed.dat/pe_tex/-1/0.png");
        assert_relative_eq!(uv.coords[0].x, 0.25);
        assert_relative_eq!(uv.coords[0].y, 0.75);
        // facing away from the projection
        assert!(bucket.faces[1].uv.is_none());
        assert_eq!(output.textures["printed.dat/pe_tex/-1/0.png"].width, 2);
    }

    #[test]
    fn test_explicit_uvs_use_texmap_image() {
        let part = "0 Uv\n0 !LDRAW_ORG Part\n\
0 !TEXMAP START PLANAR 0 0 0 10 0 0 0 0 10 decal.png\n\
3 16 0 0 0 1 0 0 0 0 1 0.1 0.2 0.3 0.4 0.5 0.6\n\
0 !TEXMAP END\n";
        let source = source(&[("main.ldr", "0 Main\n1 4 0 0 0 1 0 0 0 1 0 0 0 1 uv.dat\n"), ("uv.dat", part)]);
        let output = resolver(source).resolve("main.ldr", 7).unwrap();
        let face = only_face(&output, "uv.dat");
        let uv = face.uv.unwrap();
        assert_eq!(uv.texture, "decal.png");
        assert_eq!(uv.coords[2], Vec2::new(0.5, 0.6));
        assert!(kinds(&output).contains(&&DiagnosticKind::InvalidTexture {
            name: "decal.png".into()
        }));
    }

    #[test]
    fn test_split_document_becomes_residual_and_parts() {
        let output = resolve(&[
            ("main.ldr", "0 Main\n1 4 0 0 0 1 0 0 0 1 0 0 0 1 u9158.dat\n"),
            (
                "u9158.dat",
                "0 Train Track\n0 !LDRAW_ORG Part\n\
3 16 0 0 0 1 0 0 0 0 1\n\
1 16 0 0 0 1 0 0 0 1 0 0 0 1 rail.dat\n\
1 16 0 0 40 1 0 0 0 1 0 0 0 1 rail.dat\n",
            ),
            ("rail.dat", PART),
        ]);
        assert_eq!(output.instances.len(), 3);
        assert!(output.instances[0].key.residual);
        assert_eq!(output.instances[0].key.document, "u9158.dat");
        assert_eq!(output.bucket(&output.instances[0]).unwrap().faces.len(), 1);
        assert_eq!(output.instances[2].key.document, "rail.dat");
        assert_eq!(
            output.instances[2].placement.transform_point3(Vec3::ZERO),
            Vec3::new(0.0, 0.0, 40.0)
        );
        assert_eq!(output.geometry.len(), 2);
    }

    #[test]
    fn test_merge_list_makes_one_instance() {
        let files = [
            (
                "main.ldr",
                "0 Main\n1 4 0 0 0 1 0 0 0 1 0 0 0 1 assembly.ldr\n",
            ),
            (
                "assembly.ldr",
                "0 Assembly\n1 16 0 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n1 16 0 8 0 1 0 0 0 1 0 0 0 1 plate.dat\n",
            ),
            ("plate.dat", PART),
        ];
        let unmerged = resolve(&files);
        assert_eq!(unmerged.instances.len(), 2);

        let options = ResolveOptions::default()
            .with_convention(AxisConvention::Native)
            .with_classification(ClassificationTable::default().with_merge("assembly.ldr"));
        let merged = resolver(source(&files))
            .with_options(options)
            .resolve("main.ldr", 7)
            .unwrap();
        assert_eq!(merged.instances.len(), 1);
        assert_eq!(merged.bucket(&merged.instances[0]).unwrap().faces.len(), 2);
    }

    #[test]
    fn test_stud_options() {
        let files = [
            ("main.ldr", "0 Main\n1 4 0 0 0 1 0 0 0 1 0 0 0 1 brick.dat\n"),
            (
                "brick.dat",
                "0 Brick\n0 !LDRAW_ORG Part\n3 16 0 0 0 1 0 0 0 0 1\n1 16 0 0 0 1 0 0 0 1 0 0 0 1 stud.dat\n",
            ),
            ("stud.dat", "0 Stud\n0 !LDRAW_ORG Primitive\n3 16 0 0 0 1 0 0 0 1 0\n"),
            (
                "stud-logo5.dat",
                "0 Stud Logo\n0 !LDRAW_ORG Primitive\n3 16 0 0 0 1 0 0 0 1 0\n3 16 0 0 0 0 1 0 0 0 1\n",
            ),
        ];
        let faces = |options: ResolveOptions| {
            let output = resolver(source(&files))
                .with_options(options.with_convention(AxisConvention::Native))
                .resolve("main.ldr", 7)
                .unwrap();
            output.bucket(&output.instances[0]).unwrap().faces.len()
        };
        assert_eq!(faces(ResolveOptions::default()), 2);
        assert_eq!(faces(ResolveOptions::default().with_no_studs(true)), 1);
        assert_eq!(faces(ResolveOptions::default().with_stud_logo("logo5")), 3);
        // unknown logo falls back to the plain stud
        assert_eq!(faces(ResolveOptions::default().with_stud_logo("logo9")), 2);
    }

    #[test]
    fn test_cycles_and_depth_are_bounded() {
        let files = [
            ("main.ldr", "0 Main\n1 16 0 0 0 1 0 0 0 1 0 0 0 1 b.ldr\n"),
            (
                "b.ldr",
                "0 B\n1 16 0 0 0 1 0 0 0 1 0 0 0 1 main.ldr\n1 16 0 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n",
            ),
            ("plate.dat", PART),
        ];
        let output = resolve(&files);
        assert_eq!(output.instances.len(), 1);
        assert_eq!(
            kinds(&output),
            vec![&DiagnosticKind::RecursiveReference {
                name: "main.ldr".into()
            }]
        );

        let shallow = resolver(source(&files))
            .with_options(
                ResolveOptions::default()
                    .with_convention(AxisConvention::Native)
                    .with_max_depth(2),
            )
            .resolve("main.ldr", 7)
            .unwrap();
        assert!(shallow.instances.is_empty());
        assert!(kinds(&shallow).contains(&&DiagnosticKind::DepthLimit {
            name: "plate.dat".into()
        }));
    }

    #[test]
    fn test_model_events_in_walk_order() {
        let output = resolve(&[
            (
                "main.ldr",
                "0 Main\n\
1 4 0 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n\
0 STEP\n\
1 16 0 0 0 1 0 0 0 1 0 0 0 1 sub.ldr\n\
0 STEP\n",
            ),
            (
                "sub.ldr",
                "0 Sub\n\
1 16 10 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n\
0 !LEOCAD GROUP BEGIN Arm\n\
0 !LEOCAD GROUP END\n",
            ),
            ("plate.dat", PART),
        ]);
        let summary: Vec<(&str, usize, usize, &SceneEventKind)> = output
            .events
            .iter()
            .map(|e| (e.document.as_str(), e.depth, e.instances_before, &e.kind))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("main.ldr", 0, 1, &SceneEventKind::Step),
                ("sub.ldr", 1, 1, &SceneEventKind::SubmodelBegin { name: "sub.ldr".into() }),
                ("sub.ldr", 1, 2, &SceneEventKind::GroupBegin { name: "Arm".into() }),
                ("sub.ldr", 1, 2, &SceneEventKind::GroupEnd),
                ("sub.ldr", 1, 2, &SceneEventKind::SubmodelEnd { name: "sub.ldr".into() }),
                ("main.ldr", 0, 2, &SceneEventKind::Step),
            ]
        );
        // the submodel reference inherits the root colour
        assert_eq!(output.instances[1].color, ColorCode::new("7"));
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let output = resolver(source(&[
            ("main.ldr", "0 Main\n1 4 0 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n"),
            ("plate.dat", PART),
        ]))
        .with_cancel_flag(cancel)
        .resolve("main.ldr", 7)
        .unwrap();
        assert!(output.cancelled);
        assert!(output.instances.is_empty());
    }

    #[test]
    fn test_colours_collected_and_document_colours_registered() {
        let output = resolve(&[
            (
                "main.ldr",
                "0 Main\n\
0 !COLOUR Custom CODE 901 VALUE #123456 EDGE #000000\n\
1 901 0 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n\
1 0x2FF0000 0 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n\
1 777 0 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n",
            ),
            ("plate.dat", PART),
        ]);
        assert_eq!(output.colors[&ColorCode::new("901")].rgb, [0x12, 0x34, 0x56]);
        assert_eq!(output.colors[&ColorCode::new("0x2FF0000")].rgb, [0xFF, 0x00, 0x00]);
        assert!(output.colors.contains_key(&ColorCode::new("24")));
        assert!(kinds(&output).contains(&&DiagnosticKind::UnknownColorCode { code: "777".into() }));
    }

    #[test]
    fn test_malformed_lines_reported_per_document() {
        let output = resolve(&[
            (
                "main.ldr",
                "0 Main\n1 4 0 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n1 4 0 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n",
            ),
            ("plate.dat", "0 Plate\n0 !LDRAW_ORG Part\n3 16 0 0 0 1\n3 16 0 0 0 1 0 0 0 0 1\n"),
        ]);
        assert_eq!(
            kinds(&output),
            vec![&DiagnosticKind::MalformedLine {
                document: "plate.dat".into(),
                line: 3
            }]
        );
        assert_eq!(output.triangle_count(), 2);
    }

    #[test]
    fn test_z_up_placement_maps_bucket_to_world() {
        let output = resolver(source(&[
            ("main.ldr", "0 Main\n1 4 10 -20 30 1 0 0 0 1 0 0 0 1 plate.dat\n"),
            ("plate.dat", PART),
        ]))
        .with_options(ResolveOptions::default())
        .resolve("main.ldr", 7)
        .unwrap();
        let instance = &output.instances[0];
        let bucket = output.bucket(instance).unwrap();
        let twist = AxisConvention::ZUp.twist();
        let expected = twist.transform_point3(Vec3::new(11.0, -20.0, 30.0));
        let actual = instance.placement.transform_point3(bucket.faces[0].vertices[1]);
        assert!(actual.abs_diff_eq(expected, 1e-4), "{:?} vs {:?}", actual, expected);
    }
}
