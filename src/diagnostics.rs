//! Non-fatal problems found while loading and resolving documents.
//!
//! Inputs are large and externally authored, so almost nothing aborts a
//! run. Problems are collected here and mirrored to `tracing` so a host can
//! either inspect them or just read the log.

use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticKind {
    MalformedLine { document: String, line: usize },
    MissingReference { name: String },
    DegenerateMatrix { document: String },
    UnknownColorCode { code: String },
    RecursiveReference { name: String },
    DepthLimit { name: String },
    InvalidTexture { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    #[serde(flatten)]
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
        }
    }

    fn trace(&self) {
        match self.severity {
            Severity::Info => tracing::info!(kind = ?self.kind, "{}", self.message),
            Severity::Warning => tracing::warn!(kind = ?self.kind, "{}", self.message),
            Severity::Error => tracing::error!(kind = ?self.kind, "{}", self.message),
        }
    }
}

/// Ordered diagnostics for one run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    missing: HashSet<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        diagnostic.trace();
        self.entries.push(diagnostic);
    }

    /// Report a missing document. Each name is reported once per run.
    pub fn missing_reference(&mut self, name: &str, referenced_from: &str) {
        if !self.missing.insert(name.to_string()) {
            return;
        }
        self.push(Diagnostic::new(
            Severity::Warning,
            DiagnosticKind::MissingReference {
                name: name.to_string(),
            },
            format!("missing reference {} in {}", name, referenced_from),
        ));
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.entries
    }
}

impl Extend<Diagnostic> for Diagnostics {
    fn extend<T: IntoIterator<Item = Diagnostic>>(&mut self, iter: T) {
        for diagnostic in iter {
            self.push(diagnostic);
        }
    }
}
