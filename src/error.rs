//! Error types for LDraw resolution.

use thiserror::Error;

/// Result type alias using ResolveError.
pub type Result<T> = std::result::Result<T, ResolveError>;

/// Main error type for document loading and resolution.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The caller asked for something that cannot be resolved at all.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A named document has no content in any source.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// A line could not be tokenized into a known command shape.
    #[error("Malformed line {line}: {reason}")]
    MalformedLine { line: usize, reason: String },

    /// I/O error while reading a library.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to read a ZIP library archive.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Failed to decode an embedded or library image.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Failed to decode a base64 payload.
    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Failed to read or write JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ResolveError {
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedLine {
            line,
            reason: reason.into(),
        }
    }
}
