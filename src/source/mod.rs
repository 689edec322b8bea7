//! Where document text and texture bytes come from.

pub mod loader;

pub use loader::{LibrarySource, LibraryStats, SEARCH_ROOTS};

use crate::types::normalize_name;
use std::collections::HashMap;
use std::sync::Arc;

/// Supplies raw document text and binary assets by name.
///
/// Names arrive as written in the referencing line; implementations should
/// match them case-insensitively and accept both slash styles.
pub trait DocumentSource: Send + Sync {
    fn fetch(&self, name: &str) -> Option<String>;

    fn fetch_bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.fetch(name).map(String::into_bytes)
    }
}

impl<S: DocumentSource + ?Sized> DocumentSource for Arc<S> {
    fn fetch(&self, name: &str) -> Option<String> {
        (**self).fetch(name)
    }

    fn fetch_bytes(&self, name: &str) -> Option<Vec<u8>> {
        (**self).fetch_bytes(name)
    }
}

impl<S: DocumentSource + ?Sized> DocumentSource for Box<S> {
    fn fetch(&self, name: &str) -> Option<String> {
        (**self).fetch(name)
    }

    fn fetch_bytes(&self, name: &str) -> Option<Vec<u8>> {
        (**self).fetch_bytes(name)
    }
}

/// In-memory documents and assets, mostly for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    documents: HashMap<String, String>,
    assets: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, name: &str, text: impl Into<String>) -> Self {
        self.insert_document(name, text);
        self
    }

    pub fn with_asset(mut self, name: &str, bytes: Vec<u8>) -> Self {
        self.insert_asset(name, bytes);
        self
    }

    pub fn insert_document(&mut self, name: &str, text: impl Into<String>) {
        self.documents.insert(normalize_name(name), text.into());
    }

    pub fn insert_asset(&mut self, name: &str, bytes: Vec<u8>) {
        self.assets.insert(normalize_name(name), bytes);
    }

    pub fn len(&self) -> usize {
        self.documents.len() + self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentSource for MemorySource {
    fn fetch(&self, name: &str) -> Option<String> {
        self.documents.get(&normalize_name(name)).cloned()
    }

    fn fetch_bytes(&self, name: &str) -> Option<Vec<u8>> {
        let key = normalize_name(name);
        self.assets
            .get(&key)
            .cloned()
            .or_else(|| self.documents.get(&key).map(|text| text.clone().into_bytes()))
    }
}

/// Several sources searched in order; the first hit wins.
#[derive(Clone, Default)]
pub struct SourceChain {
    sources: Vec<Arc<dyn DocumentSource>>,
}

impl SourceChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl DocumentSource + 'static) -> Self {
        self.push(source);
        self
    }

    pub fn push(&mut self, source: impl DocumentSource + 'static) {
        self.sources.push(Arc::new(source));
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl std::fmt::Debug for SourceChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceChain")
            .field("sources", &self.sources.len())
            .finish()
    }
}

impl DocumentSource for SourceChain {
    fn fetch(&self, name: &str) -> Option<String> {
        self.sources.iter().find_map(|s| s.fetch(name))
    }

    fn fetch_bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.sources.iter().find_map(|s| s.fetch_bytes(name))
    }
}
