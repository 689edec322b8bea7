//! Parse-once document store shared by every resolve run.

use super::{parse, Document};
use crate::error::{ResolveError, Result};
use crate::source::DocumentSource;
use crate::texture::{decode_png, TextureImage};
use crate::types::normalize_name;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

type Slot<T> = Arc<OnceLock<Option<Arc<T>>>>;

/// Documents by lower-cased name, each parsed at most once.
///
/// Fetching a file also registers every `0 FILE` block and `0 !DATA` blob it
/// contains, so MPD sub-models resolve without touching the source again.
/// Names the source does not know are remembered as absent.
pub struct DocumentCache {
    source: Arc<dyn DocumentSource>,
    documents: RwLock<HashMap<String, Slot<Document>>>,
    data: RwLock<HashMap<String, Arc<Vec<u8>>>>,
    textures: RwLock<HashMap<String, Slot<TextureImage>>>,
}

impl DocumentCache {
    pub fn new(source: impl DocumentSource + 'static) -> Self {
        Self::from_arc(Arc::new(source))
    }

    pub fn from_arc(source: Arc<dyn DocumentSource>) -> Self {
        Self {
            source,
            documents: RwLock::new(HashMap::new()),
            data: RwLock::new(HashMap::new()),
            textures: RwLock::new(HashMap::new()),
        }
    }

    pub fn source(&self) -> &Arc<dyn DocumentSource> {
        &self.source
    }

    /// The document, or `None` if no source has it.
    pub fn get(&self, name: &str) -> Option<Arc<Document>> {
        let key = normalize_name(name);
        let slot = slot(&self.documents, &key);
        slot.get_or_init(|| self.load(&key)).clone()
    }

    pub fn load_document(&self, name: &str) -> Result<Arc<Document>> {
        self.get(name)
            .ok_or_else(|| ResolveError::DocumentNotFound(name.to_string()))
    }

    /// Whether the document was already parsed (or found missing).
    pub fn is_loaded(&self, name: &str) -> bool {
        let key = normalize_name(name);
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .is_some_and(|slot| slot.get().is_some())
    }

    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|slot| matches!(slot.get(), Some(Some(_))))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register text under a name without consulting the source.
    pub fn insert_text(&self, name: &str, text: &str) -> Arc<Document> {
        let key = normalize_name(name);
        let parsed = parse(&key, text);
        self.register_embedded(&key, parsed.documents, parsed.data);
        self.register(&key, Arc::new(parsed.main))
    }

    /// Raw bytes of an embedded `!DATA` blob or a library asset.
    pub fn bytes(&self, name: &str) -> Option<Arc<Vec<u8>>> {
        let key = normalize_name(name);
        if let Some(data) = self.data.read().unwrap_or_else(PoisonError::into_inner).get(&key) {
            return Some(data.clone());
        }
        let fetched = Arc::new(self.source.fetch_bytes(&key)?);
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert(fetched)
            .clone()
            .into()
    }

    /// Decoded texture image, cached; `None` if missing or undecodable.
    pub fn texture(&self, name: &str) -> Option<Arc<TextureImage>> {
        let key = normalize_name(name);
        let slot = slot(&self.textures, &key);
        slot.get_or_init(|| {
            let bytes = self.bytes(&key)?;
            match decode_png(&bytes) {
                Ok(image) => Some(Arc::new(image)),
                Err(e) => {
                    tracing::warn!(texture = %key, error = %e, "failed to decode texture");
                    None
                }
            }
        })
        .clone()
    }

    /// Texture under `name`, produced by `decode` the first time it is asked for.
    pub fn texture_with<F>(&self, name: &str, decode: F) -> Option<Arc<TextureImage>>
    where
        F: FnOnce() -> Option<TextureImage>,
    {
        let key = normalize_name(name);
        let slot = slot(&self.textures, &key);
        slot.get_or_init(|| decode().map(Arc::new)).clone()
    }

    /// Register an already decoded image.
    pub fn insert_texture(&self, name: &str, image: TextureImage) -> Option<Arc<TextureImage>> {
        self.texture_with(name, || Some(image))
    }

    fn load(&self, key: &str) -> Option<Arc<Document>> {
        let Some(text) = self.source.fetch(key) else {
            tracing::debug!(document = %key, "document not found");
            return None;
        };
        let parsed = parse(key, &text);
        tracing::trace!(
            document = %key,
            commands = parsed.main.commands.len(),
            embedded = parsed.documents.len(),
            "parsed document"
        );
        self.register_embedded(key, parsed.documents, parsed.data);
        Some(Arc::new(parsed.main))
    }

    /// Store `doc` under `key` unless another document already holds it.
    /// A name remembered as missing is overwritten.
    fn register(&self, key: &str, doc: Arc<Document>) -> Arc<Document> {
        let slot = slot(&self.documents, key);
        if slot.set(Some(doc.clone())).is_ok() {
            return doc;
        }
        if let Some(Some(existing)) = slot.get() {
            tracing::debug!(document = %key, "document already registered, keeping the first");
            return existing.clone();
        }
        tracing::debug!(document = %key, "registering a document previously found missing");
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), Arc::new(OnceLock::from(Some(doc.clone()))));
        doc
    }

    fn register_embedded(&self, key: &str, documents: Vec<Document>, data: Vec<super::EmbeddedData>) {
        for doc in documents {
            // the slot being initialized is the caller's own
            if doc.name == key {
                continue;
            }
            let name = doc.name.clone();
            self.register(&name, Arc::new(doc));
        }
        if !data.is_empty() {
            let mut map = self.data.write().unwrap_or_else(PoisonError::into_inner);
            for blob in data {
                map.entry(blob.name).or_insert_with(|| Arc::new(blob.bytes));
            }
        }
    }
}

impl std::fmt::Debug for DocumentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCache").field("documents", &self.len()).finish()
    }
}

fn slot<T>(map: &RwLock<HashMap<String, Slot<T>>>, key: &str) -> Slot<T> {
    if let Some(slot) = map.read().unwrap_or_else(PoisonError::into_inner).get(key) {
        return slot.clone();
    }
    map.write()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(key.to_string())
        .or_default()
        .clone()
}
