//! LDraw library loading from ZIP archives and directories.
//!
//! The file tree is indexed once when the library is opened; contents are
//! read on demand. Archives are kept in memory.

use super::DocumentSource;
use crate::error::{ResolveError, Result};
use crate::types::normalize_name;
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Directories a reference is tried against, in order.
pub const SEARCH_ROOTS: &[&str] = &[
    "",
    "parts/",
    "p/",
    "parts/s/",
    "p/48/",
    "models/",
    "unofficial/parts/",
    "unofficial/p/",
    "unofficial/parts/s/",
    "parts/textures/",
    "textures/",
];

enum Entry {
    File(PathBuf),
    Archived(usize),
}

/// A complete LDraw library (the `ldraw` folder or the zip it ships in).
pub struct LibrarySource {
    origin: PathBuf,
    entries: HashMap<String, Entry>,
    archive: Option<Mutex<zip::ZipArchive<Cursor<Vec<u8>>>>>,
}

/// File counts per library area.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LibraryStats {
    pub files: usize,
    pub parts: usize,
    pub subparts: usize,
    pub primitives: usize,
    pub models: usize,
    pub textures: usize,
    pub unofficial: usize,
}

impl LibrarySource {
    /// Open a library directory or ZIP archive.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            Self::from_directory(path)
        } else {
            let data = std::fs::read(path)?;
            let mut library = Self::from_zip_bytes(data)?;
            library.origin = path.to_path_buf();
            Ok(library)
        }
    }

    /// Index a library held in memory as ZIP data.
    pub fn from_zip_bytes(data: Vec<u8>) -> Result<Self> {
        let mut archive = zip::ZipArchive::new(Cursor::new(data))?;
        let mut entries = HashMap::new();
        for i in 0..archive.len() {
            let file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            entries.insert(library_key(file.name()), Entry::Archived(i));
        }
        tracing::debug!(entries = entries.len(), "indexed library archive");
        Ok(Self {
            origin: PathBuf::new(),
            entries,
            archive: Some(Mutex::new(archive)),
        })
    }

    fn from_directory(path: &Path) -> Result<Self> {
        let mut entries = HashMap::new();
        index_directory(path, path, &mut entries)?;
        if entries.is_empty() {
            return Err(ResolveError::InvalidRequest(format!(
                "no files found in library {}",
                path.display()
            )));
        }
        tracing::debug!(entries = entries.len(), path = %path.display(), "indexed library directory");
        Ok(Self {
            origin: path.to_path_buf(),
            entries,
            archive: None,
        })
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The library-relative key a reference resolves to.
    pub fn locate(&self, name: &str) -> Option<String> {
        let name = normalize_name(name);
        SEARCH_ROOTS
            .iter()
            .map(|root| format!("{}{}", root, name))
            .find(|key| self.entries.contains_key(key))
    }

    pub fn stats(&self) -> LibraryStats {
        let mut stats = LibraryStats {
            files: self.entries.len(),
            ..Default::default()
        };
        for key in self.entries.keys() {
            let (official, path) = match key.strip_prefix("unofficial/") {
                Some(rest) => (false, rest),
                None => (true, key.as_str()),
            };
            if !official {
                stats.unofficial += 1;
            }
            if path.ends_with(".png") {
                stats.textures += 1;
            } else if path.starts_with("parts/s/") {
                stats.subparts += 1;
            } else if path.starts_with("parts/") && path.ends_with(".dat") {
                stats.parts += 1;
            } else if path.starts_with("p/") {
                stats.primitives += 1;
            } else if path.starts_with("models/") {
                stats.models += 1;
            }
        }
        stats
    }

    fn read(&self, key: &str) -> Option<Vec<u8>> {
        let result = match self.entries.get(key)? {
            Entry::File(path) => std::fs::read(path).map_err(ResolveError::from),
            Entry::Archived(index) => self.read_archived(*index),
        };
        match result {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to read library entry");
                None
            }
        }
    }

    fn read_archived(&self, index: usize) -> Result<Vec<u8>> {
        let Some(archive) = &self.archive else {
            return Err(ResolveError::InvalidRequest("library has no archive".to_string()));
        };
        let mut archive = archive.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = archive.by_index(index)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }
}

impl std::fmt::Debug for LibrarySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibrarySource")
            .field("origin", &self.origin)
            .field("entries", &self.entries.len())
            .field("archive", &self.archive.is_some())
            .finish()
    }
}

impl DocumentSource for LibrarySource {
    fn fetch(&self, name: &str) -> Option<String> {
        let key = self.locate(name)?;
        let data = self.read(&key)?;
        Some(String::from_utf8_lossy(&data).into_owned())
    }

    fn fetch_bytes(&self, name: &str) -> Option<Vec<u8>> {
        let key = self.locate(name)?;
        self.read(&key)
    }
}

/// Archives usually wrap everything in a top-level `ldraw/` folder.
fn library_key(path: &str) -> String {
    let key = normalize_name(path);
    match key.strip_prefix("ldraw/") {
        Some(rest) => rest.to_string(),
        None => key,
    }
}

fn index_directory(base: &Path, dir: &Path, entries: &mut HashMap<String, Entry>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            index_directory(base, &path, entries)?;
        } else if let Ok(relative) = path.strip_prefix(base) {
            let key = library_key(&relative.to_string_lossy());
            entries.insert(key, Entry::File(path));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(base: &Path, relative: &str, text: &str) {
        let path = base.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    #[test]
    fn test_library_key() {
        assert_eq!(library_key("ldraw/Parts/S/3001s01.DAT"), "parts/s/3001s01.dat");
        assert_eq!(library_key("p\\48\\1-4cyli.dat"), "p/48/1-4cyli.dat");
    }

    #[test]
    fn test_directory_search_roots() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "LDConfig.ldr", "0 LDraw.org Configuration File");
        write(dir.path(), "parts/3001.dat", "0 Brick 2 x 4");
        write(dir.path(), "parts/s/3001s01.dat", "0 ~Brick 2 x 4 without Front Face");
        write(dir.path(), "p/48/1-4cyli.dat", "0 Hi-Res Cylinder 0.25");
        write(dir.path(), "p/4-4disc.dat", "0 Disc 1.0");

        let library = LibrarySource::open(dir.path()).unwrap();
        assert_eq!(library.len(), 5);
        assert_eq!(library.fetch("3001.DAT").as_deref(), Some("0 Brick 2 x 4"));
        assert_eq!(library.locate("s\\3001s01.dat").as_deref(), Some("parts/s/3001s01.dat"));
        assert_eq!(library.locate("48/1-4cyli.dat").as_deref(), Some("p/48/1-4cyli.dat"));
        assert_eq!(library.locate("4-4disc.dat").as_deref(), Some("p/4-4disc.dat"));
        assert!(library.fetch("ldconfig.ldr").is_some());
        assert!(library.fetch("missing.dat").is_none());

        let stats = library.stats();
        assert_eq!(stats.parts, 1);
        assert_eq!(stats.subparts, 1);
        assert_eq!(stats.primitives, 2);
    }

    #[test]
    fn test_empty_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            LibrarySource::open(dir.path()),
            Err(ResolveError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_zip_library() {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("ldraw/parts/3024.dat", options).unwrap();
        zip.write_all(b"0 Plate 1 x 1").unwrap();
        zip.start_file("ldraw/parts/textures/logo.png", options).unwrap();
        zip.write_all(&[0x89, b'P', b'N', b'G']).unwrap();
        let data = zip.finish().unwrap().into_inner();

        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), &data).unwrap();
        let library = LibrarySource::open(file.path()).unwrap();
        assert_eq!(library.fetch("3024.dat").as_deref(), Some("0 Plate 1 x 1"));
        assert_eq!(library.fetch_bytes("logo.png").map(|b| b.len()), Some(4));
        assert_eq!(library.stats().textures, 1);
    }
}
