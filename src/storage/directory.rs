//! Storage over an unpacked directory tree.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use super::{Storage, blob_mime};
use crate::book::Blob;
use crate::error::{Error, Result};

/// Storage over a directory: every regular file below the root, keyed by
/// its root-relative path with `/` separators.
pub struct DirectoryStorage {
    root: PathBuf,
    files: HashMap<String, DirEntryLoc>,
    paths: Vec<String>,
}

struct DirEntryLoc {
    path: PathBuf,
    size: u64,
}

impl DirectoryStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let mut files = HashMap::new();
        let mut paths = Vec::new();

        for entry in WalkDir::new(&root).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Transport(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(key) = relative_key(&root, entry.path()) else {
                continue;
            };
            let size = entry.metadata().map_err(|e| Error::Transport(e.into()))?.len();

            paths.push(key.clone());
            files.insert(
                key,
                DirEntryLoc {
                    path: entry.into_path(),
                    size,
                },
            );
        }

        log::debug!("indexed {} files under {}", paths.len(), root.display());
        Ok(Self { root, files, paths })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match self.files.get(path) {
            Some(loc) => Ok(Some(std::fs::read(&loc.path)?)),
            None => Ok(None),
        }
    }
}

/// Root-stripped, `/`-joined key for a file below `root`.
fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

impl Storage for DirectoryStorage {
    fn load_text(&self, path: &str) -> Result<Option<String>> {
        Ok(self
            .read_file(path)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn load_blob(&self, path: &str, mime: Option<&str>) -> Result<Option<Blob>> {
        Ok(self
            .read_file(path)?
            .map(|data| Blob::new(data, blob_mime(path, mime))))
    }

    fn size(&self, path: &str) -> u64 {
        self.files.get(path).map(|loc| loc.size).unwrap_or(0)
    }

    fn paths(&self) -> &[String] {
        &self.paths
    }

    fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }
}
