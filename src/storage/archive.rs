//! ZIP-backed storage with lazy per-entry decompression.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use zip::ZipArchive;

use super::{Storage, blob_mime};
use crate::book::Blob;
use crate::error::Result;
use crate::io::{ByteSource, ByteSourceCursor};

/// Storage over a ZIP archive.
///
/// The central directory is scanned once; entry data is only read and
/// inflated when a path is requested.
pub struct ArchiveStorage {
    /// Parsed central directory. Cloning shares it and gives each read its
    /// own cursor.
    archive: ZipArchive<ByteSourceCursor>,

    /// Cached entry locations: path -> EntryLoc.
    index: HashMap<String, EntryLoc>,

    /// File entries in archive order.
    paths: Vec<String>,
}

#[derive(Clone, Copy)]
struct EntryLoc {
    /// Position in the central directory.
    index: usize,
    /// Uncompressed size.
    size: u64,
}

impl ArchiveStorage {
    pub fn new(source: Arc<dyn ByteSource>) -> Result<Self> {
        let mut archive = ZipArchive::new(ByteSourceCursor::new(source))?;

        let mut index = HashMap::with_capacity(archive.len());
        let mut paths = Vec::with_capacity(archive.len());

        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let size = entry.size();

            if index.insert(name.clone(), EntryLoc { index: i, size }).is_some() {
                log::warn!("duplicate ZIP entry {name:?}, keeping the last one");
                continue;
            }
            paths.push(name);
        }

        log::debug!("indexed {} ZIP entries", paths.len());
        Ok(Self {
            archive,
            index,
            paths,
        })
    }

    /// Read and decompress an entry by path.
    fn read_entry(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let Some(loc) = self.index.get(path).copied() else {
            return Ok(None);
        };

        let mut archive = self.archive.clone();
        let mut file = archive.by_index(loc.index)?;
        let mut data = Vec::with_capacity(loc.size.min(64 * 1024 * 1024) as usize);
        file.read_to_end(&mut data)?;
        Ok(Some(data))
    }
}

impl Storage for ArchiveStorage {
    fn load_text(&self, path: &str) -> Result<Option<String>> {
        Ok(self
            .read_entry(path)?
            .map(|bytes| String::from_utf8_lossy(crate::util::strip_bom(&bytes)).into_owned()))
    }

    fn load_blob(&self, path: &str, mime: Option<&str>) -> Result<Option<Blob>> {
        Ok(self
            .read_entry(path)?
            .map(|data| Blob::new(data, blob_mime(path, mime))))
    }

    fn size(&self, path: &str) -> u64 {
        self.index.get(path).map(|loc| loc.size).unwrap_or(0)
    }

    fn paths(&self) -> &[String] {
        &self.paths
    }

    fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySource;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn storage(entries: &[(&str, &[u8])]) -> ArchiveStorage {
        ArchiveStorage::new(Arc::new(MemorySource::new(build_zip(entries)))).unwrap()
    }

    #[test]
    fn test_lists_entries_in_order() {
        let storage = storage(&[("b.txt", b"b"), ("a/c.txt", b"cc")]);
        assert_eq!(storage.paths(), ["b.txt", "a/c.txt"]);
        assert_eq!(storage.size("a/c.txt"), 2);
    }

    #[test]
    fn test_load_text_and_blob() {
        let storage = storage(&[("mimetype", b"application/epub+zip"), ("img/x.png", b"\x89PNG")]);
        assert_eq!(
            storage.load_text("mimetype").unwrap().as_deref(),
            Some("application/epub+zip")
        );

        let blob = storage.load_blob("img/x.png", None).unwrap().unwrap();
        assert_eq!(blob.mime.as_deref(), Some("image/png"));

        let typed = storage.load_blob("img/x.png", Some("image/x-test")).unwrap().unwrap();
        assert_eq!(typed.mime.as_deref(), Some("image/x-test"));
    }

    #[test]
    fn test_unknown_path_is_absent() {
        let storage = storage(&[("a.txt", b"a")]);
        assert!(storage.load_text("A.txt").unwrap().is_none());
        assert!(storage.load_blob("missing", None).unwrap().is_none());
        assert_eq!(storage.size("missing"), 0);
        assert!(!storage.contains("missing"));
    }

    #[test]
    fn test_repeated_reads_are_identical() {
        let storage = storage(&[("a.txt", b"same")]);
        let first = storage.load_text("a.txt").unwrap();
        let second = storage.load_text("a.txt").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_not_a_zip_fails() {
        let result = ArchiveStorage::new(Arc::new(MemorySource::new(b"PK\x03\x04garbage".to_vec())));
        assert!(result.is_err());
    }
}
