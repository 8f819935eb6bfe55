//! Raw book sources of unknown provenance.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use crate::error::{Error, Result};
use crate::io::{ByteSource, FileSource, MemorySource};
use crate::sniff::{Classification, sniff};

/// A flat byte blob with the metadata its provider declared for it.
///
/// Name and MIME type are user supplied and only ever used to disambiguate
/// within a format the magic bytes already confirmed.
#[derive(Clone)]
pub struct BlobSource {
    name: String,
    mime: Option<String>,
    bytes: Arc<dyn ByteSource>,
}

impl BlobSource {
    pub fn new(name: impl Into<String>, bytes: Arc<dyn ByteSource>) -> Self {
        Self {
            name: name.into(),
            mime: None,
            bytes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    pub fn bytes(&self) -> &Arc<dyn ByteSource> {
        &self.bytes
    }

    pub fn len(&self) -> u64 {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Clone)]
enum SourceKind {
    Blob(BlobSource),
    Directory(PathBuf),
}

/// Input to the loader: a byte blob or a directory tree.
///
/// The classification is computed lazily on first request and then kept;
/// clones made after that share the memoized value.
#[derive(Clone)]
pub struct Source {
    kind: SourceKind,
    classification: Arc<OnceLock<Classification>>,
}

impl Source {
    /// Open a path on disk: directories become directory sources, files
    /// become blobs named after the file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
            _ => Error::Transport(e),
        })?;

        if meta.is_dir() {
            return Ok(Self::directory(path));
        }

        let file = std::fs::File::open(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::blob(BlobSource::new(name, Arc::new(FileSource::new(file)?))))
    }

    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self::with_kind(SourceKind::Directory(path.into()))
    }

    pub fn blob(blob: BlobSource) -> Self {
        Self::with_kind(SourceKind::Blob(blob))
    }

    /// An in-memory blob, e.g. a downloaded response body.
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self::blob(BlobSource::new(name, Arc::new(MemorySource::new(data))))
    }

    /// Attach a declared MIME type. No effect on directory sources.
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        if let SourceKind::Blob(blob) = &mut self.kind {
            blob.mime = Some(mime.into());
        }
        self.classification = Arc::new(OnceLock::new());
        self
    }

    fn with_kind(kind: SourceKind) -> Self {
        Self {
            kind,
            classification: Arc::new(OnceLock::new()),
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, SourceKind::Directory(_))
    }

    pub fn as_blob(&self) -> Option<&BlobSource> {
        match &self.kind {
            SourceKind::Blob(blob) => Some(blob),
            SourceKind::Directory(_) => None,
        }
    }

    pub fn as_directory(&self) -> Option<&Path> {
        match &self.kind {
            SourceKind::Directory(path) => Some(path),
            SourceKind::Blob(_) => None,
        }
    }

    /// Declared name: the file name for blobs, the last path component for
    /// directories.
    pub fn name(&self) -> String {
        match &self.kind {
            SourceKind::Blob(blob) => blob.name.clone(),
            SourceKind::Directory(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    /// Sniffed classification, derived at most once per source.
    pub fn classification(&self) -> Result<Classification> {
        if let Some(found) = self.classification.get() {
            return Ok(*found);
        }
        let found = sniff(self)?;
        Ok(*self.classification.get_or_init(|| found))
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            SourceKind::Blob(blob) => f
                .debug_struct("Source::Blob")
                .field("name", &blob.name)
                .field("mime", &blob.mime)
                .field("len", &blob.len())
                .finish(),
            SourceKind::Directory(path) => f.debug_tuple("Source::Directory").field(path).finish(),
        }
    }
}
