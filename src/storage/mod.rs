//! Uniform path-based access to the parts of a container.
//!
//! Both variants enumerate their container exactly once at construction and
//! treat it as immutable afterwards. Lookups are case-sensitive, rooted at the
//! container root, and return `None` (or a size of 0) for unknown paths.

mod archive;
mod directory;

pub use archive::ArchiveStorage;
pub use directory::DirectoryStorage;

use crate::book::Blob;
use crate::error::Result;

pub trait Storage: Send + Sync {
    /// Read an entry as text. `Ok(None)` when the path is unknown.
    fn load_text(&self, path: &str) -> Result<Option<String>>;

    /// Read an entry as bytes tagged with `mime`, or a MIME type guessed
    /// from the extension when none is given.
    fn load_blob(&self, path: &str, mime: Option<&str>) -> Result<Option<Blob>>;

    /// Uncompressed size of an entry, 0 when the path is unknown.
    fn size(&self, path: &str) -> u64;

    /// All entry paths, in enumeration order.
    fn paths(&self) -> &[String];

    fn contains(&self, path: &str) -> bool {
        self.paths().iter().any(|p| p == path)
    }
}

fn blob_mime<'a>(path: &str, mime: Option<&'a str>) -> Option<&'a str> {
    mime.or_else(|| crate::util::mime_from_path(path))
}
