//! Format sniffing.
//!
//! Magic bytes decide the container. Declared name and MIME type are only
//! consulted to tell apart formats that share a container (an e-book ZIP, a
//! comic ZIP and a zipped FictionBook all start with `PK\x03\x04`), or as the
//! last resort for XML, which has no reliable signature.

use std::fmt;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::source::{BlobSource, Source};
use crate::util::ends_with_ignore_case;

/// ZIP local file header magic.
pub const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// PDB type/creator pairs at bytes 60..68 identifying a MOBI-family book.
const PDB_IDENTS: [&[u8; 8]; 2] = [b"BOOKMOBI", b"TEXtREAd"];
const PDB_IDENT_RANGE: std::ops::Range<usize> = 60..68;

const MIME_CBZ: &str = "application/vnd.comicbook+zip";
const MIME_FBZ: &str = "application/x-zip-compressed-fb2";
const MIME_FB2: &str = "application/x-fictionbook+xml";

/// What kind of book container a source holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Classification {
    /// ZIP e-book (EPUB).
    Archive,
    /// Unpacked e-book directory tree.
    Directory,
    /// PalmDOC database (MOBI, AZW).
    CompressedBinary,
    /// FictionBook XML.
    PlainXml,
    /// Zipped FictionBook.
    CompressedXml,
    /// Comic-book ZIP of page images.
    ImageArchive,
    Unknown,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Classification::Archive => "archive",
            Classification::Directory => "directory",
            Classification::CompressedBinary => "compressed binary",
            Classification::PlainXml => "plain XML",
            Classification::CompressedXml => "compressed XML",
            Classification::ImageArchive => "image archive",
            Classification::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Classify a source. First match wins.
///
/// Prefer [`Source::classification`], which memoizes the result.
pub fn sniff(source: &Source) -> Result<Classification> {
    let Some(blob) = source.as_blob() else {
        return Ok(Classification::Directory);
    };

    if blob.is_empty() {
        return Err(Error::NotFound(format!("{} is empty", blob.name())));
    }

    let head = blob.bytes().read_prefix(PDB_IDENT_RANGE.end)?;

    let classification = if head.starts_with(&ZIP_MAGIC) {
        classify_zip(blob)
    } else if is_pdb_book(&head) {
        Classification::CompressedBinary
    } else if is_fb2(blob) {
        Classification::PlainXml
    } else {
        Classification::Unknown
    };

    log::debug!(
        "sniffed {:?} ({} bytes) as {classification}",
        blob.name(),
        blob.len()
    );
    Ok(classification)
}

fn classify_zip(blob: &BlobSource) -> Classification {
    let name = blob.name();
    let mime = blob.mime();
    if mime == Some(MIME_CBZ) || ends_with_ignore_case(name, ".cbz") {
        Classification::ImageArchive
    } else if mime == Some(MIME_FBZ)
        || ends_with_ignore_case(name, ".fb2.zip")
        || ends_with_ignore_case(name, ".fbz")
    {
        Classification::CompressedXml
    } else {
        Classification::Archive
    }
}

fn is_pdb_book(head: &[u8]) -> bool {
    head.get(PDB_IDENT_RANGE)
        .is_some_and(|ident| PDB_IDENTS.iter().any(|magic| ident == magic.as_slice()))
}

fn is_fb2(blob: &BlobSource) -> bool {
    blob.mime() == Some(MIME_FB2) || ends_with_ignore_case(blob.name(), ".fb2")
}
