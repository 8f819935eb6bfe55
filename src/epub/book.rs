use std::sync::{Arc, OnceLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::parser::{OpfData, parse_container_xml, parse_nav, parse_ncx, parse_opf};
use crate::book::{Blob, Book, CalibreBookmark, Metadata, Section, TocEntry};
use crate::dispatch::{BookParser, ParserInput, wrong_input};
use crate::error::{Error, Result};
use crate::storage::Storage;

const CONTAINER_PATH: &str = "META-INF/container.xml";
const CALIBRE_BOOKMARKS_PATH: &str = "META-INF/calibre_bookmarks.txt";
const CALIBRE_BOOKMARKS_PREFIX: &str = "encoding=json+base64:";

/// Parser for EPUB 2 and EPUB 3 containers, zipped or unpacked.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpubParser;

impl BookParser for EpubParser {
    fn parse(&self, input: ParserInput) -> Result<Box<dyn Book>> {
        match input {
            ParserInput::Container(storage) => Ok(Box::new(EpubBook::open(storage)?)),
            other => Err(wrong_input("EPUB", &other)),
        }
    }
}

/// An EPUB read through a [`Storage`]. Content documents stay in the
/// container; only the package, TOC and sizes are read up front.
pub struct EpubBook {
    storage: Arc<dyn Storage>,
    metadata: Metadata,
    toc: Vec<TocEntry>,
    sections: Vec<Section>,
    cover_path: Option<(String, String)>,
    cover: OnceLock<Option<Blob>>,
}

impl EpubBook {
    pub fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        let container = storage
            .load_text(CONTAINER_PATH)?
            .ok_or_else(|| Error::Parse(format!("missing {CONTAINER_PATH}")))?;
        let opf_path = parse_container_xml(&container)?;
        let opf_dir = parent_dir(&opf_path);

        let opf_content = storage
            .load_text(&opf_path)?
            .ok_or_else(|| Error::Parse(format!("package document {opf_path} not found")))?;
        let opf = parse_opf(&opf_content)?;

        // One section per itemref, so section indices stay spine indices.
        let sections: Vec<Section> = opf
            .spine
            .iter()
            .map(|spine_ref| {
                let Some(item) = opf.manifest.get(&spine_ref.idref) else {
                    log::warn!("spine itemref {:?} has no manifest item", spine_ref.idref);
                    return Section::new(spine_ref.idref.clone(), 0).non_linear();
                };
                let path = resolve_href(opf_dir, &item.href);
                let section = Section::new(path.clone(), storage.size(&path));
                if spine_ref.linear { section } else { section.non_linear() }
            })
            .collect();

        let toc = read_toc(storage.as_ref(), &opf, opf_dir)?;

        let cover_path = opf
            .cover_id
            .as_ref()
            .and_then(|id| opf.manifest.get(id))
            .map(|item| (resolve_href(opf_dir, &item.href), item.media_type.clone()));

        log::debug!(
            "EPUB package {opf_path}: {} sections, {} top-level TOC entries",
            sections.len(),
            toc.len()
        );

        Ok(Self {
            storage,
            metadata: opf.metadata,
            toc,
            sections,
            cover_path,
            cover: OnceLock::new(),
        })
    }
}

type NavParser = fn(&str) -> Result<Vec<TocEntry>>;

/// TOC from the EPUB 3 nav document, else the NCX. A missing or broken
/// navigation file yields an empty TOC.
fn read_toc(storage: &dyn Storage, opf: &OpfData, opf_dir: &str) -> Result<Vec<TocEntry>> {
    let candidates: [(Option<&String>, NavParser); 2] =
        [(opf.nav_id.as_ref(), parse_nav), (opf.ncx_id.as_ref(), parse_ncx)];

    for (id, parse) in candidates {
        let Some(item) = id.and_then(|id| opf.manifest.get(id)) else {
            continue;
        };
        let path = resolve_href(opf_dir, &item.href);
        let Some(content) = storage.load_text(&path)? else {
            continue;
        };
        match parse(&content) {
            Ok(entries) if !entries.is_empty() => {
                let base = parent_dir(&path);
                return Ok(entries.into_iter().map(|e| rebase(e, base)).collect());
            }
            Ok(_) => {}
            Err(e) => log::warn!("ignoring unreadable navigation document {path}: {e}"),
        }
    }

    Ok(Vec::new())
}

fn rebase(mut entry: TocEntry, base: &str) -> TocEntry {
    if !entry.href.is_empty() {
        entry.href = resolve_href(base, &entry.href);
    }
    entry.children = entry.children.into_iter().map(|c| rebase(c, base)).collect();
    entry
}

impl Book for EpubBook {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn toc(&self) -> &[TocEntry] {
        &self.toc
    }

    fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn cover(&self) -> Result<Option<Blob>> {
        if let Some(cover) = self.cover.get() {
            return Ok(cover.clone());
        }
        let cover = match &self.cover_path {
            Some((path, mime)) => {
                let mime = (!mime.is_empty()).then_some(mime.as_str());
                self.storage.load_blob(path, mime)?
            }
            None => None,
        };
        Ok(self.cover.get_or_init(|| cover).clone())
    }

    fn calibre_bookmarks(&self) -> Result<Option<Vec<CalibreBookmark>>> {
        let Some(text) = self.storage.load_text(CALIBRE_BOOKMARKS_PATH)? else {
            return Ok(None);
        };
        decode_calibre_bookmarks(&text).map(Some)
    }
}

/// Decode `calibre_bookmarks.txt`: a prefix line followed by base64 JSON.
fn decode_calibre_bookmarks(text: &str) -> Result<Vec<CalibreBookmark>> {
    let payload = text
        .trim_start()
        .strip_prefix(CALIBRE_BOOKMARKS_PREFIX)
        .ok_or_else(|| Error::Parse("unrecognised calibre bookmark encoding".into()))?;
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let json = STANDARD
        .decode(compact)
        .map_err(|e| Error::Parse(format!("calibre bookmarks: {e}")))?;
    Ok(serde_json::from_slice(&json)?)
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Resolve an href found in a document under `base` to a container path.
///
/// The path part is percent-decoded and `.`/`..` segments are collapsed; a
/// `#fragment` is kept as written. Absolute URLs are returned unchanged.
pub fn resolve_href(base: &str, href: &str) -> String {
    if href.contains("://") || href.starts_with("mailto:") {
        return href.to_string();
    }

    let (path, fragment) = match href.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment)),
        None => (href, None),
    };
    let decoded = percent_encoding::percent_decode_str(path).decode_utf8_lossy();

    let joined = if decoded.starts_with('/') || base.is_empty() {
        decoded.trim_start_matches('/').to_string()
    } else if decoded.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{decoded}")
    };
    let mut parts: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    let mut resolved = parts.join("/");
    if let Some(fragment) = fragment {
        resolved.push('#');
        resolved.push_str(fragment);
    }
    resolved
}
