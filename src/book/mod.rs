//! The format-agnostic book capability every parser produces.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A parsed book.
///
/// Immutable once built; implementations may memoize derived data such as
/// the cover behind interior caches.
pub trait Book: Send + Sync {
    fn metadata(&self) -> &Metadata;

    /// Table of contents, in document order.
    fn toc(&self) -> &[TocEntry];

    /// Reading order (spine).
    fn sections(&self) -> &[Section];

    /// Cover image, if the format declares one.
    fn cover(&self) -> Result<Option<Blob>> {
        Ok(None)
    }

    /// Highlight/bookmark records Calibre embedded into the file.
    fn calibre_bookmarks(&self) -> Result<Option<Vec<CalibreBookmark>>> {
        Ok(None)
    }

    /// Fonts embedded in the container, decoded.
    fn embedded_fonts(&self) -> Result<Vec<Blob>> {
        Ok(Vec::new())
    }
}

/// Book metadata. Dates are kept as the strings the format declared.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub author: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contributor: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subject: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rights: Option<String>,
}

impl Metadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author.push(author.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// A table of contents entry (hierarchical).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TocEntry {
    pub title: String,
    /// Navigable target, understood by the view's `go_to`.
    pub href: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TocEntry>,
}

impl TocEntry {
    pub fn new(title: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            href: href.into(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: TocEntry) -> Self {
        self.children.push(child);
        self
    }
}

/// An entry in the reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Format-specific identifier (a path for container formats).
    pub id: String,
    /// Size in bytes, used to weight reading progress.
    pub size: u64,
    /// False for ancillary content (covers, notes, ads) that is skipped when
    /// computing reading progress.
    pub linear: bool,
}

impl Section {
    pub fn new(id: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            size,
            linear: true,
        }
    }

    pub fn non_linear(mut self) -> Self {
        self.linear = false;
        self
    }
}

/// Binary content with its media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
    pub mime: Option<String>,
}

impl Blob {
    pub fn new(data: Vec<u8>, mime: Option<&str>) -> Self {
        Self {
            data,
            mime: mime.map(str::to_string),
        }
    }
}

/// One record from Calibre's embedded bookmark store.
///
/// Only highlights carry the CFI fields; plain bookmarks carry `pos`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CalibreBookmark {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub spine_index: Option<usize>,
    #[serde(default)]
    pub start_cfi: Option<String>,
    #[serde(default)]
    pub end_cfi: Option<String>,
    #[serde(default)]
    pub style: Option<HighlightStyle>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
}

impl CalibreBookmark {
    pub fn is_highlight(&self) -> bool {
        self.kind == "highlight"
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HighlightStyle {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub which: Option<String>,
}
