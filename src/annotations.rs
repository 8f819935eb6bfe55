//! Highlights imported from a book's embedded Calibre bookmarks, indexed by
//! section and by range value.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::book::{Book, CalibreBookmark};
use crate::error::Result;

const DEFAULT_COLOR: &str = "yellow";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Annotation {
    /// EPUB CFI range identifying the highlighted text.
    pub value: String,
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub spine_index: usize,
}

/// Annotations grouped per section (in import order) with reverse lookup by
/// value. Built once, read-only afterwards.
#[derive(Debug, Default)]
pub struct AnnotationIndex {
    by_section: BTreeMap<usize, Vec<Annotation>>,
    by_value: HashMap<String, (usize, usize)>,
}

impl AnnotationIndex {
    /// Import the highlights a book embeds, if any.
    pub fn from_book(book: &dyn Book) -> Result<Self> {
        Ok(book
            .calibre_bookmarks()?
            .map(|bookmarks| Self::from_bookmarks(&bookmarks))
            .unwrap_or_default())
    }

    pub fn from_bookmarks(bookmarks: &[CalibreBookmark]) -> Self {
        let mut index = Self::default();
        for bookmark in bookmarks.iter().filter(|b| b.is_highlight()) {
            let (Some(spine_index), Some(start), Some(end)) =
                (bookmark.spine_index, &bookmark.start_cfi, &bookmark.end_cfi)
            else {
                log::warn!("skipping highlight without a range: {:?}", bookmark.uuid);
                continue;
            };

            let annotation = Annotation {
                value: cfi_from_calibre(spine_index, start, end),
                color: bookmark
                    .style
                    .as_ref()
                    .and_then(|style| style.which.clone())
                    .unwrap_or_else(|| DEFAULT_COLOR.to_string()),
                note: bookmark.notes.clone().filter(|note| !note.trim().is_empty()),
                spine_index,
            };
            index.insert(annotation);
        }
        log::debug!("imported {} highlights", index.len());
        index
    }

    fn insert(&mut self, annotation: Annotation) {
        if self.by_value.contains_key(&annotation.value) {
            log::warn!("duplicate highlight {} ignored", annotation.value);
            return;
        }
        let list = self.by_section.entry(annotation.spine_index).or_default();
        self.by_value
            .insert(annotation.value.clone(), (annotation.spine_index, list.len()));
        list.push(annotation);
    }

    /// Annotations to draw when section `index` is rendered.
    pub fn for_section(&self, index: usize) -> &[Annotation] {
        self.by_section.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, value: &str) -> Option<&Annotation> {
        let &(section, position) = self.by_value.get(value)?;
        self.by_section.get(&section)?.get(position)
    }

    pub fn color(&self, value: &str) -> Option<&str> {
        self.get(value).map(|a| a.color.as_str())
    }

    pub fn note(&self, value: &str) -> Option<&str> {
        self.get(value).and_then(|a| a.note.as_deref())
    }

    pub fn len(&self) -> usize {
        self.by_value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_value.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.by_section.values().flatten()
    }
}

/// Convert a Calibre highlight range to an EPUB CFI range.
///
/// Calibre stores each end as a path inside the content document starting
/// at the document root (`/2/4/2/1:0`). The result addresses the spine item
/// (`/6/{2(i+1)}`) and factors the common element path of both ends:
/// `epubcfi(/6/4!/4/2,/1:0,/1:12)`.
pub fn cfi_from_calibre(spine_index: usize, start: &str, end: &str) -> String {
    let start = steps(strip_document_root(start));
    let end = steps(strip_document_root(end));

    let shared = start
        .iter()
        .zip(&end)
        .take(start.len().min(end.len()).saturating_sub(1))
        .take_while(|(a, b)| a == b)
        .count();

    let join = |steps: &[&str]| steps.iter().map(|s| format!("/{s}")).collect::<String>();
    format!(
        "epubcfi(/6/{}!{},{},{})",
        (spine_index + 1) * 2,
        join(&start[..shared]),
        join(&start[shared..]),
        join(&end[shared..]),
    )
}

fn strip_document_root(cfi: &str) -> &str {
    let Some(rest) = cfi.strip_prefix("/2") else {
        return cfi;
    };
    match rest.as_bytes().first() {
        Some(b'/') => rest,
        Some(b'[') => rest.find('/').map(|i| &rest[i..]).unwrap_or(cfi),
        _ => cfi,
    }
}

fn steps(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::HighlightStyle;
    use proptest::prelude::*;

    fn highlight(spine_index: usize, start: &str, end: &str) -> CalibreBookmark {
        CalibreBookmark {
            kind: "highlight".into(),
            spine_index: Some(spine_index),
            start_cfi: Some(start.into()),
            end_cfi: Some(end.into()),
            style: None,
            notes: None,
            uuid: None,
        }
    }

    #[test]
    fn test_cfi_from_calibre() {
        assert_eq!(
            cfi_from_calibre(1, "/2/4/2/1:0", "/2/4/2/1:12"),
            "epubcfi(/6/4!/4/2,/1:0,/1:12)"
        );
        assert_eq!(
            cfi_from_calibre(0, "/2/4/2/1:5", "/2/4/6/3:1"),
            "epubcfi(/6/2!/4,/2/1:5,/6/3:1)"
        );
        assert_eq!(
            cfi_from_calibre(0, "/2[body]/4/1:0", "/2[body]/6/1:0"),
            "epubcfi(/6/2!,/4/1:0,/6/1:0)"
        );
    }

    #[test]
    fn test_index_groups_by_section() {
        let mut colored = highlight(2, "/2/4/1:0", "/2/4/1:9");
        colored.style = Some(HighlightStyle {
            kind: Some("color".into()),
            which: Some("green".into()),
        });
        colored.notes = Some("check this".into());
        let bookmarks = vec![
            highlight(2, "/2/2/1:0", "/2/2/1:4"),
            colored,
            CalibreBookmark {
                kind: "bookmark".into(),
                ..highlight(5, "/2/2", "/2/2")
            },
        ];

        let index = AnnotationIndex::from_bookmarks(&bookmarks);
        assert_eq!(index.len(), 2);
        assert_eq!(index.for_section(2).len(), 2);
        assert!(index.for_section(5).is_empty());

        let value = &index.for_section(2)[1].value;
        assert_eq!(index.color(value), Some("green"));
        assert_eq!(index.note(value), Some("check this"));

        let plain = &index.for_section(2)[0].value;
        assert_eq!(index.color(plain), Some("yellow"));
        assert_eq!(index.note(plain), None);
    }

    #[test]
    fn test_duplicate_value_is_skipped() {
        let bookmarks = vec![
            highlight(0, "/2/4/1:0", "/2/4/1:3"),
            highlight(0, "/2/4/1:0", "/2/4/1:3"),
        ];
        let index = AnnotationIndex::from_bookmarks(&bookmarks);
        assert_eq!(index.len(), 1);
        assert_eq!(index.iter().count(), 1);
    }

    #[test]
    fn test_unknown_value() {
        let index = AnnotationIndex::default();
        assert!(index.get("epubcfi(/6/2!/4,/1:0,/1:1)").is_none());
        assert!(index.is_empty());
    }

    fn calibre_cfi() -> impl Strategy<Value = String> {
        (
            proptest::collection::vec((1usize..8).prop_map(|n| n * 2), 1..4),
            0usize..40,
        )
            .prop_map(|(path, offset)| {
                let elements: String = path.iter().map(|step| format!("/{step}")).collect();
                format!("/2{elements}/1:{offset}")
            })
    }

    proptest! {
        #[test]
        fn test_values_are_injective(
            a in (0usize..5, calibre_cfi(), calibre_cfi()),
            b in (0usize..5, calibre_cfi(), calibre_cfi()),
        ) {
            prop_assume!(a != b);
            prop_assert_ne!(
                cfi_from_calibre(a.0, &a.1, &a.2),
                cfi_from_calibre(b.0, &b.1, &b.2)
            );
        }
    }
}
