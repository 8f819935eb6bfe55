//! Comic book archives (CBZ): a ZIP of page images read in name order.

use std::sync::Arc;

use crate::book::{Blob, Book, Metadata, Section, TocEntry};
use crate::dispatch::{BookParser, ParserInput, wrong_input};
use crate::error::{Error, Result};
use crate::storage::Storage;
use crate::util::{file_stem, mime_from_path};

#[derive(Debug, Clone, Copy, Default)]
pub struct ComicBookParser;

impl BookParser for ComicBookParser {
    fn parse(&self, input: ParserInput) -> Result<Box<dyn Book>> {
        match input {
            ParserInput::ImageSequence { storage, name } => {
                Ok(Box::new(ComicBook::open(storage, &name)?))
            }
            other => Err(wrong_input("comic book", &other)),
        }
    }
}

pub struct ComicBook {
    storage: Arc<dyn Storage>,
    metadata: Metadata,
    toc: Vec<TocEntry>,
    sections: Vec<Section>,
}

impl ComicBook {
    pub fn open(storage: Arc<dyn Storage>, name: &str) -> Result<Self> {
        let mut pages: Vec<&String> = storage
            .paths()
            .iter()
            .filter(|path| is_page(path))
            .collect();
        pages.sort();

        if pages.is_empty() {
            return Err(Error::Parse(format!("{name} contains no page images")));
        }

        let sections: Vec<Section> = pages
            .iter()
            .map(|path| Section::new(path.as_str(), storage.size(path)))
            .collect();
        let toc = pages
            .iter()
            .enumerate()
            .map(|(i, path)| TocEntry::new(format!("Page {}", i + 1), path.as_str()))
            .collect();

        log::debug!("comic book {name:?}: {} pages", sections.len());
        Ok(Self {
            metadata: Metadata::new(file_stem(name)),
            toc,
            sections,
            storage,
        })
    }
}

/// Image entries, ignoring macOS resource forks and hidden files.
fn is_page(path: &str) -> bool {
    let base = path.rsplit('/').next().unwrap_or(path);
    !path.starts_with("__MACOSX/")
        && !base.starts_with('.')
        && mime_from_path(path).is_some_and(|mime| mime.starts_with("image/"))
}

impl Book for ComicBook {
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
        match self.sections.first() {
            Some(first) => self.storage.load_blob(&first.id, None),
            None => Ok(None),
        }
    }
}
