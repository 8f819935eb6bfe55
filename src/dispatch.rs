//! Routing from a sniffed source to the parser that understands it.
//!
//! Every entry point (CLI, session, tests) goes through [`BookDispatcher`];
//! adding a container format means adding a [`ParserKind`], a route in
//! [`ParserKind::for_classification`], and registering a [`BookParser`].

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use crate::book::Book;
use crate::error::{Error, Result};
use crate::io::ByteSource;
use crate::sniff::Classification;
use crate::source::Source;
use crate::storage::{ArchiveStorage, DirectoryStorage, Storage};
use crate::{comic, epub, fb2, mobi};

/// Decompression capability handed to parsers that need zlib without
/// owning a codec: compressed bytes in, decompressed bytes out.
pub type Inflate = Arc<dyn Fn(&[u8]) -> std::io::Result<Vec<u8>> + Send + Sync>;

/// Default [`Inflate`]: zlib via flate2.
pub fn zlib_inflate() -> Inflate {
    Arc::new(|data: &[u8]| {
        let mut out = Vec::new();
        flate2::read::ZlibDecoder::new(data).read_to_end(&mut out)?;
        Ok(out)
    })
}

/// What a parser receives, prepared by the dispatcher.
pub enum ParserInput {
    /// A container of named parts (ZIP or directory).
    Container(Arc<dyn Storage>),
    /// A container of page images, plus the source name for a title
    /// fallback.
    ImageSequence {
        storage: Arc<dyn Storage>,
        name: String,
    },
    /// A complete XML document.
    Xml(Vec<u8>),
    /// A binary database read in place, with an injected decompressor.
    Binary {
        source: Arc<dyn ByteSource>,
        inflate: Inflate,
    },
}

impl ParserInput {
    fn describe(&self) -> &'static str {
        match self {
            ParserInput::Container(_) => "container",
            ParserInput::ImageSequence { .. } => "image sequence",
            ParserInput::Xml(_) => "XML document",
            ParserInput::Binary { .. } => "binary database",
        }
    }
}

/// A format parser. Parsing is not retried on failure.
pub trait BookParser: Send + Sync {
    fn parse(&self, input: ParserInput) -> Result<Box<dyn Book>>;
}

/// Error for a parser handed an input shape it does not consume.
pub fn wrong_input(parser: &str, input: &ParserInput) -> Error {
    Error::UnsupportedFormat(format!("{parser} parser cannot read a {}", input.describe()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParserKind {
    Epub,
    ComicBook,
    FictionBook,
    Mobi,
}

impl ParserKind {
    /// The dispatch table.
    pub fn for_classification(classification: Classification) -> Option<Self> {
        match classification {
            Classification::Archive | Classification::Directory => Some(ParserKind::Epub),
            Classification::ImageArchive => Some(ParserKind::ComicBook),
            Classification::CompressedXml | Classification::PlainXml => {
                Some(ParserKind::FictionBook)
            }
            Classification::CompressedBinary => Some(ParserKind::Mobi),
            Classification::Unknown => None,
        }
    }
}

/// Opens sources into books.
pub struct BookDispatcher {
    parsers: HashMap<ParserKind, Box<dyn BookParser>>,
    inflate: Inflate,
}

impl Default for BookDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl BookDispatcher {
    /// A dispatcher with the bundled EPUB, comic, FictionBook and MOBI
    /// parsers and flate2 zlib decompression.
    pub fn new() -> Self {
        let mut dispatcher = Self::empty();
        dispatcher.register(ParserKind::Epub, epub::EpubParser);
        dispatcher.register(ParserKind::ComicBook, comic::ComicBookParser);
        dispatcher.register(ParserKind::FictionBook, fb2::Fb2Parser);
        dispatcher.register(ParserKind::Mobi, mobi::MobiParser);
        dispatcher
    }

    /// A dispatcher with no parsers registered.
    pub fn empty() -> Self {
        Self {
            parsers: HashMap::new(),
            inflate: zlib_inflate(),
        }
    }

    /// Register (or replace) the parser for a kind.
    pub fn register(&mut self, kind: ParserKind, parser: impl BookParser + 'static) {
        self.parsers.insert(kind, Box::new(parser));
    }

    /// Replace the decompressor given to binary-format parsers.
    pub fn with_inflate(mut self, inflate: Inflate) -> Self {
        self.inflate = inflate;
        self
    }

    /// Sniff (once, memoized on the source) and parse.
    pub fn open(&self, source: &Source) -> Result<Box<dyn Book>> {
        let classification = source.classification()?;
        self.open_as(source, classification)
    }

    /// Parse a source whose classification is already known.
    pub fn open_as(&self, source: &Source, classification: Classification) -> Result<Box<dyn Book>> {
        let kind = ParserKind::for_classification(classification).ok_or_else(|| {
            Error::UnsupportedFormat(format!("{} is not a recognised book", source.name()))
        })?;
        let parser = self.parsers.get(&kind).ok_or_else(|| {
            Error::UnsupportedFormat(format!("no parser registered for {kind:?}"))
        })?;

        let input = self.prepare(source, classification)?;
        log::debug!("dispatching {:?} ({classification}) to {kind:?}", source.name());
        parser.parse(input)
    }

    fn prepare(&self, source: &Source, classification: Classification) -> Result<ParserInput> {
        if let Some(root) = source.as_directory() {
            return Ok(ParserInput::Container(Arc::new(DirectoryStorage::new(root)?)));
        }
        let blob = source.as_blob().ok_or_else(|| Error::NotFound(source.name()))?;

        let input = match classification {
            Classification::Archive | Classification::Directory => {
                ParserInput::Container(Arc::new(ArchiveStorage::new(blob.bytes().clone())?))
            }
            Classification::ImageArchive => ParserInput::ImageSequence {
                storage: Arc::new(ArchiveStorage::new(blob.bytes().clone())?),
                name: blob.name().to_string(),
            },
            Classification::CompressedXml => {
                let storage = ArchiveStorage::new(blob.bytes().clone())?;
                let entry = fb2_entry(&storage)
                    .ok_or_else(|| Error::Parse(format!("{} is an empty archive", blob.name())))?
                    .to_string();
                let bytes = storage
                    .load_blob(&entry, None)?
                    .ok_or_else(|| Error::Parse(format!("{entry} vanished from the archive")))?;
                log::debug!("reading FictionBook entry {entry:?}");
                ParserInput::Xml(bytes.data)
            }
            Classification::PlainXml => ParserInput::Xml(blob.bytes().read_all()?),
            Classification::CompressedBinary => ParserInput::Binary {
                source: blob.bytes().clone(),
                inflate: self.inflate.clone(),
            },
            Classification::Unknown => {
                return Err(Error::UnsupportedFormat(blob.name().to_string()));
            }
        };
        Ok(input)
    }
}

/// The entry of a zipped FictionBook to parse: the first `.fb2` by name,
/// else the first entry.
pub fn fb2_entry(storage: &dyn Storage) -> Option<&str> {
    let paths = storage.paths();
    paths
        .iter()
        .find(|p| crate::util::ends_with_ignore_case(p, ".fb2"))
        .or_else(|| paths.first())
        .map(String::as_str)
}
