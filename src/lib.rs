//! # lectern
//!
//! Opens e-books of unknown provenance behind one [`Book`] interface and
//! keeps the live state of a reading session.
//!
//! ## Features
//!
//! - Sniffs EPUB (zipped or unpacked), MOBI/AZW, FictionBook (plain or
//!   zipped) and comic-book archives from magic bytes and declared names
//! - One random-access [`Storage`] interface over ZIP archives and
//!   directory trees
//! - A [`ReadingSession`] that applies appearance, deduplicates location
//!   reports, maps the table of contents to reading-order fractions and
//!   overlays embedded Calibre highlights
//!
//! ## Quick Start
//!
//! ```no_run
//! use lectern::{BookDispatcher, Source};
//!
//! let source = Source::open("book.epub").unwrap();
//! let book = BookDispatcher::new().open(&source).unwrap();
//! println!("{:?}", book.metadata().title);
//! for entry in book.toc() {
//!     println!("{} -> {}", entry.title, entry.href);
//! }
//! ```
//!
//! ## Reading Sessions
//!
//! ```no_run
//! use lectern::session::{HeadlessView, ReadingSession, RecordingBridge};
//! use lectern::Source;
//!
//! let mut session = ReadingSession::new(HeadlessView::default(), RecordingBridge::new());
//! session.open(&Source::open("book.mobi").unwrap()).unwrap();
//! session.pump().unwrap();
//! session.next().unwrap();
//! session.pump().unwrap();
//! println!("{:?}", session.toc_fractions().unwrap());
//! ```

pub mod annotations;
pub mod appearance;
pub mod book;
pub mod comic;
pub mod dispatch;
pub mod epub;
pub mod error;
pub mod fb2;
pub mod io;
pub mod mobi;
pub mod session;
pub mod sniff;
pub mod source;
pub mod storage;
pub(crate) mod util;

pub use annotations::{Annotation, AnnotationIndex};
pub use appearance::{Appearance, LayoutConfig, StyleConfig};
pub use book::{Blob, Book, Metadata, Section, TocEntry};
pub use dispatch::BookDispatcher;
pub use error::{Error, ErrorKind, Result};
pub use session::{HostBridge, ReadingSession, View};
pub use sniff::{Classification, sniff};
pub use source::Source;
pub use storage::Storage;
