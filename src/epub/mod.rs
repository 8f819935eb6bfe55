//! EPUB container support: OPF package, NCX / nav table of contents and
//! Calibre's embedded bookmark store.

mod book;
pub mod parser;

pub use book::{EpubBook, EpubParser, resolve_href};
