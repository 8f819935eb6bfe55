//! MOBI / PalmDOC databases.

mod book;
mod headers;
mod palmdoc;

pub use book::{MobiBook, MobiParser};
