//! Error types for lectern operations.

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while loading a book or driving a reading session.
#[derive(Error, Debug)]
pub enum Error {
    /// The source is empty or does not exist.
    #[error("File not found: {0}")]
    NotFound(String),

    /// Sniffing reached `Unknown`, or no parser is registered for the
    /// classification.
    #[error("File type not supported: {0}")]
    UnsupportedFormat(String),

    /// A format parser rejected the structure of the book.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Reading the raw source failed.
    #[error("I/O error: {0}")]
    Transport(#[from] std::io::Error),

    /// `open` was called while a previous `open` had not finished.
    #[error("A book is already being opened")]
    SessionBusy,

    /// The operation needs an open book.
    #[error("No book is open")]
    NotReady,
}

/// Stable error category, reported to the host on load failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    NotFound,
    UnsupportedFormat,
    ParseError,
    TransportError,
    SessionBusy,
    NotReady,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Error::Parse(_) => ErrorKind::ParseError,
            Error::Transport(_) => ErrorKind::TransportError,
            Error::SessionBusy => ErrorKind::SessionBusy,
            Error::NotReady => ErrorKind::NotReady,
        }
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => Error::Transport(e),
            other => Error::Parse(format!("ZIP: {other}")),
        }
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Parse(format!("XML: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(format!("JSON: {err}"))
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::Parse(format!("UTF-8: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
