//! Error types for tomecat operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while merging or rewriting EPUB files.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("UTF-8 decoding error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Invalid EPUB: {0}")]
    InvalidEpub(String),

    #[error("Missing required element: {0}")]
    MissingElement(String),

    #[error("archive entry {0:?} escapes the extraction directory")]
    PathTraversal(String),

    #[error("toc nav not found")]
    NavNotFound,

    #[error("need at least two input EPUB files, got {0}")]
    NotEnoughSources(usize),

    #[error("output path is required")]
    MissingOutput,

    #[error("invalid rewrite rule: {0}")]
    InvalidRule(String),

    #[error("cannot parse markup in {path}: {message}")]
    Markup { path: String, message: String },

    #[error("operation cancelled")]
    Cancelled,

    /// A failure while handling one source volume.
    #[error("{}: {source}", path.display())]
    Volume {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Attach the offending source archive to this error.
    ///
    /// Cancellation is never wrapped so callers can match on it directly.
    pub fn for_source(self, path: impl Into<PathBuf>) -> Self {
        match self {
            Error::Cancelled | Error::Volume { .. } => self,
            other => Error::Volume {
                path: path.into(),
                source: Box::new(other),
            },
        }
    }

    /// Whether this error (or the error it wraps) is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Volume { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
