// src/error.rs

//! Crate-wide error type and result alias.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while scanning, reconciling or serializing
#[derive(Error, Debug)]
pub enum Error {
    /// The path exists but is not a regular file
    #[error("not a regular file: {}", .0.display())]
    NotRegular(PathBuf),

    /// The path exists but is not a directory
    #[error("not a directory: {}", .0.display())]
    NotDirectory(PathBuf),

    /// The requested member is not present in the archive
    #[error("member not found: {0}")]
    MemberNotFound(String),

    /// Writers only accept flat member names
    #[error("nested member names not supported: {0}")]
    NestedMember(String),

    /// Unsupported checksum algorithm name
    #[error("unknown checksum algorithm: {0}")]
    UnknownAlgorithm(String),

    /// The stream ended before the header its extension claims
    #[error("short read on {0}: stream shorter than its format header")]
    ShortRead(String),

    /// The zip archive lacks a valid torrentzip comment. Recovered
    /// locally by falling back to a plain zip reader.
    #[error("not a torrentzip archive")]
    NotTorrentZip,

    /// The directory walk was interrupted by cancellation
    #[error("walk cancelled")]
    WalkCancelled,

    /// The pipeline was interrupted by cancellation
    #[error("cancelled")]
    Cancelled,

    /// The dat file on standard input could not be parsed
    #[error("catalog parse: {0}")]
    CatalogParse(#[from] quick_xml::DeError),

    /// The trimmed dat file could not be serialized
    #[error("catalog write: {0}")]
    CatalogWrite(#[from] quick_xml::SeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("7z archive: {0}")]
    SevenZip(#[from] sevenz_rust::Error),

    #[error("rar archive: {0}")]
    Rar(#[from] unrar::error::UnrarError),
}

impl Error {
    /// Cancellation errors are only reported when no real error caused them
    pub(crate) fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::WalkCancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
