// src/lib.rs

//! romsync - keep a pristine ROM collection synchronized with a dat file
//!
//! Given a catalog ("dat file") describing the expected games and their
//! ROM checksums, plus any number of source locations holding ROMs in
//! arbitrary containers (loose files, directories, zip, torrentzip, 7z,
//! rar), romsync produces a target directory where every game is a
//! reproducible torrentzip containing exactly its catalog ROMs, and
//! reports what remains missing as a trimmed dat file.
//!
//! # Architecture
//!
//! - Content-addressed: ROMs match by checksum and size, never by name
//! - Header-aware: iNES and Lynx headers are excluded from fingerprints
//! - Reproducible output: torrentzip archives are a pure function of
//!   their members, so repeated runs are byte-identical
//! - Parallel: scanning and reconciliation fan out to worker threads

pub mod archive;
pub mod catalog;
pub mod checksum;
mod error;
pub mod header;
pub mod index;
pub mod sync;

pub use checksum::Checksum;
pub use error::{Error, Result};
pub use index::{ContentIndex, Fingerprint, MemberRef};
pub use sync::Synchronizer;
