// src/archive/file.rs

//! Loose ROM files coerced into one-member archives.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use super::{Counter, CountingReader, CountingWriter};
use crate::checksum::{self, Checksum, MemberDigest};
use crate::error::{Error, Result};
use crate::header;

/// Reads a single regular file as if it were an archive containing
/// exactly one member named after the file.
pub struct FileReader {
    path: PathBuf,
    name: String,
    filename: String,
    size: u64,
    digest: Option<MemberDigest>,
    rx: Counter,
}

impl FileReader {
    pub fn new(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(Error::NotRegular(path.to_path_buf()));
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::NotRegular(path.to_path_buf()))?;

        Ok(Self {
            path: path.to_path_buf(),
            name: path.to_string_lossy().into_owned(),
            filename,
            size: metadata.len(),
            digest: None,
            rx: Counter::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn files(&self) -> Vec<String> {
        vec![self.filename.clone()]
    }

    pub fn size(&mut self, member: &str) -> Result<(u64, u64)> {
        if member != self.filename {
            return Err(Error::MemberNotFound(member.to_string()));
        }
        if !header::has_header(member) {
            return Ok((self.size, 0));
        }
        let size = self.size;
        let digest = self.ensure_digest()?;
        Ok((size, digest.header))
    }

    pub fn checksum(&mut self, member: &str, checksum: Checksum) -> Result<Vec<u8>> {
        if member != self.filename {
            return Err(Error::MemberNotFound(member.to_string()));
        }
        let digest = self.ensure_digest()?;
        Ok(digest.digest(checksum))
    }

    pub fn open(&mut self, member: &str) -> Result<Box<dyn Read + '_>> {
        if member != self.filename {
            return Err(Error::MemberNotFound(member.to_string()));
        }
        let file = fs::File::open(&self.path)?;
        Ok(Box::new(CountingReader::new(file, self.rx.clone())))
    }

    pub fn rx(&self) -> u64 {
        self.rx.get()
    }

    fn ensure_digest(&mut self) -> Result<&MemberDigest> {
        if self.digest.is_none() {
            let file = fs::File::open(&self.path)?;
            let reader = CountingReader::new(file, self.rx.clone());
            self.digest = Some(checksum::digest_stream(&self.filename, reader)?);
        }
        Ok(self.digest.as_ref().expect("digest just computed"))
    }
}

/// Writes a single regular file as if it were an archive containing
/// exactly one member. The member name must match the file's base name.
pub struct FileWriter {
    path: PathBuf,
    name: String,
    filename: String,
    tx: Counter,
}

impl FileWriter {
    /// Any existing file at the path is removed first.
    pub fn new(path: &Path) -> Result<Self> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::NotRegular(path.to_path_buf()))?;

        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            path: path.to_path_buf(),
            name: path.to_string_lossy().into_owned(),
            filename,
            tx: Counter::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create(&mut self, member: &str) -> Result<CountingWriter<fs::File>> {
        if member != self.filename {
            return Err(Error::NestedMember(member.to_string()));
        }
        let file = fs::File::create(&self.path)?;
        Ok(CountingWriter::new(file, self.tx.clone()))
    }

    pub fn tx(&self) -> u64 {
        self.tx.get()
    }
}
