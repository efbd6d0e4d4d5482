// src/archive/rar.rs

//! RAR archives, read-only.
//!
//! The unrar wrapper only offers cursor-style access, so opening a
//! member walks the archive and buffers that member's payload. There is
//! no trusted-checksum shortcut; every digest streams the payload.

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use unrar::Archive;

use crate::checksum::{self, Checksum, MemberDigest};
use crate::error::{Error, Result};
use crate::header;

use super::Counter;

/// Reads the top-level regular members of a RAR archive.
pub struct RarReader {
    path: PathBuf,
    name: String,
    members: BTreeMap<String, u64>,
    digests: HashMap<String, MemberDigest>,
    rx: Counter,
}

impl RarReader {
    pub fn new(path: &Path) -> Result<Self> {
        let mut members = BTreeMap::new();
        for entry in Archive::new(&path).open_for_listing()? {
            let entry = entry?;
            if !entry.is_file() {
                continue;
            }
            if entry.filename.parent() != Some(Path::new("")) {
                continue;
            }
            let Some(name) = entry.filename.file_name().map(|n| n.to_string_lossy().into_owned())
            else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            members.insert(name, u64::try_from(entry.unpacked_size).unwrap_or_default());
        }

        Ok(Self {
            path: path.to_path_buf(),
            name: path.to_string_lossy().into_owned(),
            members,
            digests: HashMap::new(),
            rx: Counter::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn files(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    pub fn size(&mut self, member: &str) -> Result<(u64, u64)> {
        let stored = *self
            .members
            .get(member)
            .ok_or_else(|| Error::MemberNotFound(member.to_string()))?;
        if !header::has_header(member) {
            return Ok((stored, 0));
        }
        let digest = self.ensure_digest(member)?;
        Ok((stored, digest.header))
    }

    pub fn checksum(&mut self, member: &str, checksum: Checksum) -> Result<Vec<u8>> {
        if !self.members.contains_key(member) {
            return Err(Error::MemberNotFound(member.to_string()));
        }
        let digest = self.ensure_digest(member)?;
        Ok(digest.digest(checksum))
    }

    pub fn open(&mut self, member: &str) -> Result<Box<dyn Read + '_>> {
        let data = self.extract(member)?;
        Ok(Box::new(Cursor::new(data)))
    }

    pub fn rx(&self) -> u64 {
        self.rx.get()
    }

    fn extract(&mut self, member: &str) -> Result<Vec<u8>> {
        if !self.members.contains_key(member) {
            return Err(Error::MemberNotFound(member.to_string()));
        }

        let mut archive = Archive::new(&self.path).open_for_processing()?;
        while let Some(header) = archive.read_header()? {
            let matches = header
                .entry()
                .filename
                .file_name()
                .map(|n| n.to_string_lossy() == member)
                .unwrap_or(false);
            archive = if matches {
                let (data, _) = header.read()?;
                self.rx.add(data.len() as u64);
                return Ok(data);
            } else {
                header.skip()?
            };
        }

        Err(Error::MemberNotFound(member.to_string()))
    }

    fn ensure_digest(&mut self, member: &str) -> Result<&MemberDigest> {
        if !self.digests.contains_key(member) {
            let data = self.extract(member)?;
            let digest = checksum::digest_stream(member, Cursor::new(data))?;
            self.digests.insert(member.to_string(), digest);
        }
        Ok(self.digests.get(member).expect("digest just computed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Stored-compression archive holding test.bin, cart.nes (iNES header
    // plus 12 payload bytes), a hidden file and a nested sub/inner.bin
    const FIXTURE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/test.rar");

    #[test]
    fn test_members_filtered_and_sorted() {
        let reader = RarReader::new(Path::new(FIXTURE)).unwrap();
        assert_eq!(reader.name(), FIXTURE);
        assert_eq!(
            reader.files(),
            vec!["cart.nes".to_string(), "test.bin".to_string()]
        );
    }

    #[test]
    fn test_sizes() {
        let mut reader = RarReader::new(Path::new(FIXTURE)).unwrap();
        assert_eq!(reader.size("test.bin").unwrap(), (20, 0));
        assert_eq!(reader.size("cart.nes").unwrap(), (28, 16));
    }

    #[test]
    fn test_checksums_stream_the_payload() {
        let mut reader = RarReader::new(Path::new(FIXTURE)).unwrap();
        assert_eq!(
            hex::encode(reader.checksum("test.bin", Checksum::Crc32).unwrap()),
            "638c0d29"
        );
        assert_eq!(
            hex::encode(reader.checksum("test.bin", Checksum::Md5).unwrap()),
            "644be06dfc54061fd1e67f5ebbabcd58"
        );
        // The iNES header is excluded from the digest
        assert_eq!(
            hex::encode(reader.checksum("cart.nes", Checksum::Crc32).unwrap()),
            "9270c965"
        );
        // Extraction is counted
        assert!(reader.rx() >= 20);
    }

    #[test]
    fn test_open() {
        let mut reader = RarReader::new(Path::new(FIXTURE)).unwrap();
        let mut member = reader.open("test.bin").unwrap();
        let mut out = Vec::new();
        member.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"0123456789abcdefghij");
    }

    #[test]
    fn test_member_not_found() {
        let mut reader = RarReader::new(Path::new(FIXTURE)).unwrap();
        assert!(matches!(
            reader.checksum("missing.bin", Checksum::Crc32),
            Err(Error::MemberNotFound(_))
        ));
        // Hidden and nested entries are invisible
        assert!(matches!(
            reader.open(".hidden"),
            Err(Error::MemberNotFound(_))
        ));
        assert!(matches!(
            reader.open("sub/inner.bin"),
            Err(Error::MemberNotFound(_))
        ));
    }
}
