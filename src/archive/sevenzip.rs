// src/archive/sevenzip.rs

//! 7z archives, read-only.
//!
//! 7z folders are solid by default, so opening one member decompresses
//! everything stored before it. The member payload is buffered in memory;
//! collections with multi-gigabyte solid archives should prefer zip.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::Path;

use sevenz_rust::{Password, SevenZReader};

use super::{Counter, CountingReader};
use crate::checksum::{self, Checksum, MemberDigest};
use crate::error::{Error, Result};
use crate::header;

#[derive(Debug, Clone)]
struct SevenZipMember {
    size: u64,
    crc32: u32,
}

/// Reads the top-level regular members of a 7z archive. Like zip, the
/// stored CRC32 is trusted for members without a header rule.
pub struct SevenZipReader {
    name: String,
    reader: SevenZReader<CountingReader<fs::File>>,
    members: BTreeMap<String, SevenZipMember>,
    digests: HashMap<String, MemberDigest>,
    rx: Counter,
}

impl SevenZipReader {
    pub fn new(path: &Path) -> Result<Self> {
        let rx = Counter::new();
        let file = fs::File::open(path)?;
        let len = file.metadata()?.len();
        let reader = SevenZReader::new(CountingReader::new(file, rx.clone()), len, Password::empty())?;

        let mut members = BTreeMap::new();
        for entry in &reader.archive().files {
            if entry.is_directory() {
                continue;
            }
            let name = entry.name().to_string();
            if name.starts_with('.') || name.contains('/') || name.contains('\\') {
                continue;
            }
            members.insert(
                name,
                SevenZipMember {
                    size: entry.size(),
                    crc32: entry.crc as u32,
                },
            );
        }

        Ok(Self {
            name: path.to_string_lossy().into_owned(),
            reader,
            members,
            digests: HashMap::new(),
            rx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn files(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    pub fn size(&mut self, member: &str) -> Result<(u64, u64)> {
        let stored = self
            .members
            .get(member)
            .map(|m| m.size)
            .ok_or_else(|| Error::MemberNotFound(member.to_string()))?;
        if !header::has_header(member) {
            return Ok((stored, 0));
        }
        let digest = self.ensure_digest(member)?;
        Ok((stored, digest.header))
    }

    pub fn checksum(&mut self, member: &str, checksum: Checksum) -> Result<Vec<u8>> {
        let info = self
            .members
            .get(member)
            .cloned()
            .ok_or_else(|| Error::MemberNotFound(member.to_string()))?;

        if checksum == Checksum::Crc32 && !header::has_header(member) {
            return Ok(info.crc32.to_be_bytes().to_vec());
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

        let mut data = Vec::new();
        let mut found = false;
        let mut copy_error: Option<io::Error> = None;
        self.reader.for_each_entries(|entry, reader| {
            if entry.name() == member {
                found = true;
                if let Err(e) = io::copy(reader, &mut data) {
                    copy_error = Some(e);
                }
                Ok(false)
            } else {
                Ok(true)
            }
        })?;

        if let Some(e) = copy_error {
            return Err(e.into());
        }
        if !found {
            return Err(Error::MemberNotFound(member.to_string()));
        }
        Ok(data)
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
    const FIXTURE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/test.7z");

    #[test]
    fn test_members_filtered_and_sorted() {
        let reader = SevenZipReader::new(Path::new(FIXTURE)).unwrap();
        assert_eq!(reader.name(), FIXTURE);
        assert_eq!(
            reader.files(),
            vec!["cart.nes".to_string(), "test.bin".to_string()]
        );
    }

    #[test]
    fn test_sizes() {
        let mut reader = SevenZipReader::new(Path::new(FIXTURE)).unwrap();
        assert_eq!(reader.size("test.bin").unwrap(), (20, 0));
        assert_eq!(reader.size("cart.nes").unwrap(), (28, 16));
    }

    #[test]
    fn test_crc_from_archive_metadata() {
        let mut reader = SevenZipReader::new(Path::new(FIXTURE)).unwrap();
        let rx = reader.rx();
        assert_eq!(
            hex::encode(reader.checksum("test.bin", Checksum::Crc32).unwrap()),
            "638c0d29"
        );
        // No extraction happened for the shortcut
        assert_eq!(reader.rx(), rx);

        assert_eq!(
            hex::encode(reader.checksum("test.bin", Checksum::Md5).unwrap()),
            "644be06dfc54061fd1e67f5ebbabcd58"
        );
        assert!(reader.rx() > rx);
    }

    #[test]
    fn test_header_member_streams() {
        let mut reader = SevenZipReader::new(Path::new(FIXTURE)).unwrap();
        // CRC of the payload behind the iNES header, not the stored CRC
        assert_eq!(
            hex::encode(reader.checksum("cart.nes", Checksum::Crc32).unwrap()),
            "9270c965"
        );
    }

    #[test]
    fn test_open() {
        let mut reader = SevenZipReader::new(Path::new(FIXTURE)).unwrap();
        let mut member = reader.open("test.bin").unwrap();
        let mut out = Vec::new();
        member.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"0123456789abcdefghij");
    }

    #[test]
    fn test_member_not_found() {
        let mut reader = SevenZipReader::new(Path::new(FIXTURE)).unwrap();
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
