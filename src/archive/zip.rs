// src/archive/zip.rs

//! Plain zip archives.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use super::torrent::{CENTRAL_ENTRY_LEN, LOCAL_HEADER_LEN};
use super::{Counter, CountingReader};
use crate::checksum::{self, Checksum, MemberDigest};
use crate::error::{Error, Result};
use crate::header;

const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;

#[derive(Debug, Clone)]
struct ZipMember {
    index: usize,
    size: u64,
    crc32: u32,
}

/// Reads the top-level regular members of a zip archive. The CRC32 from
/// the central directory is trusted for members without a header rule,
/// so matching on CRC32 usually costs no decompression at all.
pub struct ZipReader {
    path: PathBuf,
    name: String,
    archive: ZipArchive<CountingReader<fs::File>>,
    members: BTreeMap<String, ZipMember>,
    digests: HashMap<String, MemberDigest>,
    comment: Vec<u8>,
    /// Start offset and length of the central directory, computed from
    /// the entry metadata the way torrentzip defines it
    central_extent: (u64, u64),
    rx: Counter,
}

impl ZipReader {
    pub fn new(path: &Path) -> Result<Self> {
        let rx = Counter::new();
        let file = fs::File::open(path)?;
        let mut archive = ZipArchive::new(CountingReader::new(file, rx.clone()))?;

        let comment = archive.comment().to_vec();

        let mut members = BTreeMap::new();
        let mut central_offset = 0u64;
        let mut central_len = 0u64;
        for index in 0..archive.len() {
            let entry = archive.by_index_raw(index)?;

            central_offset += LOCAL_HEADER_LEN + entry.name_raw().len() as u64 + entry.compressed_size();
            central_len += CENTRAL_ENTRY_LEN + entry.name_raw().len() as u64;

            if entry.is_dir() {
                continue;
            }
            if let Some(mode) = entry.unix_mode() {
                if mode & S_IFMT != 0 && mode & S_IFMT != S_IFREG {
                    continue;
                }
            }
            let name = entry.name().to_string();
            if name.starts_with('.') || name.contains('/') || name.contains('\\') {
                continue;
            }
            members.insert(
                name,
                ZipMember {
                    index,
                    size: entry.size(),
                    crc32: entry.crc32(),
                },
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            name: path.to_string_lossy().into_owned(),
            archive,
            members,
            digests: HashMap::new(),
            comment,
            central_extent: (central_offset, central_len),
            rx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(super) fn path(&self) -> &Path {
        &self.path
    }

    pub(super) fn comment(&self) -> &[u8] {
        &self.comment
    }

    pub(super) fn central_extent(&self) -> (u64, u64) {
        self.central_extent
    }

    pub(super) fn counter(&self) -> Counter {
        self.rx.clone()
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

        // The central directory CRC is authoritative unless the member
        // name carries a header rule
        if checksum == Checksum::Crc32 && !header::has_header(member) {
            return Ok(info.crc32.to_be_bytes().to_vec());
        }

        let digest = self.ensure_digest(member)?;
        Ok(digest.digest(checksum))
    }

    pub fn open(&mut self, member: &str) -> Result<Box<dyn Read + '_>> {
        let index = self
            .members
            .get(member)
            .map(|m| m.index)
            .ok_or_else(|| Error::MemberNotFound(member.to_string()))?;
        Ok(Box::new(self.archive.by_index(index)?))
    }

    pub fn rx(&self) -> u64 {
        self.rx.get()
    }

    fn ensure_digest(&mut self, member: &str) -> Result<&MemberDigest> {
        if !self.digests.contains_key(member) {
            let index = self
                .members
                .get(member)
                .map(|m| m.index)
                .ok_or_else(|| Error::MemberNotFound(member.to_string()))?;
            let entry = self.archive.by_index(index)?;
            let digest = checksum::digest_stream(member, entry)?;
            self.digests.insert(member.to_string(), digest);
        }
        Ok(self.digests.get(member).expect("digest just computed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, data) in members {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_zip_reader_members() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.zip");
        write_zip(
            &path,
            &[
                ("b.bin", b"Hello, World!"),
                ("a.bin", b"0123456789abcdefghij"),
                (".hidden", b"x"),
                ("sub/nested.bin", b"y"),
            ],
        );

        let reader = ZipReader::new(&path).unwrap();
        assert_eq!(
            reader.files(),
            vec!["a.bin".to_string(), "b.bin".to_string()]
        );
    }

    #[test]
    fn test_zip_reader_crc_from_central_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.zip");
        write_zip(&path, &[("b.bin", b"Hello, World!")]);

        let mut reader = ZipReader::new(&path).unwrap();
        let rx = reader.rx();
        assert_eq!(
            hex::encode(reader.checksum("b.bin", Checksum::Crc32).unwrap()),
            "ec4ac3d0"
        );
        // No decompression happened for the shortcut
        assert_eq!(reader.rx(), rx);

        assert_eq!(
            hex::encode(reader.checksum("b.bin", Checksum::Md5).unwrap()),
            "65a8e27d8879283831b664bd8b7f0ad4"
        );
        assert!(reader.rx() > rx);
    }

    #[test]
    fn test_zip_reader_header_member_streams() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.zip");
        let mut data = b"NES\x1a".to_vec();
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(&(0u8..12).collect::<Vec<_>>());
        write_zip(&path, &[("cart.nes", &data)]);

        let mut reader = ZipReader::new(&path).unwrap();
        assert_eq!(reader.size("cart.nes").unwrap(), (28, 16));
        // CRC of the payload, not the stored CRC from the central directory
        assert_eq!(
            hex::encode(reader.checksum("cart.nes", Checksum::Crc32).unwrap()),
            "9270c965"
        );
    }

    #[test]
    fn test_zip_reader_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.zip");
        write_zip(&path, &[("a.bin", b"payload")]);

        let mut reader = ZipReader::new(&path).unwrap();
        let mut member = reader.open("a.bin").unwrap();
        let mut out = Vec::new();
        member.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"payload");
    }

    #[test]
    fn test_zip_reader_member_not_found() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.zip");
        write_zip(&path, &[("a.bin", b"payload")]);

        let mut reader = ZipReader::new(&path).unwrap();
        assert!(matches!(
            reader.checksum("missing.bin", Checksum::Crc32),
            Err(Error::MemberNotFound(_))
        ));
    }
}
