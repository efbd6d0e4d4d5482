// src/archive/directory.rs

//! Flat directories of loose ROM files.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use super::{Counter, CountingReader, CountingWriter};
use crate::checksum::{self, Checksum, MemberDigest};
use crate::error::{Error, Result};
use crate::header;

/// Reads the regular, non-hidden immediate children of a directory.
/// Subdirectories are not descended into; the scan pipeline walks them
/// separately.
pub struct DirectoryReader {
    path: PathBuf,
    name: String,
    files: BTreeMap<String, u64>,
    digests: HashMap<String, MemberDigest>,
    rx: Counter,
}

impl DirectoryReader {
    pub fn new(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path)?;
        if !metadata.is_dir() {
            return Err(Error::NotDirectory(path.to_path_buf()));
        }

        let mut files = BTreeMap::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let filename = entry.file_name().to_string_lossy().into_owned();
            if filename.starts_with('.') {
                continue;
            }
            // Follows symlinks, like the stat-based listing it replaces
            let metadata = fs::metadata(entry.path())?;
            if !metadata.is_file() {
                continue;
            }
            files.insert(filename, metadata.len());
        }

        Ok(Self {
            path: path.to_path_buf(),
            name: path.to_string_lossy().into_owned(),
            files,
            digests: HashMap::new(),
            rx: Counter::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn files(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    pub fn size(&mut self, member: &str) -> Result<(u64, u64)> {
        let stored = *self
            .files
            .get(member)
            .ok_or_else(|| Error::MemberNotFound(member.to_string()))?;
        if !header::has_header(member) {
            return Ok((stored, 0));
        }
        let digest = self.ensure_digest(member)?;
        Ok((stored, digest.header))
    }

    pub fn checksum(&mut self, member: &str, checksum: Checksum) -> Result<Vec<u8>> {
        if !self.files.contains_key(member) {
            return Err(Error::MemberNotFound(member.to_string()));
        }
        let digest = self.ensure_digest(member)?;
        Ok(digest.digest(checksum))
    }

    pub fn open(&mut self, member: &str) -> Result<Box<dyn Read + '_>> {
        if !self.files.contains_key(member) {
            return Err(Error::MemberNotFound(member.to_string()));
        }
        let file = fs::File::open(self.path.join(member))?;
        Ok(Box::new(CountingReader::new(file, self.rx.clone())))
    }

    pub fn rx(&self) -> u64 {
        self.rx.get()
    }

    fn ensure_digest(&mut self, member: &str) -> Result<&MemberDigest> {
        if !self.digests.contains_key(member) {
            let file = fs::File::open(self.path.join(member))?;
            let reader = CountingReader::new(file, self.rx.clone());
            let digest = checksum::digest_stream(member, reader)?;
            self.digests.insert(member.to_string(), digest);
        }
        Ok(self.digests.get(member).expect("digest just computed"))
    }
}

/// Writes flat members into a directory, creating it if necessary.
/// Any existing children are removed first.
pub struct DirectoryWriter {
    path: PathBuf,
    name: String,
    tx: Counter,
}

impl DirectoryWriter {
    pub fn new(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;

        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            name: path.to_string_lossy().into_owned(),
            tx: Counter::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create(&mut self, member: &str) -> Result<CountingWriter<fs::File>> {
        if member.contains('/') || member.contains('\\') {
            return Err(Error::NestedMember(member.to_string()));
        }
        let file = fs::File::create(self.path.join(member))?;
        Ok(CountingWriter::new(file, self.tx.clone()))
    }

    pub fn tx(&self) -> u64 {
        self.tx.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn populate(dir: &Path) {
        fs::write(dir.join("b.bin"), b"Hello, World!").unwrap();
        fs::write(dir.join("a.bin"), b"0123456789abcdefghij").unwrap();
        fs::write(dir.join(".hidden"), b"secret").unwrap();
        fs::create_dir(dir.join("nested")).unwrap();
        fs::write(dir.join("nested").join("c.bin"), b"deep").unwrap();
    }

    #[test]
    fn test_directory_reader_listing() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());

        let reader = DirectoryReader::new(dir.path()).unwrap();
        // Sorted, hidden and nested entries excluded
        assert_eq!(
            reader.files(),
            vec!["a.bin".to_string(), "b.bin".to_string()]
        );
    }

    #[test]
    fn test_directory_reader_checksums() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());

        let mut reader = DirectoryReader::new(dir.path()).unwrap();
        assert_eq!(reader.size("b.bin").unwrap(), (13, 0));
        assert_eq!(
            hex::encode(reader.checksum("b.bin", Checksum::Crc32).unwrap()),
            "ec4ac3d0"
        );
        assert_eq!(
            hex::encode(reader.checksum("a.bin", Checksum::Crc32).unwrap()),
            "638c0d29"
        );
        // Second request answered from the cache without another pass
        let rx = reader.rx();
        reader.checksum("b.bin", Checksum::Md5).unwrap();
        assert_eq!(reader.rx(), rx);
    }

    #[test]
    fn test_directory_reader_rejects_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.bin");
        fs::write(&path, b"x").unwrap();
        assert!(matches!(
            DirectoryReader::new(&path),
            Err(Error::NotDirectory(_))
        ));
    }

    #[test]
    fn test_directory_writer_clears_existing() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("stale.bin"), b"old").unwrap();

        let mut writer = DirectoryWriter::new(&target).unwrap();
        assert!(!target.join("stale.bin").exists());

        let mut member = writer.create("fresh.bin").unwrap();
        member.write_all(b"new").unwrap();
        member.flush().unwrap();
        drop(member);

        assert_eq!(fs::read(target.join("fresh.bin")).unwrap(), b"new");
        assert_eq!(writer.tx(), 3);
    }

    #[test]
    fn test_directory_writer_rejects_nested() {
        let dir = TempDir::new().unwrap();
        let mut writer = DirectoryWriter::new(&dir.path().join("out")).unwrap();
        assert!(matches!(
            writer.create("sub/dir.bin"),
            Err(Error::NestedMember(_))
        ));
    }
}
