// src/archive/mod.rs

//! Uniform access to the containers ROMs are shipped in.
//!
//! Six read backings (single file, directory, zip, torrentzip, 7z, rar)
//! and three write backings (single file, directory, torrentzip) share a
//! common surface. Every backing only exposes top-level, regular,
//! non-hidden members; directory entries, nested paths and dotfiles are
//! invisible. Readers count the bytes they pull from the underlying
//! storage so the synchronizer can report I/O totals.

mod directory;
mod file;
mod rar;
mod sevenzip;
mod torrent;
mod zip;

pub use self::directory::{DirectoryReader, DirectoryWriter};
pub use self::file::{FileReader, FileWriter};
pub use self::rar::RarReader;
pub use self::sevenzip::SevenZipReader;
pub use self::torrent::{TorrentZipReader, TorrentZipWriter};
pub use self::zip::ZipReader;

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::checksum::Checksum;
use crate::error::{Error, Result};

/// Shared monotonic byte counter
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Reader wrapper that accumulates the bytes read into a [`Counter`]
pub struct CountingReader<R> {
    inner: R,
    counter: Counter,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R, counter: Counter) -> Self {
        Self { inner, counter }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.counter.add(n as u64);
        Ok(n)
    }
}

impl<R: Seek> Seek for CountingReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

/// Writer wrapper that accumulates the bytes written into a [`Counter`]
pub struct CountingWriter<W> {
    inner: W,
    counter: Counter,
}

impl<W> CountingWriter<W> {
    pub fn new(inner: W, counter: Counter) -> Self {
        Self { inner, counter }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.counter.add(n as u64);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Container formats recognized by content sniffing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerFormat {
    Zip,
    SevenZip,
    Rar,
    Other,
}

impl ContainerFormat {
    /// Identify a container from its leading magic bytes.
    ///
    /// Magic bytes:
    /// - Zip: `50 4b` followed by `03 04`, `05 06` (empty) or `07 08`
    /// - 7z: `37 7a bc af 27 1c`
    /// - Rar: `52 61 72 21 1a 07`
    fn from_magic_bytes(data: &[u8]) -> Self {
        if data.len() >= 4
            && data[0] == 0x50
            && data[1] == 0x4b
            && matches!((data[2], data[3]), (0x03, 0x04) | (0x05, 0x06) | (0x07, 0x08))
        {
            Self::Zip
        } else if data.len() >= 6
            && data[0] == 0x37
            && data[1] == 0x7a
            && data[2] == 0xbc
            && data[3] == 0xaf
            && data[4] == 0x27
            && data[5] == 0x1c
        {
            Self::SevenZip
        } else if data.len() >= 6
            && data[0] == 0x52
            && data[1] == 0x61
            && data[2] == 0x72
            && data[3] == 0x21
            && data[4] == 0x1a
            && data[5] == 0x07
        {
            Self::Rar
        } else {
            Self::Other
        }
    }
}

/// One of the read backings, dispatched by [`new_reader`]
pub enum ArchiveReader {
    File(FileReader),
    Directory(DirectoryReader),
    Zip(ZipReader),
    TorrentZip(TorrentZipReader),
    SevenZip(SevenZipReader),
    Rar(RarReader),
}

impl ArchiveReader {
    /// The on-disk path of the backing
    pub fn name(&self) -> &str {
        match self {
            Self::File(r) => r.name(),
            Self::Directory(r) => r.name(),
            Self::Zip(r) => r.name(),
            Self::TorrentZip(r) => r.name(),
            Self::SevenZip(r) => r.name(),
            Self::Rar(r) => r.name(),
        }
    }

    /// Sorted member names
    pub fn files(&self) -> Vec<String> {
        match self {
            Self::File(r) => r.files(),
            Self::Directory(r) => r.files(),
            Self::Zip(r) => r.files(),
            Self::TorrentZip(r) => r.files(),
            Self::SevenZip(r) => r.files(),
            Self::Rar(r) => r.files(),
        }
    }

    /// Stored size and header size of a member. The logical payload is
    /// the difference of the two.
    pub fn size(&mut self, member: &str) -> Result<(u64, u64)> {
        match self {
            Self::File(r) => r.size(member),
            Self::Directory(r) => r.size(member),
            Self::Zip(r) => r.size(member),
            Self::TorrentZip(r) => r.size(member),
            Self::SevenZip(r) => r.size(member),
            Self::Rar(r) => r.size(member),
        }
    }

    /// Header-aware digest of a member for the requested algorithm
    pub fn checksum(&mut self, member: &str, checksum: Checksum) -> Result<Vec<u8>> {
        match self {
            Self::File(r) => r.checksum(member, checksum),
            Self::Directory(r) => r.checksum(member, checksum),
            Self::Zip(r) => r.checksum(member, checksum),
            Self::TorrentZip(r) => r.checksum(member, checksum),
            Self::SevenZip(r) => r.checksum(member, checksum),
            Self::Rar(r) => r.checksum(member, checksum),
        }
    }

    /// Open a member for reading. The stream is read-once.
    pub fn open(&mut self, member: &str) -> Result<Box<dyn Read + '_>> {
        match self {
            Self::File(r) => r.open(member),
            Self::Directory(r) => r.open(member),
            Self::Zip(r) => r.open(member),
            Self::TorrentZip(r) => r.open(member),
            Self::SevenZip(r) => r.open(member),
            Self::Rar(r) => r.open(member),
        }
    }

    /// Bytes read from the underlying storage so far
    pub fn rx(&self) -> u64 {
        match self {
            Self::File(r) => r.rx(),
            Self::Directory(r) => r.rx(),
            Self::Zip(r) => r.rx(),
            Self::TorrentZip(r) => r.rx(),
            Self::SevenZip(r) => r.rx(),
            Self::Rar(r) => r.rx(),
        }
    }

    /// Integrity verdict, present only on backings that can self-validate
    pub fn valid(&self) -> Option<bool> {
        match self {
            Self::TorrentZip(r) => Some(r.valid()),
            _ => None,
        }
    }
}

/// One of the write backings
pub enum ArchiveWriter {
    File(FileWriter),
    Directory(DirectoryWriter),
    TorrentZip(TorrentZipWriter),
}

impl ArchiveWriter {
    /// The on-disk path of the backing
    pub fn name(&self) -> &str {
        match self {
            Self::File(w) => w.name(),
            Self::Directory(w) => w.name(),
            Self::TorrentZip(w) => w.name(),
        }
    }

    /// Open a new member for writing. Creates are serialized by the
    /// caller; a member writer must be finished before the next create.
    pub fn create(&mut self, member: &str) -> Result<MemberWriter<'_>> {
        match self {
            Self::File(w) => w.create(member).map(MemberWriter::Plain),
            Self::Directory(w) => w.create(member).map(MemberWriter::Plain),
            Self::TorrentZip(w) => w.create(member).map(MemberWriter::Deflated),
        }
    }

    /// Bytes written to the underlying storage so far
    pub fn tx(&self) -> u64 {
        match self {
            Self::File(w) => w.tx(),
            Self::Directory(w) => w.tx(),
            Self::TorrentZip(w) => w.tx(),
        }
    }

    /// Flush central metadata and finish the archive, returning the
    /// total bytes written
    pub fn finish(self) -> Result<u64> {
        match self {
            Self::File(w) => Ok(w.tx()),
            Self::Directory(w) => Ok(w.tx()),
            Self::TorrentZip(w) => w.finish(),
        }
    }
}

/// Writable stream for one member being created
pub enum MemberWriter<'a> {
    Plain(CountingWriter<fs::File>),
    Deflated(torrent::EntryWriter<'a>),
}

impl MemberWriter<'_> {
    /// Complete the member. Mandatory; dropping without finishing leaves
    /// the archive in an undefined state.
    pub fn finish(self) -> Result<()> {
        match self {
            Self::Plain(mut w) => {
                w.flush()?;
                Ok(())
            }
            Self::Deflated(w) => w.finish(),
        }
    }
}

impl Write for MemberWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Deflated(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Deflated(w) => w.flush(),
        }
    }
}

/// Open an arbitrary path with the most appropriate reader.
///
/// Directories get a [`DirectoryReader`]; anything else is sniffed by
/// content magic. Zip files are first tried as torrentzip, falling back
/// to a plain [`ZipReader`] when the comment is absent. Unrecognized
/// content is treated as a single loose ROM.
pub fn new_reader(path: &Path) -> Result<ArchiveReader> {
    let metadata = fs::metadata(path)?;
    if metadata.is_dir() {
        return Ok(ArchiveReader::Directory(DirectoryReader::new(path)?));
    }

    let mut magic = [0u8; 8];
    let n = {
        let mut file = fs::File::open(path)?;
        read_partial(&mut file, &mut magic)?
    };

    match ContainerFormat::from_magic_bytes(&magic[..n]) {
        ContainerFormat::SevenZip => Ok(ArchiveReader::SevenZip(SevenZipReader::new(path)?)),
        ContainerFormat::Rar => Ok(ArchiveReader::Rar(RarReader::new(path)?)),
        ContainerFormat::Zip => match TorrentZipReader::new(path) {
            Ok(reader) => Ok(ArchiveReader::TorrentZip(reader)),
            Err(Error::NotTorrentZip) => Ok(ArchiveReader::Zip(ZipReader::new(path)?)),
            Err(err) => Err(err),
        },
        ContainerFormat::Other => Ok(ArchiveReader::File(FileReader::new(path)?)),
    }
}

fn read_partial<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_zip() {
        assert_eq!(
            ContainerFormat::from_magic_bytes(&[0x50, 0x4b, 0x03, 0x04, 0x00]),
            ContainerFormat::Zip
        );
        assert_eq!(
            ContainerFormat::from_magic_bytes(&[0x50, 0x4b, 0x05, 0x06]),
            ContainerFormat::Zip
        );
    }

    #[test]
    fn test_magic_seven_zip() {
        assert_eq!(
            ContainerFormat::from_magic_bytes(&[0x37, 0x7a, 0xbc, 0xaf, 0x27, 0x1c]),
            ContainerFormat::SevenZip
        );
    }

    #[test]
    fn test_magic_rar() {
        assert_eq!(
            ContainerFormat::from_magic_bytes(b"Rar!\x1a\x07\x00"),
            ContainerFormat::Rar
        );
    }

    #[test]
    fn test_magic_other() {
        assert_eq!(
            ContainerFormat::from_magic_bytes(b"NES\x1a"),
            ContainerFormat::Other
        );
        assert_eq!(ContainerFormat::from_magic_bytes(&[]), ContainerFormat::Other);
    }

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        counter.add(10);
        counter.add(32);
        assert_eq!(counter.get(), 42);

        let clone = counter.clone();
        clone.add(8);
        assert_eq!(counter.get(), 50);
    }

    #[test]
    fn test_counting_reader() {
        let counter = Counter::new();
        let mut reader = CountingReader::new(&b"0123456789"[..], counter.clone());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 10);
        assert_eq!(counter.get(), 10);
    }

    #[test]
    fn test_new_reader_dispatch() {
        use std::io::Write as _;
        let dir = tempfile::TempDir::new().unwrap();

        let loose = dir.path().join("loose.bin");
        fs::write(&loose, b"payload").unwrap();
        assert!(matches!(new_reader(&loose).unwrap(), ArchiveReader::File(_)));

        assert!(matches!(
            new_reader(dir.path()).unwrap(),
            ArchiveReader::Directory(_)
        ));

        let plain = dir.path().join("plain.zip");
        {
            let file = fs::File::create(&plain).unwrap();
            let mut writer = ::zip::ZipWriter::new(file);
            writer
                .start_file("a.bin", ::zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"data").unwrap();
            writer.finish().unwrap();
        }
        assert!(matches!(new_reader(&plain).unwrap(), ArchiveReader::Zip(_)));

        let torrent = dir.path().join("torrent.zip");
        {
            let mut writer = TorrentZipWriter::new(&torrent).unwrap();
            let mut member = writer.create("a.bin").unwrap();
            member.write_all(b"data").unwrap();
            member.finish().unwrap();
            writer.finish().unwrap();
        }
        let reader = new_reader(&torrent).unwrap();
        assert!(matches!(&reader, ArchiveReader::TorrentZip(_)));
        assert_eq!(reader.valid(), Some(true));

        assert!(new_reader(&dir.path().join("missing")).is_err());
    }
}
