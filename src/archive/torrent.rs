// src/archive/torrent.rs

//! Torrentzip archives: zip files whose bytes are a pure function of the
//! (member name, content) set.
//!
//! A torrentzip stores its entries in ascending name order with fixed
//! header fields (zeroed timestamps and attributes, deflate at maximum
//! compression) and records a CRC32 of the central directory in the
//! archive comment, `TORRENTZIPPED-` followed by eight uppercase hex
//! digits. Two archives built from the same members are byte-identical,
//! which is what makes the target directory reproducible.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::write::DeflateEncoder;
use flate2::Compression;

use super::{Counter, CountingReader, CountingWriter, ZipReader};
use crate::checksum::Checksum;
use crate::error::{Error, Result};

const COMMENT_PREFIX: &str = "TORRENTZIPPED-";

/// Fixed portion of a local file header
pub(super) const LOCAL_HEADER_LEN: u64 = 30;
/// Fixed portion of a central directory entry
pub(super) const CENTRAL_ENTRY_LEN: u64 = 46;

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const CENTRAL_ENTRY_SIGNATURE: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIGNATURE: u32 = 0x0605_4b50;

/// Version needed to extract: 2.0, the deflate baseline
const VERSION_NEEDED: u16 = 20;
/// Version made by: fixed creator value
const VERSION_MADE_BY: u16 = 0;
/// General purpose flags: maximum compression
const GP_FLAGS: u16 = 2;
/// Compression method: deflate
const METHOD_DEFLATE: u16 = 8;

/// Reads a torrentzip archive. Construction fails with
/// [`Error::NotTorrentZip`] when the archive comment lacks the
/// torrentzip prefix; an archive whose central directory CRC disagrees
/// with the comment still opens but reports `valid() == false`.
pub struct TorrentZipReader {
    zip: ZipReader,
    valid: bool,
}

impl TorrentZipReader {
    pub fn new(path: &Path) -> Result<Self> {
        let zip = ZipReader::new(path)?;

        let comment = match std::str::from_utf8(zip.comment()) {
            Ok(comment) => comment,
            Err(_) => return Err(Error::NotTorrentZip),
        };
        let Some(expected) = comment.strip_prefix(COMMENT_PREFIX) else {
            return Err(Error::NotTorrentZip);
        };

        let actual = central_directory_crc(&zip)?;
        let valid = expected == format!("{:08X}", actual);

        Ok(Self { zip, valid })
    }

    /// Whether the central directory CRC matches the archive comment
    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn name(&self) -> &str {
        self.zip.name()
    }

    pub fn files(&self) -> Vec<String> {
        self.zip.files()
    }

    pub fn size(&mut self, member: &str) -> Result<(u64, u64)> {
        self.zip.size(member)
    }

    pub fn checksum(&mut self, member: &str, checksum: Checksum) -> Result<Vec<u8>> {
        self.zip.checksum(member, checksum)
    }

    pub fn open(&mut self, member: &str) -> Result<Box<dyn Read + '_>> {
        self.zip.open(member)
    }

    pub fn rx(&self) -> u64 {
        self.zip.rx()
    }
}

/// CRC32 over the central directory byte range, located from the entry
/// metadata: the directory starts after every local header and its
/// compressed payload, and spans the fixed entry records plus names.
fn central_directory_crc(zip: &ZipReader) -> Result<u32> {
    let (offset, len) = zip.central_extent();

    let file = fs::File::open(zip.path())?;
    let mut reader = CountingReader::new(file, zip.counter());
    reader.seek(SeekFrom::Start(offset))?;

    let mut hasher = crc32fast::Hasher::new();
    let mut remaining = len;
    let mut buffer = [0u8; 8192];
    while remaining > 0 {
        let want = remaining.min(buffer.len() as u64) as usize;
        let n = reader.read(&mut buffer[..want])?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        remaining -= n as u64;
    }

    Ok(hasher.finalize())
}

/// One staged member waiting for assembly
struct SpoolEntry {
    name: String,
    offset: u64,
    compressed: u64,
    crc32: u32,
    size: u64,
}

/// Writes a torrentzip archive.
///
/// Members are deflated into an anonymous spool file next to the target
/// (same filesystem) as they arrive, then assembled in name order when
/// the writer is finished, so nothing about the final bytes depends on
/// the order members were created in.
pub struct TorrentZipWriter {
    path: PathBuf,
    name: String,
    spool: fs::File,
    entries: Vec<SpoolEntry>,
    tx: Counter,
}

impl TorrentZipWriter {
    pub fn new(path: &Path) -> Result<Self> {
        let parent = match path.parent() {
            Some(parent) if parent != Path::new("") => parent,
            _ => Path::new("."),
        };
        let spool = tempfile::tempfile_in(parent)?;

        Ok(Self {
            path: path.to_path_buf(),
            name: path.to_string_lossy().into_owned(),
            spool,
            entries: Vec::new(),
            tx: Counter::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes written to the final archive. Nothing is counted until
    /// [`finish`](Self::finish) assembles the file.
    pub fn tx(&self) -> u64 {
        self.tx.get()
    }

    /// Stage a new member. The returned writer must be finished before
    /// the next create.
    pub fn create(&mut self, member: &str) -> Result<EntryWriter<'_>> {
        if member.contains('/') || member.contains('\\') {
            return Err(Error::NestedMember(member.to_string()));
        }

        let offset = self.spool.seek(SeekFrom::End(0))?;
        Ok(EntryWriter {
            encoder: Some(DeflateEncoder::new(&mut self.spool, Compression::best())),
            entries: &mut self.entries,
            name: member.to_string(),
            offset,
            crc: crc32fast::Hasher::new(),
            size: 0,
        })
    }

    /// Assemble the final archive from the staged members, returning
    /// the number of bytes written
    pub fn finish(mut self) -> Result<u64> {
        self.entries.sort_by(|a, b| a.name.cmp(&b.name));

        let file = fs::File::create(&self.path)?;
        let mut out = CountingWriter::new(file, self.tx.clone());

        // Local headers with their payloads, in sorted order
        let mut offsets = Vec::with_capacity(self.entries.len());
        let mut position = 0u64;
        for entry in &self.entries {
            offsets.push(position);

            let mut header = Vec::with_capacity(LOCAL_HEADER_LEN as usize + entry.name.len());
            put_u32(&mut header, LOCAL_HEADER_SIGNATURE);
            put_u16(&mut header, VERSION_NEEDED);
            put_u16(&mut header, GP_FLAGS);
            put_u16(&mut header, METHOD_DEFLATE);
            put_u16(&mut header, 0); // modification time
            put_u16(&mut header, 0); // modification date
            put_u32(&mut header, entry.crc32);
            put_u32(&mut header, entry.compressed as u32);
            put_u32(&mut header, entry.size as u32);
            put_u16(&mut header, entry.name.len() as u16);
            put_u16(&mut header, 0); // extra field length
            header.extend_from_slice(entry.name.as_bytes());
            out.write_all(&header)?;

            self.spool.seek(SeekFrom::Start(entry.offset))?;
            io::copy(&mut (&mut self.spool).take(entry.compressed), &mut out)?;

            position += header.len() as u64 + entry.compressed;
        }

        // Central directory, CRC'd for the archive comment
        let mut central = Vec::new();
        for (entry, offset) in self.entries.iter().zip(&offsets) {
            put_u32(&mut central, CENTRAL_ENTRY_SIGNATURE);
            put_u16(&mut central, VERSION_MADE_BY);
            put_u16(&mut central, VERSION_NEEDED);
            put_u16(&mut central, GP_FLAGS);
            put_u16(&mut central, METHOD_DEFLATE);
            put_u16(&mut central, 0); // modification time
            put_u16(&mut central, 0); // modification date
            put_u32(&mut central, entry.crc32);
            put_u32(&mut central, entry.compressed as u32);
            put_u32(&mut central, entry.size as u32);
            put_u16(&mut central, entry.name.len() as u16);
            put_u16(&mut central, 0); // extra field length
            put_u16(&mut central, 0); // comment length
            put_u16(&mut central, 0); // disk number start
            put_u16(&mut central, 0); // internal attributes
            put_u32(&mut central, 0); // external attributes
            put_u32(&mut central, *offset as u32);
            central.extend_from_slice(entry.name.as_bytes());
        }
        out.write_all(&central)?;

        let comment = format!("{}{:08X}", COMMENT_PREFIX, crc32fast::hash(&central));

        let mut eocd = Vec::with_capacity(22 + comment.len());
        put_u32(&mut eocd, END_OF_CENTRAL_DIR_SIGNATURE);
        put_u16(&mut eocd, 0); // disk number
        put_u16(&mut eocd, 0); // central directory disk
        put_u16(&mut eocd, self.entries.len() as u16);
        put_u16(&mut eocd, self.entries.len() as u16);
        put_u32(&mut eocd, central.len() as u32);
        put_u32(&mut eocd, position as u32);
        put_u16(&mut eocd, comment.len() as u16);
        eocd.extend_from_slice(comment.as_bytes());
        out.write_all(&eocd)?;

        out.flush()?;
        Ok(self.tx.get())
    }
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Writable stream for one member being staged into the spool
pub struct EntryWriter<'a> {
    encoder: Option<DeflateEncoder<&'a mut fs::File>>,
    entries: &'a mut Vec<SpoolEntry>,
    name: String,
    offset: u64,
    crc: crc32fast::Hasher,
    size: u64,
}

impl EntryWriter<'_> {
    /// Flush the deflate stream and record the member for assembly
    pub fn finish(mut self) -> Result<()> {
        let encoder = self.encoder.take().expect("encoder present until finish");
        let spool = encoder.finish()?;
        let end = spool.stream_position()?;

        self.entries.push(SpoolEntry {
            name: std::mem::take(&mut self.name),
            offset: self.offset,
            compressed: end - self.offset,
            crc32: self.crc.clone().finalize(),
            size: self.size,
        });
        Ok(())
    }
}

impl Write for EntryWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let encoder = self
            .encoder
            .as_mut()
            .expect("encoder present until finish");
        let n = encoder.write(buf)?;
        self.crc.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.encoder.as_mut() {
            Some(encoder) => encoder.flush(),
            None => Ok(()),
        }
    }
}
