// src/checksum.rs

//! Checksum algorithms and the header-aware member digest.
//!
//! Dat files describe every ROM with a CRC32, an MD5 and a SHA1, so a
//! member is digested with all three in a single streaming pass and the
//! result cached by the archive reader that owns it. Members whose name
//! carries a header rule (see [`crate::header`]) are hashed over the
//! payload that follows the header; the header bytes stay in the stored
//! file but are excluded from the digest and the logical size.

use md5::{Digest, Md5};
use sha1::Sha1;
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::header;

const BUFFER_SIZE: usize = 64 * 1024;

/// Checksum algorithm used as the matching key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Checksum {
    /// CRC32 (IEEE), the checksum zip and 7z containers store natively
    #[default]
    Crc32,
    /// MD5
    Md5,
    /// SHA1
    Sha1,
}

impl Checksum {
    /// Digest length in bytes
    #[inline]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Crc32 => 4,
            Self::Md5 => 16,
            Self::Sha1 => 20,
        }
    }

    /// Algorithm name as used on the command line
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Crc32 => "crc32",
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Checksum {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "crc32" | "crc" => Ok(Self::Crc32),
            "md5" => Ok(Self::Md5),
            "sha1" | "sha-1" => Ok(Self::Sha1),
            _ => Err(Error::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// All three digests of one member plus the header accounting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDigest {
    pub crc32: [u8; 4],
    pub md5: [u8; 16],
    pub sha1: [u8; 20],
    /// Bytes stripped from the front of the stream before hashing
    pub header: u64,
    /// Bytes hashed (stored size minus header)
    pub logical: u64,
}

impl MemberDigest {
    /// The digest for the requested algorithm, big-endian for CRC32
    pub fn digest(&self, checksum: Checksum) -> Vec<u8> {
        match checksum {
            Checksum::Crc32 => self.crc32.to_vec(),
            Checksum::Md5 => self.md5.to_vec(),
            Checksum::Sha1 => self.sha1.to_vec(),
        }
    }

    /// The digest as a lowercase hex string
    pub fn hex(&self, checksum: Checksum) -> String {
        hex::encode(self.digest(checksum))
    }
}

/// Digest a member stream in one pass, honouring any header rule for the
/// member name.
///
/// When the extension claims a header, the prospective header is buffered
/// and its magic tested: a match excludes those bytes from the digest, a
/// mismatch hashes them as ordinary payload. A stream shorter than the
/// claimed header length fails with [`Error::ShortRead`].
pub fn digest_stream<R: Read>(name: &str, mut reader: R) -> Result<MemberDigest> {
    let mut crc32 = crc32fast::Hasher::new();
    let mut md5 = Md5::new();
    let mut sha1 = Sha1::new();
    let mut logical = 0u64;
    let mut header_len = 0u64;

    if let Some(rule) = header::rule(name) {
        let mut prospective = vec![0u8; rule.len];
        let got = read_full(&mut reader, &mut prospective)?;
        if got < rule.len {
            return Err(Error::ShortRead(name.to_string()));
        }
        if prospective.starts_with(rule.magic) {
            header_len = rule.len as u64;
        } else {
            crc32.update(&prospective);
            md5.update(&prospective);
            sha1.update(&prospective);
            logical += rule.len as u64;
        }
    }

    let mut buffer = [0u8; BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        crc32.update(&buffer[..n]);
        md5.update(&buffer[..n]);
        sha1.update(&buffer[..n]);
        logical += n as u64;
    }

    Ok(MemberDigest {
        crc32: crc32.finalize().to_be_bytes(),
        md5: md5.finalize().into(),
        sha1: sha1.finalize().into(),
        header: header_len,
        logical,
    })
}

/// Read into `buf` until it is full or the stream ends; returns the number
/// of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
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
