// src/header.rs

//! Header rules for ROM formats that prepend metadata to the payload.
//!
//! Some cartridge dump formats carry a fixed-size header that is metadata
//! added by the dumping tool rather than part of the chip contents. Dat
//! files record checksums over the bare payload, so matching has to strip
//! the header before hashing while leaving the stored bytes untouched.
//!
//! References:
//! * iNES / NES 2.0: <https://wiki.nesdev.com/w/index.php/INES>
//! * Atari Lynx LNX: <https://atarigamer.com/lynx/lnx2lyx>

use std::path::Path;

/// One recognized header format, keyed by file extension
#[derive(Debug, Clone, Copy)]
pub struct HeaderRule {
    /// Extension without the leading dot
    pub extension: &'static str,
    /// Total header length in bytes
    pub len: usize,
    /// Magic signature expected at the start of the header
    pub magic: &'static [u8],
}

const RULES: &[HeaderRule] = &[
    HeaderRule {
        extension: "nes",
        len: 16,
        magic: b"NES\x1a",
    },
    HeaderRule {
        extension: "lnx",
        len: 64,
        magic: b"LYNX",
    },
];

/// Look up the header rule for a member name, if its extension has one
pub fn rule(name: &str) -> Option<&'static HeaderRule> {
    let extension = Path::new(name).extension()?.to_str()?;
    RULES.iter().find(|r| r.extension == extension)
}

/// Whether the member name's extension may carry a header. Container
/// checksums cannot be trusted for such members; they must be streamed
/// through the header-aware hasher.
pub fn has_header(name: &str) -> bool {
    rule(name).is_some()
}
