// src/index.rs

//! In-memory content index mapping fingerprints to their providers.
//!
//! The index is populated by the scan pipeline and consulted by the
//! reconciler. One mutex guards the whole map; no I/O happens while it
//! is held, so operations stay short. Scanning a reader digests every
//! member into a staging list first and publishes the batch under a
//! single lock acquisition, making each scan atomic with respect to
//! concurrent finds and invalidations.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::archive::ArchiveReader;
use crate::catalog::Rom;
use crate::checksum::Checksum;
use crate::error::Result;

/// Identity of one ROM payload: algorithm, digest and logical size
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub algorithm: Checksum,
    /// Lowercase hex digest
    pub digest: String,
    /// Payload size after any header strip
    pub size: u64,
}

impl Fingerprint {
    /// The fingerprint a catalog ROM is expected to match
    pub fn of_rom(rom: &Rom, algorithm: Checksum) -> Self {
        Self {
            algorithm,
            digest: rom.checksum(algorithm),
            size: rom.size,
        }
    }
}

/// One location a payload is available from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    /// Path of the containing archive, directory or file
    pub archive: String,
    /// Member name within it
    pub member: String,
}

/// Concurrent fingerprint-to-providers map
#[derive(Debug, Default)]
pub struct ContentIndex {
    entries: Mutex<HashMap<Fingerprint, Vec<MemberRef>>>,
}

impl ContentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Digest every member of the reader and publish the results.
    ///
    /// The digests are computed without holding the lock; the whole
    /// batch then becomes visible atomically.
    pub fn scan(&self, reader: &mut ArchiveReader, algorithm: Checksum) -> Result<()> {
        let mut staged = Vec::new();
        for member in reader.files() {
            let (stored, header) = reader.size(&member)?;
            let digest = reader.checksum(&member, algorithm)?;
            staged.push((
                Fingerprint {
                    algorithm,
                    digest: hex::encode(digest),
                    size: stored - header,
                },
                member,
            ));
        }

        let archive = reader.name().to_string();
        let mut entries = self.entries.lock().expect("index lock poisoned");
        for (fingerprint, member) in staged {
            let bucket = entries.entry(fingerprint).or_default();
            let provider = MemberRef {
                archive: archive.clone(),
                member,
            };
            if !bucket.contains(&provider) {
                bucket.push(provider);
            }
        }
        Ok(())
    }

    /// Current providers for a fingerprint, in insertion order
    pub fn find(&self, fingerprint: &Fingerprint) -> Vec<MemberRef> {
        let entries = self.entries.lock().expect("index lock poisoned");
        entries.get(fingerprint).cloned().unwrap_or_default()
    }

    /// Remove every provider supplied by the named archive, pruning
    /// fingerprints that lose their last provider
    pub fn invalidate(&self, archive: &str) {
        let mut entries = self.entries.lock().expect("index lock poisoned");
        entries.retain(|_, bucket| {
            bucket.retain(|provider| provider.archive != archive);
            !bucket.is_empty()
        });
    }

    /// Number of distinct fingerprints currently indexed
    pub fn len(&self) -> usize {
        self.entries.lock().expect("index lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
