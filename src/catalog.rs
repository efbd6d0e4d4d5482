// src/catalog.rs

//! Dat file parsing, matching state and trimmed serialization.
//!
//! Dat files are the XML catalogs published by preservation projects
//! such as no-intro and redump: a `<datafile>` root with one `<header>`
//! and zero or more `<game>` elements, each listing its `<rom>` entries
//! with size and checksum attributes. Only the subset of the DTD those
//! projects use is implemented.
//!
//! ROMs carry a `matched` flag that reconciliation sets as it satisfies
//! them. Serialization elides matched ROMs, games whose ROMs are all
//! matched, and produces no output at all for a fully matched document,
//! so the emitted XML is exactly the work that remains.

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::checksum::Checksum;
use crate::error::Result;

/// The header section of a dat file
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Header {
    pub name: String,
    pub description: String,
    pub version: String,
    pub date: String,
    pub author: String,
    pub homepage: String,
    pub url: String,
}

/// One ROM within a game
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Rom {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@size")]
    pub size: u64,
    #[serde(rename = "@crc")]
    pub crc32: String,
    #[serde(rename = "@md5")]
    pub md5: String,
    #[serde(rename = "@sha1")]
    pub sha1: String,
    #[serde(skip)]
    pub(crate) matched: AtomicBool,
}

impl Rom {
    /// The catalog digest for the requested algorithm, lowercased
    pub fn checksum(&self, checksum: Checksum) -> String {
        match checksum {
            Checksum::Crc32 => self.crc32.to_lowercase(),
            Checksum::Md5 => self.md5.to_lowercase(),
            Checksum::Sha1 => self.sha1.to_lowercase(),
        }
    }

    /// Mark this ROM as satisfied; it will be elided from output
    pub fn set_matched(&self) {
        self.matched.store(true, Ordering::Relaxed);
    }

    pub fn matched(&self) -> bool {
        self.matched.load(Ordering::Relaxed)
    }

    /// Restore the ROM to its unmatched state
    pub fn reset(&self) {
        self.matched.store(false, Ordering::Relaxed);
    }

    fn unmatched_copy(&self) -> Self {
        Self {
            name: self.name.clone(),
            size: self.size,
            crc32: self.crc32.clone(),
            md5: self.md5.clone(),
            sha1: self.sha1.clone(),
            matched: AtomicBool::new(false),
        }
    }
}

/// One game within a dat file
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Game {
    #[serde(rename = "@name")]
    pub name: String,
    pub category: String,
    pub description: String,
    #[serde(rename = "rom")]
    pub roms: Vec<Rom>,
}

impl Game {
    /// The canonical output filename for this game
    pub fn filename(&self) -> String {
        format!("{}.zip", self.name)
    }

    /// Mark every ROM as satisfied
    pub fn set_matched(&self) {
        for rom in &self.roms {
            rom.set_matched();
        }
    }

    /// Whether every ROM has been matched
    pub fn is_complete(&self) -> bool {
        self.roms.iter().all(Rom::matched)
    }

    pub fn reset(&self) {
        for rom in &self.roms {
            rom.reset();
        }
    }
}

/// A whole dat file: one header and its games
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Datfile {
    pub header: Header,
    #[serde(rename = "game")]
    pub games: Vec<Game>,
}

impl Datfile {
    /// Parse a dat file from XML
    pub fn parse(xml: &str) -> Result<Self> {
        Ok(quick_xml::de::from_str(xml)?)
    }

    /// Parse a dat file from a reader, e.g. standard input
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut xml = String::new();
        reader.read_to_string(&mut xml)?;
        Self::parse(&xml)
    }

    /// Whether every game has been fully matched
    pub fn is_complete(&self) -> bool {
        self.games.iter().all(Game::is_complete)
    }

    pub fn reset(&self) {
        for game in &self.games {
            game.reset();
        }
    }

    /// Serialize the unmatched remainder as indented XML.
    ///
    /// Matched ROMs are elided, games with nothing left are omitted, and
    /// a fully matched document produces an empty string.
    pub fn to_xml(&self) -> Result<String> {
        if self.is_complete() {
            return Ok(String::new());
        }

        let remainder = Datfile {
            header: self.header.clone(),
            games: self
                .games
                .iter()
                .filter(|game| !game.is_complete())
                .map(|game| Game {
                    name: game.name.clone(),
                    category: game.category.clone(),
                    description: game.description.clone(),
                    roms: game
                        .roms
                        .iter()
                        .filter(|rom| !rom.matched())
                        .map(Rom::unmatched_copy)
                        .collect(),
                })
                .collect(),
        };

        let mut xml = String::new();
        let mut serializer = quick_xml::se::Serializer::with_root(&mut xml, Some("datafile"))?;
        serializer.indent('\t', 1);
        remainder.serialize(serializer)?;
        Ok(xml)
    }
}
