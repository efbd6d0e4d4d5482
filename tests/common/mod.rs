// tests/common/mod.rs

//! Shared helpers for the synchronizer integration tests.

use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use romsync::archive::{TorrentZipReader, TorrentZipWriter, ZipReader};
use romsync::catalog::Datfile;
use romsync::checksum::digest_stream;
use romsync::Checksum;

/// One expected ROM for a generated dat file
pub struct DatRom {
    pub name: String,
    pub size: u64,
    pub crc32: String,
    pub md5: String,
    pub sha1: String,
}

/// Describe a ROM by digesting its on-disk representation, honouring
/// any header rule its name carries.
pub fn dat_rom(name: &str, stored: &[u8]) -> DatRom {
    let digest = digest_stream(name, Cursor::new(stored)).unwrap();
    DatRom {
        name: name.to_string(),
        size: digest.logical,
        crc32: digest.hex(Checksum::Crc32),
        md5: digest.hex(Checksum::Md5),
        sha1: digest.hex(Checksum::Sha1),
    }
}

/// Build a dat file from (game name, roms) pairs
pub fn datfile(games: &[(&str, Vec<DatRom>)]) -> Datfile {
    let mut xml = String::from(
        "<datafile>\n\t<header>\n\t\t<name>Test</name>\n\t\t<description>Test</description>\n\t</header>\n",
    );
    for (game, roms) in games {
        xml.push_str(&format!("\t<game name=\"{}\">\n", game));
        xml.push_str(&format!("\t\t<description>{}</description>\n", game));
        for rom in roms {
            xml.push_str(&format!(
                "\t\t<rom name=\"{}\" size=\"{}\" crc=\"{}\" md5=\"{}\" sha1=\"{}\"/>\n",
                rom.name, rom.size, rom.crc32, rom.md5, rom.sha1
            ));
        }
        xml.push_str("\t</game>\n");
    }
    xml.push_str("</datafile>\n");
    Datfile::parse(&xml).unwrap()
}

/// Write a torrentzip at the given path
pub fn write_torrentzip(path: &Path, members: &[(&str, &[u8])]) {
    let mut writer = TorrentZipWriter::new(path).unwrap();
    for (name, data) in members {
        let mut member = writer.create(name).unwrap();
        member.write_all(data).unwrap();
        member.finish().unwrap();
    }
    writer.finish().unwrap();
}

/// Write an ordinary (non-torrentzip) zip at the given path
pub fn write_plain_zip(path: &Path, members: &[(&str, &[u8])]) {
    let file = fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, data) in members {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

/// Sorted member names of a zip on disk
pub fn zip_members(path: &Path) -> Vec<String> {
    ZipReader::new(path).unwrap().files()
}

/// Whether the file at the path is a torrentzip with a correct central
/// directory checksum
pub fn is_valid_torrentzip(path: &Path) -> bool {
    match TorrentZipReader::new(path) {
        Ok(reader) => reader.valid(),
        Err(_) => false,
    }
}
