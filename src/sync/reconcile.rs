// src/sync/reconcile.rs

//! Per-game reconciliation: decide between create, verify, rebuild,
//! modify and delete, then execute the decision atomically.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use tracing::info;

use super::{select, Synchronizer};
use crate::archive::{self, ArchiveReader, ArchiveWriter, TorrentZipReader, TorrentZipWriter, ZipReader};
use crate::catalog::Game;
use crate::error::{Error, Result};
use crate::index::{ContentIndex, Fingerprint, MemberRef};

impl Synchronizer {
    /// Bring one game's target archive in line with the catalog, then
    /// record which of its ROMs the produced archive satisfies.
    pub(crate) fn reconcile_game(
        &self,
        dir: &Path,
        game: &Game,
        index: &ContentIndex,
    ) -> Result<()> {
        let target = dir.join(game.filename());
        if target.exists() {
            self.modify(dir, game, index)?;
        } else {
            self.create(dir, game, index)?;
        }
        self.mark_matched(dir, game)
    }

    /// The target is absent: build it from whatever sources the index
    /// can supply. No sources at all means the game stays absent.
    fn create(&self, dir: &Path, game: &Game, index: &ContentIndex) -> Result<()> {
        let sources = {
            let _guard = self.rebuild_lock.read().expect("rebuild lock poisoned");
            self.find_sources(game, index)
        };
        if sources.is_empty() {
            return Ok(());
        }

        info!("Creating {}", game.filename());
        if self.dry_run {
            return Ok(());
        }

        let target = dir.join(game.filename());
        self.write_and_replace(dir, game, sources, &target)?;

        let _guard = self.rebuild_lock.read().expect("rebuild lock poisoned");
        self.rescan_target(&target, index)
    }

    /// The target exists: verify it, rebuild it canonically, swap in
    /// content from elsewhere, or delete it when nothing matches.
    fn modify(&self, dir: &Path, game: &Game, index: &ContentIndex) -> Result<()> {
        let _guard = self.rebuild_lock.write().expect("rebuild lock poisoned");

        let target = dir.join(game.filename());
        let reader = match TorrentZipReader::new(&target) {
            Ok(reader) => ArchiveReader::TorrentZip(reader),
            Err(Error::NotTorrentZip) => ArchiveReader::Zip(ZipReader::new(&target)?),
            Err(error) => return Err(error),
        };
        // A plain zip or a torrentzip with a stale comment must be
        // re-emitted even if its content is already right
        let mut rewrite = !reader.valid().unwrap_or(false);

        let mut sources: HashMap<String, Vec<MemberRef>> = HashMap::new();
        'roms: for rom in &game.roms {
            let providers = index.find(&Fingerprint::of_rom(rom, self.algorithm));
            if providers.is_empty() {
                continue;
            }
            for provider in &providers {
                if provider.archive == reader.name() && provider.member == rom.name {
                    sources.insert(rom.name.clone(), vec![provider.clone()]);
                    continue 'roms;
                }
            }
            rewrite = true;
            sources.insert(rom.name.clone(), providers);
        }

        let members = reader.files();
        self.add_rx(reader.rx());
        drop(reader);

        // Same member set and nothing forcing a re-emit: verified as-is
        let same_set = sources.len() == members.len()
            && members.iter().all(|member| sources.contains_key(member));
        if !rewrite && same_set {
            return Ok(());
        }

        if sources.is_empty() {
            info!("Deleting {}", target.display());
            if !self.dry_run {
                fs::remove_file(&target)?;
            }
            return Ok(());
        }

        if same_set {
            info!("Rebuilding {}", target.display());
        } else {
            info!("Modifying {}", target.display());
        }
        if self.dry_run {
            return Ok(());
        }

        self.write_and_replace(dir, game, sources, &target)?;

        index.invalidate(&target.to_string_lossy());
        self.rescan_target(&target, index)
    }

    /// Assemble the game into a staging directory inside the target
    /// directory, then rename over the target so the replacement is
    /// atomic on the same filesystem.
    fn write_and_replace(
        &self,
        dir: &Path,
        game: &Game,
        sources: HashMap<String, Vec<MemberRef>>,
        target: &Path,
    ) -> Result<()> {
        let staging = tempfile::tempdir_in(dir)?;
        let staged = staging.path().join(game.filename());

        let mut writer = ArchiveWriter::TorrentZip(TorrentZipWriter::new(&staged)?);
        self.transfer(&mut writer, game, sources)?;
        self.add_tx(writer.finish()?);

        fs::rename(&staged, target)?;
        Ok(())
    }

    /// Copy every sourced ROM into the writer, opening each distinct
    /// source archive once. Copy order follows the catalog's ROM order.
    fn transfer(
        &self,
        writer: &mut ArchiveWriter,
        game: &Game,
        mut sources: HashMap<String, Vec<MemberRef>>,
    ) -> Result<()> {
        select::collapse(&mut sources);

        let mut readers: HashMap<String, ArchiveReader> = HashMap::new();
        for rom in &game.roms {
            let Some(source) = sources.get(&rom.name).and_then(|providers| providers.first())
            else {
                continue;
            };

            if !readers.contains_key(&source.archive) {
                let reader = archive::new_reader(Path::new(&source.archive))?;
                readers.insert(source.archive.clone(), reader);
            }
            let reader = readers.get_mut(&source.archive).expect("reader cached");

            info!(
                "Copying {} from {} to {} as {}",
                source.member,
                source.archive,
                writer.name(),
                rom.name
            );

            let mut input = reader.open(&source.member)?;
            let mut output = writer.create(&rom.name)?;
            io::copy(&mut input, &mut output)?;
            drop(input);
            output.finish()?;
        }

        for reader in readers.into_values() {
            self.add_rx(reader.rx());
        }
        Ok(())
    }

    /// Re-open the produced archive so the index reflects it as a source
    fn rescan_target(&self, target: &Path, index: &ContentIndex) -> Result<()> {
        let mut reader = ArchiveReader::TorrentZip(TorrentZipReader::new(target)?);
        index.scan(&mut reader, self.algorithm)?;
        self.add_rx(reader.rx());
        Ok(())
    }

    /// Every catalog ROM whose name appears in the produced archive is
    /// matched; the trimmed dat file elides it on output.
    fn mark_matched(&self, dir: &Path, game: &Game) -> Result<()> {
        let target = dir.join(game.filename());
        let reader = match ZipReader::new(&target) {
            Ok(reader) => reader,
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(error) => return Err(error),
        };

        let members = reader.files();
        for rom in &game.roms {
            if members.binary_search(&rom.name).is_ok() {
                rom.set_matched();
            }
        }

        self.add_rx(reader.rx());
        Ok(())
    }

    /// Non-empty provider lists for every ROM the index can satisfy
    fn find_sources(&self, game: &Game, index: &ContentIndex) -> HashMap<String, Vec<MemberRef>> {
        let mut sources = HashMap::with_capacity(game.roms.len());
        for rom in &game.roms {
            let providers = index.find(&Fingerprint::of_rom(rom, self.algorithm));
            if !providers.is_empty() {
                sources.insert(rom.name.clone(), providers);
            }
        }
        sources
    }
}
