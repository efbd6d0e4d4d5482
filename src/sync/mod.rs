// src/sync/mod.rs

//! The synchronization engine.
//!
//! Two pipelines run per invocation. Scan walks every source root,
//! opens each discovered artifact as an archive and publishes member
//! fingerprints into the [`ContentIndex`]. Update then reconciles each
//! catalog game against the target directory, creating, rebuilding,
//! modifying or deleting its torrentzip as the index dictates. A final
//! sweep removes anything the catalog doesn't claim.
//!
//! Both pipelines fan work out to a configured number of worker
//! threads over bounded channels. The first error trips a shared
//! cancellation token, the stages drain, and that error is reported.

mod pipeline;
mod reconcile;
mod select;

use std::collections::HashSet;
use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Mutex, RwLock};
use std::thread;

use tracing::info;

use crate::archive;
use crate::catalog::{Datfile, Game};
use crate::checksum::Checksum;
use crate::error::{Error, Result};
use crate::index::ContentIndex;

use self::pipeline::{send_with_cancel, walk_root, CancelToken, ErrorSlot, PIPELINE_DEPTH};

/// Maintains a pristine directory of torrentzip files representing the
/// games in a dat file.
pub struct Synchronizer {
    workers: usize,
    dry_run: bool,
    algorithm: Checksum,
    missing: HashSet<String>,
    /// Guards index consistency across games: modify holds it
    /// exclusively around invalidate-and-rescan, create holds it shared
    /// while selecting sources and while publishing its result
    rebuild_lock: RwLock<()>,
    rx: AtomicU64,
    tx: AtomicU64,
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Synchronizer {
    pub fn new() -> Self {
        Self {
            workers: 0,
            dry_run: false,
            algorithm: Checksum::default(),
            missing: HashSet::new(),
            rebuild_lock: RwLock::new(()),
            rx: AtomicU64::new(0),
            tx: AtomicU64::new(0),
        }
    }

    /// Number of worker threads; zero selects the host CPU count
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Log every decision without touching the target directory
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Checksum algorithm used as the matching key
    pub fn with_algorithm(mut self, algorithm: Checksum) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Read a newline-delimited list of games known to be missing.
    /// Listed games are skipped and reported as fully matched.
    pub fn with_missing<R: BufRead>(mut self, reader: R) -> Result<Self> {
        for line in reader.lines() {
            self.missing.insert(line?);
        }
        Ok(self)
    }

    /// Scan one or more roots and index every member by fingerprint
    pub fn scan(&self, roots: &[PathBuf]) -> Result<ContentIndex> {
        let index = ContentIndex::new();
        let cancel = CancelToken::new();
        let errors = ErrorSlot::new();

        let (sender, receiver) = mpsc::sync_channel::<PathBuf>(PIPELINE_DEPTH);
        let receiver = Mutex::new(receiver);

        thread::scope(|scope| {
            for root in roots {
                let sender = sender.clone();
                let cancel = &cancel;
                let errors = &errors;
                scope.spawn(move || {
                    if let Err(error) = walk_root(root, &sender, cancel) {
                        errors.record(error);
                        cancel.trip();
                    }
                });
            }
            drop(sender);

            for _ in 0..self.effective_workers() {
                let receiver = &receiver;
                let index = &index;
                let cancel = &cancel;
                let errors = &errors;
                scope.spawn(move || {
                    if let Err(error) = self.scan_worker(receiver, index, cancel) {
                        errors.record(error);
                        cancel.trip();
                    }
                });
            }
        });

        match errors.take() {
            Some(error) => Err(error),
            None => Ok(index),
        }
    }

    fn scan_worker(
        &self,
        receiver: &Mutex<Receiver<PathBuf>>,
        index: &ContentIndex,
        cancel: &CancelToken,
    ) -> Result<()> {
        loop {
            if cancel.is_tripped() {
                return Ok(());
            }
            let path = match receiver.lock().expect("receiver lock poisoned").recv() {
                Ok(path) => path,
                Err(_) => return Ok(()),
            };
            if cancel.is_tripped() {
                return Ok(());
            }

            let mut reader = archive::new_reader(&path)?;
            info!("Scanning {}", reader.name());
            index.scan(&mut reader, self.algorithm)?;
            self.add_rx(reader.rx());
        }
    }

    /// Reconcile every game in the dat file against the target
    /// directory, using the index to locate missing content
    pub fn update(&self, dir: &Path, datfile: &Datfile, index: &ContentIndex) -> Result<()> {
        let cancel = CancelToken::new();
        let errors = ErrorSlot::new();

        let (sender, receiver) = mpsc::sync_channel::<&Game>(PIPELINE_DEPTH);
        let receiver = Mutex::new(receiver);

        thread::scope(|scope| {
            {
                let cancel = &cancel;
                let errors = &errors;
                scope.spawn(move || {
                    for game in &datfile.games {
                        if self.missing.contains(&game.name) {
                            info!("Skipping {}", game.name);
                            game.set_matched();
                            continue;
                        }
                        if !send_with_cancel(&sender, game, cancel) {
                            errors.record(Error::Cancelled);
                            cancel.trip();
                            return;
                        }
                    }
                });
            }

            for _ in 0..self.effective_workers() {
                let receiver = &receiver;
                let cancel = &cancel;
                let errors = &errors;
                scope.spawn(move || {
                    if let Err(error) = self.game_worker(receiver, dir, index, cancel) {
                        errors.record(error);
                        cancel.trip();
                    }
                });
            }
        });

        match errors.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn game_worker(
        &self,
        receiver: &Mutex<Receiver<&Game>>,
        dir: &Path,
        index: &ContentIndex,
        cancel: &CancelToken,
    ) -> Result<()> {
        loop {
            if cancel.is_tripped() {
                return Ok(());
            }
            let game = match receiver.lock().expect("receiver lock poisoned").recv() {
                Ok(game) => game,
                Err(_) => return Ok(()),
            };
            if cancel.is_tripped() {
                return Ok(());
            }

            self.reconcile_game(dir, game, index)?;
        }
    }

    /// Remove every non-hidden entry of the target directory that no
    /// catalog game claims
    pub fn sweep(&self, dir: &Path, datfile: &Datfile) -> Result<()> {
        let keep: HashSet<String> = datfile.games.iter().map(Game::filename).collect();

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if keep.contains(&name) || name.starts_with('.') {
                continue;
            }
            info!("Deleting {}", entry.path().display());
            if self.dry_run {
                continue;
            }
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }

        Ok(())
    }

    /// Zero the byte counters between phases
    pub fn reset_counters(&self) {
        self.rx.store(0, Ordering::Relaxed);
        self.tx.store(0, Ordering::Relaxed);
    }

    /// Bytes read from sources and targets so far
    pub fn rx(&self) -> u64 {
        self.rx.load(Ordering::Relaxed)
    }

    /// Bytes written into produced archives so far
    pub fn tx(&self) -> u64 {
        self.tx.load(Ordering::Relaxed)
    }

    pub(crate) fn add_rx(&self, n: u64) {
        self.rx.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_tx(&self, n: u64) {
        self.tx.fetch_add(n, Ordering::Relaxed);
    }

    fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1)
        }
    }
}
