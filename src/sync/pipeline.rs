// src/sync/pipeline.rs

//! Pipeline primitives: cancellation, first-error capture and the
//! cancellable directory walk feeding the scan workers.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use tracing::info;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Bounded depth of the work channels
pub(crate) const PIPELINE_DEPTH: usize = 128;

/// Shared cancellation token, tripped on the first error or by the
/// caller. Every blocking loop in the pipelines polls it.
#[derive(Debug, Default)]
pub(crate) struct CancelToken(AtomicBool);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Captures the error that terminates an invocation. The first real
/// error wins; cancellation errors only stand when nothing real caused
/// them, so a worker racing to report `Cancelled` never masks the
/// failure that tripped the token.
#[derive(Debug, Default)]
pub(crate) struct ErrorSlot(Mutex<Option<Error>>);

impl ErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, error: Error) {
        let mut slot = self.0.lock().expect("error slot poisoned");
        match slot.as_ref() {
            None => *slot = Some(error),
            Some(current) if current.is_cancellation() && !error.is_cancellation() => {
                *slot = Some(error)
            }
            Some(_) => {}
        }
    }

    pub fn take(&self) -> Option<Error> {
        self.0.lock().expect("error slot poisoned").take()
    }
}

/// Send an item on a bounded channel, giving up when cancellation trips
/// or every receiver is gone. Returns whether the item was delivered.
pub(crate) fn send_with_cancel<T>(
    sender: &SyncSender<T>,
    item: T,
    cancel: &CancelToken,
) -> bool {
    let mut item = item;
    loop {
        if cancel.is_tripped() {
            return false;
        }
        match sender.try_send(item) {
            Ok(()) => return true,
            Err(TrySendError::Full(back)) => {
                item = back;
                thread::sleep(Duration::from_millis(1));
            }
            Err(TrySendError::Disconnected(_)) => return false,
        }
    }
}

/// Walk one source root, emitting every regular, non-hidden file.
///
/// Hidden directories are pruned without descending so the scan never
/// fights indexers like Spotlight; hidden files and resource forks
/// (`._*`) are skipped. The walk visits contents first and honours the
/// cancellation token on every entry.
pub(crate) fn walk_root(
    root: &Path,
    sender: &SyncSender<PathBuf>,
    cancel: &CancelToken,
) -> Result<()> {
    let walker = WalkDir::new(root)
        .contents_first(true)
        .into_iter()
        .filter_entry(|entry| {
            let hidden_dir = entry.file_type().is_dir() && hidden(entry.file_name());
            if hidden_dir {
                info!("Ignoring {}", entry.path().display());
            }
            !hidden_dir
        });

    for entry in walker {
        if cancel.is_tripped() {
            return Err(Error::WalkCancelled);
        }

        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if hidden(entry.file_name()) {
            info!("Ignoring {}", entry.path().display());
            continue;
        }

        if !send_with_cancel(sender, entry.into_path(), cancel) {
            return Err(Error::WalkCancelled);
        }
    }

    Ok(())
}

fn hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::fs;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn collect_walk(root: &Path) -> BTreeSet<String> {
        let (sender, receiver) = mpsc::sync_channel(PIPELINE_DEPTH);
        let cancel = CancelToken::new();
        walk_root(root, &sender, &cancel).unwrap();
        drop(sender);
        receiver
            .into_iter()
            .map(|p: PathBuf| {
                p.strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }

    #[test]
    fn test_walk_skips_hidden() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.bin"), b"a").unwrap();
        fs::write(dir.path().join("._resource"), b"fork").unwrap();
        fs::write(dir.path().join(".hidden"), b"h").unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git").join("config"), b"c").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("b.bin"), b"b").unwrap();

        let found = collect_walk(dir.path());
        assert_eq!(
            found,
            BTreeSet::from(["a.bin".to_string(), "sub/b.bin".to_string()])
        );
    }

    #[test]
    fn test_walk_single_file_root() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("loose.bin");
        fs::write(&path, b"x").unwrap();

        let (sender, receiver) = mpsc::sync_channel(PIPELINE_DEPTH);
        let cancel = CancelToken::new();
        walk_root(&path, &sender, &cancel).unwrap();
        drop(sender);
        let found: Vec<PathBuf> = receiver.into_iter().collect();
        assert_eq!(found, vec![path]);
    }

    #[test]
    fn test_walk_cancelled() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.bin"), b"a").unwrap();

        let (sender, _receiver) = mpsc::sync_channel(PIPELINE_DEPTH);
        let cancel = CancelToken::new();
        cancel.trip();
        assert!(matches!(
            walk_root(dir.path(), &sender, &cancel),
            Err(Error::WalkCancelled)
        ));
    }

    #[test]
    fn test_error_slot_first_wins() {
        let slot = ErrorSlot::new();
        slot.record(Error::NotTorrentZip);
        slot.record(Error::MemberNotFound("x".to_string()));
        assert!(matches!(slot.take(), Some(Error::NotTorrentZip)));
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_error_slot_real_error_replaces_cancellation() {
        let slot = ErrorSlot::new();
        slot.record(Error::Cancelled);
        slot.record(Error::NotTorrentZip);
        assert!(matches!(slot.take(), Some(Error::NotTorrentZip)));

        let slot = ErrorSlot::new();
        slot.record(Error::NotTorrentZip);
        slot.record(Error::Cancelled);
        assert!(matches!(slot.take(), Some(Error::NotTorrentZip)));
    }

    #[test]
    fn test_send_with_cancel_disconnected() {
        let (sender, receiver) = mpsc::sync_channel::<u32>(1);
        drop(receiver);
        let cancel = CancelToken::new();
        assert!(!send_with_cancel(&sender, 1, &cancel));
    }
}
