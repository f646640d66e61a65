use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use log::{debug, warn};
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, WatchDescriptor};

use crate::storage::StorageSignal;
use crate::{Error, ObjHandle, StorageId};

/// How long an IN_MOVED_FROM waits for its IN_MOVED_TO partner before
/// it is treated as a plain deletion.
pub const MOVE_PAIR_TTL: Duration = Duration::from_secs(2);

/// The watch mask registered on every directory.
pub fn directory_watch_mask() -> AddWatchFlags {
    AddWatchFlags::IN_CREATE
        | AddWatchFlags::IN_DELETE
        | AddWatchFlags::IN_MODIFY
        | AddWatchFlags::IN_MOVED_FROM
        | AddWatchFlags::IN_MOVED_TO
}

/// One filesystem notification, decoupled from the kernel buffer so it
/// can cross the channel to the responder loop.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub wd: WatchDescriptor,
    pub mask: AddWatchFlags,
    pub cookie: u32,
    pub name: Option<OsString>,
}

impl WatchEvent {
    pub fn is_dir(&self) -> bool {
        self.mask.contains(AddWatchFlags::IN_ISDIR)
    }
}

/// Inotify instance shared between the owning storage plugin (which
/// registers watches) and a reader thread that forwards events to the
/// responder loop.
pub struct FsWatcher {
    inotify: Arc<Inotify>,
}

impl FsWatcher {
    /// Creates the inotify instance and spawns the observer thread.
    /// The thread exits when the signal channel closes.
    pub fn spawn(storage_id: StorageId, tx: Sender<StorageSignal>) -> Result<FsWatcher, Error> {
        let inotify = Arc::new(Inotify::init(InitFlags::empty())?);
        let reader = Arc::clone(&inotify);
        thread::Builder::new()
            .name(format!("inotify-{:08x}", storage_id))
            .spawn(move || loop {
                let events = match reader.read_events() {
                    Ok(events) => events,
                    Err(err) => {
                        warn!("inotify read failed for {:08x}: {}", storage_id, err);
                        return;
                    }
                };
                for event in events {
                    let forwarded = StorageSignal::Watch {
                        storage_id,
                        event: WatchEvent {
                            wd: event.wd,
                            mask: event.mask,
                            cookie: event.cookie,
                            name: event.name,
                        },
                    };
                    if tx.send(forwarded).is_err() {
                        return;
                    }
                }
            })
            .map_err(|e| Error::Io(e))?;
        Ok(FsWatcher { inotify })
    }

    pub fn add_watch(&self, path: &Path) -> Result<WatchDescriptor, Error> {
        let wd = self.inotify.add_watch(path, directory_watch_mask())?;
        debug!("watching {}", path.display());
        Ok(wd)
    }

    pub fn remove_watch(&self, wd: WatchDescriptor) {
        // The kernel races watch removal against queued events, so a
        // failure here only means the watch is already gone.
        if let Err(err) = self.inotify.rm_watch(wd) {
            debug!("rm_watch: {}", err);
        }
    }
}

/// A move-from event waiting for its move-to partner.
#[derive(Debug, Clone)]
pub struct PendingMove {
    pub handle: ObjHandle,
    pub path: PathBuf,
    pub since: Instant,
}

/// Cookie-keyed table of unpaired IN_MOVED_FROM events. Entries that
/// out-live [`MOVE_PAIR_TTL`] are drained and treated as deletions.
#[derive(Debug, Default)]
pub struct PendingMoveTable {
    entries: HashMap<u32, PendingMove>,
}

impl PendingMoveTable {
    pub fn new() -> PendingMoveTable {
        PendingMoveTable::default()
    }

    pub fn insert(&mut self, cookie: u32, handle: ObjHandle, path: PathBuf) {
        self.entries.insert(
            cookie,
            PendingMove {
                handle,
                path,
                since: Instant::now(),
            },
        );
    }

    /// Takes the partner entry for a move-to event, if present.
    pub fn pair(&mut self, cookie: u32) -> Option<PendingMove> {
        self.entries.remove(&cookie)
    }

    /// Drains entries older than the pairing window.
    pub fn drain_expired(&mut self) -> Vec<PendingMove> {
        let now = Instant::now();
        let expired: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.since) >= MOVE_PAIR_TTL)
            .map(|(cookie, _)| *cookie)
            .collect();
        expired
            .into_iter()
            .filter_map(|cookie| self.entries.remove(&cookie))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_consumes_the_entry() {
        let mut table = PendingMoveTable::new();
        table.insert(7, 42, PathBuf::from("/s/a.txt"));
        let pending = table.pair(7).unwrap();
        assert_eq!(pending.handle, 42);
        assert!(table.pair(7).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn unrelated_cookies_do_not_pair() {
        let mut table = PendingMoveTable::new();
        table.insert(7, 42, PathBuf::from("/s/a.txt"));
        assert!(table.pair(8).is_none());
        assert!(!table.is_empty());
    }

    #[test]
    fn fresh_entries_do_not_expire() {
        let mut table = PendingMoveTable::new();
        table.insert(7, 42, PathBuf::from("/s/a.txt"));
        assert!(table.drain_expired().is_empty());
    }
}
