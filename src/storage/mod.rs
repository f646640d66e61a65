use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::data::MtpData;
use crate::datasets::{ObjectInfo, StorageInfo};
use crate::event::StandardEventCode;
use crate::properties::{ObjPropDesc, ObjPropDescVal, ObjectPropCode};
use crate::response::StandardResponseCode;
use crate::{Error, ObjHandle, StorageId};

pub mod factory;
pub mod fs;
pub mod playlist;
pub mod puoid;
pub mod watcher;

pub use factory::StorageFactory;
pub use fs::FsStoragePlugin;
pub use watcher::WatchEvent;

/// Read-buffer size for streamed object copies; the cancel flag is
/// polled between blocks of this size.
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// An event generated by a storage plugin, forwarded to the initiator
/// on the interrupt endpoint.
#[derive(Debug, Clone)]
pub struct StorageEvent {
    pub code: StandardEventCode,
    pub params: Vec<u32>,
}

impl StorageEvent {
    pub fn new(code: StandardEventCode, params: Vec<u32>) -> StorageEvent {
        StorageEvent { code, params }
    }
}

/// What storage plugins push to the responder loop.
#[derive(Debug)]
pub enum StorageSignal {
    /// An on-device change the initiator should hear about
    Event(StorageEvent),

    /// Enumeration of the given storage finished
    Ready(StorageId),

    /// A raw filesystem notification for the given storage; the
    /// responder routes it back into the owning plugin.
    Watch {
        storage_id: StorageId,
        event: WatchEvent,
    },
}

/// Allocator for object handles and PUOIDs. Handles are unique across
/// every storage for the lifetime of the process and are never reused
/// within a session; PUOIDs are monotonic and persisted by the plugins.
#[derive(Debug)]
pub struct IdProvider {
    next_handle: Mutex<ObjHandle>,
    next_puoid: Mutex<u128>,
}

impl Default for IdProvider {
    fn default() -> Self {
        IdProvider {
            next_handle: Mutex::new(0),
            next_puoid: Mutex::new(0),
        }
    }
}

impl IdProvider {
    pub fn new() -> IdProvider {
        IdProvider::default()
    }

    /// The next free object handle. Wraps 0xFFFFFFFF to 1; 0 and
    /// 0xFFFFFFFF are never returned.
    pub fn next_handle(&self) -> ObjHandle {
        let mut next = self.next_handle.lock().unwrap();
        *next = match next.wrapping_add(1) {
            0 | 0xFFFF_FFFF => 1,
            h => h,
        };
        *next
    }

    pub fn next_puoid(&self) -> u128 {
        let mut next = self.next_puoid.lock().unwrap();
        *next += 1;
        *next
    }

    /// Raises the PUOID floor so future allocations stay above a
    /// persisted maximum.
    pub fn ensure_puoid_floor(&self, largest: u128) {
        let mut next = self.next_puoid.lock().unwrap();
        if largest > *next {
            *next = largest;
        }
    }
}

/// Metadata back-end consulted for rich object properties (artist,
/// duration, dimensions, …). The indexing service implementing this
/// lives outside the crate.
pub trait MetadataSource: Send {
    fn object_property(&self, _path: &Path, _prop: ObjectPropCode) -> Option<MtpData> {
        None
    }
}

/// A metadata source that knows nothing.
#[derive(Debug, Default)]
pub struct NullMetadataSource;

impl MetadataSource for NullMetadataSource {}

/// Thumbnail generator consulted for supported image formats.
pub trait Thumbnailer: Send {
    fn thumbnail(&self, _path: &Path) -> Option<Vec<u8>> {
        None
    }

    fn dimensions(&self, _path: &Path) -> Option<(u32, u32)> {
        None
    }
}

#[derive(Debug, Default)]
pub struct NullThumbnailer;

impl Thumbnailer for NullThumbnailer {}

/// The capability set of one storage. The factory only ever talks to
/// this trait; concrete plugin types never leak past it.
pub trait StoragePlugin: Send {
    fn storage_id(&self) -> StorageId;

    fn root_path(&self) -> &Path;

    /// Runs up to `budget` enumeration steps. Returns true once the
    /// whole tree has been walked; the plugin emits
    /// [`StorageSignal::Ready`] exactly once at that point.
    fn enumerate_step(&mut self, budget: usize) -> Result<bool, Error>;

    fn is_enumerated(&self) -> bool;

    /// Enables or disables object change events; disabled outside an
    /// open session.
    fn set_event_emission(&mut self, enabled: bool);

    /// Creates an object from an ObjectInfo dataset. A zero parent
    /// selects the storage root. Returns the resolved parent and the
    /// fresh handle.
    fn add_item(&mut self, parent: ObjHandle, info: ObjectInfo)
        -> Result<(ObjHandle, ObjHandle), Error>;

    /// Inserts an object under a caller-chosen handle; used when an
    /// object hierarchy migrates between storages and must keep its
    /// handles.
    fn adopt_item(
        &mut self,
        handle: ObjHandle,
        parent: ObjHandle,
        info: ObjectInfo,
    ) -> Result<(), Error>;

    /// Deletes an object, descendants first. [`crate::OBJ_HANDLE_ALL`]
    /// deletes every object, optionally filtered by format code.
    fn delete_item(&mut self, handle: ObjHandle, format: Option<u16>) -> Result<(), Error>;

    /// Child handles of an association, or root-level/all handles per
    /// the GetObjectHandles parent conventions.
    fn object_handles(
        &self,
        format: Option<u16>,
        parent: Option<ObjHandle>,
    ) -> Result<Vec<ObjHandle>, Error>;

    fn has_handle(&self, handle: ObjHandle) -> bool;

    fn storage_info(&mut self) -> Result<StorageInfo, Error>;

    fn references(&self, handle: ObjHandle) -> Result<Vec<ObjHandle>, Error>;

    fn set_references(&mut self, handle: ObjHandle, refs: Vec<ObjHandle>) -> Result<(), Error>;

    /// Copies an object (recursively for associations) within this
    /// storage. Returns the new object's handle.
    fn copy_object(&mut self, handle: ObjHandle, parent: ObjHandle) -> Result<ObjHandle, Error>;

    /// Moves an object within this storage by renaming.
    fn move_object(&mut self, handle: ObjHandle, parent: ObjHandle) -> Result<(), Error>;

    fn path_of(&self, handle: ObjHandle) -> Result<PathBuf, Error>;

    fn object_info(&mut self, handle: ObjHandle) -> Result<ObjectInfo, Error>;

    /// Segmented write: the first segment creates or truncates the
    /// file, the last closes it and refreshes size and modification
    /// date.
    fn write_data(
        &mut self,
        handle: ObjHandle,
        data: &[u8],
        first_segment: bool,
        last_segment: bool,
    ) -> Result<(), Error>;

    /// Positioned write used by the edit-object extensions.
    fn write_partial_data(
        &mut self,
        handle: ObjHandle,
        offset: u64,
        data: &[u8],
        first_segment: bool,
        last_segment: bool,
    ) -> Result<(), Error>;

    fn read_data(&mut self, handle: ObjHandle, offset: u64, buf: &mut [u8])
        -> Result<usize, Error>;

    fn truncate_item(&mut self, handle: ObjHandle, size: u64) -> Result<(), Error>;

    /// Fills the requested property values from object info, the
    /// filesystem, and the metadata source, in that order.
    fn object_property_values(
        &mut self,
        handle: ObjHandle,
        props: &mut [ObjPropDescVal],
    ) -> Result<(), Error>;

    fn set_object_property_value(
        &mut self,
        handle: ObjHandle,
        desc: &ObjPropDesc,
        value: &MtpData,
    ) -> Result<(), Error>;

    /// Batched property query across every child of an association.
    /// Values are aligned with `props`; None marks a property the
    /// object does not have.
    fn child_property_values(
        &mut self,
        parent: ObjHandle,
        props: &[ObjPropDesc],
    ) -> Result<HashMap<ObjHandle, Vec<Option<MtpData>>>, Error>;

    fn largest_puoid(&self) -> u128;

    fn thumbnail(&mut self, handle: ObjHandle) -> Result<Vec<u8>, Error>;

    /// Applies a filesystem notification routed back by the responder.
    fn handle_watch_event(&mut self, _event: WatchEvent) {}

    /// Flushes move-from entries whose pairing window expired.
    fn expire_stale_moves(&mut self) {}

    /// Persists PUOIDs and object references.
    fn flush(&mut self) {}
}

/// Streams object content between two (possibly distinct) storages
/// through a fixed-size buffer, polling the cancel flag between
/// blocks. The caller owns rollback of the destination on failure.
pub fn copy_data(
    source: &mut dyn StoragePlugin,
    source_handle: ObjHandle,
    destination: &mut dyn StoragePlugin,
    destination_handle: ObjHandle,
    cancel: &AtomicBool,
) -> Result<(), Error> {
    let total = source.object_info(source_handle)?.object_compressed_size;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut offset = 0u64;
    let mut first = true;
    while offset < total || first {
        if cancel.load(Ordering::SeqCst) {
            return Err(StandardResponseCode::GeneralError.into());
        }
        let want = ((total - offset) as usize).min(COPY_BUFFER_SIZE);
        let got = source.read_data(source_handle, offset, &mut buf[..want])?;
        if got == 0 && offset < total {
            return Err(StandardResponseCode::IncompleteTransfer.into());
        }
        let last = offset + got as u64 >= total;
        destination.write_data(destination_handle, &buf[..got], first, last)?;
        offset += got as u64;
        first = false;
        if last {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_skip_zero_and_all_ones() {
        let ids = IdProvider::new();
        assert_eq!(ids.next_handle(), 1);
        assert_eq!(ids.next_handle(), 2);
    }

    #[test]
    fn handle_wrap_skips_reserved_values() {
        let ids = IdProvider::new();
        *ids.next_handle.lock().unwrap() = 0xFFFF_FFFE;
        assert_eq!(ids.next_handle(), 1);
    }

    #[test]
    fn puoid_floor_respected() {
        let ids = IdProvider::new();
        ids.ensure_puoid_floor(41);
        assert_eq!(ids.next_puoid(), 42);
        ids.ensure_puoid_floor(10);
        assert_eq!(ids.next_puoid(), 43);
    }
}
