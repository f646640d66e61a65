use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use crossbeam_channel::Sender;
use log::{debug, trace, warn};
use nix::sys::inotify::{AddWatchFlags, WatchDescriptor};
use nix::sys::statvfs::statvfs;
use num_traits::ToPrimitive;

use crate::data::MtpData;
use crate::datasets::{
    AccessCapability, FilesystemType, ObjectInfo, StorageInfo, StorageType,
};
use crate::event::StandardEventCode;
use crate::format::{format_by_extension, FormatCategory, FormatCode, StandardFormatCode};
use crate::properties::{
    ObjPropDesc, ObjPropDescVal, ObjectPropCode, PROTECTION_NONE, PROTECTION_READ_ONLY,
};
use crate::response::StandardResponseCode;
use crate::storage::playlist;
use crate::storage::puoid::{PuoidDb, ReferenceDb};
use crate::storage::watcher::{FsWatcher, PendingMoveTable, WatchEvent};
use crate::storage::{
    IdProvider, MetadataSource, NullMetadataSource, NullThumbnailer, StorageEvent, StoragePlugin,
    StorageSignal, Thumbnailer, COPY_BUFFER_SIZE,
};
use crate::{Error, ObjHandle, StorageId, OBJ_HANDLE_ALL, OBJ_HANDLE_ROOT_LEVEL, PARENT_ROOT};

const MTP_DATE_FORMAT: &str = "%Y%m%dT%H%M%S";

/// The storage root occupies the reserved handle 0; it is addressable
/// as a parent but never exposed as an object.
const ROOT_HANDLE: ObjHandle = 0;

fn mtp_date(time: std::time::SystemTime) -> String {
    let datetime: DateTime<Local> = time.into();
    datetime.format(MTP_DATE_FORMAT).to_string()
}

fn io_response(err: &std::io::Error) -> StandardResponseCode {
    match err.kind() {
        std::io::ErrorKind::PermissionDenied => StandardResponseCode::AccessDenied,
        std::io::ErrorKind::NotFound => StandardResponseCode::InvalidObjectHandle,
        _ if err.raw_os_error() == Some(nix::libc::ENOSPC) => StandardResponseCode::StoreFull,
        _ => StandardResponseCode::GeneralError,
    }
}

/// One node of the object tree.
#[derive(Debug)]
struct StorageItem {
    handle: ObjHandle,
    parent: ObjHandle,
    children: Vec<ObjHandle>,
    path: PathBuf,
    puoid: u128,
    info: ObjectInfo,
    wd: Option<WatchDescriptor>,
}

impl StorageItem {
    fn is_association(&self) -> bool {
        self.info.object_format.is_association()
    }
}

/// Construction parameters for one exported filesystem root.
#[derive(Debug, Clone)]
pub struct FsStorageParams {
    pub storage_id: StorageId,
    pub root_path: PathBuf,
    pub name: String,
    pub description: String,
    pub removable: bool,
    pub exclude_paths: Vec<PathBuf>,
    /// Directory holding the PUOID and object-reference databases.
    pub db_dir: PathBuf,
}

struct WriteState {
    handle: ObjHandle,
    file: File,
    bytes_written: u64,
}

/// A storage plugin exporting one filesystem directory tree.
pub struct FsStoragePlugin {
    storage_id: StorageId,
    storage_type: StorageType,
    root_path: PathBuf,
    name: String,
    description: String,
    exclude_paths: Vec<PathBuf>,

    ids: Arc<IdProvider>,
    events: Sender<StorageSignal>,
    events_enabled: bool,
    cancel: Arc<AtomicBool>,

    items: HashMap<ObjHandle, StorageItem>,
    path_index: HashMap<PathBuf, ObjHandle>,
    puoid_index: HashMap<u128, ObjHandle>,
    wd_index: HashMap<WatchDescriptor, ObjHandle>,
    references: HashMap<ObjHandle, Vec<ObjHandle>>,

    puoid_db: PuoidDb,
    reference_db: ReferenceDb,
    persisted_puoids: HashMap<PathBuf, u128>,

    watcher: Option<FsWatcher>,
    pending_moves: PendingMoveTable,

    pending_dirs: VecDeque<ObjHandle>,
    enumerated: bool,

    write_state: Option<WriteState>,

    metadata: Box<dyn MetadataSource>,
    thumbnailer: Box<dyn Thumbnailer>,
}

impl FsStoragePlugin {
    pub fn new(
        params: FsStorageParams,
        ids: Arc<IdProvider>,
        events: Sender<StorageSignal>,
        cancel: Arc<AtomicBool>,
    ) -> Result<FsStoragePlugin, Error> {
        if !params.root_path.is_dir() {
            return Err(Error::Transport(format!(
                "storage root {} is not a directory",
                params.root_path.display()
            )));
        }
        let db_stem = params.name.replace('/', "_");
        let puoid_db = PuoidDb::new(params.db_dir.join(format!("{}-puoids.db", db_stem)));
        let reference_db =
            ReferenceDb::new(params.db_dir.join(format!("{}-references.db", db_stem)));
        let (persisted_puoids, largest) = puoid_db.load();
        ids.ensure_puoid_floor(largest);

        let watcher = match FsWatcher::spawn(params.storage_id, events.clone()) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!(
                    "no filesystem watcher for {}: {}",
                    params.root_path.display(),
                    err
                );
                None
            }
        };

        let mut plugin = FsStoragePlugin {
            storage_id: params.storage_id,
            storage_type: if params.removable {
                StorageType::RemovableRam
            } else {
                StorageType::FixedRam
            },
            root_path: params.root_path.clone(),
            name: params.name,
            description: params.description,
            exclude_paths: params.exclude_paths,
            ids,
            events,
            events_enabled: false,
            cancel,
            items: HashMap::new(),
            path_index: HashMap::new(),
            puoid_index: HashMap::new(),
            wd_index: HashMap::new(),
            references: HashMap::new(),
            puoid_db,
            reference_db,
            persisted_puoids,
            watcher,
            pending_moves: PendingMoveTable::new(),
            pending_dirs: VecDeque::new(),
            enumerated: false,
            write_state: None,
            metadata: Box::new(NullMetadataSource),
            thumbnailer: Box::new(NullThumbnailer),
        };

        let root_info = ObjectInfo {
            storage_id: plugin.storage_id,
            object_format: FormatCode::Standard(StandardFormatCode::Association),
            filename: String::new(),
            ..ObjectInfo::default()
        };
        let root = StorageItem {
            handle: ROOT_HANDLE,
            parent: ROOT_HANDLE,
            children: Vec::new(),
            path: params.root_path.clone(),
            puoid: 0,
            info: root_info,
            wd: None,
        };
        plugin.items.insert(ROOT_HANDLE, root);
        plugin.path_index.insert(params.root_path, ROOT_HANDLE);
        plugin.watch_directory(ROOT_HANDLE);
        plugin.pending_dirs.push_back(ROOT_HANDLE);
        Ok(plugin)
    }

    pub fn set_metadata_source(&mut self, metadata: Box<dyn MetadataSource>) {
        self.metadata = metadata;
    }

    pub fn set_thumbnailer(&mut self, thumbnailer: Box<dyn Thumbnailer>) {
        self.thumbnailer = thumbnailer;
    }

    fn emit(&self, code: StandardEventCode, params: Vec<u32>) {
        if !self.events_enabled {
            return;
        }
        self.events
            .send(StorageSignal::Event(StorageEvent::new(code, params)))
            .ok();
    }

    fn emit_storage_info_changed(&self) {
        // Not gated on object events; the responder coalesces these.
        self.events
            .send(StorageSignal::Event(StorageEvent::new(
                StandardEventCode::StorageInfoChanged,
                vec![self.storage_id],
            )))
            .ok();
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.exclude_paths.iter().any(|p| path.starts_with(p))
    }

    fn item(&self, handle: ObjHandle) -> Result<&StorageItem, Error> {
        if handle == ROOT_HANDLE {
            return Err(StandardResponseCode::InvalidObjectHandle.into());
        }
        self.items
            .get(&handle)
            .ok_or_else(|| StandardResponseCode::InvalidObjectHandle.into())
    }

    /// Parent lookup accepting 0 as the storage root.
    fn parent_item(&self, handle: ObjHandle) -> Result<&StorageItem, Error> {
        let handle = if handle == PARENT_ROOT || handle == OBJ_HANDLE_ROOT_LEVEL {
            ROOT_HANDLE
        } else {
            handle
        };
        let item = self
            .items
            .get(&handle)
            .ok_or(StandardResponseCode::InvalidParentObject)?;
        if !item.is_association() {
            return Err(StandardResponseCode::InvalidParentObject.into());
        }
        Ok(item)
    }

    fn watch_directory(&mut self, handle: ObjHandle) {
        let path = match self.items.get(&handle) {
            Some(item) => item.path.clone(),
            None => return,
        };
        if let Some(watcher) = &self.watcher {
            match watcher.add_watch(&path) {
                Ok(wd) => {
                    self.wd_index.insert(wd, handle);
                    if let Some(item) = self.items.get_mut(&handle) {
                        item.wd = Some(wd);
                    }
                }
                Err(err) => warn!("cannot watch {}: {}", path.display(), err),
            }
        }
    }

    fn unwatch(&mut self, handle: ObjHandle) {
        if let Some(item) = self.items.get_mut(&handle) {
            if let Some(wd) = item.wd.take() {
                self.wd_index.remove(&wd);
                if let Some(watcher) = &self.watcher {
                    watcher.remove_watch(wd);
                }
            }
        }
    }

    fn validate_filename(&self, parent: ObjHandle, name: &str) -> Result<(), Error> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(StandardResponseCode::InvalidParameter.into());
        }
        let parent_item = self.parent_item(parent)?;
        // case-insensitive collision check for Windows interoperability
        let lowered = name.to_lowercase();
        for child in &parent_item.children {
            if let Some(child_item) = self.items.get(child) {
                if child_item.info.filename.to_lowercase() == lowered {
                    return Err(StandardResponseCode::AccessDenied.into());
                }
            }
        }
        Ok(())
    }

    /// Builds the ObjectInfo for an on-disk entry.
    fn stat_object_info(&self, path: &Path, parent: ObjHandle) -> Result<ObjectInfo, Error> {
        let meta = fs::symlink_metadata(path).map_err(|e| Error::Response(io_response(&e)))?;
        let is_dir = meta.is_dir();
        let format = format_by_extension(path, is_dir);
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let modified = meta.modified().map(mtp_date).unwrap_or_default();
        let created = meta.created().map(mtp_date).unwrap_or_else(|_| modified.clone());
        Ok(ObjectInfo {
            storage_id: self.storage_id,
            object_format: format,
            protection_status: if meta.permissions().readonly() {
                PROTECTION_READ_ONLY
            } else {
                PROTECTION_NONE
            },
            object_compressed_size: if is_dir { 0 } else { meta.len() },
            parent_object: parent,
            association_type: if is_dir { 0x0001 } else { 0 },
            filename,
            capture_date: created,
            modification_date: modified,
            ..ObjectInfo::default()
        })
    }

    /// Inserts an item into the arena and every index, linking it to
    /// its parent. The caller supplies a fully populated info.
    fn link_item(
        &mut self,
        handle: ObjHandle,
        parent: ObjHandle,
        path: PathBuf,
        puoid: u128,
        info: ObjectInfo,
    ) {
        let item = StorageItem {
            handle,
            parent,
            children: Vec::new(),
            path: path.clone(),
            puoid,
            info,
            wd: None,
        };
        self.items.insert(handle, item);
        self.path_index.insert(path, handle);
        self.puoid_index.insert(puoid, handle);
        if let Some(parent_item) = self.items.get_mut(&parent) {
            parent_item.children.push(handle);
        }
    }

    /// The persisted PUOID for a path, or a fresh one.
    fn puoid_for(&mut self, path: &Path) -> u128 {
        match self.persisted_puoids.get(path) {
            Some(puoid) => *puoid,
            None => {
                let puoid = self.ids.next_puoid();
                self.persisted_puoids.insert(path.to_path_buf(), puoid);
                puoid
            }
        }
    }

    /// Creates an item record for an existing filesystem entry.
    fn index_existing(&mut self, path: &Path, parent: ObjHandle) -> Result<ObjHandle, Error> {
        let info = self.stat_object_info(path, parent)?;
        let handle = self.ids.next_handle();
        let puoid = self.puoid_for(path);
        let is_dir = info.object_format.is_association();
        self.link_item(handle, parent, path.to_path_buf(), puoid, info);
        if is_dir {
            self.watch_directory(handle);
        }
        Ok(handle)
    }

    fn finish_enumeration(&mut self) -> Result<(), Error> {
        // PUOIDs for paths that no longer exist are dropped.
        let live: HashSet<PathBuf> = self.path_index.keys().cloned().collect();
        self.persisted_puoids.retain(|path, _| live.contains(path));
        if let Err(err) = self.puoid_db.store(&self.persisted_puoids) {
            warn!("failed to store puoid database: {}", err);
        }

        // References whose key or members vanished are pruned on load.
        let loaded = self.reference_db.load();
        self.references = loaded
            .into_iter()
            .filter(|(handle, _)| self.items.contains_key(handle) && *handle != ROOT_HANDLE)
            .map(|(handle, refs)| {
                let refs = refs
                    .into_iter()
                    .filter(|r| self.items.contains_key(r) && *r != ROOT_HANDLE)
                    .collect();
                (handle, refs)
            })
            .collect();

        self.assign_playlist_references();

        self.enumerated = true;
        debug!(
            "storage {:08x} ready with {} objects",
            self.storage_id,
            self.items.len() - 1
        );
        self.events.send(StorageSignal::Ready(self.storage_id)).ok();
        Ok(())
    }

    /// Parses on-disk playlist files into reference lists.
    fn assign_playlist_references(&mut self) {
        let playlists: Vec<(ObjHandle, PathBuf)> = self
            .items
            .values()
            .filter(|item| item.info.object_format.is_playlist())
            .map(|item| (item.handle, item.path.clone()))
            .collect();
        for (handle, path) in playlists {
            let refs: Vec<ObjHandle> = playlist::parse_playlist(&path)
                .into_iter()
                .filter_map(|entry| self.path_index.get(&entry).copied())
                .filter(|h| *h != ROOT_HANDLE)
                .collect();
            if !refs.is_empty() {
                self.references.insert(handle, refs);
            }
        }
    }

    fn delete_physical(item_path: &Path, is_dir: bool) -> Result<(), Error> {
        let result = if is_dir {
            fs::remove_dir(item_path)
        } else {
            fs::remove_file(item_path)
        };
        match result {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Response(io_response(&e))),
        }
    }

    /// Removes an item from the arena and all indices; the filesystem
    /// entry is untouched.
    fn unlink_item(&mut self, handle: ObjHandle) {
        self.unwatch(handle);
        if let Some(item) = self.items.remove(&handle) {
            self.path_index.remove(&item.path);
            self.puoid_index.remove(&item.puoid);
            self.persisted_puoids.remove(&item.path);
            if let Some(parent) = self.items.get_mut(&item.parent) {
                parent.children.retain(|c| *c != handle);
            }
        }
        self.references.remove(&handle);
        for refs in self.references.values_mut() {
            refs.retain(|r| *r != handle);
        }
    }

    /// Depth-first deletion. Directories are only removed when every
    /// descendant went away.
    fn delete_recursive(
        &mut self,
        handle: ObjHandle,
        remove_physically: bool,
        send_event: bool,
    ) -> Result<(), Error> {
        let (children, path, is_dir) = {
            let item = self.item(handle)?;
            (item.children.clone(), item.path.clone(), item.is_association())
        };
        let mut failed = false;
        for child in children {
            if self
                .delete_recursive(child, remove_physically, send_event)
                .is_err()
            {
                failed = true;
            }
        }
        if failed {
            return Err(StandardResponseCode::PartialDeletion.into());
        }
        if remove_physically {
            Self::delete_physical(&path, is_dir)?;
        }
        self.unlink_item(handle);
        if send_event {
            self.emit(StandardEventCode::ObjectRemoved, vec![handle]);
        }
        Ok(())
    }

    /// Format-filtered deletion used by the 0xFFFFFFFF wildcard.
    /// Returns true when the subtree rooted here is fully gone.
    fn delete_filtered(&mut self, handle: ObjHandle, format: u16) -> Result<bool, Error> {
        let (children, matches) = {
            let item = self.item(handle)?;
            let item_format = item.info.object_format.to_u64().unwrap_or(0) as u16;
            (item.children.clone(), item_format == format)
        };
        if matches {
            self.delete_recursive(handle, true, false)?;
            return Ok(true);
        }
        let mut any_err = false;
        for child in children {
            if self.delete_filtered(child, format).is_err() {
                any_err = true;
            }
        }
        if any_err {
            return Err(StandardResponseCode::PartialDeletion.into());
        }
        // a non-matching node itself stays
        Ok(false)
    }

    /// Recursively updates the stored paths of a moved subtree.
    fn adjust_moved_paths(&mut self, handle: ObjHandle, new_path: PathBuf) {
        let children = match self.items.get_mut(&handle) {
            Some(item) => {
                self.path_index.remove(&item.path);
                if let Some(puoid) = self.persisted_puoids.remove(&item.path) {
                    self.persisted_puoids.insert(new_path.clone(), puoid);
                }
                item.path = new_path.clone();
                item.info.filename = new_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.path_index.insert(new_path.clone(), handle);
                item.children.clone()
            }
            None => return,
        };
        for child in children {
            let filename = match self.items.get(&child) {
                Some(item) => item
                    .path
                    .file_name()
                    .map(|n| n.to_os_string())
                    .unwrap_or_default(),
                None => continue,
            };
            self.adjust_moved_paths(child, new_path.join(filename));
        }
    }

    /// Copies one file's content, polling the cancel flag per block.
    fn copy_file_contents(&self, from: &Path, to: &Path) -> Result<(), Error> {
        let mut src = File::open(from).map_err(|e| Error::Response(io_response(&e)))?;
        let mut dst = File::create(to).map_err(|e| Error::Response(io_response(&e)))?;
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                drop(dst);
                fs::remove_file(to).ok();
                return Err(StandardResponseCode::GeneralError.into());
            }
            let n = src.read(&mut buf).map_err(Error::Io)?;
            if n == 0 {
                break;
            }
            dst.write_all(&buf[..n]).map_err(Error::Io)?;
        }
        Ok(())
    }

    fn copy_recursive(
        &mut self,
        handle: ObjHandle,
        dest_parent: ObjHandle,
    ) -> Result<ObjHandle, Error> {
        let (src_path, filename, is_dir) = {
            let item = self.item(handle)?;
            (
                item.path.clone(),
                item.info.filename.clone(),
                item.is_association(),
            )
        };
        let dest_dir = self.parent_item(dest_parent)?.path.clone();
        let dest_path = dest_dir.join(&filename);

        if is_dir {
            fs::create_dir(&dest_path).map_err(|e| Error::Response(io_response(&e)))?;
            let new_handle = self.index_existing(&dest_path, dest_parent)?;
            let children = self.item(handle)?.children.clone();
            for child in children {
                self.copy_recursive(child, new_handle)?;
            }
            Ok(new_handle)
        } else {
            self.copy_file_contents(&src_path, &dest_path)?;
            self.index_existing(&dest_path, dest_parent)
        }
    }

    fn refresh_stat(&mut self, handle: ObjHandle) {
        let path = match self.items.get(&handle) {
            Some(item) => item.path.clone(),
            None => return,
        };
        if let Ok(meta) = fs::symlink_metadata(&path) {
            if let Some(item) = self.items.get_mut(&handle) {
                if !meta.is_dir() {
                    item.info.object_compressed_size = meta.len();
                }
                item.info.modification_date =
                    meta.modified().map(mtp_date).unwrap_or_default();
            }
        }
    }

    fn property_value(
        &mut self,
        handle: ObjHandle,
        desc: &ObjPropDesc,
    ) -> Result<Option<MtpData>, Error> {
        let item = self.item(handle)?;
        let value = match desc.prop_code {
            ObjectPropCode::StorageId => Some(MtpData::Uint32(self.storage_id)),
            ObjectPropCode::ObjectFormat => Some(MtpData::Uint16(
                item.info.object_format.to_u64().unwrap_or(0x3000) as u16,
            )),
            ObjectPropCode::ProtectionStatus => {
                Some(MtpData::Uint16(item.info.protection_status))
            }
            ObjectPropCode::ObjectSize => {
                Some(MtpData::Uint64(item.info.object_compressed_size))
            }
            ObjectPropCode::ObjectFileName => Some(MtpData::Str(item.info.filename.clone())),
            ObjectPropCode::DateCreated => Some(MtpData::Str(item.info.capture_date.clone())),
            ObjectPropCode::DateModified => {
                Some(MtpData::Str(item.info.modification_date.clone()))
            }
            ObjectPropCode::ParentObject => Some(MtpData::Uint32(item.parent)),
            ObjectPropCode::PersistentUniqueObjectIdentifier => {
                Some(MtpData::Uint128(item.puoid))
            }
            ObjectPropCode::Name => Some(MtpData::Str(item.info.filename.clone())),
            ObjectPropCode::NonConsumable => Some(MtpData::Uint8(0)),
            ObjectPropCode::Width | ObjectPropCode::Height
                if item.info.object_format.category() == FormatCategory::Image =>
            {
                let path = item.path.clone();
                let wanted_width = desc.prop_code == ObjectPropCode::Width;
                self.thumbnailer.dimensions(&path).map(|(w, h)| {
                    MtpData::Uint32(if wanted_width { w } else { h })
                })
            }
            _ => {
                let path = item.path.clone();
                self.metadata.object_property(&path, desc.prop_code)
            }
        };
        Ok(value)
    }
}

impl StoragePlugin for FsStoragePlugin {
    fn storage_id(&self) -> StorageId {
        self.storage_id
    }

    fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn enumerate_step(&mut self, budget: usize) -> Result<bool, Error> {
        if self.enumerated {
            return Ok(true);
        }
        for _ in 0..budget.max(1) {
            let dir_handle = match self.pending_dirs.pop_front() {
                Some(handle) => handle,
                None => {
                    self.finish_enumeration()?;
                    return Ok(true);
                }
            };
            let dir_path = match self.items.get(&dir_handle) {
                Some(item) => item.path.clone(),
                None => continue,
            };
            let entries = match fs::read_dir(&dir_path) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!("cannot read {}: {}", dir_path.display(), err);
                    continue;
                }
            };
            let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
            paths.sort();
            for path in paths {
                if self.is_excluded(&path) || self.path_index.contains_key(&path) {
                    continue;
                }
                match self.index_existing(&path, dir_handle) {
                    Ok(handle) => {
                        if self.items.get(&handle).map(|i| i.is_association()).unwrap_or(false) {
                            self.pending_dirs.push_back(handle);
                        }
                    }
                    Err(err) => {
                        warn!("skipping {}: {}", path.display(), err);
                    }
                }
            }
        }
        if self.pending_dirs.is_empty() {
            self.finish_enumeration()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn is_enumerated(&self) -> bool {
        self.enumerated
    }

    fn set_event_emission(&mut self, enabled: bool) {
        self.events_enabled = enabled;
    }

    fn add_item(
        &mut self,
        parent: ObjHandle,
        mut info: ObjectInfo,
    ) -> Result<(ObjHandle, ObjHandle), Error> {
        self.validate_filename(parent, &info.filename)?;
        let parent_item = self.parent_item(parent)?;
        let parent_handle = parent_item.handle;
        let path = parent_item.path.join(&info.filename);

        let is_dir = info.object_format.is_association();
        if is_dir {
            fs::create_dir(&path).map_err(|e| Error::Response(io_response(&e)))?;
        } else {
            File::create(&path).map_err(|e| Error::Response(io_response(&e)))?;
        }

        let handle = self.ids.next_handle();
        let puoid = self.ids.next_puoid();
        self.persisted_puoids.insert(path.clone(), puoid);
        info.storage_id = self.storage_id;
        info.parent_object = parent_handle;
        let now = mtp_date(std::time::SystemTime::now());
        if info.modification_date.is_empty() {
            info.modification_date = now.clone();
        }
        if info.capture_date.is_empty() {
            info.capture_date = now;
        }
        self.link_item(handle, parent_handle, path, puoid, info);
        if is_dir {
            self.watch_directory(handle);
        }
        trace!("added handle {} under {}", handle, parent_handle);
        Ok((parent_handle, handle))
    }

    fn adopt_item(
        &mut self,
        handle: ObjHandle,
        parent: ObjHandle,
        mut info: ObjectInfo,
    ) -> Result<(), Error> {
        self.validate_filename(parent, &info.filename)?;
        let parent_item = self.parent_item(parent)?;
        let parent_handle = parent_item.handle;
        let path = parent_item.path.join(&info.filename);
        let is_dir = info.object_format.is_association();
        if is_dir {
            fs::create_dir(&path).map_err(|e| Error::Response(io_response(&e)))?;
        } else {
            File::create(&path).map_err(|e| Error::Response(io_response(&e)))?;
        }
        let puoid = self.ids.next_puoid();
        self.persisted_puoids.insert(path.clone(), puoid);
        info.storage_id = self.storage_id;
        info.parent_object = parent_handle;
        self.link_item(handle, parent_handle, path, puoid, info);
        if is_dir {
            self.watch_directory(handle);
        }
        Ok(())
    }

    fn delete_item(&mut self, handle: ObjHandle, format: Option<u16>) -> Result<(), Error> {
        let result = if handle == OBJ_HANDLE_ALL {
            let roots = self
                .items
                .get(&ROOT_HANDLE)
                .map(|root| root.children.clone())
                .unwrap_or_default();
            let mut any_err = false;
            for child in roots {
                let outcome = match format {
                    Some(format) => self.delete_filtered(child, format).map(|_| ()),
                    None => self.delete_recursive(child, true, false),
                };
                if outcome.is_err() {
                    any_err = true;
                }
            }
            if any_err {
                Err(StandardResponseCode::PartialDeletion.into())
            } else {
                Ok(())
            }
        } else {
            self.delete_recursive(handle, true, false)
        };
        if result.is_ok() {
            self.emit_storage_info_changed();
        }
        result
    }

    fn object_handles(
        &self,
        format: Option<u16>,
        parent: Option<ObjHandle>,
    ) -> Result<Vec<ObjHandle>, Error> {
        let matches_format = |info: &ObjectInfo| match format {
            None => true,
            Some(f) => info.object_format.to_u64().unwrap_or(0) as u16 == f,
        };
        match parent {
            None => Ok(self
                .items
                .values()
                .filter(|item| item.handle != ROOT_HANDLE && matches_format(&item.info))
                .map(|item| item.handle)
                .collect()),
            Some(parent) => {
                let parent_item = self.parent_item(parent)?;
                Ok(parent_item
                    .children
                    .iter()
                    .copied()
                    .filter(|h| {
                        self.items
                            .get(h)
                            .map(|item| matches_format(&item.info))
                            .unwrap_or(false)
                    })
                    .collect())
            }
        }
    }

    fn has_handle(&self, handle: ObjHandle) -> bool {
        handle != ROOT_HANDLE && self.items.contains_key(&handle)
    }

    fn storage_info(&mut self) -> Result<StorageInfo, Error> {
        let (capacity, free) = match statvfs(&self.root_path) {
            Ok(stat) => {
                let frsize = stat.fragment_size() as u64;
                (
                    stat.blocks() as u64 * frsize,
                    stat.blocks_available() as u64 * frsize,
                )
            }
            Err(err) => {
                warn!("statvfs {}: {}", self.root_path.display(), err);
                (0, 0)
            }
        };
        let readonly = fs::metadata(&self.root_path)
            .map(|m| m.permissions().readonly())
            .unwrap_or(false);
        Ok(StorageInfo {
            storage_type: self.storage_type,
            filesystem_type: FilesystemType::GenericHierarchical,
            access_capability: if readonly {
                AccessCapability::ReadOnlyWithoutDeletion
            } else {
                AccessCapability::ReadWrite
            },
            max_capacity: capacity,
            free_space_in_bytes: free,
            free_space_in_objects: 0xFFFF_FFFF,
            storage_description: self.description.clone(),
            volume_label: self.name.clone(),
        })
    }

    fn references(&self, handle: ObjHandle) -> Result<Vec<ObjHandle>, Error> {
        self.item(handle)?;
        Ok(self.references.get(&handle).cloned().unwrap_or_default())
    }

    fn set_references(&mut self, handle: ObjHandle, refs: Vec<ObjHandle>) -> Result<(), Error> {
        let (is_playlist, path) = {
            let item = self.item(handle)?;
            (item.info.object_format.is_playlist(), item.path.clone())
        };
        for r in &refs {
            if !self.has_handle(*r) {
                return Err(StandardResponseCode::InvalidObjectReference.into());
            }
        }
        if is_playlist {
            let entries: Vec<PathBuf> = refs
                .iter()
                .filter_map(|r| self.items.get(r).map(|item| item.path.clone()))
                .collect();
            if let Err(err) = playlist::write_playlist(&path, &entries) {
                warn!("cannot rewrite playlist {}: {}", path.display(), err);
            }
        }
        self.references.insert(handle, refs);
        Ok(())
    }

    fn copy_object(&mut self, handle: ObjHandle, parent: ObjHandle) -> Result<ObjHandle, Error> {
        let filename = self.item(handle)?.info.filename.clone();
        self.validate_filename(parent, &filename)?;
        // Copying an association into its own subtree would recurse
        // forever.
        let mut cursor = self.parent_item(parent)?.handle;
        loop {
            if cursor == handle {
                return Err(StandardResponseCode::InvalidParentObject.into());
            }
            if cursor == ROOT_HANDLE {
                break;
            }
            cursor = match self.items.get(&cursor) {
                Some(item) => item.parent,
                None => break,
            };
        }
        let dest_path = self.parent_item(parent)?.path.join(&filename);
        match self.copy_recursive(handle, parent) {
            Ok(new_handle) => {
                self.emit_storage_info_changed();
                Ok(new_handle)
            }
            Err(err) => {
                // drop whatever part of the tree was already copied
                if let Some(&partial) = self.path_index.get(&dest_path) {
                    self.delete_recursive(partial, true, false).ok();
                } else {
                    fs::remove_file(&dest_path).ok();
                }
                Err(err)
            }
        }
    }

    fn move_object(&mut self, handle: ObjHandle, parent: ObjHandle) -> Result<(), Error> {
        let (filename, old_path, old_parent) = {
            let item = self.item(handle)?;
            (item.info.filename.clone(), item.path.clone(), item.parent)
        };
        if self.parent_item(parent)?.handle == old_parent {
            return Ok(());
        }
        self.validate_filename(parent, &filename)?;
        let dest = {
            let parent_item = self.parent_item(parent)?;
            let mut cursor = parent_item.handle;
            loop {
                if cursor == handle {
                    return Err(StandardResponseCode::InvalidParentObject.into());
                }
                if cursor == ROOT_HANDLE {
                    break;
                }
                cursor = match self.items.get(&cursor) {
                    Some(item) => item.parent,
                    None => break,
                };
            }
            parent_item.path.join(&filename)
        };
        fs::rename(&old_path, &dest).map_err(|e| Error::Response(io_response(&e)))?;
        let new_parent = self.parent_item(parent)?.handle;
        if let Some(old_parent_item) = self.items.get_mut(&old_parent) {
            old_parent_item.children.retain(|c| *c != handle);
        }
        if let Some(new_parent_item) = self.items.get_mut(&new_parent) {
            new_parent_item.children.push(handle);
        }
        if let Some(item) = self.items.get_mut(&handle) {
            item.parent = new_parent;
            item.info.parent_object = new_parent;
        }
        self.adjust_moved_paths(handle, dest);
        Ok(())
    }

    fn path_of(&self, handle: ObjHandle) -> Result<PathBuf, Error> {
        Ok(self.item(handle)?.path.clone())
    }

    fn object_info(&mut self, handle: ObjHandle) -> Result<ObjectInfo, Error> {
        Ok(self.item(handle)?.info.clone())
    }

    fn write_data(
        &mut self,
        handle: ObjHandle,
        data: &[u8],
        first_segment: bool,
        last_segment: bool,
    ) -> Result<(), Error> {
        if first_segment {
            let path = self.item(handle)?.path.clone();
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)
                .map_err(|e| Error::Response(io_response(&e)))?;
            self.write_state = Some(WriteState {
                handle,
                file,
                bytes_written: 0,
            });
        }
        {
            let state = self
                .write_state
                .as_mut()
                .filter(|s| s.handle == handle)
                .ok_or(StandardResponseCode::NoValidObjectInfo)?;
            state.file.write_all(data).map_err(Error::Io)?;
            state.bytes_written += data.len() as u64;
        }
        if last_segment {
            if let Some(state) = self.write_state.take() {
                drop(state.file);
                if let Some(item) = self.items.get_mut(&handle) {
                    item.info.object_compressed_size = state.bytes_written;
                    item.info.modification_date = mtp_date(std::time::SystemTime::now());
                }
            }
            self.emit_storage_info_changed();
        }
        Ok(())
    }

    fn write_partial_data(
        &mut self,
        handle: ObjHandle,
        offset: u64,
        data: &[u8],
        first_segment: bool,
        last_segment: bool,
    ) -> Result<(), Error> {
        if first_segment {
            let path = self.item(handle)?.path.clone();
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .open(&path)
                .map_err(|e| Error::Response(io_response(&e)))?;
            self.write_state = Some(WriteState {
                handle,
                file,
                bytes_written: 0,
            });
        }
        {
            let state = self
                .write_state
                .as_mut()
                .filter(|s| s.handle == handle)
                .ok_or(StandardResponseCode::NoValidObjectInfo)?;
            state.file.seek(SeekFrom::Start(offset)).map_err(Error::Io)?;
            state.file.write_all(data).map_err(Error::Io)?;
        }
        if last_segment {
            self.write_state = None;
            self.refresh_stat(handle);
            self.emit_storage_info_changed();
        }
        Ok(())
    }

    fn read_data(
        &mut self,
        handle: ObjHandle,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let path = self.item(handle)?.path.clone();
        let mut file = File::open(&path).map_err(|e| Error::Response(io_response(&e)))?;
        file.seek(SeekFrom::Start(offset)).map_err(Error::Io)?;
        let mut total = 0;
        while total < buf.len() {
            let n = file.read(&mut buf[total..]).map_err(Error::Io)?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    fn truncate_item(&mut self, handle: ObjHandle, size: u64) -> Result<(), Error> {
        let path = self.item(handle)?.path.clone();
        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|e| Error::Response(io_response(&e)))?;
        file.set_len(size).map_err(Error::Io)?;
        if let Some(item) = self.items.get_mut(&handle) {
            item.info.object_compressed_size = size;
            item.info.modification_date = mtp_date(std::time::SystemTime::now());
        }
        Ok(())
    }

    fn object_property_values(
        &mut self,
        handle: ObjHandle,
        props: &mut [ObjPropDescVal],
    ) -> Result<(), Error> {
        for prop in props.iter_mut() {
            let desc = prop.desc.clone();
            prop.value = self.property_value(handle, &desc)?;
        }
        Ok(())
    }

    fn set_object_property_value(
        &mut self,
        handle: ObjHandle,
        desc: &ObjPropDesc,
        value: &MtpData,
    ) -> Result<(), Error> {
        match desc.prop_code {
            ObjectPropCode::ObjectFileName => {
                let new_name = match value {
                    MtpData::Str(name) => name.clone(),
                    _ => return Err(StandardResponseCode::InvalidObjectPropFormat.into()),
                };
                let (old_path, parent) = {
                    let item = self.item(handle)?;
                    (item.path.clone(), item.parent)
                };
                self.validate_filename(parent, &new_name)?;
                let new_path = old_path
                    .parent()
                    .unwrap_or_else(|| Path::new("/"))
                    .join(&new_name);
                fs::rename(&old_path, &new_path)
                    .map_err(|e| Error::Response(io_response(&e)))?;
                self.adjust_moved_paths(handle, new_path);
                Ok(())
            }
            _ if desc.get_set == crate::properties::PROP_GET => {
                Err(StandardResponseCode::AccessDenied.into())
            }
            _ => Err(StandardResponseCode::ObjectPropNotSupported.into()),
        }
    }

    fn child_property_values(
        &mut self,
        parent: ObjHandle,
        props: &[ObjPropDesc],
    ) -> Result<HashMap<ObjHandle, Vec<Option<MtpData>>>, Error> {
        let children = self.parent_item(parent)?.children.clone();
        let mut result = HashMap::with_capacity(children.len());
        for child in children {
            let mut values = Vec::with_capacity(props.len());
            for desc in props {
                values.push(self.property_value(child, desc)?);
            }
            result.insert(child, values);
        }
        Ok(result)
    }

    fn largest_puoid(&self) -> u128 {
        self.persisted_puoids.values().copied().max().unwrap_or(0)
    }

    fn thumbnail(&mut self, handle: ObjHandle) -> Result<Vec<u8>, Error> {
        let (path, category) = {
            let item = self.item(handle)?;
            (item.path.clone(), item.info.object_format.category())
        };
        if category != FormatCategory::Image {
            return Err(StandardResponseCode::NoThumbnailPresent.into());
        }
        self.thumbnailer
            .thumbnail(&path)
            .ok_or_else(|| StandardResponseCode::NoThumbnailPresent.into())
    }

    fn handle_watch_event(&mut self, event: WatchEvent) {
        if event.mask.contains(AddWatchFlags::IN_IGNORED) {
            self.wd_index.remove(&event.wd);
            return;
        }
        let dir_handle = match self.wd_index.get(&event.wd) {
            Some(handle) => *handle,
            None => return,
        };
        let name = match &event.name {
            Some(name) => name.clone(),
            None => return,
        };
        let path = match self.items.get(&dir_handle) {
            Some(dir) => dir.path.join(&name),
            None => return,
        };
        if self.is_excluded(&path) {
            return;
        }

        if event.mask.contains(AddWatchFlags::IN_MOVED_FROM) {
            if let Some(&handle) = self.path_index.get(&path) {
                self.pending_moves.insert(event.cookie, handle, path);
            }
        } else if event.mask.contains(AddWatchFlags::IN_MOVED_TO) {
            match self.pending_moves.pair(event.cookie) {
                Some(pending) => self.apply_fs_move(pending.handle, dir_handle, path),
                None => self.apply_fs_create(path, dir_handle),
            }
        } else if event.mask.contains(AddWatchFlags::IN_CREATE) {
            self.apply_fs_create(path, dir_handle);
        } else if event.mask.contains(AddWatchFlags::IN_DELETE) {
            self.apply_fs_delete(&path);
        } else if event.mask.contains(AddWatchFlags::IN_MODIFY) {
            self.apply_fs_modify(&path);
        }
    }

    fn expire_stale_moves(&mut self) {
        for pending in self.pending_moves.drain_expired() {
            debug!("unpaired move-from, deleting {}", pending.path.display());
            if self.items.contains_key(&pending.handle) {
                self.delete_recursive(pending.handle, false, true).ok();
            }
        }
    }

    fn flush(&mut self) {
        if let Err(err) = self.puoid_db.store(&self.persisted_puoids) {
            warn!("failed to store puoid database: {}", err);
        }
        if let Err(err) = self.reference_db.store(&self.references) {
            warn!("failed to store object reference database: {}", err);
        }
    }
}

impl FsStoragePlugin {
    /// A create (or unpaired move-to) observed on disk. Silently
    /// ignored when the index already knows the path, which is how
    /// echoes of initiator-driven operations are suppressed.
    pub(crate) fn apply_fs_create(&mut self, path: PathBuf, parent: ObjHandle) {
        if self.path_index.contains_key(&path) {
            return;
        }
        let handle = match self.index_existing(&path, parent) {
            Ok(handle) => handle,
            Err(err) => {
                debug!("ignoring fs create {}: {}", path.display(), err);
                return;
            }
        };
        self.emit(StandardEventCode::ObjectAdded, vec![handle]);
        // Entries may have landed inside a new directory before its
        // watch was in place.
        let is_dir = self
            .items
            .get(&handle)
            .map(|i| i.is_association())
            .unwrap_or(false);
        if is_dir {
            let entries: Vec<PathBuf> = fs::read_dir(&path)
                .map(|rd| rd.flatten().map(|e| e.path()).collect())
                .unwrap_or_default();
            for entry in entries {
                self.apply_fs_create(entry, handle);
            }
        }
    }

    /// A deletion observed on disk. Unknown paths are initiator echoes.
    pub(crate) fn apply_fs_delete(&mut self, path: &Path) {
        if let Some(&handle) = self.path_index.get(path) {
            self.delete_recursive(handle, false, true).ok();
        }
    }

    /// A paired rename observed on disk.
    pub(crate) fn apply_fs_move(
        &mut self,
        handle: ObjHandle,
        new_parent: ObjHandle,
        new_path: PathBuf,
    ) {
        if !self.items.contains_key(&handle) {
            return;
        }
        let old_parent = self.items.get(&handle).map(|i| i.parent).unwrap_or(ROOT_HANDLE);
        if old_parent != new_parent {
            if let Some(old) = self.items.get_mut(&old_parent) {
                old.children.retain(|c| *c != handle);
            }
            if let Some(new) = self.items.get_mut(&new_parent) {
                new.children.push(handle);
            }
            if let Some(item) = self.items.get_mut(&handle) {
                item.parent = new_parent;
                item.info.parent_object = new_parent;
            }
        }
        self.adjust_moved_paths(handle, new_path);
        self.emit(StandardEventCode::ObjectInfoChanged, vec![handle]);
    }

    /// A modification observed on disk; writes the responder itself is
    /// performing are suppressed.
    pub(crate) fn apply_fs_modify(&mut self, path: &Path) {
        let handle = match self.path_index.get(path) {
            Some(&handle) => handle,
            None => return,
        };
        if self
            .write_state
            .as_ref()
            .map(|s| s.handle == handle)
            .unwrap_or(false)
        {
            return;
        }
        self.refresh_stat(handle);
        self.emit(StandardEventCode::ObjectInfoChanged, vec![handle]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};
    use tempfile::TempDir;

    fn build_plugin() -> (FsStoragePlugin, Receiver<StorageSignal>, TempDir, TempDir) {
        let root = TempDir::new().unwrap();
        let dbs = TempDir::new().unwrap();
        let (tx, rx) = unbounded();
        let plugin = FsStoragePlugin::new(
            FsStorageParams {
                storage_id: 0x0001_0001,
                root_path: root.path().to_path_buf(),
                name: "fsstorage".into(),
                description: "Phone memory".into(),
                removable: false,
                exclude_paths: vec![],
                db_dir: dbs.path().to_path_buf(),
            },
            Arc::new(IdProvider::new()),
            tx,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();
        (plugin, rx, root, dbs)
    }

    fn enumerate(plugin: &mut FsStoragePlugin) {
        while !plugin.enumerate_step(16).unwrap() {}
    }

    fn text_info(name: &str, size: u64) -> ObjectInfo {
        ObjectInfo {
            object_format: FormatCode::Standard(StandardFormatCode::Text),
            object_compressed_size: size,
            filename: name.into(),
            ..ObjectInfo::default()
        }
    }

    fn dir_info(name: &str) -> ObjectInfo {
        ObjectInfo {
            object_format: FormatCode::Standard(StandardFormatCode::Association),
            filename: name.into(),
            ..ObjectInfo::default()
        }
    }

    fn indices_consistent(plugin: &FsStoragePlugin) {
        for (handle, item) in &plugin.items {
            assert_eq!(*handle, item.handle);
            assert_eq!(plugin.path_index.get(&item.path), Some(handle));
            if *handle != ROOT_HANDLE {
                assert_eq!(plugin.puoid_index.get(&item.puoid), Some(handle));
                let parent = plugin.items.get(&item.parent).expect("parent exists");
                assert!(parent.is_association());
                assert!(item.path.starts_with(&parent.path));
                assert!(parent.children.contains(handle));
            }
        }
    }

    #[test]
    fn enumeration_builds_consistent_indices() {
        let (mut plugin, _rx, root, _dbs) = build_plugin();
        fs::create_dir(root.path().join("Music")).unwrap();
        fs::write(root.path().join("Music/song.mp3"), b"abc").unwrap();
        fs::write(root.path().join("note.txt"), b"hello").unwrap();
        enumerate(&mut plugin);
        assert!(plugin.is_enumerated());
        assert_eq!(plugin.object_handles(None, None).unwrap().len(), 3);
        indices_consistent(&plugin);

        let root_level = plugin
            .object_handles(None, Some(OBJ_HANDLE_ROOT_LEVEL))
            .unwrap();
        assert_eq!(root_level.len(), 2);
    }

    #[test]
    fn excluded_paths_are_not_indexed() {
        let (_, _, root, dbs) = build_plugin();
        fs::create_dir(root.path().join("private")).unwrap();
        fs::write(root.path().join("private/secret.txt"), b"x").unwrap();
        fs::write(root.path().join("public.txt"), b"x").unwrap();
        let (tx, _rx) = unbounded();
        let mut plugin = FsStoragePlugin::new(
            FsStorageParams {
                storage_id: 0x0001_0001,
                root_path: root.path().to_path_buf(),
                name: "fsstorage".into(),
                description: "Phone memory".into(),
                removable: false,
                exclude_paths: vec![root.path().join("private")],
                db_dir: dbs.path().to_path_buf(),
            },
            Arc::new(IdProvider::new()),
            tx,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();
        enumerate(&mut plugin);
        assert_eq!(plugin.object_handles(None, None).unwrap().len(), 1);
    }

    #[test]
    fn add_item_creates_file_and_indices() {
        let (mut plugin, _rx, root, _dbs) = build_plugin();
        enumerate(&mut plugin);
        let (parent, handle) = plugin.add_item(0, text_info("tmpfile", 5)).unwrap();
        assert_eq!(parent, ROOT_HANDLE);
        assert!(plugin.has_handle(handle));
        assert!(root.path().join("tmpfile").is_file());
        indices_consistent(&plugin);
    }

    #[test]
    fn add_item_rejects_case_insensitive_collision() {
        let (mut plugin, _rx, _root, _dbs) = build_plugin();
        enumerate(&mut plugin);
        plugin.add_item(0, text_info("File.TXT", 0)).unwrap();
        match plugin.add_item(0, text_info("file.txt", 0)) {
            Err(Error::Response(StandardResponseCode::AccessDenied)) => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn add_item_rejects_bad_names() {
        let (mut plugin, _rx, _root, _dbs) = build_plugin();
        enumerate(&mut plugin);
        for name in ["", "a/b", ".", ".."] {
            match plugin.add_item(0, text_info(name, 0)) {
                Err(Error::Response(StandardResponseCode::InvalidParameter)) => {}
                other => panic!("{:?} accepted: {:?}", name, other.map(|_| ())),
            }
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let (mut plugin, _rx, _root, _dbs) = build_plugin();
        enumerate(&mut plugin);
        let (_, handle) = plugin.add_item(0, text_info("tmpfile", 5)).unwrap();
        plugin.write_data(handle, b"xx", true, false).unwrap();
        plugin.write_data(handle, b"xxx", false, true).unwrap();
        let info = plugin.object_info(handle).unwrap();
        assert_eq!(info.object_compressed_size, 5);
        let mut buf = [0u8; 16];
        let n = plugin.read_data(handle, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"xxxxx");
    }

    #[test]
    fn partial_write_at_offset() {
        let (mut plugin, _rx, _root, _dbs) = build_plugin();
        enumerate(&mut plugin);
        let (_, handle) = plugin.add_item(0, text_info("tmpfile", 0)).unwrap();
        plugin.write_data(handle, b"aaaaaa", true, true).unwrap();
        plugin.write_partial_data(handle, 2, b"bb", true, true).unwrap();
        let mut buf = [0u8; 8];
        let n = plugin.read_data(handle, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"aabbaa");
    }

    #[test]
    fn delete_directory_recursively() {
        let (mut plugin, _rx, root, _dbs) = build_plugin();
        fs::create_dir(root.path().join("d")).unwrap();
        fs::write(root.path().join("d/a.txt"), b"1").unwrap();
        fs::write(root.path().join("d/b.txt"), b"2").unwrap();
        enumerate(&mut plugin);
        let dir_handle = *plugin.path_index.get(&root.path().join("d")).unwrap();
        plugin.delete_item(dir_handle, None).unwrap();
        assert!(!root.path().join("d").exists());
        assert!(!plugin.has_handle(dir_handle));
        assert_eq!(plugin.object_handles(None, None).unwrap().len(), 0);
        indices_consistent(&plugin);
    }

    #[test]
    fn deleted_handles_stay_invalid() {
        let (mut plugin, _rx, _root, _dbs) = build_plugin();
        enumerate(&mut plugin);
        let (_, handle) = plugin.add_item(0, text_info("x.txt", 0)).unwrap();
        plugin.delete_item(handle, None).unwrap();
        match plugin.object_info(handle) {
            Err(Error::Response(StandardResponseCode::InvalidObjectHandle)) => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn delete_all_with_format_filter() {
        let (mut plugin, _rx, root, _dbs) = build_plugin();
        fs::write(root.path().join("a.txt"), b"1").unwrap();
        fs::write(root.path().join("b.mp3"), b"2").unwrap();
        enumerate(&mut plugin);
        plugin
            .delete_item(OBJ_HANDLE_ALL, Some(StandardFormatCode::Text as u16))
            .unwrap();
        assert!(!root.path().join("a.txt").exists());
        assert!(root.path().join("b.mp3").exists());
        assert_eq!(plugin.object_handles(None, None).unwrap().len(), 1);
    }

    #[test]
    fn move_within_storage_updates_subtree_paths() {
        let (mut plugin, _rx, root, _dbs) = build_plugin();
        fs::create_dir(root.path().join("src")).unwrap();
        fs::create_dir(root.path().join("dst")).unwrap();
        fs::create_dir(root.path().join("src/inner")).unwrap();
        fs::write(root.path().join("src/inner/f.txt"), b"x").unwrap();
        enumerate(&mut plugin);
        let src = *plugin.path_index.get(&root.path().join("src")).unwrap();
        let dst = *plugin.path_index.get(&root.path().join("dst")).unwrap();
        plugin.move_object(src, dst).unwrap();
        assert!(root.path().join("dst/src/inner/f.txt").is_file());
        assert!(plugin
            .path_index
            .contains_key(&root.path().join("dst/src/inner/f.txt")));
        indices_consistent(&plugin);
    }

    #[test]
    fn move_into_own_subtree_is_rejected() {
        let (mut plugin, _rx, root, _dbs) = build_plugin();
        fs::create_dir_all(root.path().join("a/b")).unwrap();
        enumerate(&mut plugin);
        let a = *plugin.path_index.get(&root.path().join("a")).unwrap();
        let b = *plugin.path_index.get(&root.path().join("a/b")).unwrap();
        match plugin.move_object(a, b) {
            Err(Error::Response(StandardResponseCode::InvalidParentObject)) => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        assert!(root.path().join("a/b").is_dir());
    }

    #[test]
    fn move_to_non_directory_parent_is_rejected() {
        let (mut plugin, _rx, root, _dbs) = build_plugin();
        fs::write(root.path().join("f.txt"), b"x").unwrap();
        fs::write(root.path().join("g.txt"), b"y").unwrap();
        enumerate(&mut plugin);
        let f = *plugin.path_index.get(&root.path().join("f.txt")).unwrap();
        let g = *plugin.path_index.get(&root.path().join("g.txt")).unwrap();
        match plugin.move_object(f, g) {
            Err(Error::Response(StandardResponseCode::InvalidParentObject)) => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        assert!(plugin.has_handle(f));
    }

    #[test]
    fn copy_directory_within_storage() {
        let (mut plugin, _rx, root, _dbs) = build_plugin();
        fs::create_dir(root.path().join("d")).unwrap();
        fs::write(root.path().join("d/f.txt"), b"content").unwrap();
        fs::create_dir(root.path().join("target")).unwrap();
        enumerate(&mut plugin);
        let d = *plugin.path_index.get(&root.path().join("d")).unwrap();
        let target = *plugin.path_index.get(&root.path().join("target")).unwrap();
        let copy = plugin.copy_object(d, target).unwrap();
        assert!(plugin.has_handle(copy));
        assert_eq!(
            fs::read(root.path().join("target/d/f.txt")).unwrap(),
            b"content"
        );
        assert!(plugin.has_handle(d));
        indices_consistent(&plugin);
    }

    #[test]
    fn rename_via_property_updates_disk_and_index() {
        let (mut plugin, _rx, root, _dbs) = build_plugin();
        fs::write(root.path().join("old.txt"), b"x").unwrap();
        enumerate(&mut plugin);
        let handle = *plugin.path_index.get(&root.path().join("old.txt")).unwrap();
        let desc = crate::properties::object_prop_desc(0xDC07).unwrap();
        plugin
            .set_object_property_value(handle, &desc, &MtpData::Str("newname".into()))
            .unwrap();
        assert!(root.path().join("newname").is_file());
        assert!(!root.path().join("old.txt").exists());
        assert_eq!(
            plugin.object_info(handle).unwrap().filename,
            "newname".to_owned()
        );
    }

    #[test]
    fn read_only_properties_refuse_set() {
        let (mut plugin, _rx, root, _dbs) = build_plugin();
        fs::write(root.path().join("f.txt"), b"x").unwrap();
        enumerate(&mut plugin);
        let handle = *plugin.path_index.get(&root.path().join("f.txt")).unwrap();
        let desc = crate::properties::object_prop_desc(0xDC04).unwrap();
        match plugin.set_object_property_value(handle, &desc, &MtpData::Uint64(9)) {
            Err(Error::Response(StandardResponseCode::AccessDenied)) => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn property_values_come_from_info_and_stat() {
        let (mut plugin, _rx, root, _dbs) = build_plugin();
        fs::write(root.path().join("f.txt"), b"hello").unwrap();
        enumerate(&mut plugin);
        let handle = *plugin.path_index.get(&root.path().join("f.txt")).unwrap();
        let mut props = vec![
            ObjPropDescVal::new(crate::properties::object_prop_desc(0xDC04).unwrap()),
            ObjPropDescVal::new(crate::properties::object_prop_desc(0xDC07).unwrap()),
            ObjPropDescVal::new(crate::properties::object_prop_desc(0xDC0B).unwrap()),
        ];
        plugin.object_property_values(handle, &mut props).unwrap();
        assert_eq!(props[0].value, Some(MtpData::Uint64(5)));
        assert_eq!(props[1].value, Some(MtpData::Str("f.txt".into())));
        assert_eq!(props[2].value, Some(MtpData::Uint32(PARENT_ROOT)));
    }

    #[test]
    fn references_validate_and_replace() {
        let (mut plugin, _rx, root, _dbs) = build_plugin();
        fs::write(root.path().join("a.mp3"), b"x").unwrap();
        fs::write(root.path().join("list.m3u"), b"").unwrap();
        enumerate(&mut plugin);
        let a = *plugin.path_index.get(&root.path().join("a.mp3")).unwrap();
        let list = *plugin.path_index.get(&root.path().join("list.m3u")).unwrap();

        match plugin.set_references(list, vec![0xFFFF_FFFF]) {
            Err(Error::Response(StandardResponseCode::InvalidObjectReference)) => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        assert!(plugin.references(list).unwrap().is_empty());

        plugin.set_references(list, vec![a]).unwrap();
        assert_eq!(plugin.references(list).unwrap(), vec![a]);
        // the playlist mirror follows the reference list
        let entries = playlist::parse_playlist(&root.path().join("list.m3u"));
        assert_eq!(entries, vec![root.path().join("a.mp3")]);
    }

    #[test]
    fn playlist_files_gain_references_on_enumeration() {
        let (mut plugin, _rx, root, _dbs) = build_plugin();
        fs::write(root.path().join("song.mp3"), b"x").unwrap();
        fs::write(root.path().join("mix.m3u"), b"song.mp3\n").unwrap();
        enumerate(&mut plugin);
        let list = *plugin.path_index.get(&root.path().join("mix.m3u")).unwrap();
        let song = *plugin.path_index.get(&root.path().join("song.mp3")).unwrap();
        assert_eq!(plugin.references(list).unwrap(), vec![song]);
    }

    #[test]
    fn puoids_persist_across_instances() {
        let root = TempDir::new().unwrap();
        let dbs = TempDir::new().unwrap();
        fs::write(root.path().join("stable.txt"), b"x").unwrap();
        let params = FsStorageParams {
            storage_id: 0x0001_0001,
            root_path: root.path().to_path_buf(),
            name: "fsstorage".into(),
            description: "Phone memory".into(),
            removable: false,
            exclude_paths: vec![],
            db_dir: dbs.path().to_path_buf(),
        };
        let first_puoid = {
            let (tx, _rx) = unbounded();
            let mut plugin = FsStoragePlugin::new(
                params.clone(),
                Arc::new(IdProvider::new()),
                tx,
                Arc::new(AtomicBool::new(false)),
            )
            .unwrap();
            enumerate(&mut plugin);
            let handle = *plugin
                .path_index
                .get(&root.path().join("stable.txt"))
                .unwrap();
            plugin.items.get(&handle).unwrap().puoid
        };
        let (tx, _rx) = unbounded();
        let ids = Arc::new(IdProvider::new());
        let mut plugin =
            FsStoragePlugin::new(params, Arc::clone(&ids), tx, Arc::new(AtomicBool::new(false)))
                .unwrap();
        enumerate(&mut plugin);
        let handle = *plugin
            .path_index
            .get(&root.path().join("stable.txt"))
            .unwrap();
        assert_eq!(plugin.items.get(&handle).unwrap().puoid, first_puoid);
        // fresh allocations stay above the persisted maximum
        assert!(ids.next_puoid() > first_puoid);
    }

    #[test]
    fn fs_create_apply_adds_item_and_event() {
        let (mut plugin, rx, root, _dbs) = build_plugin();
        enumerate(&mut plugin);
        plugin.set_event_emission(true);
        while rx.try_recv().is_ok() {}

        fs::write(root.path().join("dropped.txt"), b"x").unwrap();
        plugin.apply_fs_create(root.path().join("dropped.txt"), ROOT_HANDLE);
        let handle = *plugin
            .path_index
            .get(&root.path().join("dropped.txt"))
            .unwrap();
        match rx.try_recv() {
            Ok(StorageSignal::Event(ev)) => {
                assert_eq!(ev.code, StandardEventCode::ObjectAdded);
                assert_eq!(ev.params, vec![handle]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn fs_create_of_known_path_is_suppressed() {
        let (mut plugin, rx, root, _dbs) = build_plugin();
        enumerate(&mut plugin);
        plugin.set_event_emission(true);
        let (_, handle) = plugin.add_item(0, text_info("mine.txt", 0)).unwrap();
        while rx.try_recv().is_ok() {}
        plugin.apply_fs_create(root.path().join("mine.txt"), ROOT_HANDLE);
        assert!(rx.try_recv().is_err());
        assert!(plugin.has_handle(handle));
    }

    #[test]
    fn fs_delete_apply_removes_and_reports() {
        let (mut plugin, rx, root, _dbs) = build_plugin();
        fs::write(root.path().join("gone.txt"), b"x").unwrap();
        enumerate(&mut plugin);
        plugin.set_event_emission(true);
        while rx.try_recv().is_ok() {}
        let handle = *plugin.path_index.get(&root.path().join("gone.txt")).unwrap();
        fs::remove_file(root.path().join("gone.txt")).unwrap();
        plugin.apply_fs_delete(&root.path().join("gone.txt"));
        assert!(!plugin.has_handle(handle));
        match rx.try_recv() {
            Ok(StorageSignal::Event(ev)) => {
                assert_eq!(ev.code, StandardEventCode::ObjectRemoved);
                assert_eq!(ev.params, vec![handle]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn fs_move_apply_keeps_handle() {
        let (mut plugin, rx, root, _dbs) = build_plugin();
        fs::write(root.path().join("a.txt"), b"x").unwrap();
        fs::create_dir(root.path().join("sub")).unwrap();
        enumerate(&mut plugin);
        plugin.set_event_emission(true);
        while rx.try_recv().is_ok() {}
        let handle = *plugin.path_index.get(&root.path().join("a.txt")).unwrap();
        let sub = *plugin.path_index.get(&root.path().join("sub")).unwrap();
        fs::rename(root.path().join("a.txt"), root.path().join("sub/a.txt")).unwrap();
        plugin.apply_fs_move(handle, sub, root.path().join("sub/a.txt"));
        assert_eq!(
            plugin.path_of(handle).unwrap(),
            root.path().join("sub/a.txt")
        );
        match rx.try_recv() {
            Ok(StorageSignal::Event(ev)) => {
                assert_eq!(ev.code, StandardEventCode::ObjectInfoChanged);
            }
            other => panic!("unexpected {:?}", other),
        }
        indices_consistent(&plugin);
    }

    #[test]
    fn storage_info_reports_capacity() {
        let (mut plugin, _rx, _root, _dbs) = build_plugin();
        enumerate(&mut plugin);
        let info = plugin.storage_info().unwrap();
        assert!(info.max_capacity > 0);
        assert!(info.free_space_in_bytes <= info.max_capacity);
        assert_eq!(info.storage_description, "Phone memory");
    }

    #[test]
    fn thumbnails_only_for_images() {
        let (mut plugin, _rx, root, _dbs) = build_plugin();
        fs::write(root.path().join("f.txt"), b"x").unwrap();
        enumerate(&mut plugin);
        let handle = *plugin.path_index.get(&root.path().join("f.txt")).unwrap();
        match plugin.thumbnail(handle) {
            Err(Error::Response(StandardResponseCode::NoThumbnailPresent)) => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }
}
