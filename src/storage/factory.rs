use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crossbeam_channel::Sender;
use log::warn;
use num_traits::FromPrimitive;

use crate::config::StorageSpec;
use crate::data::MtpData;
use crate::datasets::{ObjectInfo, StorageInfo};
use crate::event::StandardEventCode;
use crate::propcache::ObjectPropertyCache;
use crate::properties::{ObjPropDesc, ObjPropDescVal, ObjectPropCode};
use crate::response::StandardResponseCode;
use crate::storage::fs::{FsStorageParams, FsStoragePlugin};
use crate::storage::watcher::WatchEvent;
use crate::storage::{copy_data, IdProvider, StorageEvent, StoragePlugin, StorageSignal};
use crate::{Error, ObjHandle, StorageId, OBJ_HANDLE_ALL, OBJ_HANDLE_ROOT_LEVEL, STORAGE_ID_ALL};

/// Composes a storage id from a storage number and partition number.
pub fn assign_storage_id(storage_no: u16, partition_no: u16) -> StorageId {
    ((storage_no as u32) << 16) | partition_no as u32
}

fn pair_mut<'a>(
    plugins: &'a mut [Box<dyn StoragePlugin>],
    src: usize,
    dst: usize,
) -> (&'a mut Box<dyn StoragePlugin>, &'a mut Box<dyn StoragePlugin>) {
    if src < dst {
        let (a, b) = plugins.split_at_mut(dst);
        (&mut a[src], &mut b[0])
    } else {
        let (a, b) = plugins.split_at_mut(src);
        (&mut b[0], &mut a[dst])
    }
}

/// Owns every storage plugin, routes handle-addressed operations to
/// the owning plugin, allocates handles and PUOIDs, and keeps the
/// process-wide object property cache coherent with change events.
pub struct StorageFactory {
    plugins: Vec<Box<dyn StoragePlugin>>,
    ids: Arc<IdProvider>,
    cancel: Arc<AtomicBool>,
    prop_cache: ObjectPropertyCache,
    mass_queried: HashSet<ObjHandle>,
}

impl StorageFactory {
    pub fn new(ids: Arc<IdProvider>, cancel: Arc<AtomicBool>) -> StorageFactory {
        StorageFactory {
            plugins: Vec::new(),
            ids,
            cancel,
            prop_cache: ObjectPropertyCache::new(),
            mass_queried: HashSet::new(),
        }
    }

    /// Builds one filesystem plugin per resolved storage spec; storage
    /// numbers start at 1.
    pub fn with_fs_storages(
        specs: Vec<StorageSpec>,
        db_dir: PathBuf,
        ids: Arc<IdProvider>,
        events: Sender<StorageSignal>,
        cancel: Arc<AtomicBool>,
    ) -> StorageFactory {
        let mut factory = StorageFactory::new(Arc::clone(&ids), Arc::clone(&cancel));
        for (index, spec) in specs.into_iter().enumerate() {
            let storage_id = assign_storage_id(index as u16 + 1, 1);
            let params = FsStorageParams {
                storage_id,
                root_path: spec.root.clone(),
                name: spec.name,
                description: spec.description,
                removable: spec.removable,
                exclude_paths: spec.exclude_paths,
                db_dir: db_dir.clone(),
            };
            match FsStoragePlugin::new(params, Arc::clone(&ids), events.clone(), Arc::clone(&cancel))
            {
                Ok(plugin) => factory.add_plugin(Box::new(plugin)),
                Err(err) => warn!("storage {} skipped: {}", spec.root.display(), err),
            }
        }
        factory
    }

    pub fn add_plugin(&mut self, plugin: Box<dyn StoragePlugin>) {
        self.plugins.push(plugin);
    }

    pub fn ids(&self) -> &Arc<IdProvider> {
        &self.ids
    }

    pub fn storage_ids(&self) -> Vec<StorageId> {
        self.plugins.iter().map(|p| p.storage_id()).collect()
    }

    pub fn storage_count(&self) -> usize {
        self.plugins.len()
    }

    pub fn check_storage(&self, storage_id: StorageId) -> bool {
        self.plugins.iter().any(|p| p.storage_id() == storage_id)
    }

    pub fn all_ready(&self) -> bool {
        self.plugins.iter().all(|p| p.is_enumerated())
    }

    /// Drives cooperative enumeration; returns true when every plugin
    /// has finished.
    pub fn continue_enumeration(&mut self, budget: usize) -> Result<bool, Error> {
        let mut all_done = true;
        for plugin in &mut self.plugins {
            if !plugin.enumerate_step(budget)? {
                all_done = false;
            }
        }
        Ok(all_done)
    }

    pub fn set_session_open(&mut self, open: bool) {
        for plugin in &mut self.plugins {
            plugin.set_event_emission(open);
            if !open {
                plugin.flush();
            }
        }
        if !open {
            self.prop_cache.clear();
            self.mass_queried.clear();
        }
    }

    fn index_of_storage(&self, storage_id: StorageId) -> Result<usize, Error> {
        self.plugins
            .iter()
            .position(|p| p.storage_id() == storage_id)
            .ok_or_else(|| StandardResponseCode::InvalidStorageId.into())
    }

    fn index_of_handle(&self, handle: ObjHandle) -> Result<usize, Error> {
        self.plugins
            .iter()
            .position(|p| p.has_handle(handle))
            .ok_or_else(|| StandardResponseCode::InvalidObjectHandle.into())
    }

    pub fn has_handle(&self, handle: ObjHandle) -> bool {
        self.plugins.iter().any(|p| p.has_handle(handle))
    }

    pub fn storage_of_handle(&self, handle: ObjHandle) -> Result<StorageId, Error> {
        Ok(self.plugins[self.index_of_handle(handle)?].storage_id())
    }

    pub fn storage_info(&mut self, storage_id: StorageId) -> Result<StorageInfo, Error> {
        let index = self.index_of_storage(storage_id)?;
        self.plugins[index].storage_info()
    }

    /// Creates an object. Storage id 0 leaves the choice to the
    /// responder, which picks the first storage.
    pub fn add_item(
        &mut self,
        storage_id: StorageId,
        parent: ObjHandle,
        info: ObjectInfo,
    ) -> Result<(StorageId, ObjHandle, ObjHandle), Error> {
        let index = if storage_id == 0 {
            if self.plugins.is_empty() {
                return Err(StandardResponseCode::StoreNotAvailable.into());
            }
            0
        } else {
            self.index_of_storage(storage_id)?
        };
        let (parent, handle) = self.plugins[index].add_item(parent, info)?;
        Ok((self.plugins[index].storage_id(), parent, handle))
    }

    /// Deletes an object; 0xFFFFFFFF fans out over every storage.
    pub fn delete_item(&mut self, handle: ObjHandle, format: Option<u16>) -> Result<(), Error> {
        let result = if handle == OBJ_HANDLE_ALL {
            let mut worst = Ok(());
            for plugin in &mut self.plugins {
                if let Err(err) = plugin.delete_item(OBJ_HANDLE_ALL, format) {
                    worst = Err(err);
                }
            }
            worst
        } else {
            let index = self.index_of_handle(handle)?;
            self.plugins[index].delete_item(handle, format)
        };
        self.prop_cache.remove(handle, None);
        self.mass_queried.clear();
        result
    }

    pub fn object_handles(
        &self,
        storage_id: StorageId,
        format: Option<u16>,
        parent: Option<ObjHandle>,
    ) -> Result<Vec<ObjHandle>, Error> {
        // A concrete parent pins the storage regardless of the storage
        // id parameter.
        if let Some(parent) = parent {
            if parent != OBJ_HANDLE_ROOT_LEVEL {
                let index = self.index_of_handle(parent)?;
                return self.plugins[index].object_handles(format, Some(parent));
            }
        }
        if storage_id == STORAGE_ID_ALL {
            let mut handles = Vec::new();
            for plugin in &self.plugins {
                handles.extend(plugin.object_handles(format, parent)?);
            }
            Ok(handles)
        } else {
            let index = self.index_of_storage(storage_id)?;
            self.plugins[index].object_handles(format, parent)
        }
    }

    pub fn object_info(&mut self, handle: ObjHandle) -> Result<ObjectInfo, Error> {
        let index = self.index_of_handle(handle)?;
        self.plugins[index].object_info(handle)
    }

    pub fn path_of(&self, handle: ObjHandle) -> Result<PathBuf, Error> {
        let index = self.index_of_handle(handle)?;
        self.plugins[index].path_of(handle)
    }

    pub fn references(&self, handle: ObjHandle) -> Result<Vec<ObjHandle>, Error> {
        let index = self.index_of_handle(handle)?;
        self.plugins[index].references(handle)
    }

    pub fn set_references(
        &mut self,
        handle: ObjHandle,
        refs: Vec<ObjHandle>,
    ) -> Result<(), Error> {
        let index = self.index_of_handle(handle)?;
        self.plugins[index].set_references(handle, refs)
    }

    pub fn read_data(
        &mut self,
        handle: ObjHandle,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let index = self.index_of_handle(handle)?;
        self.plugins[index].read_data(handle, offset, buf)
    }

    pub fn write_data(
        &mut self,
        handle: ObjHandle,
        data: &[u8],
        first_segment: bool,
        last_segment: bool,
    ) -> Result<(), Error> {
        let index = self.index_of_handle(handle)?;
        self.plugins[index].write_data(handle, data, first_segment, last_segment)
    }

    pub fn write_partial_data(
        &mut self,
        handle: ObjHandle,
        offset: u64,
        data: &[u8],
        first_segment: bool,
        last_segment: bool,
    ) -> Result<(), Error> {
        let index = self.index_of_handle(handle)?;
        self.plugins[index].write_partial_data(handle, offset, data, first_segment, last_segment)
    }

    pub fn truncate_item(&mut self, handle: ObjHandle, size: u64) -> Result<(), Error> {
        let index = self.index_of_handle(handle)?;
        self.plugins[index].truncate_item(handle, size)
    }

    pub fn thumbnail(&mut self, handle: ObjHandle) -> Result<Vec<u8>, Error> {
        let index = self.index_of_handle(handle)?;
        self.plugins[index].thumbnail(handle)
    }

    /// Copies an object, possibly across storages. Returns the new
    /// handle. Partially created objects are rolled back on failure.
    pub fn copy_object(
        &mut self,
        handle: ObjHandle,
        parent: ObjHandle,
        destination_storage: StorageId,
    ) -> Result<ObjHandle, Error> {
        let src = self.index_of_handle(handle)?;
        let dst = if destination_storage == 0 {
            src
        } else {
            self.index_of_storage(destination_storage)?
        };
        let dest_parent = self.resolve_parent(dst, parent)?;
        if src == dst {
            return self.plugins[src].copy_object(handle, dest_parent);
        }
        self.cross_copy(src, dst, handle, dest_parent)
    }

    fn resolve_parent(&self, dst: usize, parent: ObjHandle) -> Result<ObjHandle, Error> {
        if parent == 0 || parent == OBJ_HANDLE_ROOT_LEVEL {
            return Ok(0);
        }
        if !self.plugins[dst].has_handle(parent) {
            return Err(StandardResponseCode::InvalidParentObject.into());
        }
        Ok(parent)
    }

    fn cross_copy(
        &mut self,
        src: usize,
        dst: usize,
        handle: ObjHandle,
        parent: ObjHandle,
    ) -> Result<ObjHandle, Error> {
        let mut info = self.plugins[src].object_info(handle)?;
        let is_association = info.object_format.is_association();
        info.parent_object = parent;
        let (_, new_handle) = self.plugins[dst].add_item(parent, info)?;
        let result = if is_association {
            let children = self.plugins[src].object_handles(None, Some(handle))?;
            let mut outcome = Ok(());
            for child in children {
                if let Err(err) = self.cross_copy(src, dst, child, new_handle) {
                    outcome = Err(err);
                    break;
                }
            }
            outcome
        } else {
            let cancel = Arc::clone(&self.cancel);
            let (s, d) = pair_mut(&mut self.plugins, src, dst);
            copy_data(s.as_mut(), handle, d.as_mut(), new_handle, &cancel)
        };
        match result {
            Ok(()) => Ok(new_handle),
            Err(err) => {
                self.plugins[dst].delete_item(new_handle, None).ok();
                Err(err)
            }
        }
    }

    /// Moves an object, possibly across storages; the handle survives
    /// the move.
    pub fn move_object(
        &mut self,
        handle: ObjHandle,
        parent: ObjHandle,
        destination_storage: StorageId,
    ) -> Result<(), Error> {
        let src = self.index_of_handle(handle)?;
        let dst = self.index_of_storage(destination_storage)?;
        let dest_parent = self.resolve_parent(dst, parent)?;
        if src == dst {
            return self.plugins[src].move_object(handle, dest_parent);
        }
        self.cross_move(src, dst, handle, dest_parent)?;
        // The source side loses the subtree, indices and files both.
        self.plugins[src].delete_item(handle, None)?;
        Ok(())
    }

    fn cross_move(
        &mut self,
        src: usize,
        dst: usize,
        handle: ObjHandle,
        parent: ObjHandle,
    ) -> Result<(), Error> {
        let mut info = self.plugins[src].object_info(handle)?;
        let is_association = info.object_format.is_association();
        info.parent_object = parent;
        self.plugins[dst].adopt_item(handle, parent, info)?;
        let result = if is_association {
            let children = self.plugins[src].object_handles(None, Some(handle))?;
            let mut outcome = Ok(());
            for child in children {
                if let Err(err) = self.cross_move(src, dst, child, handle) {
                    outcome = Err(err);
                    break;
                }
            }
            outcome
        } else {
            let cancel = Arc::clone(&self.cancel);
            let (s, d) = pair_mut(&mut self.plugins, src, dst);
            copy_data(s.as_mut(), handle, d.as_mut(), handle, &cancel)
        };
        if let Err(err) = result {
            self.plugins[dst].delete_item(handle, None).ok();
            return Err(err);
        }
        Ok(())
    }

    /// Fills property values for one object, serving from the cache
    /// where possible. The first query for a child triggers a mass
    /// query across its siblings; once a parent has been mass-queried
    /// further misses fall back to per-object queries.
    pub fn object_property_values(
        &mut self,
        handle: ObjHandle,
        props: &mut [ObjPropDescVal],
    ) -> Result<(), Error> {
        let index = self.index_of_handle(handle)?;
        if self.prop_cache.fill(handle, props) {
            return Ok(());
        }
        let parent = self.plugins[index].object_info(handle)?.parent_object;
        if !self.mass_queried.contains(&parent) {
            self.mass_queried.insert(parent);
            let descs: Vec<ObjPropDesc> = props.iter().map(|p| p.desc.clone()).collect();
            match self.plugins[index].child_property_values(parent, &descs) {
                Ok(values) => {
                    for (child, vals) in values {
                        for (desc, value) in descs.iter().zip(vals) {
                            if let Some(value) = value {
                                self.prop_cache.add(child, desc.prop_code as u16, value);
                            }
                        }
                    }
                }
                Err(err) => warn!("mass property query failed: {}", err),
            }
            if self.prop_cache.fill(handle, props) {
                return Ok(());
            }
        }
        self.plugins[index].object_property_values(handle, props)?;
        self.prop_cache.add_desc_vals(handle, props);
        Ok(())
    }

    /// Seeds a property value into the cache without touching storage;
    /// used for creation attributes delivered by SendObjectPropList.
    pub fn seed_property(&mut self, handle: ObjHandle, prop_code: u16, value: MtpData) {
        self.prop_cache.add(handle, prop_code, value);
    }

    pub fn set_object_property_value(
        &mut self,
        handle: ObjHandle,
        desc: &ObjPropDesc,
        value: &MtpData,
    ) -> Result<(), Error> {
        let index = self.index_of_handle(handle)?;
        self.plugins[index].set_object_property_value(handle, desc, value)?;
        self.prop_cache.add(handle, desc.prop_code as u16, value.clone());
        Ok(())
    }

    pub fn child_property_values(
        &mut self,
        parent: ObjHandle,
        props: &[ObjPropDesc],
    ) -> Result<HashMap<ObjHandle, Vec<Option<MtpData>>>, Error> {
        let index = if parent == 0 || parent == OBJ_HANDLE_ROOT_LEVEL {
            return Err(StandardResponseCode::InvalidParentObject.into());
        } else {
            self.index_of_handle(parent)?
        };
        self.plugins[index].child_property_values(parent, props)
    }

    /// Keeps the property cache coherent with storage change events.
    pub fn note_event(&mut self, event: &StorageEvent) {
        match event.code {
            StandardEventCode::ObjectRemoved => {
                if let Some(&handle) = event.params.first() {
                    self.prop_cache.remove(handle, None);
                }
                self.mass_queried.clear();
            }
            StandardEventCode::ObjectInfoChanged => {
                if let Some(&handle) = event.params.first() {
                    self.prop_cache.remove(handle, None);
                    if let Ok(index) = self.index_of_handle(handle) {
                        if let Ok(info) = self.plugins[index].object_info(handle) {
                            self.mass_queried.remove(&info.parent_object);
                        }
                    }
                }
            }
            StandardEventCode::ObjectPropChanged => {
                if let (Some(&handle), Some(&prop)) =
                    (event.params.first(), event.params.get(1))
                {
                    let prop = ObjectPropCode::from_u32(prop)
                        .map(|p| p as u16)
                        .unwrap_or(prop as u16);
                    self.prop_cache.remove(handle, Some(prop));
                }
            }
            _ => {}
        }
    }

    /// Routes a raw filesystem notification back into its plugin.
    pub fn dispatch_watch_event(&mut self, storage_id: StorageId, event: WatchEvent) {
        if let Ok(index) = self.index_of_storage(storage_id) {
            self.plugins[index].handle_watch_event(event);
        }
    }

    /// Periodic maintenance driven by the responder loop.
    pub fn tick(&mut self) {
        for plugin in &mut self.plugins {
            plugin.expire_stale_moves();
        }
    }

    pub fn flush(&mut self) {
        for plugin in &mut self.plugins {
            plugin.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{FormatCode, StandardFormatCode};
    use crossbeam_channel::{unbounded, Receiver};
    use std::fs;
    use tempfile::TempDir;

    fn two_storage_factory() -> (StorageFactory, Receiver<StorageSignal>, TempDir, TempDir) {
        let root_a = TempDir::new().unwrap();
        let root_b = TempDir::new().unwrap();
        let dbs = TempDir::new().unwrap();
        let (tx, rx) = unbounded();
        let ids = Arc::new(IdProvider::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let specs = vec![
            StorageSpec {
                root: root_a.path().to_path_buf(),
                name: "a".into(),
                description: "Storage A".into(),
                removable: false,
                exclude_paths: vec![],
            },
            StorageSpec {
                root: root_b.path().to_path_buf(),
                name: "b".into(),
                description: "Storage B".into(),
                removable: true,
                exclude_paths: vec![],
            },
        ];
        let mut factory =
            StorageFactory::with_fs_storages(specs, dbs.path().to_path_buf(), ids, tx, cancel);
        while !factory.continue_enumeration(32).unwrap() {}
        (factory, rx, root_a, root_b)
    }

    fn text_info(name: &str) -> ObjectInfo {
        ObjectInfo {
            object_format: FormatCode::Standard(StandardFormatCode::Text),
            filename: name.into(),
            ..ObjectInfo::default()
        }
    }

    #[test]
    fn storage_id_composition() {
        assert_eq!(assign_storage_id(1, 1), 0x0001_0001);
        assert_eq!(assign_storage_id(2, 1), 0x0002_0001);
    }

    #[test]
    fn factory_assigns_sequential_storage_numbers() {
        let (factory, _rx, _a, _b) = two_storage_factory();
        assert_eq!(factory.storage_ids(), vec![0x0001_0001, 0x0002_0001]);
        assert!(factory.check_storage(0x0002_0001));
        assert!(!factory.check_storage(0x0003_0001));
    }

    #[test]
    fn handles_route_to_owning_storage() {
        let (mut factory, _rx, _a, _b) = two_storage_factory();
        let (sid, _, handle) = factory.add_item(0x0002_0001, 0, text_info("f.txt")).unwrap();
        assert_eq!(sid, 0x0002_0001);
        assert_eq!(factory.storage_of_handle(handle).unwrap(), 0x0002_0001);
        assert!(factory.object_info(handle).is_ok());
    }

    #[test]
    fn storage_zero_picks_first_store() {
        let (mut factory, _rx, _a, _b) = two_storage_factory();
        let (sid, _, _) = factory.add_item(0, 0, text_info("f.txt")).unwrap();
        assert_eq!(sid, 0x0001_0001);
    }

    #[test]
    fn cross_storage_copy_streams_content() {
        let (mut factory, _rx, _root_a, root_b) = two_storage_factory();
        let (_, _, handle) = {
            let mut info = text_info("src2.txt");
            info.object_compressed_size = 7;
            let r = factory.add_item(0x0001_0001, 0, info).unwrap();
            factory.write_data(r.2, b"payload", true, true).unwrap();
            r
        };
        let copy = factory.copy_object(handle, 0, 0x0002_0001).unwrap();
        assert_eq!(factory.storage_of_handle(copy).unwrap(), 0x0002_0001);
        assert_eq!(fs::read(root_b.path().join("src2.txt")).unwrap(), b"payload");
        // source is untouched
        assert!(factory.has_handle(handle));
    }

    #[test]
    fn cross_storage_move_preserves_handle() {
        let (mut factory, _rx, root_a, root_b) = two_storage_factory();
        let (_, _, handle) = factory.add_item(0x0001_0001, 0, text_info("m.txt")).unwrap();
        factory.write_data(handle, b"data", true, true).unwrap();
        factory.move_object(handle, 0, 0x0002_0001).unwrap();
        assert_eq!(factory.storage_of_handle(handle).unwrap(), 0x0002_0001);
        assert!(!root_a.path().join("m.txt").exists());
        assert_eq!(fs::read(root_b.path().join("m.txt")).unwrap(), b"data");
    }

    #[test]
    fn delete_all_spans_storages() {
        let (mut factory, _rx, root_a, root_b) = two_storage_factory();
        factory.add_item(0x0001_0001, 0, text_info("a.txt")).unwrap();
        factory.add_item(0x0002_0001, 0, text_info("b.txt")).unwrap();
        factory.delete_item(OBJ_HANDLE_ALL, None).unwrap();
        assert!(!root_a.path().join("a.txt").exists());
        assert!(!root_b.path().join("b.txt").exists());
        assert!(factory
            .object_handles(STORAGE_ID_ALL, None, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn unknown_storage_is_rejected() {
        let (mut factory, _rx, _a, _b) = two_storage_factory();
        match factory.storage_info(0x0009_0001) {
            Err(Error::Response(StandardResponseCode::InvalidStorageId)) => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn property_queries_fill_cache_for_siblings() {
        let (mut factory, _rx, _a, _b) = two_storage_factory();
        let (_, _, first) = factory.add_item(0x0001_0001, 0, text_info("one.txt")).unwrap();
        let (_, _, second) = factory.add_item(0x0001_0001, 0, text_info("two.txt")).unwrap();

        let desc = crate::properties::object_prop_desc(0xDC07).unwrap();
        let mut props = vec![ObjPropDescVal::new(desc.clone())];
        factory.object_property_values(first, &mut props).unwrap();
        assert_eq!(props[0].value, Some(MtpData::Str("one.txt".into())));

        // the sibling is now served from cache
        assert!(factory.prop_cache.get(second, 0xDC07).is_some());
    }

    #[test]
    fn prop_changed_event_invalidates_single_property() {
        let (mut factory, _rx, _a, _b) = two_storage_factory();
        let (_, _, handle) = factory.add_item(0x0001_0001, 0, text_info("one.txt")).unwrap();
        let desc = crate::properties::object_prop_desc(0xDC07).unwrap();
        let mut props = vec![ObjPropDescVal::new(desc)];
        factory.object_property_values(handle, &mut props).unwrap();
        assert!(factory.prop_cache.get(handle, 0xDC07).is_some());

        factory.note_event(&StorageEvent::new(
            StandardEventCode::ObjectPropChanged,
            vec![handle, 0xDC07],
        ));
        assert!(factory.prop_cache.get(handle, 0xDC07).is_none());
    }

    #[test]
    fn removed_event_drops_object_from_cache() {
        let (mut factory, _rx, _a, _b) = two_storage_factory();
        let (_, _, handle) = factory.add_item(0x0001_0001, 0, text_info("one.txt")).unwrap();
        let desc = crate::properties::object_prop_desc(0xDC07).unwrap();
        let mut props = vec![ObjPropDescVal::new(desc)];
        factory.object_property_values(handle, &mut props).unwrap();
        factory.note_event(&StorageEvent::new(
            StandardEventCode::ObjectRemoved,
            vec![handle],
        ));
        assert!(factory.prop_cache.get(handle, 0xDC07).is_none());
    }
}
