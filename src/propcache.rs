use std::collections::{HashMap, HashSet};

use crate::data::MtpData;
use crate::properties::ObjPropDescVal;
use crate::ObjHandle;

/// Per-session cache of object property values, keyed by handle and
/// property code. Object handles are unique across storages, so one
/// cache serves every plugin. A handle can additionally be marked
/// "fully loaded" after a mass query filled in everything the object
/// has; lookups for marked handles treat a missing property as an
/// empty value rather than a cache miss.
#[derive(Debug, Default)]
pub struct ObjectPropertyCache {
    properties: HashMap<ObjHandle, HashMap<u16, MtpData>>,
    all_loaded: HashSet<ObjHandle>,
}

impl ObjectPropertyCache {
    pub fn new() -> ObjectPropertyCache {
        ObjectPropertyCache::default()
    }

    /// Adds or replaces one property value.
    pub fn add(&mut self, handle: ObjHandle, prop_code: u16, value: MtpData) {
        self.properties
            .entry(handle)
            .or_insert_with(HashMap::new)
            .insert(prop_code, value);
    }

    /// Adds every valued entry of a description/value list.
    pub fn add_desc_vals(&mut self, handle: ObjHandle, vals: &[ObjPropDescVal]) {
        for val in vals {
            if let Some(value) = &val.value {
                self.add(handle, val.desc.prop_code as u16, value.clone());
            }
        }
    }

    /// Marks a handle as having every property it owns in the cache.
    pub fn mark_all_loaded(&mut self, handle: ObjHandle) {
        self.all_loaded.insert(handle);
    }

    pub fn get(&self, handle: ObjHandle, prop_code: u16) -> Option<&MtpData> {
        self.properties.get(&handle)?.get(&prop_code)
    }

    /// Fills values into `vals` from the cache. Entries that stay
    /// unfilled are cache misses; returns true when everything was
    /// served from cache.
    pub fn fill(&self, handle: ObjHandle, vals: &mut [ObjPropDescVal]) -> bool {
        let mut complete = true;
        let loaded = self.all_loaded.contains(&handle);
        for val in vals.iter_mut() {
            match self.get(handle, val.desc.prop_code as u16) {
                Some(value) => val.value = Some(value.clone()),
                None if loaded => {
                    val.value = Some(MtpData::default_for(val.desc.data_type));
                }
                None => complete = false,
            }
        }
        complete
    }

    /// Removes one property, or the whole object when `prop_code` is
    /// None. Removing the last property drops the object entry.
    pub fn remove(&mut self, handle: ObjHandle, prop_code: Option<u16>) {
        match prop_code {
            None => {
                self.properties.remove(&handle);
                self.all_loaded.remove(&handle);
            }
            Some(code) => {
                // a removed property also invalidates the loaded marker
                self.all_loaded.remove(&handle);
                if let Some(props) = self.properties.get_mut(&handle) {
                    props.remove(&code);
                    if props.is_empty() {
                        self.properties.remove(&handle);
                    }
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.properties.clear();
        self.all_loaded.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataType;
    use crate::properties::{object_prop_desc, ObjPropDescVal};

    fn filename_val() -> ObjPropDescVal {
        ObjPropDescVal::new(object_prop_desc(0xDC07).unwrap())
    }

    #[test]
    fn add_get_remove() {
        let mut cache = ObjectPropertyCache::new();
        cache.add(5, 0xDC07, MtpData::Str("a.txt".into()));
        assert_eq!(cache.get(5, 0xDC07), Some(&MtpData::Str("a.txt".into())));
        cache.remove(5, Some(0xDC07));
        assert_eq!(cache.get(5, 0xDC07), None);
    }

    #[test]
    fn removing_object_drops_every_property() {
        let mut cache = ObjectPropertyCache::new();
        cache.add(5, 0xDC07, MtpData::Str("a.txt".into()));
        cache.add(5, 0xDC04, MtpData::Uint64(12));
        cache.remove(5, None);
        assert_eq!(cache.get(5, 0xDC04), None);
    }

    #[test]
    fn fill_reports_misses() {
        let mut cache = ObjectPropertyCache::new();
        let mut vals = vec![filename_val()];
        assert!(!cache.fill(9, &mut vals));
        cache.add(9, 0xDC07, MtpData::Str("b.txt".into()));
        assert!(cache.fill(9, &mut vals));
        assert_eq!(vals[0].value, Some(MtpData::Str("b.txt".into())));
    }

    #[test]
    fn all_loaded_marker_serves_absent_props_as_defaults() {
        let mut cache = ObjectPropertyCache::new();
        cache.add(9, 0xDC04, MtpData::Uint64(1));
        cache.mark_all_loaded(9);
        let mut vals = vec![filename_val()];
        assert!(cache.fill(9, &mut vals));
        assert_eq!(vals[0].value, Some(MtpData::default_for(DataType::Str)));
    }

    #[test]
    fn invalidation_clears_loaded_marker() {
        let mut cache = ObjectPropertyCache::new();
        cache.add(9, 0xDC07, MtpData::Str("x".into()));
        cache.mark_all_loaded(9);
        cache.remove(9, Some(0xDC07));
        let mut vals = vec![filename_val()];
        assert!(!cache.fill(9, &mut vals));
    }
}
