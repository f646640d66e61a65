use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::PathBuf;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::warn;

use crate::data::{MtpRead, MtpWrite};
use crate::{Error, ObjHandle};

/// Persistent path-to-PUOID map. Keeps object identities stable across
/// sessions; entries for paths that no longer exist are pruned by the
/// plugin after enumeration.
#[derive(Debug)]
pub struct PuoidDb {
    path: PathBuf,
}

impl PuoidDb {
    pub fn new(path: PathBuf) -> PuoidDb {
        PuoidDb { path }
    }

    /// Loads the map and the largest stored PUOID. A missing or
    /// unreadable database is an empty one.
    pub fn load(&self) -> (HashMap<PathBuf, u128>, u128) {
        let mut map = HashMap::new();
        let mut largest = 0u128;
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(_) => return (map, largest),
        };
        let mut reader = Cursor::new(bytes);
        match self.read_entries(&mut reader, &mut map, &mut largest) {
            Ok(()) => (map, largest),
            Err(err) => {
                warn!("puoid database {} unreadable: {}", self.path.display(), err);
                (HashMap::new(), 0)
            }
        }
    }

    fn read_entries(
        &self,
        reader: &mut Cursor<Vec<u8>>,
        map: &mut HashMap<PathBuf, u128>,
        largest: &mut u128,
    ) -> Result<(), Error> {
        let count = reader.read_u32::<LittleEndian>()?;
        for _ in 0..count {
            let len = reader.read_u16::<LittleEndian>()? as usize;
            let mut bytes = vec![0u8; len];
            reader.read_exact(&mut bytes)?;
            let path = PathBuf::from(String::from_utf8_lossy(&bytes).into_owned());
            let puoid = reader.read_mtp_u128()?;
            if puoid > *largest {
                *largest = puoid;
            }
            map.insert(path, puoid);
        }
        Ok(())
    }

    pub fn store(&self, map: &HashMap<PathBuf, u128>) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        let file = File::create(&self.path).map_err(Error::Io)?;
        let mut writer = BufWriter::new(file);
        writer.write_u32::<LittleEndian>(map.len() as u32)?;
        for (path, puoid) in map {
            let bytes = path.to_string_lossy();
            let bytes = bytes.as_bytes();
            writer.write_u16::<LittleEndian>(bytes.len() as u16)?;
            writer.write_all(bytes)?;
            writer.write_mtp_u128(*puoid)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Persistent handle-to-references map. Handles that no longer resolve
/// are pruned on load by the caller, which knows the live handle set.
#[derive(Debug)]
pub struct ReferenceDb {
    path: PathBuf,
}

impl ReferenceDb {
    pub fn new(path: PathBuf) -> ReferenceDb {
        ReferenceDb { path }
    }

    pub fn load(&self) -> HashMap<ObjHandle, Vec<ObjHandle>> {
        let mut map = HashMap::new();
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(_) => return map,
        };
        let mut reader = Cursor::new(bytes);
        if let Err(err) = self.read_entries(&mut reader, &mut map) {
            warn!(
                "object reference database {} unreadable: {}",
                self.path.display(),
                err
            );
            return HashMap::new();
        }
        map
    }

    fn read_entries(
        &self,
        reader: &mut Cursor<Vec<u8>>,
        map: &mut HashMap<ObjHandle, Vec<ObjHandle>>,
    ) -> Result<(), Error> {
        let count = reader.read_u32::<LittleEndian>()?;
        for _ in 0..count {
            let handle = reader.read_u32::<LittleEndian>()?;
            let refs = reader.read_mtp_u32_vec()?;
            map.insert(handle, refs);
        }
        Ok(())
    }

    pub fn store(&self, map: &HashMap<ObjHandle, Vec<ObjHandle>>) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        let file = File::create(&self.path).map_err(Error::Io)?;
        let mut writer = BufWriter::new(file);
        writer.write_u32::<LittleEndian>(map.len() as u32)?;
        for (handle, refs) in map {
            writer.write_u32::<LittleEndian>(*handle)?;
            writer.write_mtp_slice(refs, |w, r| w.write_mtp_u32(*r))?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn puoid_db_round_trips_and_tracks_largest() {
        let dir = tempfile::tempdir().unwrap();
        let db = PuoidDb::new(dir.path().join("puoids.db"));
        let mut map = HashMap::new();
        map.insert(PathBuf::from("/s/a.txt"), 3u128);
        map.insert(PathBuf::from("/s/dir/b.mp3"), (7u128 << 64) | 1);
        db.store(&map).unwrap();

        let (loaded, largest) = db.load();
        assert_eq!(loaded, map);
        assert_eq!(largest, (7u128 << 64) | 1);
    }

    #[test]
    fn missing_puoid_db_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db = PuoidDb::new(dir.path().join("absent.db"));
        let (map, largest) = db.load();
        assert!(map.is_empty());
        assert_eq!(largest, 0);
    }

    #[test]
    fn corrupt_puoid_db_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("puoids.db");
        std::fs::write(&path, [0xFF; 3]).unwrap();
        let db = PuoidDb::new(path);
        let (map, largest) = db.load();
        assert!(map.is_empty());
        assert_eq!(largest, 0);
    }

    #[test]
    fn reference_db_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let db = ReferenceDb::new(dir.path().join("refs.db"));
        let mut map = HashMap::new();
        map.insert(10u32, vec![11, 12, 13]);
        map.insert(20u32, vec![]);
        db.store(&map).unwrap();
        assert_eq!(db.load(), map);
    }
}
