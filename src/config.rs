use std::collections::{BTreeMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Deserialize;

use crate::Error;

/// Default location of the per-storage configuration files.
pub const CONFIG_DIR: &str = "/etc/fsstorage.d";

const MOUNTS_FILE: &str = "/proc/self/mounts";

/// Bound on the label uniquification passes; duplicates that survive
/// them are dropped.
const LABEL_PASSES: usize = 5;

/// One `<storage>` element as it appears on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "storage")]
pub struct StorageConfigXml {
    #[serde(rename = "@path")]
    pub path: Option<String>,
    #[serde(rename = "@blockdev")]
    pub blockdev: Option<String>,
    #[serde(rename = "@name")]
    pub name: Option<String>,
    #[serde(rename = "@description")]
    pub description: Option<String>,
    #[serde(rename = "@removable")]
    pub removable: Option<String>,
    #[serde(rename = "blacklist", default)]
    pub blacklist: Vec<String>,
}

/// A resolved storage root ready to be turned into a plugin instance.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageSpec {
    pub root: PathBuf,
    pub name: String,
    pub description: String,
    pub removable: bool,
    pub exclude_paths: Vec<PathBuf>,
}

pub fn parse_storage_xml(text: &str) -> Result<StorageConfigXml, Error> {
    quick_xml::de::from_str(text)
        .map_err(|e| Error::Transport(format!("storage config parse error: {}", e)))
}

/// Expands `%u` to the current user name and `%h` to the home
/// directory.
fn expand_placeholders(pattern: &str) -> String {
    let mut out = pattern.to_owned();
    if out.contains("%u") {
        out = out.replace("%u", &env::var("USER").unwrap_or_default());
    }
    if out.contains("%h") {
        out = out.replace("%h", &env::var("HOME").unwrap_or_default());
    }
    out
}

fn component_matches(pattern: &str, name: &str) -> bool {
    // Wildcard match over one path component, '*' and '?' only.
    fn matches(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(&p[1..], n) || (!n.is_empty() && matches(p, &n[1..]))
            }
            (Some(b'?'), Some(_)) => matches(&p[1..], &n[1..]),
            (Some(a), Some(b)) if a == b => matches(&p[1..], &n[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), name.as_bytes())
}

fn has_wildcards(s: &str) -> bool {
    s.contains('*') || s.contains('?')
}

/// Expands a glob pattern into the matching directories, in sorted
/// order.
pub fn glob_directories(pattern: &str) -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from("/")];
    for component in Path::new(pattern).components() {
        use std::path::Component;
        let part = match component {
            Component::RootDir => continue,
            Component::Normal(name) => name.to_string_lossy().into_owned(),
            _ => continue,
        };
        let mut next = Vec::new();
        if has_wildcards(&part) {
            for dir in &candidates {
                let entries = match fs::read_dir(dir) {
                    Ok(entries) => entries,
                    Err(_) => continue,
                };
                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if component_matches(&part, &name) {
                        next.push(entry.path());
                    }
                }
            }
        } else {
            for dir in &candidates {
                next.push(dir.join(&part));
            }
        }
        candidates = next;
    }
    let mut dirs: Vec<PathBuf> = candidates
        .into_iter()
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

/// Scans the mount table for mount points whose device starts with the
/// given prefix. Returns `(mount_point, device_suffix)` pairs.
pub fn mounts_for_blockdev(blockdev: &str, mounts_file: &Path) -> Vec<(PathBuf, String)> {
    let text = match fs::read_to_string(mounts_file) {
        Ok(text) => text,
        Err(err) => {
            warn!("could not list mounted filesystems: {}", err);
            return vec![];
        }
    };
    let mut result = Vec::new();
    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let (dev, mount_point) = match (fields.next(), fields.next()) {
            (Some(dev), Some(mp)) => (dev, mp),
            _ => continue,
        };
        if let Some(suffix) = dev.strip_prefix(blockdev) {
            // Mount points with escaped spaces appear as \040
            let mount_point = mount_point.replace("\\040", " ");
            result.push((PathBuf::from(mount_point), suffix.to_owned()));
        }
    }
    result
}

/// Resolves duplicate descriptions by appending " 1", " 2", … on the
/// first pass and ".1", ".2", … on later ones, against both the new
/// labels and labels already reserved. Bounded; see [`LABEL_PASSES`].
pub fn make_labels_unique(
    path_labels: &mut BTreeMap<PathBuf, String>,
    reserved: &HashSet<String>,
) {
    for pass in 0..LABEL_PASSES {
        let mut label_count: BTreeMap<String, usize> = BTreeMap::new();
        for label in reserved {
            *label_count.entry(label.clone()).or_insert(0) += 1;
        }
        let mut max_count = 0;
        for label in path_labels.values() {
            let count = label_count.entry(label.clone()).or_insert(0);
            *count += 1;
            max_count = max_count.max(*count);
        }
        if max_count < 2 {
            break;
        }
        let mut label_index: BTreeMap<String, usize> = BTreeMap::new();
        for (_, label) in path_labels.iter_mut() {
            if label_count.get(label).copied().unwrap_or(0) < 2 {
                continue;
            }
            let index = label_index.entry(label.clone()).or_insert(0);
            *index += 1;
            *label = if pass == 0 {
                format!("{} {}", label, index)
            } else {
                format!("{}.{}", label, index)
            };
        }
    }
}

fn read_blacklist(config_dir: &Path, entry: &str) -> Vec<PathBuf> {
    let trimmed = entry.trim();
    if trimmed.is_empty() {
        return vec![];
    }
    let file = if trimmed.starts_with('/') {
        PathBuf::from(trimmed)
    } else {
        config_dir.join(trimmed)
    };
    let text = match fs::read_to_string(&file) {
        Ok(text) => text,
        Err(err) => {
            warn!("{} couldn't be opened for reading: {}", file.display(), err);
            return vec![];
        }
    };
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(PathBuf::from)
        .collect()
}

/// Loads every storage configuration under `config_dir`, resolving glob
/// and blockdev storages and uniquifying descriptions. Directories
/// matched by more than one file are exported once.
pub fn load_storage_specs(config_dir: &Path) -> Result<Vec<StorageSpec>, Error> {
    load_storage_specs_with_mounts(config_dir, Path::new(MOUNTS_FILE))
}

pub fn load_storage_specs_with_mounts(
    config_dir: &Path,
    mounts_file: &Path,
) -> Result<Vec<StorageSpec>, Error> {
    let mut already_exported: HashSet<PathBuf> = HashSet::new();
    let mut reserved_labels: HashSet<String> = HashSet::new();
    let mut specs = Vec::new();

    let mut files: Vec<PathBuf> = match fs::read_dir(config_dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .map(|e| e.eq_ignore_ascii_case("xml"))
                        .unwrap_or(false)
            })
            .collect(),
        Err(err) => {
            warn!("{} is not readable: {}", config_dir.display(), err);
            return Ok(vec![]);
        }
    };
    files.sort();

    for file in files {
        info!("configuring storage from {}", file.display());
        let text = match fs::read_to_string(&file) {
            Ok(text) => text,
            Err(err) => {
                warn!("{} couldn't be opened for reading: {}", file.display(), err);
                continue;
            }
        };
        let config = match parse_storage_xml(&text) {
            Ok(config) => config,
            Err(err) => {
                warn!("{} is not a storage configuration: {}", file.display(), err);
                continue;
            }
        };

        if config.path.is_none() && config.blockdev.is_none() {
            warn!(
                "storage {} has neither 'path' nor 'blockdev' attributes",
                file.display()
            );
            continue;
        }
        if config.path.is_some() && config.blockdev.is_some() {
            warn!(
                "storage {} has mutually exclusive 'path' and 'blockdev' attributes",
                file.display()
            );
            continue;
        }
        let (name, description) = match (&config.name, &config.description) {
            (Some(name), Some(desc)) => (name.clone(), desc.clone()),
            _ => {
                warn!(
                    "storage {} is missing some of mandatory attributes 'name' and 'description'",
                    file.display()
                );
                continue;
            }
        };

        let removable = config
            .removable
            .as_deref()
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let mut exclude_paths = Vec::new();
        for entry in &config.blacklist {
            exclude_paths.extend(read_blacklist(config_dir, entry));
        }

        let mut path_labels: BTreeMap<PathBuf, String> = BTreeMap::new();
        if let Some(pattern) = &config.path {
            let pattern = expand_placeholders(pattern);
            // With wildcards, matched directory basenames substitute for
            // the configured description after the first match.
            let mut description = Some(description.clone());
            for path in glob_directories(&pattern) {
                if path_labels.contains_key(&path) || already_exported.contains(&path) {
                    continue;
                }
                let label = description.take().unwrap_or_else(|| {
                    path.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "Card".to_owned())
                });
                path_labels.insert(path, label);
            }
        } else if let Some(blockdev) = &config.blockdev {
            for (mount_point, dev_suffix) in mounts_for_blockdev(blockdev, mounts_file) {
                if path_labels.contains_key(&mount_point)
                    || already_exported.contains(&mount_point)
                {
                    continue;
                }
                let mut label = description.clone();
                if !dev_suffix.is_empty() && dev_suffix != "p1" {
                    label.push(' ');
                    label.push_str(&dev_suffix);
                }
                path_labels.insert(mount_point, label);
            }
        }

        make_labels_unique(&mut path_labels, &reserved_labels);

        for (path, label) in path_labels {
            if already_exported.contains(&path) || reserved_labels.contains(&label) {
                continue;
            }
            reserved_labels.insert(label.clone());
            already_exported.insert(path.clone());
            specs.push(StorageSpec {
                root: path,
                name: name.clone(),
                description: label,
                removable,
                exclude_paths: exclude_paths.clone(),
            });
        }
    }

    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_path_storage_element() {
        let config = parse_storage_xml(
            r#"<storage path="/home/%u/Music" name="music" description="Music" removable="false"/>"#,
        )
        .unwrap();
        assert_eq!(config.path.as_deref(), Some("/home/%u/Music"));
        assert_eq!(config.name.as_deref(), Some("music"));
        assert!(config.blacklist.is_empty());
    }

    #[test]
    fn parses_blacklist_children() {
        let config = parse_storage_xml(
            r#"<storage blockdev="/dev/mmcblk1" name="card" description="Card" removable="true">
                 <blacklist>card-blacklist.conf</blacklist>
                 <blacklist>/etc/other.conf</blacklist>
               </storage>"#,
        )
        .unwrap();
        assert_eq!(config.blockdev.as_deref(), Some("/dev/mmcblk1"));
        assert_eq!(config.blacklist.len(), 2);
    }

    #[test]
    fn wildcard_component_matching() {
        assert!(component_matches("*", "anything"));
        assert!(component_matches("sd?", "sda"));
        assert!(component_matches("IMG*.jpg", "IMG_001.jpg"));
        assert!(!component_matches("*.jpg", "IMG_001.png"));
    }

    #[test]
    fn labels_get_numbered_suffixes() {
        let mut labels: BTreeMap<PathBuf, String> = BTreeMap::new();
        labels.insert("/a".into(), "Card".into());
        labels.insert("/b".into(), "Card".into());
        labels.insert("/c".into(), "Other".into());
        make_labels_unique(&mut labels, &HashSet::new());
        let values: Vec<&String> = labels.values().collect();
        assert_eq!(values[0], "Card 1");
        assert_eq!(values[1], "Card 2");
        assert_eq!(values[2], "Other");
    }

    #[test]
    fn reserved_labels_force_suffixing() {
        let mut labels: BTreeMap<PathBuf, String> = BTreeMap::new();
        labels.insert("/a".into(), "Card".into());
        let mut reserved = HashSet::new();
        reserved.insert("Card".to_owned());
        make_labels_unique(&mut labels, &reserved);
        assert_eq!(labels.get(Path::new("/a")).unwrap(), "Card 1");
    }

    #[test]
    fn mount_table_scan_matches_device_prefix() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "/dev/mmcblk1p1 /run/media/user/card vfat rw 0 0").unwrap();
        writeln!(file, "/dev/sda1 /mnt/disk ext4 rw 0 0").unwrap();
        let mounts = mounts_for_blockdev("/dev/mmcblk1", file.path());
        assert_eq!(
            mounts,
            vec![(PathBuf::from("/run/media/user/card"), "p1".to_owned())]
        );
    }

    #[test]
    fn load_specs_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let xml = format!(
            r#"<storage path="{}" name="phone" description="Phone memory"/>"#,
            root.path().display()
        );
        fs::write(dir.path().join("phone.xml"), xml).unwrap();
        let specs = load_storage_specs(dir.path()).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].root, root.path());
        assert_eq!(specs[0].description, "Phone memory");
        assert!(!specs[0].removable);
    }

    #[test]
    fn duplicate_roots_exported_once() {
        let dir = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        for name in ["a.xml", "b.xml"] {
            let xml = format!(
                r#"<storage path="{}" name="phone" description="Phone memory"/>"#,
                root.path().display()
            );
            fs::write(dir.path().join(name), xml).unwrap();
        }
        let specs = load_storage_specs(dir.path()).unwrap();
        assert_eq!(specs.len(), 1);
    }
}
