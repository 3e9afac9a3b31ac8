//! Per-directory record of poison operations, sufficient to undo each one.
//!
//! The log is a single JSON document named [`LOG_NAME`] inside the directory a
//! command was run against. A command loads it once, mutates it in memory and
//! persists it once at the end:
//!
//! ```json
//! {"entries": {"cat_toaster.jpg": {"caption": "...", "tags": ["..."],
//!   "surfaces": {"xmp": true, "iptc": false, "exif": false,
//!                "sidecar": true, "json": false, "html": false},
//!   "original_name": "cat.jpg"}}}
//! ```
//!
//! Persisting goes through a temp file and a rename. The bytes seen at load are
//! fingerprinted, and a persist over a file that changed in the meantime fails
//! with [`LogError::Conflict`] instead of silently dropping the other writer's
//! entries.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, LogError};

/// Well-known file name of the log inside the operated-on directory.
pub const LOG_NAME: &str = ".mm_poisonlog.json";

/// Sidecar suffixes that may sit next to a poisoned image.
pub const SIDECAR_SUFFIXES: [&str; 3] = ["txt", "json", "html"];

/// Where a poison operation wrote its caption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Surfaces {
    pub xmp: bool,
    pub iptc: bool,
    pub exif: bool,
    pub sidecar: bool,
    pub json: bool,
    pub html: bool,
}

impl Surfaces {
    /// Every surface enabled.
    pub fn all() -> Self {
        Self {
            xmp: true,
            iptc: true,
            exif: true,
            sidecar: true,
            json: true,
            html: true,
        }
    }

    /// Whether any embedded metadata surface (XMP, IPTC, EXIF) is enabled.
    pub fn any_metadata(&self) -> bool {
        self.xmp || self.iptc || self.exif
    }

    /// Sidecar suffixes these surfaces produce.
    ///
    /// The caption `.txt` is written for both plain and JSON sidecars.
    pub fn sidecar_suffixes(&self) -> Vec<&'static str> {
        let mut suffixes = Vec::with_capacity(3);
        if self.sidecar || self.json {
            suffixes.push("txt");
        }
        if self.json {
            suffixes.push("json");
        }
        if self.html {
            suffixes.push("html");
        }
        suffixes
    }
}

/// One transformed file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationEntry {
    pub caption: String,
    pub tags: Vec<String>,
    pub surfaces: Surfaces,
    /// File name before a rename pattern was applied.
    pub original_name: Option<String>,
}

/// Mapping from root-relative path to [`OperationEntry`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationLog {
    #[serde(default)]
    entries: BTreeMap<String, OperationEntry>,
    /// Digest of the on-disk bytes this log was loaded from.
    #[serde(skip)]
    origin: Option<[u8; 32]>,
}

impl OperationLog {
    /// Path of the log file for `root`.
    pub fn path_for(root: &Path) -> PathBuf {
        root.join(LOG_NAME)
    }

    /// Load the log for `root`, or an empty one when no log file exists.
    pub fn load(root: &Path) -> Result<Self, LogError> {
        let path = Self::path_for(root);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(LogError::Read { path, source }),
        };

        let mut log: OperationLog = serde_json::from_slice(&bytes)
            .map_err(|source| LogError::Parse {
                path: path.clone(),
                source,
            })?;
        log.origin = Some(digest(&bytes));
        debug!(path = %path.display(), entries = log.entries.len(), "loaded operation log");
        Ok(log)
    }

    /// Insert or overwrite the entry at `key`.
    pub fn put(&mut self, key: impl Into<String>, entry: OperationEntry) -> Option<OperationEntry> {
        self.entries.insert(key.into(), entry)
    }

    /// Delete the entry at `key`, if any.
    pub fn remove(&mut self, key: &str) -> Option<OperationEntry> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&OperationEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OperationEntry)> {
        self.entries.iter()
    }

    /// Owned copy of every entry, for passes that mutate the log as they go.
    pub fn snapshot(&self) -> Vec<(String, OperationEntry)> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Replace the log file for `root` with this document.
    pub fn persist(&mut self, root: &Path) -> Result<(), LogError> {
        let path = Self::path_for(root);

        let current = match fs::read(&path) {
            Ok(bytes) => Some(digest(&bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(source) => return Err(LogError::Read { path, source }),
        };
        if current != self.origin {
            return Err(LogError::Conflict { path });
        }

        let mut bytes =
            serde_json::to_vec_pretty(self).map_err(|source| LogError::Serialize { source })?;
        bytes.push(b'\n');

        let temp_path = path.with_file_name(format!("{LOG_NAME}.tmp"));
        write_atomically(&temp_path, &path, &bytes).map_err(|source| LogError::Write {
            path: path.clone(),
            source,
        })?;

        self.origin = Some(digest(&bytes));
        debug!(path = %path.display(), entries = self.entries.len(), "persisted operation log");
        Ok(())
    }
}

fn write_atomically(temp_path: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let result = (|| {
        let mut file = fs::File::create(temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(temp_path, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(temp_path);
    }
    result
}

/// Move `from` to `to` without ever replacing an existing file.
///
/// The target name is claimed with an exclusive create before the rename, so
/// of two concurrent renames onto the same name exactly one succeeds; the
/// other fails with [`io::ErrorKind::AlreadyExists`].
pub fn rename_no_clobber(from: &Path, to: &Path) -> io::Result<()> {
    fs::OpenOptions::new().write(true).create_new(true).open(to)?;
    fs::rename(from, to).inspect_err(|_| {
        let _ = fs::remove_file(to);
    })
}

fn digest(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Directory holding the log for a command run against `target`: the target
/// itself when it is a directory, otherwise its parent.
pub fn base_dir(target: &Path) -> Result<PathBuf, Error> {
    let metadata = fs::metadata(target).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => Error::invalid_path(target, "path does not exist"),
        _ => Error::invalid_path(target, err.to_string()),
    })?;
    if metadata.is_dir() {
        return Ok(target.to_path_buf());
    }
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(parent.to_path_buf()),
        _ => Ok(PathBuf::from(".")),
    }
}

/// Log key for `path` relative to `base`, always `/`-separated.
///
/// Returns `None` when `path` is not inside `base`.
pub fn relative_key(path: &Path, base: &Path) -> Option<String> {
    let relative = match path.strip_prefix(base) {
        Ok(relative) => relative,
        Err(_) if base == Path::new(".") && path.is_relative() => path,
        Err(_) => return None,
    };
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Absolute path for a log key under `root`.
pub fn resolve_key(root: &Path, key: &str) -> PathBuf {
    key.split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |path, part| path.join(part))
}

/// The key a file would have after being renamed to `new_name` in place.
pub fn sibling_key(key: &str, new_name: &str) -> String {
    match key.rsplit_once('/') {
        Some((dir, _)) => format!("{dir}/{new_name}"),
        None => new_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(original_name: Option<&str>) -> OperationEntry {
        OperationEntry {
            caption: String::from("toaster on a sofa, studio product shot"),
            tags: vec![String::from("toaster"), String::from("appliance")],
            surfaces: Surfaces {
                sidecar: true,
                ..Surfaces::default()
            },
            original_name: original_name.map(String::from),
        }
    }

    #[test]
    fn test_load_missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = OperationLog::load(dir.path()).unwrap();
        assert!(log.is_empty());
    }

    #[test]
    fn test_load_corrupt_log_fails_loudly() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(LOG_NAME), "{ not json").unwrap();
        let result = OperationLog::load(dir.path());
        assert!(matches!(result, Err(LogError::Parse { .. })));
    }

    #[test]
    fn test_put_overwrites_and_remove_is_noop_when_absent() {
        let mut log = OperationLog::default();
        assert!(log.put("cat.jpg", entry(None)).is_none());
        assert!(log.put("cat.jpg", entry(Some("kitty.jpg"))).is_some());
        assert_eq!(log.len(), 1);
        assert_eq!(
            log.get("cat.jpg").unwrap().original_name.as_deref(),
            Some("kitty.jpg")
        );

        assert!(log.remove("dog.jpg").is_none());
        assert!(log.remove("cat.jpg").is_some());
        assert!(log.is_empty());
    }

    #[test]
    fn test_persist_then_load_preserves_entries() {
        let dir = TempDir::new().unwrap();
        let mut log = OperationLog::default();
        log.put("cat.jpg", entry(None));
        log.put("nested/dog_sedan.png", entry(Some("dog.png")));
        log.persist(dir.path()).unwrap();

        let loaded = OperationLog::load(dir.path()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("cat.jpg"), Some(&entry(None)));
        assert_eq!(
            loaded.get("nested/dog_sedan.png"),
            Some(&entry(Some("dog.png")))
        );
        assert!(!dir.path().join(format!("{LOG_NAME}.tmp")).exists());
    }

    #[test]
    fn test_persisted_document_shape() {
        let dir = TempDir::new().unwrap();
        let mut log = OperationLog::default();
        log.put("cat.jpg", entry(None));
        log.persist(dir.path()).unwrap();

        let raw = fs::read_to_string(dir.path().join(LOG_NAME)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let cat = &value["entries"]["cat.jpg"];
        assert_eq!(cat["original_name"], serde_json::Value::Null);
        assert_eq!(cat["surfaces"]["sidecar"], true);
        assert_eq!(cat["surfaces"]["html"], false);
        assert_eq!(cat["tags"][0], "toaster");
    }

    #[test]
    fn test_load_accepts_sparse_entries() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(LOG_NAME),
            r#"{"entries": {"a.jpg": {"caption": "x", "surfaces": {"xmp": true}}}}"#,
        )
        .unwrap();
        let log = OperationLog::load(dir.path()).unwrap();
        let a = log.get("a.jpg").unwrap();
        assert!(a.surfaces.xmp);
        assert!(!a.surfaces.sidecar);
        assert!(a.tags.is_empty());
        assert!(a.original_name.is_none());
    }

    #[test]
    fn test_concurrent_writer_is_detected() {
        let dir = TempDir::new().unwrap();
        let mut first = OperationLog::load(dir.path()).unwrap();
        let mut second = OperationLog::load(dir.path()).unwrap();

        first.put("cat.jpg", entry(None));
        first.persist(dir.path()).unwrap();

        second.put("dog.jpg", entry(None));
        let result = second.persist(dir.path());
        assert!(matches!(result, Err(LogError::Conflict { .. })));

        let on_disk = OperationLog::load(dir.path()).unwrap();
        assert!(on_disk.contains("cat.jpg"));
        assert!(!on_disk.contains("dog.jpg"));
    }

    #[test]
    fn test_repeated_persist_from_same_log() {
        let dir = TempDir::new().unwrap();
        let mut log = OperationLog::load(dir.path()).unwrap();
        log.put("cat.jpg", entry(None));
        log.persist(dir.path()).unwrap();
        log.remove("cat.jpg");
        log.persist(dir.path()).unwrap();
        assert!(OperationLog::load(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_relative_key_uses_forward_slashes() {
        let base = Path::new("/photos");
        assert_eq!(
            relative_key(Path::new("/photos/2024/cat.jpg"), base).as_deref(),
            Some("2024/cat.jpg")
        );
        assert_eq!(relative_key(Path::new("/elsewhere/cat.jpg"), base), None);
        assert_eq!(relative_key(base, base), None);
        assert_eq!(
            relative_key(Path::new("cat.jpg"), Path::new(".")).as_deref(),
            Some("cat.jpg")
        );
    }

    #[test]
    fn test_resolve_and_sibling_keys() {
        let root = Path::new("/photos");
        assert_eq!(
            resolve_key(root, "2024/cat.jpg"),
            Path::new("/photos").join("2024").join("cat.jpg")
        );
        assert_eq!(sibling_key("2024/cat_toaster.jpg", "cat.jpg"), "2024/cat.jpg");
        assert_eq!(sibling_key("cat_toaster.jpg", "cat.jpg"), "cat.jpg");
    }

    #[test]
    fn test_base_dir_of_file_is_parent() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("cat.jpg");
        fs::write(&image, b"x").unwrap();
        assert_eq!(base_dir(dir.path()).unwrap(), dir.path());
        assert_eq!(base_dir(&image).unwrap(), dir.path());
        assert!(matches!(
            base_dir(&dir.path().join("missing")),
            Err(Error::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_sidecar_suffixes_follow_surfaces() {
        let none = Surfaces::default();
        assert!(none.sidecar_suffixes().is_empty());

        let json_only = Surfaces {
            json: true,
            ..Surfaces::default()
        };
        assert_eq!(json_only.sidecar_suffixes(), vec!["txt", "json"]);
        assert_eq!(Surfaces::all().sidecar_suffixes(), SIDECAR_SUFFIXES.to_vec());
    }

    #[test]
    fn test_rename_no_clobber_keeps_existing_target() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("cat.jpg");
        let to = dir.path().join("dog.jpg");
        fs::write(&from, b"cat").unwrap();
        fs::write(&to, b"dog").unwrap();

        let err = rename_no_clobber(&from, &to).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&from).unwrap(), b"cat");
        assert_eq!(fs::read(&to).unwrap(), b"dog");
    }

    #[test]
    fn test_rename_no_clobber_removes_claim_on_failure() {
        let dir = TempDir::new().unwrap();
        let to = dir.path().join("dog.jpg");
        assert!(rename_no_clobber(&dir.path().join("missing.jpg"), &to).is_err());
        assert!(!to.exists());
    }

    #[test]
    fn test_concurrent_renames_onto_one_name() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("shared.jpg");
        let sources: Vec<PathBuf> = ["a.jpg", "b.jpg"]
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                fs::write(&path, name.as_bytes()).unwrap();
                path
            })
            .collect();

        let barrier = Arc::new(Barrier::new(sources.len()));
        let handles: Vec<_> = sources
            .iter()
            .cloned()
            .map(|source| {
                let barrier = Arc::clone(&barrier);
                let target = target.clone();
                thread::spawn(move || {
                    barrier.wait();
                    rename_no_clobber(&source, &target).is_ok()
                })
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(wins, 1);
        let remaining = sources.iter().filter(|source| source.exists()).count();
        assert_eq!(remaining, 1);
        let content = fs::read_to_string(&target).unwrap();
        assert!(content == "a.jpg" || content == "b.jpg");
    }
}
