//! Filesystem adapter boundary (spec.md §6 "Persisted state layout").
//!
//! This module owns only the adapter *trait* and a `std::fs`-backed
//! implementation of it — no platform driver code, per the crate's
//! out-of-scope list. Every write goes through `write` which performs
//! whole-file write-then-rename, matching spec.md §5's "every commit is
//! whole-file write-then-rename semantics at the filesystem-adapter layer".
//!
//! Grounded on the teacher's `domain/*/repository.rs` trait-plus-impl
//! pattern (`#[async_trait]` trait, a concrete struct implementing it),
//! adapted to a synchronous boundary since file commits here are small,
//! local writes rather than network round-trips.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::FsError;

/// Adapter the core depends on for all persisted state. Implementations
/// must make `write` atomic (the core never observes a half-written file).
pub trait FilesystemAdapter: Send + Sync {
    /// Read the full contents of `name`, or `Ok(None)` if it doesn't exist.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, FsError>;

    /// Atomically replace the contents of `name`.
    fn write(&self, name: &str, contents: &[u8]) -> Result<(), FsError>;

    /// `true` if `name` exists.
    fn stat(&self, name: &str) -> Result<bool, FsError>;

    /// Remove `name`. Not an error if it didn't exist.
    fn remove(&self, name: &str) -> Result<(), FsError>;

    /// List file names matching `prefix`, used to recover ring indices by
    /// scanning filename prefixes (spec.md §6: "Ring indices txNrBegin/
    /// txNrEnd recovered by scanning filename prefixes").
    fn list(&self, prefix: &str) -> Result<Vec<String>, FsError>;
}

/// `std::fs`-backed adapter rooted at a base directory.
pub struct StdFilesystem {
    root: PathBuf,
}

impl StdFilesystem {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl FilesystemAdapter for StdFilesystem {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, FsError> {
        match fs::read(self.path(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FsError::Io(e.to_string())),
        }
    }

    fn write(&self, name: &str, contents: &[u8]) -> Result<(), FsError> {
        let final_path = self.path(name);
        let tmp_path = self.root.join(format!("{name}.tmp"));
        fs::write(&tmp_path, contents).map_err(|e| FsError::Io(e.to_string()))?;
        fs::rename(&tmp_path, &final_path).map_err(|e| FsError::Io(e.to_string()))?;
        Ok(())
    }

    fn stat(&self, name: &str) -> Result<bool, FsError> {
        Ok(self.path(name).exists())
    }

    fn remove(&self, name: &str) -> Result<(), FsError> {
        match fs::remove_file(self.path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FsError::Io(e.to_string())),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, FsError> {
        let mut out = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(FsError::Io(e.to_string())),
        };
        for entry in entries {
            let entry = entry.map_err(|e| FsError::Io(e.to_string()))?;
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(prefix) && !name.ends_with(".tmp") {
                    out.push(name.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

/// In-memory adapter for tests: no real disk I/O, same atomicity contract.
#[derive(Default)]
pub struct MemFilesystem {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemFilesystem {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FilesystemAdapter for MemFilesystem {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, FsError> {
        Ok(self.files.lock().unwrap().get(name).cloned())
    }

    fn write(&self, name: &str, contents: &[u8]) -> Result<(), FsError> {
        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), contents.to_vec());
        Ok(())
    }

    fn stat(&self, name: &str) -> Result<bool, FsError> {
        Ok(self.files.lock().unwrap().contains_key(name))
    }

    fn remove(&self, name: &str) -> Result<(), FsError> {
        self.files.lock().unwrap().remove(name);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, FsError> {
        let files = self.files.lock().unwrap();
        let mut out: Vec<String> = files
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        out.sort();
        Ok(out)
    }
}

/// Helper for callers that persist JSON-shaped records (`tx-*.jsn`,
/// `mv-*.jsn`, `bootstats.jsn`, ...).
pub fn load_json<T: serde::de::DeserializeOwned>(
    fs: &dyn FilesystemAdapter,
    name: &str,
) -> Result<Option<T>, FsError> {
    match fs.read(name)? {
        None => Ok(None),
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| FsError::Corrupt(format!("{name}: {e}"))),
    }
}

/// Helper for callers that persist JSON-shaped records.
pub fn save_json<T: serde::Serialize>(
    fs: &dyn FilesystemAdapter,
    name: &str,
    value: &T,
) -> Result<(), FsError> {
    let bytes = serde_json::to_vec(value).map_err(|e| FsError::Io(e.to_string()))?;
    fs.write(name, &bytes)
}
