//! Persisted key-identifier storage.
//!
//! The session keeps exactly one string slot. Its presence at startup is taken
//! as proof of a prior successful attestation.

use crate::error::{AttestationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Named string slots that survive process restarts.
pub trait IdentifierStore: Send + Sync {
    /// Reads slot `name`.
    fn get(&self, name: &str) -> Result<Option<String>>;

    /// Writes slot `name`, replacing any previous value.
    fn set(&self, name: &str, value: &str) -> Result<()>;

    /// Clears slot `name`. Clearing an empty slot succeeds.
    fn remove(&self, name: &str) -> Result<()>;
}

/// Process-local store. Clones share the same slots.
#[derive(Debug, Clone, Default)]
pub struct MemoryIdentifierStore {
    slots: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemoryIdentifierStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentifierStore for MemoryIdentifierStore {
    fn get(&self, name: &str) -> Result<Option<String>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        Ok(slots.get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.remove(name);
        Ok(())
    }
}

const STORE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    slots: BTreeMap<String, String>,
}

/// JSON-file store holding a versioned map of `name -> value` slots.
///
/// Writes go to a sibling temporary file that is renamed over the target, so a
/// crash leaves either the old or the new map on disk.
#[derive(Debug)]
pub struct FileIdentifierStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileIdentifierStore {
    /// Uses `path` as the backing file. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Backing file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => {
                let file: StoreFile = serde_json::from_slice(&bytes).map_err(|e| {
                    AttestationError::Storage(format!("corrupt store {}: {}", self.path.display(), e))
                })?;
                if file.version != STORE_FORMAT_VERSION {
                    return Err(AttestationError::Storage(format!(
                        "unsupported store version {} in {}",
                        file.version,
                        self.path.display()
                    )));
                }
                Ok(file.slots)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(AttestationError::Storage(format!(
                "read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn save(&self, slots: BTreeMap<String, String>) -> Result<()> {
        let file = StoreFile {
            version: STORE_FORMAT_VERSION,
            slots,
        };
        let bytes = serde_json::to_vec_pretty(&file)
            .map_err(|e| AttestationError::Storage(format!("encode: {}", e)))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes)
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|e| AttestationError::Storage(format!("write {}: {}", self.path.display(), e)))
    }

    fn update(&self, apply: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut slots = self.load()?;
        apply(&mut slots);
        self.save(slots)
    }
}

impl IdentifierStore for FileIdentifierStore {
    fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(name))
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        self.update(|slots| {
            slots.insert(name.to_string(), value.to_string());
        })
    }

    fn remove(&self, name: &str) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        self.update(|slots| {
            slots.remove(name);
        })
    }
}
