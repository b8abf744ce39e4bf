use std::path::Path;
use std::sync::Mutex;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::file::FALLBACK_DIR;
use super::{
    FileBackend, KeyValueBackend, MemoryBackend, PreferencesBackend, StorageFault,
    UnavailableBackend,
};

/// Uniform get/set over a primary backend with an automatic fallback.
///
/// Two faces:
/// - `get`/`set`/`remove` never fail. A fault on both backends is logged and
///   reads come back as `None`; storage is best effort.
/// - `try_get`/`try_set`/`try_remove` run the same fallback but hand the
///   final fault to the caller, for components that must surface it.
pub struct Storage {
    primary: Box<dyn KeyValueBackend>,
    fallback: Box<dyn KeyValueBackend>,
    last_fault: Mutex<Option<String>>,
}

impl Storage {
    pub fn new(primary: Box<dyn KeyValueBackend>, fallback: Box<dyn KeyValueBackend>) -> Self {
        Self {
            primary,
            fallback,
            last_fault: Mutex::new(None),
        }
    }

    /// Open the on-disk stores under `dir`. Never fails: if the directory
    /// can't be created the primary is marked unavailable and everything
    /// lands in memory.
    pub fn open(dir: &Path) -> Self {
        match std::fs::create_dir_all(dir) {
            Ok(()) => {
                debug!(dir = %dir.display(), "Opening storage");
                Self::new(
                    Box::new(PreferencesBackend::new(dir)),
                    Box::new(FileBackend::new(dir.join(FALLBACK_DIR))),
                )
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Storage directory unavailable, using memory");
                Self::new(
                    Box::new(UnavailableBackend::new(e.to_string())),
                    Box::new(MemoryBackend::new()),
                )
            }
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()), Box::new(MemoryBackend::new()))
    }

    /// Message of the most recent primary-backend fault, if any.
    pub fn last_fault(&self) -> Option<String> {
        self.last_fault
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn note_fault(&self, op: &str, key: &str, fault: &StorageFault) {
        warn!(
            backend = self.primary.name(),
            fallback = self.fallback.name(),
            op = op,
            key = key,
            error = %fault,
            "Primary storage failed, retrying on fallback"
        );
        *self.last_fault.lock().unwrap_or_else(|e| e.into_inner()) = Some(fault.to_string());
    }

    pub async fn try_get(&self, key: &str) -> Result<Option<String>, StorageFault> {
        match self.primary.get(key).await {
            Ok(value) => Ok(value),
            Err(fault) => {
                self.note_fault("get", key, &fault);
                self.fallback.get(key).await
            }
        }
    }

    pub async fn try_set(&self, key: &str, value: &str) -> Result<(), StorageFault> {
        match self.primary.set(key, value).await {
            Ok(()) => Ok(()),
            Err(fault) => {
                self.note_fault("set", key, &fault);
                self.fallback.set(key, value).await
            }
        }
    }

    pub async fn try_remove(&self, key: &str) -> Result<(), StorageFault> {
        match self.primary.remove(key).await {
            Ok(()) => Ok(()),
            Err(fault) => {
                self.note_fault("remove", key, &fault);
                self.fallback.remove(key).await
            }
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = key, error = %e, "Storage read failed on all backends");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str) {
        if let Err(e) = self.try_set(key, value).await {
            warn!(key = key, error = %e, "Storage write failed on all backends");
        }
    }

    pub async fn remove(&self, key: &str) {
        if let Err(e) = self.try_remove(key).await {
            warn!(key = key, error = %e, "Storage remove failed on all backends");
        }
    }

    /// Read and deserialize a JSON value, propagating faults.
    pub async fn try_get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageFault> {
        match self.try_get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn try_set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageFault> {
        let raw = serde_json::to_string(value)?;
        self.try_set(key, &raw).await
    }
}
