//! On-disk backends.
//!
//! `PreferencesBackend` keeps every key in one JSON document, which is the
//! structured store the adapter prefers. `FileBackend` is the simpler
//! fallback: one file per key.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{KeyValueBackend, StorageFault};

/// Document file name inside the storage directory.
pub const PREFERENCES_FILE: &str = "preferences.json";

/// Directory of the one-file-per-key fallback.
pub const FALLBACK_DIR: &str = "kv";

/// Write `contents` next to `path` and rename it into place, so readers never
/// see a half-written file.
async fn write_atomic(key: &str, path: &Path, contents: &str) -> Result<(), StorageFault> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageFault::io(key, e))?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| StorageFault::io(key, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StorageFault::io(key, e))
}

pub struct PreferencesBackend {
    path: PathBuf,
    // Loaded on first access, then kept in memory and rewritten on each mutation.
    document: Mutex<Option<BTreeMap<String, String>>>,
}

impl PreferencesBackend {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(PREFERENCES_FILE),
            document: Mutex::new(None),
        }
    }

    async fn load_document(&self, key: &str) -> Result<BTreeMap<String, String>, StorageFault> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| StorageFault::Corrupt(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No preferences document yet");
                Ok(BTreeMap::new())
            }
            Err(e) => Err(StorageFault::io(key, e)),
        }
    }

    async fn mutate(
        &self,
        key: &str,
        apply: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), StorageFault> {
        let mut guard = self.document.lock().await;
        let mut document = match guard.take() {
            Some(doc) => doc,
            None => self.load_document(key).await?,
        };
        apply(&mut document);
        let contents = serde_json::to_string(&document)?;
        let written = write_atomic(key, &self.path, &contents).await;
        // Keep the in-memory copy either way; a failed write is reported to
        // the caller, who will retry on the fallback.
        *guard = Some(document);
        written
    }
}

#[async_trait]
impl KeyValueBackend for PreferencesBackend {
    fn name(&self) -> &'static str {
        "preferences"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageFault> {
        let mut guard = self.document.lock().await;
        if guard.is_none() {
            *guard = Some(self.load_document(key).await?);
        }
        Ok(guard.as_ref().and_then(|doc| doc.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageFault> {
        self.mutate(key, |doc| {
            doc.insert(key.to_string(), value.to_string());
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageFault> {
        self.mutate(key, |doc| {
            doc.remove(key);
        })
        .await
    }
}

pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Keys may contain `/` and `:`; escape anything that isn't safe in a
    /// file name so distinct keys never collide.
    fn file_name(key: &str) -> String {
        let mut name = String::with_capacity(key.len() + 4);
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
                name.push(byte as char);
            } else {
                let _ = write!(name, "%{:02X}", byte);
            }
        }
        name.push_str(".val");
        name
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(Self::file_name(key))
    }
}

#[async_trait]
impl KeyValueBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageFault> {
        match tokio::fs::read_to_string(self.path(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageFault::io(key, e)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageFault> {
        write_atomic(key, &self.path(key), value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageFault> {
        match tokio::fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageFault::io(key, e)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Fresh scratch directory under the system temp dir.
    pub(crate) fn scratch_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "examsync-{}-{}-{}",
            label,
            std::process::id(),
            rand::random::<u64>()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_file_name_escapes_separators() {
        assert_eq!(FileBackend::file_name("examProgress"), "examProgress.val");
        assert_eq!(
            FileBackend::file_name("questions_cache:a/b"),
            "questions_cache%3Aa%2Fb.val"
        );
        assert_ne!(FileBackend::file_name("a/b"), FileBackend::file_name("a_b"));
    }

    #[tokio::test]
    async fn test_preferences_persist_across_instances() {
        let dir = scratch_dir("prefs");
        let backend = PreferencesBackend::new(&dir);
        backend.set("alpha", "1").await.unwrap();
        backend.set("beta", "2").await.unwrap();
        backend.remove("alpha").await.unwrap();

        let reopened = PreferencesBackend::new(&dir);
        assert_eq!(reopened.get("alpha").await.unwrap(), None);
        assert_eq!(reopened.get("beta").await.unwrap().as_deref(), Some("2"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_corrupt_preferences_document_is_a_fault() {
        let dir = scratch_dir("corrupt");
        std::fs::write(dir.join(PREFERENCES_FILE), "{not json").unwrap();
        let backend = PreferencesBackend::new(&dir);
        assert!(matches!(backend.get("x").await, Err(StorageFault::Corrupt(_))));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_file_backend_roundtrip_and_remove() {
        let dir = scratch_dir("files");
        let backend = FileBackend::new(dir.join(FALLBACK_DIR));
        assert_eq!(backend.get("missing").await.unwrap(), None);

        backend.set("questions_cache:a/b/1", "[]").await.unwrap();
        assert_eq!(backend.get("questions_cache:a/b/1").await.unwrap().as_deref(), Some("[]"));

        backend.remove("questions_cache:a/b/1").await.unwrap();
        backend.remove("questions_cache:a/b/1").await.unwrap();
        assert_eq!(backend.get("questions_cache:a/b/1").await.unwrap(), None);
        let _ = std::fs::remove_dir_all(dir);
    }
}
