use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageFault {
    #[error("I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt storage document: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl StorageFault {
    pub fn io(key: &str, source: std::io::Error) -> Self {
        StorageFault::Io {
            key: key.to_string(),
            source,
        }
    }
}

/// A string-to-string store. Backends know nothing about what keys mean.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Short name for log lines.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, StorageFault>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageFault>;

    async fn remove(&self, key: &str) -> Result<(), StorageFault>;
}

/// Stand-in for a backend that failed to initialize. Every call fails, so
/// the adapter always lands on its fallback.
#[derive(Debug, Clone)]
pub struct UnavailableBackend {
    reason: String,
}

impl UnavailableBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl KeyValueBackend for UnavailableBackend {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, StorageFault> {
        Err(StorageFault::Unavailable(self.reason.clone()))
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), StorageFault> {
        Err(StorageFault::Unavailable(self.reason.clone()))
    }

    async fn remove(&self, _key: &str) -> Result<(), StorageFault> {
        Err(StorageFault::Unavailable(self.reason.clone()))
    }
}
