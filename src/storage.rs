use crate::errors::{EnvToolError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Persisted key/value storage (one instance per storage scope)
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value`, or remove the key when `None`
    async fn update(&self, key: &str, value: Option<String>) -> Result<()>;
}

/// In-process store; state is lost on exit
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn update(&self, key: &str, value: Option<String>) -> Result<()> {
        let mut values = self.values.lock();
        match value {
            Some(v) => {
                values.insert(key.to_string(), v);
            }
            None => {
                values.remove(key);
            }
        }
        Ok(())
    }
}

/// Store backed by a single JSON object on disk.
///
/// Writes go to a temp file in the same directory and are renamed into
/// place, so readers never observe a half-written file.
#[derive(Debug)]
pub struct JsonFileStateStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let dir = self
            .path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        tokio::fs::create_dir_all(&dir).await?;

        let body = serde_json::to_vec_pretty(values)?;
        let target = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&body)?;
            tmp.flush()?;
            tmp.persist(&target).map_err(|e| EnvToolError::IoError(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| EnvToolError::InternalError(format!("state write task failed: {}", e)))??;

        debug!("[STATE] Wrote {} keys to {:?}", values.len(), self.path);
        Ok(())
    }
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.get(key).cloned())
    }

    async fn update(&self, key: &str, value: Option<String>) -> Result<()> {
        let _guard = self.lock.lock().await;
        // An unreadable state file is replaced rather than blocking writes.
        let mut values = match self.read_all().await {
            Ok(values) => values,
            Err(e) => {
                warn!("[STATE] Discarding unreadable state file {:?}: {}", self.path, e);
                BTreeMap::new()
            }
        };
        match value {
            Some(v) => {
                values.insert(key.to_string(), v);
            }
            None => {
                values.remove(key);
            }
        }
        self.write_all(&values).await
    }
}
