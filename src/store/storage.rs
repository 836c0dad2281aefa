//! Key-value persistence backends for the keyset store.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use super::StoreError;

/// Named JSON documents. A missing name is `Ok(None)`.
#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, name: &str, value: Value) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: KeyValueStorage + ?Sized> KeyValueStorage for Arc<S> {
    async fn get(&self, name: &str) -> Result<Option<Value>, StoreError> {
        (**self).get(name).await
    }

    async fn set(&self, name: &str, value: Value) -> Result<(), StoreError> {
        (**self).set(name, value).await
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    values: HashMap<String, Value>,
    writes: Vec<String>,
}

/// Storage that lives for the process. Records every write so callers can
/// check what a flush touched.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryInner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, name: &str, value: Value) -> Self {
        self.lock().values.insert(name.to_string(), value);
        self
    }

    pub fn value(&self, name: &str) -> Option<Value> {
        self.lock().values.get(name).cloned()
    }

    /// Names written so far, in order.
    pub fn written(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl KeyValueStorage for MemoryStorage {
    async fn get(&self, name: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.value(name))
    }

    async fn set(&self, name: &str, value: Value) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.values.insert(name.to_string(), value);
        inner.writes.push(name.to_string());
        Ok(())
    }
}

/// One `<name>.json` file per document under `base_path`.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    base_path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// File for `name`, sanitized so it cannot leave the base directory.
    pub fn document_path(&self, name: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", sanitize(name)))
    }

    fn io_error(name: &str, source: std::io::Error) -> StoreError {
        StoreError::Io {
            name: name.to_string(),
            source,
        }
    }
}

fn sanitize(name: &str) -> String {
    name.replace("..", "_").replace(['/', '\\', '\0'], "_")
}

#[async_trait]
impl KeyValueStorage for JsonFileStorage {
    async fn get(&self, name: &str) -> Result<Option<Value>, StoreError> {
        let path = self.document_path(name);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_error(name, e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Malformed {
                name: name.to_string(),
                source,
            })
    }

    /// Atomic write: temp file in the same directory, then rename.
    async fn set(&self, name: &str, value: Value) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| Self::io_error(name, e))?;

        let content = serde_json::to_string_pretty(&value).map_err(|source| StoreError::Encode {
            name: name.to_string(),
            source,
        })?;
        let target_path = self.document_path(name);
        let temp_path = self.base_path.join(format!(".{}.tmp", sanitize(name)));

        tokio::fs::write(&temp_path, content)
            .await
            .map_err(|e| Self::io_error(name, e))?;
        if let Err(e) = tokio::fs::rename(&temp_path, &target_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(Self::io_error(name, e));
        }

        tracing::debug!("Wrote {}", target_path.display());
        Ok(())
    }
}
