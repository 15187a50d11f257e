//! Storage backends for the persisted memory index
//!
//! The store only needs whole-file reads and writes plus directory creation,
//! so the backend contract is deliberately small. Keys are `/`-separated paths
//! relative to the backend root (e.g. `global_memory/index.json`).

use crate::error::{MemoryError, MemoryResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whole-file storage used to persist the memory index
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read a file; `Ok(None)` when it does not exist
    async fn read(&self, key: &str) -> MemoryResult<Option<Vec<u8>>>;

    /// Replace a file's contents
    async fn write(&self, key: &str, bytes: &[u8]) -> MemoryResult<()>;

    /// Create a directory and its parents
    async fn create_dir_all(&self, key: &str) -> MemoryResult<()>;

    /// Identifies the storage location; at most one store may be open per location
    fn location(&self) -> String;
}

/// Filesystem backend rooted at a directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Create a backend rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn read(&self, key: &str) -> MemoryResult<Option<Vec<u8>>> {
        let path = self.resolve(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MemoryError::storage_path("read", &path, e)),
        }
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> MemoryResult<()> {
        let path = self.resolve(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MemoryError::storage_path("create_dir", parent, e))?;
        }

        // Write beside the target and rename so readers never observe a torn index
        // Each write gets its own temp file so concurrent writers never share one
        let mut tmp = path.clone().into_os_string();
        tmp.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| MemoryError::storage_path("write", &tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(MemoryError::storage_path("rename", &path, e));
        }

        Ok(())
    }

    async fn create_dir_all(&self, key: &str) -> MemoryResult<()> {
        let path = self.resolve(key);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| MemoryError::storage_path("create_dir", &path, e))
    }

    fn location(&self) -> String {
        let root = std::fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone());
        format!("file://{}", root.display())
    }
}

/// In-process backend for tests and embedding
#[derive(Debug)]
pub struct InMemoryStorage {
    id: uuid::Uuid,
    files: Mutex<HashMap<String, Vec<u8>>>,
    dirs: Mutex<HashSet<String>>,
    fail_writes: AtomicBool,
}

impl InMemoryStorage {
    /// Create an empty backend with a unique location
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            files: Mutex::new(HashMap::new()),
            dirs: Mutex::new(HashSet::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Put raw bytes under a key
    pub fn put(&self, key: &str, bytes: impl Into<Vec<u8>>) {
        self.files.lock().insert(key.to_string(), bytes.into());
    }

    /// Raw bytes under a key
    pub fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        self.files.lock().get(key).cloned()
    }

    /// Whether a directory was created
    pub fn has_dir(&self, key: &str) -> bool {
        self.dirs.lock().contains(key)
    }

    /// Make subsequent writes fail with an I/O error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    async fn read(&self, key: &str) -> MemoryResult<Option<Vec<u8>>> {
        Ok(self.get_raw(key))
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> MemoryResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MemoryError::storage(
                format!("write {}", key),
                std::io::Error::new(std::io::ErrorKind::Other, "simulated write failure"),
            ));
        }
        self.put(key, bytes.to_vec());
        Ok(())
    }

    async fn create_dir_all(&self, key: &str) -> MemoryResult<()> {
        self.dirs.lock().insert(key.to_string());
        Ok(())
    }

    fn location(&self) -> String {
        format!("memory://{}", self.id)
    }
}
