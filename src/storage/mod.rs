//! Byte storage for model artifacts and metrics documents.
//!
//! The engine only needs `save`/`load` by an opaque key; which backend holds
//! the bytes is the caller's choice.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use crate::error::{ClassifierError, Result};

pub trait BlobStore: Send + Sync {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<()>;

    fn load(&self, key: &str) -> Result<Vec<u8>>;

    fn delete(&self, key: &str) -> Result<()>;

    fn exists(&self, key: &str) -> bool;
}

fn storage_error(key: &str, source: io::Error) -> ClassifierError {
    ClassifierError::Storage {
        key: key.to_string(),
        source,
    }
}

/// Stores each key as a file below a root directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.is_empty() || escapes {
            return Err(storage_error(
                key,
                io::Error::new(io::ErrorKind::InvalidInput, "key must be a relative path"),
            ));
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for LocalStore {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| storage_error(key, e))?;
        }
        // Write beside the target and rename so readers never see half a blob
        let mut staged = path.clone().into_os_string();
        staged.push(".partial");
        let staged = PathBuf::from(staged);
        fs::write(&staged, bytes).map_err(|e| storage_error(key, e))?;
        if let Err(e) = fs::rename(&staged, &path) {
            let _ = fs::remove_file(&staged);
            return Err(storage_error(key, e));
        }
        tracing::debug!(key, bytes = bytes.len(), path = %path.display(), "Stored blob");
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        fs::read(&path).map_err(|e| storage_error(key, e))
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error(key, e)),
        }
    }

    fn exists(&self, key: &str) -> bool {
        self.path_for(key).map(|p| p.is_file()).unwrap_or(false)
    }
}

/// In-process store, mainly for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let blobs = self.blobs.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = blobs.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl BlobStore for MemoryStore {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut blobs = self.blobs.write().unwrap_or_else(|e| e.into_inner());
        blobs.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Vec<u8>> {
        let blobs = self.blobs.read().unwrap_or_else(|e| e.into_inner());
        blobs
            .get(key)
            .cloned()
            .ok_or_else(|| storage_error(key, io::Error::from(io::ErrorKind::NotFound)))
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut blobs = self.blobs.write().unwrap_or_else(|e| e.into_inner());
        blobs.remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        let blobs = self.blobs.read().unwrap_or_else(|e| e.into_inner());
        blobs.contains_key(key)
    }
}
