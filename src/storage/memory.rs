//! In-memory content store.
//!
//! Thread-safe via `RwLock`. Used by tests and dry runs; not durable.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use super::traits::{ContentStore, WritePrecondition, check_precondition};
use crate::error::{Result, TabulatorError};
use crate::path::GcsPath;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<GcsPath, StoredObject>>,
    broken: RwLock<HashSet<GcsPath>>,
    uploads: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object directly, bypassing preconditions and the upload count.
    pub fn insert(&self, path: &GcsPath, data: impl Into<Bytes>) {
        if let Ok(mut objects) = self.objects.write() {
            let generation = objects.get(path).map_or(1, |o| o.generation + 1);
            objects.insert(
                path.clone(),
                StoredObject {
                    data: data.into(),
                    generation,
                },
            );
        }
    }

    pub fn get(&self, path: &GcsPath) -> Option<Bytes> {
        self.objects.read().ok()?.get(path).map(|o| o.data.clone())
    }

    pub fn contains(&self, path: &GcsPath) -> bool {
        self.get(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of writes accepted through `upload` or `copy`.
    pub fn uploads(&self) -> u64 {
        self.uploads.load(Ordering::Relaxed)
    }

    /// Make every read and write of `path` fail with a storage error.
    pub fn break_path(&self, path: &GcsPath) {
        if let Ok(mut broken) = self.broken.write() {
            broken.insert(path.clone());
        }
    }

    fn check_broken(&self, path: &GcsPath) -> Result<()> {
        let broken = self.broken.read().map_err(|_| poisoned())?;
        if broken.contains(path) {
            return Err(TabulatorError::Storage(format!("{} is unavailable", path)));
        }
        Ok(())
    }
}

fn poisoned() -> TabulatorError {
    TabulatorError::Storage("lock poisoned".to_string())
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn open(&self, path: &GcsPath) -> Result<Bytes> {
        self.check_broken(path)?;
        let objects = self.objects.read().map_err(|_| poisoned())?;
        objects
            .get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| TabulatorError::NotFound(path.to_string()))
    }

    async fn upload(&self, path: &GcsPath, data: Bytes, precondition: WritePrecondition) -> Result<u64> {
        self.check_broken(path)?;
        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        let current = objects.get(path).map(|o| o.generation);
        check_precondition(path, precondition, current)?;
        let generation = current.map_or(1, |g| g + 1);
        objects.insert(path.clone(), StoredObject { data, generation });
        drop(objects);
        self.uploads.fetch_add(1, Ordering::Relaxed);
        Ok(generation)
    }
}
