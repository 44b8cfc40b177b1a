//! Local filesystem content store.
//!
//! Maps `gs://bucket/object` to `<root>/bucket/object`. Generations are the
//! file modification time in microseconds. Preconditions are checked before
//! the write, so writers in other processes can still race.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;

use super::traits::{ContentStore, WritePrecondition, check_precondition};
use crate::error::{Result, TabulatorError};
use crate::path::GcsPath;

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn local_path(&self, path: &GcsPath) -> Result<PathBuf> {
        let object = path.object()?;
        if object.is_empty() || object.split('/').any(|seg| seg == "..") {
            return Err(TabulatorError::Path(format!("{} is not a storable object", path)));
        }
        Ok(self.root.join(path.bucket()).join(object.as_ref()))
    }

    async fn generation(local: &Path) -> Result<Option<u64>> {
        match fs::metadata(local).await {
            Ok(meta) => {
                let modified = meta.modified()?;
                let micros = modified
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_micros() as u64)
                    .unwrap_or(0);
                Ok(Some(micros))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ContentStore for FsStore {
    async fn open(&self, path: &GcsPath) -> Result<Bytes> {
        let local = self.local_path(path)?;
        match fs::read(&local).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(TabulatorError::NotFound(path.to_string())),
            Err(e) => Err(TabulatorError::Storage(format!("read {}: {}", local.display(), e))),
        }
    }

    async fn upload(&self, path: &GcsPath, data: Bytes, precondition: WritePrecondition) -> Result<u64> {
        let local = self.local_path(path)?;
        check_precondition(path, precondition, Self::generation(&local).await?)?;

        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file_name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = local.with_file_name(format!(".{}.tmp-{}", file_name, std::process::id()));
        fs::write(&tmp, &data).await?;
        fs::rename(&tmp, &local).await?;

        Ok(Self::generation(&local).await?.unwrap_or(0))
    }
}
