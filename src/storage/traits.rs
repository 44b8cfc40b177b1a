//! Content store contract.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Result, TabulatorError};
use crate::path::GcsPath;

/// Condition a write must satisfy to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Write unconditionally.
    None,
    /// Write only if the object does not exist.
    DoesNotExist,
    /// Write only if the object's generation matches.
    MatchesGeneration(u64),
}

/// Object store holding grid and tab state.
///
/// Objects are opaque bytes addressed by `GcsPath`. Every successful write
/// returns the new generation of the object.
#[async_trait]
pub trait ContentStore: Send + Sync + 'static {
    /// Reads an entire object.
    ///
    /// Returns `TabulatorError::NotFound` if the object doesn't exist.
    async fn open(&self, path: &GcsPath) -> Result<Bytes>;

    /// Writes an object if `precondition` holds.
    ///
    /// Returns `TabulatorError::PreconditionFailed` if it doesn't.
    async fn upload(&self, path: &GcsPath, data: Bytes, precondition: WritePrecondition) -> Result<u64>;

    /// Copies an object byte-for-byte.
    async fn copy(&self, from: &GcsPath, to: &GcsPath) -> Result<u64> {
        let data = self.open(from).await?;
        self.upload(to, data, WritePrecondition::None).await
    }
}

/// Check `precondition` against the current generation (`None` = absent).
pub fn check_precondition(path: &GcsPath, precondition: WritePrecondition, current: Option<u64>) -> Result<()> {
    let ok = match (precondition, current) {
        (WritePrecondition::None, _) => true,
        (WritePrecondition::DoesNotExist, None) => true,
        (WritePrecondition::DoesNotExist, Some(_)) => false,
        (WritePrecondition::MatchesGeneration(want), Some(have)) => want == have,
        (WritePrecondition::MatchesGeneration(_), None) => false,
    };
    if ok {
        Ok(())
    } else {
        Err(TabulatorError::PreconditionFailed {
            path: path.to_string(),
            current: current.unwrap_or(0),
        })
    }
}
