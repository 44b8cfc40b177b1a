//! Configuration snapshots delivered on change.
//!
//! `observe` reads the configuration object once, then polls it and emits a
//! new `Snapshot` whenever the content digest changes. Anything that can send
//! on a `SnapshotReceiver`'s channel can stand in for it, which is how tests
//! inject configuration changes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::domain::Snapshot;
use crate::error::{Result, TabulatorError};
use crate::path::GcsPath;
use crate::storage::ContentStore;

/// Stream of configuration snapshots, newest last
pub type SnapshotReceiver = mpsc::Receiver<Arc<Snapshot>>;

/// Read and decode the configuration object at `path`.
pub async fn read_snapshot(store: &dyn ContentStore, path: &GcsPath) -> Result<Snapshot> {
    let data = store.open(path).await?;
    Snapshot::from_yaml(&data)
}

/// Start observing the configuration at `path`.
///
/// Fails if the first read fails. Later read errors are logged and retried on
/// the next poll. The observer stops when `cancel` fires or the receiver is
/// dropped.
pub async fn observe(
    store: Arc<dyn ContentStore>,
    path: GcsPath,
    interval: Duration,
    cancel: CancellationToken,
) -> Result<SnapshotReceiver> {
    if interval.is_zero() {
        return Err(TabulatorError::Config("config poll interval must be positive".to_string()));
    }

    log::debug!("Observing config {}...", path);
    let first = read_snapshot(store.as_ref(), &path).await?;
    let mut digest = first.digest.clone();

    let (tx, rx) = mpsc::channel(1);
    tx.send(Arc::new(first))
        .await
        .map_err(|_| TabulatorError::ChannelClosed("snapshot".to_string()))?;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let snap = match read_snapshot(store.as_ref(), &path).await {
                Ok(snap) => snap,
                Err(e) => {
                    tracing::warn!(config = %path, error = %e, "Failed to read config");
                    continue;
                }
            };
            if snap.digest == digest {
                continue;
            }

            digest = snap.digest.clone();
            tracing::info!(config = %path, digest = %digest, dashboards = snap.len(), "Config changed");
            tokio::select! {
                _ = cancel.cancelled() => return,
                sent = tx.send(Arc::new(snap)) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    });

    Ok(rx)
}
