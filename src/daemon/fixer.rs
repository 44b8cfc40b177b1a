//! Fixers: background tasks that pull dashboards forward in the queue.
//!
//! A fixer is started for every configuration snapshot and runs until its
//! token is cancelled, which happens before the next snapshot is applied.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::Snapshot;
use crate::error::Result;
use crate::scheduler::DashboardQueue;

/// Everything a fixer may use during one configuration generation
#[derive(Clone)]
pub struct FixerContext {
    pub queue: Arc<DashboardQueue>,
    pub snapshot: Arc<Snapshot>,
    pub cancel: CancellationToken,
}

pub type Fixer = Arc<dyn Fn(FixerContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async function as a `Fixer`.
pub fn fixer<F, Fut>(f: F) -> Fixer
where
    F: Fn(FixerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// Force every dashboard reading an updated test group to run now.
///
/// Test group names arrive on `updates`, typically from whatever watches the
/// upstream grid writer.
pub fn on_group_update(updates: broadcast::Sender<String>) -> Fixer {
    fixer(move |ctx: FixerContext| {
        let mut rx = updates.subscribe();
        async move {
            loop {
                let received = tokio::select! {
                    _ = ctx.cancel.cancelled() => return Ok(()),
                    received = rx.recv() => received,
                };
                match received {
                    Ok(group) => {
                        for name in ctx.snapshot.dashboards_reading(&group) {
                            match ctx.queue.reschedule(&name, Instant::now(), true) {
                                Ok(()) => tracing::debug!(dashboard = %name, group = %group, "Group updated, running dashboard now"),
                                Err(e) => tracing::debug!(dashboard = %name, error = %e, "Skipped inactive dashboard"),
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Missed group updates");
                    }
                    Err(RecvError::Closed) => return Ok(()),
                }
            }
        }
    })
}
