//! Coordinator - owns the queue's view of the configuration
//!
//! The coordinator:
//! - Seeds the queue from the first snapshot before any work is dispatched
//! - Reseeds it and restarts fixers whenever the configuration changes
//! - Reports scheduling lag on a steady tick

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::daemon::fixer::{Fixer, FixerContext};
use crate::domain::Snapshot;
use crate::error::{Result, TabulatorError};
use crate::metrics::Metrics;
use crate::scheduler::DashboardQueue;
use crate::snapshot::SnapshotReceiver;

/// Configuration for the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Interval between lag reports
    pub tick_interval: Duration,
    /// Dashboards to keep fresh; empty means all
    pub allowed_dashboards: Vec<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            allowed_dashboards: Vec::new(),
        }
    }
}

/// Fixers started for one snapshot, cancelled together
struct FixerGeneration {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl FixerGeneration {
    fn launch(fixers: &[Fixer], queue: &Arc<DashboardQueue>, snapshot: Arc<Snapshot>, parent: &CancellationToken) -> Self {
        let cancel = parent.child_token();
        let mut tasks = JoinSet::new();
        for (index, fix) in fixers.iter().enumerate() {
            let running = fix(FixerContext {
                queue: Arc::clone(queue),
                snapshot: Arc::clone(&snapshot),
                cancel: cancel.clone(),
            });
            tasks.spawn(async move {
                if let Err(e) = running.await
                    && !e.is_cancelled()
                {
                    tracing::warn!(fixer = index, error = %e, "Fixer failed");
                }
            });
        }
        if !fixers.is_empty() {
            tracing::info!(fixers = fixers.len(), digest = %snapshot.digest, "Started fixers");
        }
        Self { cancel, tasks }
    }

    /// Cancel every fixer and wait for all of them to return.
    async fn stop(mut self) {
        self.cancel.cancel();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = ?e, "Fixer task panicked");
            }
        }
    }
}

pub struct Coordinator {
    config: CoordinatorConfig,
    queue: Arc<DashboardQueue>,
    snapshots: SnapshotReceiver,
    current: watch::Sender<Arc<Snapshot>>,
    fixers: Vec<Fixer>,
    metrics: Arc<Metrics>,
}

impl Coordinator {
    /// Wait for the first snapshot and seed the queue from it.
    ///
    /// Returns the coordinator and a receiver that always holds the snapshot
    /// the queue was last seeded from.
    pub async fn start(
        config: CoordinatorConfig,
        queue: Arc<DashboardQueue>,
        mut snapshots: SnapshotReceiver,
        fixers: Vec<Fixer>,
        metrics: Arc<Metrics>,
    ) -> Result<(Self, watch::Receiver<Arc<Snapshot>>)> {
        if config.tick_interval.is_zero() {
            return Err(TabulatorError::Config("tick interval must be positive".to_string()));
        }
        let first = snapshots
            .recv()
            .await
            .ok_or_else(|| TabulatorError::ChannelClosed("configuration closed before the first snapshot".to_string()))?;

        let (current, receiver) = watch::channel(Arc::clone(&first));
        let coordinator = Self {
            config,
            queue,
            snapshots,
            current,
            fixers,
            metrics,
        };
        coordinator.apply(first);
        Ok((coordinator, receiver))
    }

    /// Publish `snapshot` and reseed the queue with its active dashboards.
    fn apply(&self, snapshot: Arc<Snapshot>) {
        let names = snapshot.active_dashboards(&self.config.allowed_dashboards);
        self.current.send_replace(snapshot);
        self.queue.seed(&names, Instant::now());
        tracing::info!(dashboards = names.len(), "Seeded dashboard queue");
    }

    /// Run until `cancel` fires, then stop the fixers.
    pub async fn run(mut self, cancel: CancellationToken) {
        let first = Arc::clone(&self.current.borrow());
        let mut generation = FixerGeneration::launch(&self.fixers, &self.queue, first, &cancel);
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut source_open = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.snapshots.recv(), if source_open => match received {
                    Some(snapshot) => {
                        tracing::info!(
                            digest = %snapshot.digest,
                            observed_at = %snapshot.observed_at,
                            dashboards = snapshot.len(),
                            "Configuration changed"
                        );
                        generation.stop().await;
                        self.apply(Arc::clone(&snapshot));
                        generation = FixerGeneration::launch(&self.fixers, &self.queue, snapshot, &cancel);
                    }
                    None => {
                        tracing::warn!("Configuration source closed, keeping the last snapshot");
                        source_open = false;
                    }
                },
                _ = ticker.tick() => {
                    self.report_lag();
                }
            }
        }

        generation.stop().await;
        tracing::info!("Coordinator stopped");
    }

    /// Sample the queue and record how far behind schedule it is.
    pub fn report_lag(&self) -> Duration {
        let status = self.queue.status();
        let delay = status.delay(Instant::now());
        self.metrics.delay_seconds.set(delay);
        tracing::debug!(
            depth = status.depth,
            next = ?status.next,
            delay_secs = delay.as_secs_f64(),
            "Calculated metrics"
        );
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::fixer::fixer;
    use crate::domain::{Dashboard, Tab};
    use crate::metrics::RecordedMetrics;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn snapshot(names: &[&str]) -> Arc<Snapshot> {
        let dashboards = names.iter().map(|n| Dashboard::new(*n).with_tab(Tab::new("t", "g")));
        Arc::new(Snapshot::from_dashboards(dashboards).unwrap())
    }

    fn config(allowed: &[&str]) -> CoordinatorConfig {
        CoordinatorConfig {
            tick_interval: Duration::from_secs(60),
            allowed_dashboards: allowed.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Fixer that reports each start and tracks how many run at once.
    fn counting_fixer(started: mpsc::UnboundedSender<usize>, live: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> Fixer {
        fixer(move |ctx: FixerContext| {
            let started = started.clone();
            let live = live.clone();
            let peak = peak.clone();
            async move {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                let _ = started.send(ctx.snapshot.len());
                ctx.cancel.cancelled().await;
                live.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_start_seeds_queue() {
        let (tx, rx) = mpsc::channel(1);
        tx.send(snapshot(&["d1", "d2"])).await.unwrap();
        let queue = Arc::new(DashboardQueue::new());

        let (_coordinator, current) = Coordinator::start(config(&[]), queue.clone(), rx, vec![], Arc::new(Metrics::new()))
            .await
            .unwrap();

        assert_eq!(queue.len(), 2);
        assert_eq!(current.borrow().len(), 2);
    }

    #[tokio::test]
    async fn test_start_applies_allow_list() {
        let (tx, rx) = mpsc::channel(1);
        tx.send(snapshot(&["d1", "d2", "d3"])).await.unwrap();
        let queue = Arc::new(DashboardQueue::new());

        Coordinator::start(config(&["d2", "missing"]), queue.clone(), rx, vec![], Arc::new(Metrics::new()))
            .await
            .unwrap();

        assert_eq!(queue.len(), 1);
        assert!(queue.contains("d2"));
    }

    #[tokio::test]
    async fn test_start_without_snapshot_fails() {
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        let result = Coordinator::start(
            config(&[]),
            Arc::new(DashboardQueue::new()),
            rx,
            vec![],
            Arc::new(Metrics::new()),
        )
        .await;
        assert!(matches!(result, Err(TabulatorError::ChannelClosed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_change_reseeds_and_restarts_fixers() {
        let (tx, rx) = mpsc::channel(1);
        tx.send(snapshot(&["d1", "d2", "d3"])).await.unwrap();
        let queue = Arc::new(DashboardQueue::new());
        let (started_tx, mut started) = mpsc::unbounded_channel();
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let fixers = vec![counting_fixer(started_tx, live.clone(), peak.clone())];

        let (coordinator, current) = Coordinator::start(config(&[]), queue.clone(), rx, fixers, Arc::new(Metrics::new()))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(coordinator.run(cancel.clone()));

        assert_eq!(started.recv().await, Some(3));
        tx.send(snapshot(&["d1", "d2"])).await.unwrap();
        assert_eq!(started.recv().await, Some(2));

        assert_eq!(queue.len(), 2);
        assert!(queue.reschedule("d3", Instant::now(), false).is_err());
        assert_ne!(queue.status().next.as_deref(), Some("d3"));
        assert_eq!(current.borrow().len(), 2);
        assert_eq!(peak.load(Ordering::SeqCst), 1);

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_survives_closed_source() {
        let (tx, rx) = mpsc::channel(1);
        tx.send(snapshot(&["d1"])).await.unwrap();
        let queue = Arc::new(DashboardQueue::new());
        let (coordinator, _current) = Coordinator::start(config(&[]), queue.clone(), rx, vec![], Arc::new(Metrics::new()))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(coordinator.run(cancel.clone()));

        drop(tx);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(!task.is_finished());
        assert_eq!(queue.len(), 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_reports_lag() {
        let (tx, rx) = mpsc::channel(1);
        tx.send(snapshot(&["d1"])).await.unwrap();
        let queue = Arc::new(DashboardQueue::new());
        let recorded = RecordedMetrics::new();
        let (coordinator, _current) = Coordinator::start(config(&[]), queue.clone(), rx, vec![], recorded.metrics())
            .await
            .unwrap();

        // Nothing drains the queue, so d1 falls further behind every tick.
        let cancel = CancellationToken::new();
        let task = tokio::spawn(coordinator.run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(recorded.summary().delay_secs, Some(120.0));

        cancel.cancel();
        task.await.unwrap();
        drop(tx);
    }
}
