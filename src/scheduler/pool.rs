//! Worker pool that tabulates dispatched dashboards.
//!
//! Workers share one receiver and exit once it is closed and empty. A
//! dashboard never runs twice at once: a dispatch that arrives while it is
//! running is remembered and turned into a prompt re-run once the current
//! run finishes.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::Result;
use crate::metrics::Metrics;
use crate::scheduler::queue::{DashboardQueue, deadline};

/// Unit of work run for each dispatched dashboard.
#[async_trait]
pub trait DashboardProcessor: Send + Sync + 'static {
    async fn process(&self, dashboard: &str, cancel: &CancellationToken) -> Result<()>;
}

#[derive(Debug, Default)]
struct InFlightSets {
    active: HashSet<String>,
    waiting: HashSet<String>,
}

/// Tracks which dashboards are running and which were re-requested meanwhile.
#[derive(Debug, Default)]
pub struct InFlight {
    sets: Mutex<InFlightSets>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InFlightSets> {
        self.sets.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim `name`. Returns false, and records the request, if it is already running.
    pub fn begin(&self, name: &str) -> bool {
        let mut sets = self.lock();
        if sets.active.insert(name.to_string()) {
            true
        } else {
            sets.waiting.insert(name.to_string());
            false
        }
    }

    /// Release `name`. Returns true if it was requested again while running.
    pub fn finish(&self, name: &str) -> bool {
        let mut sets = self.lock();
        sets.active.remove(name);
        sets.waiting.remove(name)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.lock().active.contains(name)
    }

    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }
}

pub struct WorkerPool {
    concurrency: usize,
    cadence: Duration,
    queue: Arc<DashboardQueue>,
    processor: Arc<dyn DashboardProcessor>,
    metrics: Arc<Metrics>,
    in_flight: InFlight,
}

impl WorkerPool {
    pub fn new(
        concurrency: usize,
        cadence: Duration,
        queue: Arc<DashboardQueue>,
        processor: Arc<dyn DashboardProcessor>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            concurrency,
            cadence,
            queue,
            processor,
            metrics,
            in_flight: InFlight::new(),
        }
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Spawn `concurrency` workers reading from `names`.
    pub fn spawn(self: &Arc<Self>, names: async_channel::Receiver<String>, cancel: CancellationToken) -> JoinSet<()> {
        let mut workers = JoinSet::new();
        for worker in 0..self.concurrency {
            let pool = Arc::clone(self);
            let names = names.clone();
            let cancel = cancel.clone();
            workers.spawn(async move {
                while let Ok(name) = names.recv().await {
                    pool.dispatch(&name, &cancel).await;
                }
                tracing::debug!(worker, "Worker stopped");
            });
        }
        tracing::info!(workers = self.concurrency, "Started workers");
        workers
    }

    /// Run the processor for one dispatch of `name`.
    pub async fn dispatch(&self, name: &str, cancel: &CancellationToken) {
        if !self.in_flight.begin(name) {
            tracing::debug!(dashboard = %name, "Dashboard already running, will run again when done");
            return;
        }

        let span = tracing::info_span!("tabulate", dashboard = %name);
        let attempt = self.metrics.update_state.start();
        match self.processor.process(name, cancel).instrument(span).await {
            Ok(()) => {
                attempt.success();
                tracing::info!(dashboard = %name, "Built tab state");
            }
            Err(e) if e.is_cancelled() => {
                tracing::debug!(dashboard = %name, "Tabulation cancelled");
            }
            Err(e) => {
                attempt.fail();
                let retry = self.cadence / 2;
                self.reschedule(name, deadline(Instant::now(), retry));
                tracing::error!(
                    dashboard = %name,
                    error = %e,
                    retry_secs = retry.as_secs_f64(),
                    "Failed to generate tab state"
                );
            }
        }

        if self.in_flight.finish(name) {
            self.reschedule(name, Instant::now());
        }
    }

    fn reschedule(&self, name: &str, when: Instant) {
        if let Err(e) = self.queue.reschedule(name, when, false) {
            tracing::debug!(dashboard = %name, error = %e, "Skipped reschedule");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TabulatorError;
    use crate::metrics::RecordedMetrics;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Processor that blocks on a semaphore and records concurrency.
    struct Gated {
        gate: Semaphore,
        running: AtomicUsize,
        max_running: AtomicUsize,
        runs: AtomicUsize,
        fail: bool,
    }

    impl Gated {
        fn new(permits: usize, fail: bool) -> Self {
            Self {
                gate: Semaphore::new(permits),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
                runs: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl DashboardProcessor for Gated {
        async fn process(&self, dashboard: &str, _cancel: &CancellationToken) -> Result<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            let permit = self.gate.acquire().await;
            drop(permit);
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TabulatorError::Storage(format!("{} unavailable", dashboard)));
            }
            Ok(())
        }
    }

    struct Cancelled;

    #[async_trait]
    impl DashboardProcessor for Cancelled {
        async fn process(&self, _dashboard: &str, _cancel: &CancellationToken) -> Result<()> {
            Err(TabulatorError::Cancelled)
        }
    }

    fn pool(processor: Arc<dyn DashboardProcessor>, queue: Arc<DashboardQueue>, recorded: &RecordedMetrics) -> Arc<WorkerPool> {
        pool_with_cadence(processor, queue, recorded, Duration::from_secs(60))
    }

    fn pool_with_cadence(
        processor: Arc<dyn DashboardProcessor>,
        queue: Arc<DashboardQueue>,
        recorded: &RecordedMetrics,
        cadence: Duration,
    ) -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(2, cadence, queue, processor, recorded.metrics()))
    }

    #[test]
    fn test_in_flight_begin_finish() {
        let in_flight = InFlight::new();
        assert!(in_flight.begin("a"));
        assert!(in_flight.is_active("a"));
        assert!(!in_flight.finish("a"));
        assert!(!in_flight.is_active("a"));
    }

    #[test]
    fn test_in_flight_remembers_duplicate() {
        let in_flight = InFlight::new();
        assert!(in_flight.begin("a"));
        assert!(!in_flight.begin("a"));
        assert!(!in_flight.begin("a"));
        assert_eq!(in_flight.active_count(), 1);
        assert!(in_flight.finish("a"));
        assert!(in_flight.begin("a"));
        assert!(!in_flight.finish("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_counts() {
        let queue = Arc::new(DashboardQueue::new());
        queue.seed(["a"], Instant::now());
        let gated = Arc::new(Gated::new(1, false));
        let recorded = RecordedMetrics::new();
        let pool = pool(gated.clone(), queue, &recorded);

        pool.dispatch("a", &CancellationToken::new()).await;
        assert_eq!(recorded.summary().successes, 1);
        assert_eq!(recorded.summary().failures, 0);
        assert_eq!(pool.in_flight().active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_retries_at_half_cadence() {
        let queue = Arc::new(DashboardQueue::new());
        let t0 = Instant::now();
        queue.seed(["a"], t0);
        queue.reschedule("a", t0 + Duration::from_secs(3600), true).unwrap();
        let gated = Arc::new(Gated::new(1, true));
        let recorded = RecordedMetrics::new();
        let pool = pool(gated, queue.clone(), &recorded);

        pool.dispatch("a", &CancellationToken::new()).await;
        assert_eq!(recorded.summary().failures, 1);
        assert_eq!(queue.eligible_at("a"), Some(t0 + Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_with_huge_cadence_does_not_overflow() {
        let queue = Arc::new(DashboardQueue::new());
        let t0 = Instant::now();
        queue.seed(["a"], t0);
        queue.reschedule("a", deadline(t0, Duration::MAX), true).unwrap();
        let gated = Arc::new(Gated::new(1, true));
        let recorded = RecordedMetrics::new();
        let pool = pool_with_cadence(gated, queue.clone(), &recorded, Duration::MAX);

        pool.dispatch("a", &CancellationToken::new()).await;
        assert_eq!(recorded.summary().failures, 1);
        assert!(queue.eligible_at("a").unwrap() > t0 + Duration::from_secs(86_400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_earlier_eligibility() {
        let queue = Arc::new(DashboardQueue::new());
        let t0 = Instant::now();
        queue.seed(["a"], t0);
        let gated = Arc::new(Gated::new(1, true));
        let recorded = RecordedMetrics::new();
        let pool = pool(gated, queue.clone(), &recorded);

        pool.dispatch("a", &CancellationToken::new()).await;
        assert_eq!(queue.eligible_at("a"), Some(t0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_for_removed_dashboard_is_quiet() {
        let queue = Arc::new(DashboardQueue::new());
        let gated = Arc::new(Gated::new(1, true));
        let recorded = RecordedMetrics::new();
        let pool = pool(gated, queue.clone(), &recorded);

        pool.dispatch("gone", &CancellationToken::new()).await;
        assert!(queue.is_empty());
        assert_eq!(recorded.summary().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_run_is_not_a_failure() {
        let queue = Arc::new(DashboardQueue::new());
        let t0 = Instant::now();
        queue.seed(["a"], t0);
        queue.reschedule("a", t0 + Duration::from_secs(3600), true).unwrap();
        let recorded = RecordedMetrics::new();
        let pool = pool(Arc::new(Cancelled), queue.clone(), &recorded);

        pool.dispatch("a", &CancellationToken::new()).await;
        assert_eq!(recorded.summary().failures, 0);
        assert_eq!(recorded.summary().successes, 0);
        assert_eq!(queue.eligible_at("a"), Some(t0 + Duration::from_secs(3600)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_dispatch_reruns_once_done() {
        let queue = Arc::new(DashboardQueue::new());
        let t0 = Instant::now();
        queue.seed(["a"], t0);
        queue.reschedule("a", t0 + Duration::from_secs(3600), true).unwrap();
        let gated = Arc::new(Gated::new(0, false));
        let recorded = RecordedMetrics::new();
        let pool = pool(gated.clone(), queue.clone(), &recorded);
        let cancel = CancellationToken::new();

        let first = {
            let pool = pool.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.dispatch("a", &cancel).await })
        };
        while gated.running.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // Duplicates return immediately while the first run is blocked.
        for _ in 0..5 {
            pool.dispatch("a", &cancel).await;
        }
        assert_eq!(gated.max_running.load(Ordering::SeqCst), 1);
        assert_eq!(queue.eligible_at("a"), Some(t0 + Duration::from_secs(3600)));

        tokio::time::advance(Duration::from_secs(7)).await;
        gated.gate.add_permits(1);
        first.await.unwrap();

        assert_eq!(gated.runs.load(Ordering::SeqCst), 1);
        assert_eq!(queue.eligible_at("a"), Some(t0 + Duration::from_secs(7)));
        assert_eq!(pool.in_flight().active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_workers_drain_channel() {
        let queue = Arc::new(DashboardQueue::new());
        queue.seed(["a", "b", "c"], Instant::now());
        let gated = Arc::new(Gated::new(10, false));
        let recorded = RecordedMetrics::new();
        let pool = pool(gated.clone(), queue, &recorded);

        let (tx, rx) = async_channel::bounded(1);
        let mut workers = pool.spawn(rx, CancellationToken::new());
        for name in ["a", "b", "c"] {
            tx.send(name.to_string()).await.unwrap();
        }
        tx.close();
        while let Some(joined) = workers.join_next().await {
            joined.unwrap();
        }

        assert_eq!(gated.runs.load(Ordering::SeqCst), 3);
        assert_eq!(recorded.summary().successes, 3);
    }
}
