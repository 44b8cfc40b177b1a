//! Daemon core - the tabulator control loop
//!
//! `update` wires the pieces together:
//! - The coordinator seeds the queue and follows configuration changes
//! - The queue is drained into a channel at the refresh cadence
//! - The worker pool tabulates every dashboard name it receives

pub mod coordinator;
pub mod fixer;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub use coordinator::{Coordinator, CoordinatorConfig};
pub use fixer::{Fixer, FixerContext, fixer, on_group_update};

use crate::error::{Result, TabulatorError};
use crate::metrics::Metrics;
use crate::pipeline::{PipelineOptions, TabPipeline};
use crate::scheduler::{DashboardQueue, WorkerPool};
use crate::snapshot::SnapshotReceiver;
use crate::storage::ContentStore;

/// Options for one run of the control loop
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Number of dashboards tabulated at once
    pub concurrency: usize,
    /// Target time between runs of one dashboard; zero runs a single pass
    pub cadence: Duration,
    pub coordinator: CoordinatorConfig,
    pub pipeline: PipelineOptions,
}

impl UpdateOptions {
    pub fn new(pipeline: PipelineOptions) -> Self {
        Self {
            concurrency: 4,
            cadence: Duration::ZERO,
            coordinator: CoordinatorConfig::default(),
            pipeline,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.cadence = cadence;
        self
    }

    pub fn with_allowed_dashboards(mut self, allowed: Vec<String>) -> Self {
        self.coordinator.allowed_dashboards = allowed;
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.coordinator.tick_interval = tick_interval;
        self
    }
}

/// Keep the tab state of every active dashboard fresh until `cancel` fires.
///
/// With a zero cadence every active dashboard is tabulated once and the call
/// returns when the last run finishes.
pub async fn update(
    store: Arc<dyn ContentStore>,
    snapshots: SnapshotReceiver,
    metrics: Arc<Metrics>,
    options: UpdateOptions,
    fixers: Vec<Fixer>,
    cancel: CancellationToken,
) -> Result<()> {
    if options.concurrency < 1 {
        return Err(TabulatorError::Config(format!(
            "concurrency must be positive, got: {}",
            options.concurrency
        )));
    }
    let cancel = cancel.child_token();
    let queue = Arc::new(DashboardQueue::new());

    let (coordinator, current) = Coordinator::start(
        options.coordinator.clone(),
        Arc::clone(&queue),
        snapshots,
        fixers,
        Arc::clone(&metrics),
    )
    .await?;
    let coordinator = tokio::spawn(coordinator.run(cancel.clone()));

    let pipeline = Arc::new(TabPipeline::new(store, current, options.pipeline.clone()));
    let pool = Arc::new(WorkerPool::new(
        options.concurrency,
        options.cadence,
        Arc::clone(&queue),
        pipeline,
        metrics,
    ));

    let (tx, rx) = async_channel::bounded(1);
    let mut workers = pool.spawn(rx, cancel.clone());
    tracing::info!(
        concurrency = options.concurrency,
        cadence_secs = options.cadence.as_secs(),
        confirm = options.pipeline.confirm,
        filter = options.pipeline.filter,
        "Tabulator started"
    );

    let drained = queue.drain(&cancel, &tx, options.cadence).await;

    tx.close();
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = ?e, "Worker panicked");
        }
    }

    cancel.cancel();
    if let Err(e) = coordinator.await {
        tracing::error!(error = ?e, "Coordinator panicked");
    }
    tracing::info!("Tabulator stopped");
    drained
}
