//! Per-dashboard tabulation.
//!
//! For each tab of a dashboard the pipeline reads the grid of the tab's test
//! group and writes the tab's state, either as a straight copy or as a
//! filtered projection of the grid's rows.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::domain::{Dashboard, GridState, Snapshot, Tab};
use crate::error::{Result, TabulatorError};
use crate::filter::{RowFilter, filter_rows};
use crate::path::{GcsPath, tab_state_path, test_group_path};
use crate::scheduler::DashboardProcessor;
use crate::storage::{ContentStore, WritePrecondition};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Location of the configuration; grid and tab paths resolve against it
    pub config_path: GcsPath,
    pub grid_prefix: String,
    pub tabs_prefix: String,
    /// Gate for every write
    pub confirm: bool,
    /// Filter rows instead of copying whole grids
    pub filter: bool,
}

/// What happened to one tab
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabOutcome {
    Copied,
    Filtered { kept: usize, total: usize },
    /// Filtered without writing
    Previewed { kept: usize, total: usize },
    DryRun,
    /// Source grid does not exist yet
    NoSource,
}

pub struct TabPipeline {
    store: Arc<dyn ContentStore>,
    snapshot: watch::Receiver<Arc<Snapshot>>,
    options: PipelineOptions,
}

impl TabPipeline {
    pub fn new(
        store: Arc<dyn ContentStore>,
        snapshot: watch::Receiver<Arc<Snapshot>>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            snapshot,
            options,
        }
    }

    /// Tabulate every tab of `dashboard` in order, stopping at the first failure.
    pub async fn process_dashboard(&self, dashboard: &Dashboard, cancel: &CancellationToken) -> Result<Vec<TabOutcome>> {
        let mut outcomes = Vec::with_capacity(dashboard.tabs.len());
        for tab in &dashboard.tabs {
            if cancel.is_cancelled() {
                return Err(TabulatorError::Cancelled);
            }
            outcomes.push(self.process_tab(&dashboard.name, tab).await?);
        }
        Ok(outcomes)
    }

    pub async fn process_tab(&self, dashboard: &str, tab: &Tab) -> Result<TabOutcome> {
        let from = test_group_path(&self.options.config_path, &self.options.grid_prefix, &tab.test_group_name)?;
        let to = tab_state_path(&self.options.config_path, &self.options.tabs_prefix, dashboard, &tab.name)?;
        tracing::info!(tab = %tab.name, from = %from, to = %to, "Calculating state");

        let result = if self.options.filter {
            self.tabulate(tab, &from, &to).await
        } else if self.options.confirm {
            self.store.copy(&from, &to).await.map(|_| TabOutcome::Copied)
        } else {
            tracing::info!(tab = %tab.name, from = %from, to = %to, "Dry run, skipping copy");
            Ok(TabOutcome::DryRun)
        };

        match result {
            Err(e) if e.is_not_found() => {
                tracing::info!(tab = %tab.name, from = %from, "Original state does not exist");
                Ok(TabOutcome::NoSource)
            }
            other => other,
        }
    }

    /// Filter the rows of the grid at `from` and write the result to `to`.
    async fn tabulate(&self, tab: &Tab, from: &GcsPath, to: &GcsPath) -> Result<TabOutcome> {
        let filter = RowFilter::parse(&tab.base_options)?;
        let data = self.store.open(from).await?;
        let mut grid = GridState::decode(&data)?;

        let total = grid.rows.len();
        grid.rows = filter_rows(&filter, std::mem::take(&mut grid.rows));
        let kept = grid.rows.len();

        if !self.options.confirm {
            tracing::info!(tab = %tab.name, to = %to, kept, total, "Dry run, skipping write");
            return Ok(TabOutcome::Previewed { kept, total });
        }

        let encoded = grid.encode()?;
        self.store.upload(to, Bytes::from(encoded), WritePrecondition::None).await?;
        tracing::debug!(tab = %tab.name, to = %to, kept, total, "Wrote filtered state");
        Ok(TabOutcome::Filtered { kept, total })
    }
}

#[async_trait]
impl DashboardProcessor for TabPipeline {
    async fn process(&self, dashboard: &str, cancel: &CancellationToken) -> Result<()> {
        let snapshot = Arc::clone(&self.snapshot.borrow());
        let found = snapshot
            .dashboard(dashboard)
            .ok_or_else(|| TabulatorError::DashboardNotFound(dashboard.to_string()))?;
        self.process_dashboard(found, cancel).await.map(|_| ())
    }
}
