//! Tabulator telemetry, recorded through the `metrics` facade.
//!
//! - `Cyclic`: success/failure counters per processing attempt, plus a
//!   histogram of attempt durations.
//! - `DurationGauge`: a duration gauge, used for scheduling lag.
//!
//! Handles bind to the recorder that is active when `Metrics::new()` runs, so
//! install a recorder first. Without one every update is a no-op.
//! `RecordedMetrics` keeps everything in memory and can summarize it.

use std::sync::Arc;
use std::time::Duration;

use metrics::{
    Counter, Gauge, Histogram, Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshot, Snapshotter};
use serde::Serialize;
use tokio::time::Instant;

/// Component label used for every tabulator metric.
pub const COMPONENT: &str = "tabulator";

/// Successful tabulation counter.
pub const UPDATE_SUCCESSES: &str = "tabulator_update_successes_total";

/// Failed tabulation counter.
pub const UPDATE_FAILURES: &str = "tabulator_update_failures_total";

/// Tabulation duration histogram.
pub const UPDATE_DURATION: &str = "tabulator_update_duration_seconds";

/// Scheduling lag gauge.
pub const DELAY_SECONDS: &str = "tabulator_delay_seconds";

/// Registers all tabulator metric descriptions.
///
/// Call this once after installing the metrics recorder.
pub fn register_metrics() {
    describe_counter!(UPDATE_SUCCESSES, "Dashboards tabulated successfully");
    describe_counter!(UPDATE_FAILURES, "Dashboard tabulations that failed");
    describe_histogram!(UPDATE_DURATION, Unit::Seconds, "Duration of one dashboard tabulation");
    describe_gauge!(DELAY_SECONDS, Unit::Seconds, "How far behind schedule the dashboard queue is");
}

/// Counts attempts of a repeating unit of work
#[derive(Clone)]
pub struct Cyclic {
    successes: Counter,
    failures: Counter,
    duration: Histogram,
}

impl Cyclic {
    pub fn new(component: &'static str) -> Self {
        Self {
            successes: counter!(UPDATE_SUCCESSES, "component" => component),
            failures: counter!(UPDATE_FAILURES, "component" => component),
            duration: histogram!(UPDATE_DURATION, "component" => component),
        }
    }

    /// Begin timing one attempt; finish it with `success()` or `fail()`.
    pub fn start(&self) -> Attempt<'_> {
        Attempt {
            cyclic: self,
            started: Instant::now(),
        }
    }
}

/// One in-progress attempt of a `Cyclic`
#[must_use = "an attempt must be finished with success() or fail()"]
pub struct Attempt<'a> {
    cyclic: &'a Cyclic,
    started: Instant,
}

impl Attempt<'_> {
    pub fn success(self) {
        self.cyclic.successes.increment(1);
        self.record_duration();
    }

    pub fn fail(self) {
        self.cyclic.failures.increment(1);
        self.record_duration();
    }

    fn record_duration(&self) {
        self.cyclic.duration.record(self.started.elapsed().as_secs_f64());
    }
}

/// Latest observed duration, in seconds
#[derive(Clone)]
pub struct DurationGauge {
    gauge: Gauge,
}

impl DurationGauge {
    pub fn new(name: &'static str, component: &'static str) -> Self {
        Self {
            gauge: gauge!(name, "component" => component),
        }
    }

    pub fn set(&self, value: Duration) {
        self.gauge.set(value.as_secs_f64());
    }
}

/// Metrics relevant to the tabulator control loop
#[derive(Clone)]
pub struct Metrics {
    pub update_state: Cyclic,
    pub delay_seconds: DurationGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            update_state: Cyclic::new(COMPONENT),
            delay_seconds: DurationGauge::new(DELAY_SECONDS, COMPONENT),
        }
    }
}

/// `Metrics` bound to a private in-memory recorder.
///
/// Nothing is exported; the recorder exists so the binary can log a summary
/// on exit and tests can assert on counts.
pub struct RecordedMetrics {
    metrics: Arc<Metrics>,
    snapshotter: Snapshotter,
}

impl Default for RecordedMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordedMetrics {
    pub fn new() -> Self {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let metrics = metrics::with_local_recorder(&recorder, || {
            register_metrics();
            Metrics::new()
        });
        Self {
            metrics: Arc::new(metrics),
            snapshotter,
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary::from_snapshot(self.snapshotter.snapshot())
    }
}

/// Point-in-time totals of the tabulator metrics, for logging
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub successes: u64,
    pub failures: u64,
    pub last_cycle_secs: Option<f64>,
    pub delay_secs: Option<f64>,
}

impl MetricsSummary {
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut summary = Self::default();
        for (key, _, _, value) in snapshot.into_vec() {
            match (key.key().name(), value) {
                (UPDATE_SUCCESSES, DebugValue::Counter(n)) => summary.successes += n,
                (UPDATE_FAILURES, DebugValue::Counter(n)) => summary.failures += n,
                (UPDATE_DURATION, DebugValue::Histogram(values)) => {
                    if let Some(last) = values.last() {
                        summary.last_cycle_secs = Some(last.0);
                    }
                }
                (DELAY_SECONDS, DebugValue::Gauge(value)) => summary.delay_secs = Some(value.0),
                _ => {}
            }
        }
        summary
    }
}
