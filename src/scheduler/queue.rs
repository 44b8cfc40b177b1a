//! Time-ordered queue of dashboards awaiting tabulation.
//!
//! Every configured dashboard has exactly one record holding the earliest
//! time it may next be dispatched. `drain` hands due names to the worker pool
//! earliest-first and re-arms each one a cadence later; workers and fixers
//! pull records earlier with `reschedule`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TabulatorError};

/// Stands in for "never" when a delay does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + delay`, clamped to a far-future instant instead of overflowing.
pub fn deadline(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay).or_else(|| now.checked_add(FAR_FUTURE)).unwrap_or(now)
}

/// Snapshot of the queue, for telemetry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    /// Number of tracked dashboards
    pub depth: usize,
    /// Earliest-eligible dashboard
    pub next: Option<String>,
    /// When `next` becomes eligible
    pub when: Option<Instant>,
}

impl QueueStatus {
    /// How far behind schedule the queue is at `now`, floored at zero.
    pub fn delay(&self, now: Instant) -> Duration {
        self.when.map(|w| now.saturating_duration_since(w)).unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct Records {
    when: HashMap<String, Instant>,
    order: BTreeSet<(Instant, String)>,
}

impl Records {
    fn set(&mut self, name: &str, when: Instant) {
        if let Some(old) = self.when.insert(name.to_string(), when) {
            self.order.remove(&(old, name.to_string()));
        }
        self.order.insert((when, name.to_string()));
    }

    fn remove(&mut self, name: &str) {
        if let Some(old) = self.when.remove(name) {
            self.order.remove(&(old, name.to_string()));
        }
    }

    fn first(&self) -> Option<&(Instant, String)> {
        self.order.first()
    }
}

enum Step {
    Send(String),
    Wait(Instant),
    Idle,
}

/// Eligibility records for every active dashboard
#[derive(Debug, Default)]
pub struct DashboardQueue {
    records: Mutex<Records>,
    changed: Notify,
}

impl DashboardQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the tracked set with `names`, each eligible no later than `now`.
    ///
    /// Names already tracked keep an earlier eligibility; names not listed are
    /// dropped. Dispatches already handed out are unaffected.
    pub fn seed<I, S>(&self, names: I, now: Instant)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keep: HashSet<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        {
            let mut records = self.lock();
            let stale: Vec<String> = records.when.keys().filter(|n| !keep.contains(*n)).cloned().collect();
            for name in &stale {
                records.remove(name);
            }
            for name in &keep {
                match records.when.get(name) {
                    Some(&when) if when <= now => {}
                    _ => records.set(name, now),
                }
            }
            tracing::debug!(depth = records.when.len(), removed = stale.len(), "Seeded queue");
        }
        self.changed.notify_one();
    }

    /// Move `name`'s eligibility to `when`.
    ///
    /// Unless `force` is set, an eligibility that is already earlier is kept.
    /// Names that are not tracked are refused with `NotQueued`.
    pub fn reschedule(&self, name: &str, when: Instant, force: bool) -> Result<()> {
        {
            let mut records = self.lock();
            let current = records
                .when
                .get(name)
                .copied()
                .ok_or_else(|| TabulatorError::NotQueued(name.to_string()))?;
            if !force && current <= when {
                return Ok(());
            }
            records.set(name, when);
        }
        self.changed.notify_one();
        Ok(())
    }

    pub fn status(&self) -> QueueStatus {
        let records = self.lock();
        let first = records.first();
        QueueStatus {
            depth: records.when.len(),
            next: first.map(|(_, name)| name.clone()),
            when: first.map(|(when, _)| *when),
        }
    }

    /// Eligibility of `name`, if tracked.
    pub fn eligible_at(&self, name: &str) -> Option<Instant> {
        self.lock().when.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().when.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().when.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send due names to `out` until `cancel` fires.
    ///
    /// Each sent name is re-armed to `now + cadence`. A zero cadence sends
    /// every currently due name once and returns.
    pub async fn drain(
        &self,
        cancel: &CancellationToken,
        out: &async_channel::Sender<String>,
        cadence: Duration,
    ) -> Result<()> {
        if cadence.is_zero() {
            return self.drain_once(cancel, out).await;
        }

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let now = Instant::now();
            let step = {
                let mut records = self.lock();
                match records.first().cloned() {
                    None => Step::Idle,
                    Some((when, name)) if when <= now => {
                        records.set(&name, deadline(now, cadence));
                        Step::Send(name)
                    }
                    Some((when, _)) => Step::Wait(when),
                }
            };

            match step {
                Step::Send(name) => {
                    tracing::debug!(dashboard = %name, "Dispatching dashboard");
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        sent = out.send(name) => {
                            sent.map_err(|e| TabulatorError::ChannelClosed(format!("dispatch of {}", e.0)))?;
                        }
                    }
                }
                Step::Wait(when) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep_until(when) => {}
                        _ = self.changed.notified() => {}
                    }
                }
                Step::Idle => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = self.changed.notified() => {}
                    }
                }
            }
        }
    }

    async fn drain_once(&self, cancel: &CancellationToken, out: &async_channel::Sender<String>) -> Result<()> {
        let now = Instant::now();
        let due: Vec<String> = {
            let records = self.lock();
            records
                .order
                .iter()
                .take_while(|(when, _)| *when <= now)
                .map(|(_, name)| name.clone())
                .collect()
        };
        tracing::debug!(due = due.len(), "Draining queue once");

        for name in due {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                sent = out.send(name) => {
                    sent.map_err(|e| TabulatorError::ChannelClosed(format!("dispatch of {}", e.0)))?;
                }
            }
        }
        Ok(())
    }
}
