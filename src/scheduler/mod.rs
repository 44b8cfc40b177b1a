//! Scheduling core: which dashboard runs next, and who runs it.
//!
//! - **DashboardQueue**: one eligibility record per active dashboard, drained
//!   earliest-first at a target cadence.
//! - **WorkerPool**: a fixed number of workers running a `DashboardProcessor`
//!   for each dispatched name, never two runs of one dashboard at once.
//!
//! # Example
//!
//! ```ignore
//! let queue = Arc::new(DashboardQueue::new());
//! queue.seed(["sig-release"], Instant::now());
//!
//! let pool = Arc::new(WorkerPool::new(4, cadence, queue.clone(), processor, metrics));
//! let (tx, rx) = async_channel::bounded(1);
//! let mut workers = pool.spawn(rx, cancel.clone());
//! queue.drain(&cancel, &tx, cadence).await?;
//! ```

mod pool;
mod queue;

pub use pool::{DashboardProcessor, InFlight, WorkerPool};
pub use queue::{DashboardQueue, QueueStatus, deadline};
