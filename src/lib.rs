//! Tabulator - keeps per-dashboard tab state fresh
//!
//! Tab state is derived from the grid state of each tab's test group, for
//! every dashboard in a hot-reloaded configuration. A time-ordered queue and
//! a bounded worker pool decide which dashboard is tabulated next.

pub mod daemon;
pub mod domain;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod path;
pub mod pipeline;
pub mod scheduler;
pub mod snapshot;
pub mod storage;

pub use error::{Result, TabulatorError};
