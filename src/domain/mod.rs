//! Domain types for the tabulator
//!
//! This module contains the core domain types:
//! - Dashboard / Tab: configured views, each tab backed by one test group
//! - Snapshot: the complete configuration, replaced wholesale on change
//! - GridState: the row-oriented payload read from and written to the content store

pub mod dashboard;
pub mod grid;

pub use dashboard::{Dashboard, Snapshot, Tab};
pub use grid::{GridState, Row};
