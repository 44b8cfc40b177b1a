//! Storage layer for the tabulator.
//!
//! `ContentStore` is the contract with the object store that holds grid and
//! tab state. Two implementations ship with the crate:
//! - `MemoryStore`: in-process, for tests and dry runs
//! - `FsStore`: a local directory standing in for the bucket

mod fs;
mod memory;
mod traits;

pub use fs::FsStore;
pub use memory::MemoryStore;
pub use traits::{ContentStore, WritePrecondition, check_precondition};
