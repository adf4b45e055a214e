//! Backing store implementations
//!
//! - `memory`: in-memory tables for tests and disposable queues
//! - `file`: one file per record, for production use
//! - `test`: memory tables with switchable failures and latency

pub mod file;
pub mod memory;
pub mod test;

pub use file::{FileBackingStore, FileStatusStore};
pub use memory::{MemoryBackingStore, MemoryStatusStore};
pub use test::{TestBackingStore, TestStatusStore};
