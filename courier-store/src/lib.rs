//! Persistence for the courier queue.
//!
//! Two logical tables live here: the mutable queue of records still awaiting
//! delivery, and the append-only set of terminal delivery statuses. Both sit
//! behind object-safe backing store traits so the storage engine is picked
//! from configuration.

pub mod backends;
pub mod config;
pub mod error;
pub mod queue;
pub mod record;
pub mod status;
pub mod r#trait;
pub mod types;

pub use backends::{
    FileBackingStore, FileStatusStore, MemoryBackingStore, MemoryStatusStore, TestBackingStore,
    TestStatusStore,
};
pub use config::StoreConfig;
pub use error::{Result, SerializationError, StoreError, ValidationError};
pub use queue::{EnqueueReport, QueueOptions, QueueStore};
pub use record::{AttemptUpdate, DeliveryStatus, QueuedMessage, Resolution};
pub use status::StatusStore;
pub use r#trait::{Appended, BackingStore, Criteria, Selection, StatusBackingStore};
pub use types::QueueId;
