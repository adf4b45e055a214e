use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{
    backends::{FileBackingStore, FileStatusStore, MemoryBackingStore, MemoryStatusStore},
    r#trait::{BackingStore, StatusBackingStore},
};

/// Which storage engine backs a table
///
/// Picked at configuration time, the queue logic only ever sees the trait
/// objects this produces.
///
/// # Examples
///
/// File-backed queue in RON config:
/// ```ron
/// queue: (
///     store: File(path: "/var/spool/courier/queue"),
/// )
/// ```
///
/// Memory-backed queue with a capacity limit:
/// ```ron
/// queue: (
///     store: Memory(capacity: Some(1000)),
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub enum StoreConfig {
    /// One file per record (production)
    File { path: PathBuf },
    /// In memory (testing/development)
    Memory {
        /// Maximum number of records to store (omit for unlimited). Only the
        /// queue table honours it: status rows are never refused.
        #[serde(default)]
        capacity: Option<usize>,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory { capacity: None }
    }
}

impl StoreConfig {
    /// The directory for file-backed stores
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File { path } => Some(path),
            Self::Memory { .. } => None,
        }
    }

    /// Build (and initialise) the queue table this configuration describes
    ///
    /// # Errors
    /// If the path is invalid, or the directory cannot be prepared
    pub fn into_queue_backend(self) -> crate::Result<Arc<dyn BackingStore>> {
        match self {
            Self::File { path } => {
                let store = FileBackingStore::new(path)?;
                store.init()?;
                Ok(Arc::new(store))
            }
            Self::Memory { capacity } => Ok(capacity.map_or_else(
                || Arc::new(MemoryBackingStore::new()) as Arc<dyn BackingStore>,
                |capacity| Arc::new(MemoryBackingStore::with_capacity(capacity)),
            )),
        }
    }

    /// Build (and initialise) the status table this configuration describes
    ///
    /// # Errors
    /// If the path is invalid, or the directory cannot be prepared
    pub fn into_status_backend(self) -> crate::Result<Arc<dyn StatusBackingStore>> {
        match self {
            Self::File { path } => {
                let store = FileStatusStore::new(path)?;
                store.init()?;
                Ok(Arc::new(store))
            }
            Self::Memory { .. } => Ok(Arc::new(MemoryStatusStore::new())),
        }
    }
}
