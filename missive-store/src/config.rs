use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{BackingStore, MemoryBackingStore};

/// Configuration for the backing store
///
/// Purely in-memory store (state is lost on restart):
/// ```ron
/// Missive (
///     store: (type: "Memory"),
/// )
/// ```
///
/// In-memory tables persisted to a bincode snapshot:
/// ```ron
/// Missive (
///     store: (
///         type: "Snapshot",
///         path: "/var/lib/missive/store.bin",
///     ),
/// )
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum StoreConfig {
    Memory,
    Snapshot {
        #[serde(default = "default_snapshot_path")]
        path: PathBuf,
    },
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("/var/lib/missive/store.bin")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Snapshot {
            path: default_snapshot_path(),
        }
    }
}

impl StoreConfig {
    /// Open the configured store, restoring a snapshot where applicable
    ///
    /// # Errors
    ///
    /// Returns an error if an existing snapshot cannot be read or decoded.
    pub async fn open(&self) -> crate::Result<Arc<dyn BackingStore>> {
        match self {
            Self::Memory => Ok(Arc::new(MemoryBackingStore::new())),
            Self::Snapshot { path } => Ok(Arc::new(MemoryBackingStore::open(path.clone()).await?)),
        }
    }
}
