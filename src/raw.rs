//! Raw persistence boundary.
//!
//! The façade hands serialized [`crate::payload::SealedPayload`] bytes to a
//! [`RawStore`] and never interprets its failures: they surface as
//! [`VaultError::StorageUnavailable`].

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{VaultError, VaultResult};

/// Key-value storage for sealed bytes, keyed by alias.
pub trait RawStore: Send + Sync {
    /// Replace whatever is stored under `alias`.
    fn write(&self, alias: &str, bytes: &[u8]) -> VaultResult<()>;

    /// Bytes stored under `alias`, or `None` if there are none.
    fn read(&self, alias: &str) -> VaultResult<Option<Vec<u8>>>;

    /// Delete the entry for `alias`. Deleting a missing entry is not an error.
    fn remove(&self, alias: &str) -> VaultResult<()>;
}

/// In-memory [`RawStore`] backed by a `HashMap`.
#[derive(Default)]
pub struct MemoryRawStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryRawStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> VaultError {
    VaultError::StorageUnavailable("raw store poisoned".to_string())
}

impl RawStore for MemoryRawStore {
    fn write(&self, alias: &str, bytes: &[u8]) -> VaultResult<()> {
        self.entries
            .write()
            .map_err(|_| poisoned())?
            .insert(alias.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read(&self, alias: &str) -> VaultResult<Option<Vec<u8>>> {
        Ok(self.entries.read().map_err(|_| poisoned())?.get(alias).cloned())
    }

    fn remove(&self, alias: &str) -> VaultResult<()> {
        self.entries.write().map_err(|_| poisoned())?.remove(alias);
        Ok(())
    }
}
