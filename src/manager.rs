//! Master key lifecycle.
//!
//! [`KeyManager`] creates keys lazily on first use, hands out [`KeyHandle`]s,
//! self-tests every loaded key and destroys keys on request. It does not
//! consult the trust gate: callers do that immediately before each key
//! operation.
//!
//! ## Concurrency
//!
//! Calls for the same alias are serialized by a per-alias mutex taken from a
//! process-wide [`AliasLocks`] table, so concurrent first use materializes
//! exactly one key even when several managers share one key store. The table
//! lock is held only long enough to look up the alias entry; a slow key
//! store call for one alias never blocks another alias.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use tracing::{debug, info, warn};

use crate::error::{VaultError, VaultResult};
use crate::keys::{KeyBacking, KeyHandle, KeyMetadata, KeyRecord, MasterKey};
use crate::keystore::SecureKeyStore;

// ---------------------------------------------------------------------------
// Per-alias locks
// ---------------------------------------------------------------------------

/// Mutual exclusion keyed by alias.
///
/// Entries are weak: an alias's mutex lives only while some caller holds or
/// waits on it, and dead entries are pruned on the next acquisition.
#[derive(Default)]
pub struct AliasLocks {
    table: Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl AliasLocks {
    /// The table shared by every manager in the process.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<AliasLocks>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::default())))
    }

    /// The mutex for `alias`, created on demand.
    fn entry(&self, alias: &str) -> Arc<Mutex<()>> {
        // The table holds no invariants a panic could break.
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = table.get(alias).and_then(Weak::upgrade) {
            return existing;
        }
        table.retain(|_, weak| weak.strong_count() > 0);
        let fresh = Arc::new(Mutex::new(()));
        table.insert(alias.to_string(), Arc::downgrade(&fresh));
        fresh
    }

    /// Run `f` while holding the lock for `alias`.
    pub fn with_lock<R>(&self, alias: &str, f: impl FnOnce() -> R) -> R {
        let entry = self.entry(alias);
        let _guard: MutexGuard<'_, ()> = entry.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    /// Number of aliases with a live lock entry.
    pub fn live_entries(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Key manager
// ---------------------------------------------------------------------------

/// Owns the lifecycle of one master key per alias.
#[derive(Clone)]
pub struct KeyManager {
    store: Arc<dyn SecureKeyStore>,
    locks: Arc<AliasLocks>,
    prefer_hardware: bool,
}

impl KeyManager {
    /// A manager over `store`, coordinating through the process-wide lock table.
    pub fn new(store: Arc<dyn SecureKeyStore>) -> Self {
        Self::with_locks(store, AliasLocks::global())
    }

    /// A manager using an explicit lock table.
    pub fn with_locks(store: Arc<dyn SecureKeyStore>, locks: Arc<AliasLocks>) -> Self {
        Self {
            store,
            locks,
            prefer_hardware: true,
        }
    }

    /// Whether new keys request hardware backing when available.
    pub fn prefer_hardware(mut self, prefer: bool) -> Self {
        self.prefer_hardware = prefer;
        self
    }

    /// Return the key for `alias`, creating it if absent.
    ///
    /// A stored key that fails its self-test is treated as absent: it is
    /// destroyed and replaced. `KeyCorrupted` is returned only if that
    /// replacement fails.
    pub fn get_or_create_key(&self, alias: &str) -> VaultResult<KeyHandle> {
        self.locks.with_lock(alias, || self.load_or_create_locked(alias))
    }

    /// Run `f` with the key for `alias` while still holding the alias lock.
    ///
    /// No rotation or invalidation of `alias` can land between obtaining the
    /// key and the end of `f`, so whatever `f` persists was sealed under the
    /// key that is current when it returns.
    pub fn with_key<R>(
        &self,
        alias: &str,
        f: impl FnOnce(&KeyHandle) -> VaultResult<R>,
    ) -> VaultResult<R> {
        self.locks.with_lock(alias, || {
            let key = self.load_or_create_locked(alias)?;
            f(&key)
        })
    }

    /// Destroy the key for `alias`.
    ///
    /// Everything sealed under it becomes permanently undecryptable. The next
    /// [`Self::get_or_create_key`] creates a new key.
    pub fn invalidate_key(&self, alias: &str) -> VaultResult<()> {
        self.locks.with_lock(alias, || {
            self.store.delete(alias)?;
            info!(alias, "key invalidated");
            Ok(())
        })
    }

    /// Invalidate and immediately recreate the key for `alias`.
    pub fn rotate_key(&self, alias: &str) -> VaultResult<KeyHandle> {
        self.locks.with_lock(alias, || {
            self.store.delete(alias)?;
            let handle = self.create_locked(alias)?;
            info!(alias, fingerprint = %handle.fingerprint(), "key rotated");
            Ok(handle)
        })
    }

    /// Metadata of the stored key for `alias`, without self-testing it.
    pub fn metadata(&self, alias: &str) -> VaultResult<Option<KeyMetadata>> {
        Ok(self.store.load(alias)?.map(|record| record.metadata))
    }

    /// Load and self-test, or create. The alias lock must be held.
    fn load_or_create_locked(&self, alias: &str) -> VaultResult<KeyHandle> {
        match self.store.load(alias)? {
            Some(record) if record.self_test(alias) => {
                debug!(alias, backing = %record.metadata.backing, "loaded key");
                Ok(record.into_handle())
            }
            Some(_) => {
                warn!(alias, "stored key failed self-test, recreating");
                self.store.delete(alias)?;
                self.create_locked(alias).map_err(|err| {
                    warn!(alias, error = %err, "recreating corrupted key failed");
                    VaultError::KeyCorrupted(alias.to_string())
                })
            }
            None => self.create_locked(alias),
        }
    }

    /// Backing for a new key, decided once at creation.
    fn select_backing(&self) -> KeyBacking {
        if self.prefer_hardware && self.store.supports(KeyBacking::Hardware) {
            KeyBacking::Hardware
        } else {
            KeyBacking::Software
        }
    }

    /// Create and persist a key. The alias lock must be held.
    fn create_locked(&self, alias: &str) -> VaultResult<KeyHandle> {
        let backing = self.select_backing();
        let record = KeyRecord::new(alias, MasterKey::generate()?, backing);

        let record = match self.store.store(alias, &record) {
            Ok(()) => record,
            Err(err) if backing == KeyBacking::Hardware => {
                warn!(alias, error = %err, "hardware key storage failed, falling back to software");
                let fallback = KeyRecord::new(alias, record.key, KeyBacking::Software);
                self.store.store(alias, &fallback)?;
                fallback
            }
            Err(err) => return Err(err),
        };

        info!(alias, backing = %record.metadata.backing, "created key");
        Ok(record.into_handle())
    }
}
