//! The secure key store contract and an in-process reference backend.
//!
//! A key store is the process-wide singleton that actually holds key material:
//! Android Keystore, iOS Keychain, a TPM, or OS-protected files. walletvault
//! only needs load/store/delete by alias plus a capability query for
//! hardware backing. Platform bridges implement [`SecureKeyStore`] outside the
//! crate; [`MemoryKeyStore`] serves tests and hosts without secure hardware.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::crypto::KEY_LEN;
use crate::error::{VaultError, VaultResult};
use crate::keys::{KeyBacking, KeyMetadata, KeyRecord, MasterKey};

/// Device key storage used by [`crate::manager::KeyManager`].
///
/// Implementations report transient inaccessibility (device locked, hardware
/// fault) as [`VaultError::KeyUnavailable`].
pub trait SecureKeyStore: Send + Sync {
    /// Whether this store can keep keys in secure hardware.
    fn supports(&self, backing: KeyBacking) -> bool;

    /// Load the key stored under `alias`, if any.
    fn load(&self, alias: &str) -> VaultResult<Option<KeyRecord>>;

    /// Persist `record` under `alias`, replacing any previous key.
    ///
    /// `record.metadata.backing` is the backing requested; a store that cannot
    /// honour it must fail rather than silently downgrade.
    fn store(&self, alias: &str, record: &KeyRecord) -> VaultResult<()>;

    /// Destroy the key under `alias`. Deleting an absent key is not an error.
    fn delete(&self, alias: &str) -> VaultResult<()>;
}

// ---------------------------------------------------------------------------
// Memory backend
// ---------------------------------------------------------------------------

/// Stored form of a key inside [`MemoryKeyStore`]. Zeroised on drop.
struct Entry {
    bytes: zeroize::Zeroizing<[u8; KEY_LEN]>,
    metadata: KeyMetadata,
}

/// Key store held in process memory.
///
/// Keys do not survive the process. Hardware backing is simulated when built
/// with [`MemoryKeyStore::with_hardware`]; [`MemoryKeyStore::set_locked`]
/// simulates a locked device.
#[derive(Default)]
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<String, Entry>>,
    hardware: bool,
    locked: AtomicBool,
}

impl MemoryKeyStore {
    /// A software-only store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that also accepts hardware-backed keys.
    pub fn with_hardware() -> Self {
        Self {
            hardware: true,
            ..Self::default()
        }
    }

    /// The process-wide shared instance.
    ///
    /// Every [`crate::manager::KeyManager`] built on this instance sees the
    /// same keys.
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<MemoryKeyStore>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self::new())))
    }

    /// Make every subsequent call fail with `KeyUnavailable` until unlocked.
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    /// Number of aliases with a stored key.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Returns true if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> VaultResult<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        if self.locked.load(Ordering::SeqCst) {
            return Err(VaultError::KeyUnavailable("key store locked".to_string()));
        }
        self.entries
            .lock()
            .map_err(|_| VaultError::KeyUnavailable("key store poisoned".to_string()))
    }
}

impl SecureKeyStore for MemoryKeyStore {
    fn supports(&self, backing: KeyBacking) -> bool {
        match backing {
            KeyBacking::Hardware => self.hardware,
            KeyBacking::Software => true,
        }
    }

    fn load(&self, alias: &str) -> VaultResult<Option<KeyRecord>> {
        let entries = self.entries()?;
        Ok(entries.get(alias).map(|entry| KeyRecord {
            key: MasterKey::from_bytes(*entry.bytes),
            metadata: entry.metadata.clone(),
        }))
    }

    fn store(&self, alias: &str, record: &KeyRecord) -> VaultResult<()> {
        if !self.supports(record.metadata.backing) {
            return Err(VaultError::KeyUnavailable(format!(
                "{} backing not supported",
                record.metadata.backing
            )));
        }
        let mut entries = self.entries()?;
        entries.insert(
            alias.to_string(),
            Entry {
                bytes: zeroize::Zeroizing::new(*record.key.expose_secret()),
                metadata: record.metadata.clone(),
            },
        );
        Ok(())
    }

    fn delete(&self, alias: &str) -> VaultResult<()> {
        self.entries()?.remove(alias);
        Ok(())
    }
}
