//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use walletvault::keys::{KeyBacking, KeyRecord};
use walletvault::keystore::{MemoryKeyStore, SecureKeyStore};
use walletvault::raw::{MemoryRawStore, RawStore};
use walletvault::{SecureStore, TrustGate, TrustSignal, TrustVerdict, VaultConfig, VaultResult};

/// A trust gate whose verdict can be flipped between calls.
#[derive(Default)]
pub struct SwitchGate {
    suspicious: AtomicBool,
    checks: AtomicUsize,
}

impl SwitchGate {
    pub fn set_suspicious(&self, suspicious: bool) {
        self.suspicious.store(suspicious, Ordering::SeqCst);
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

impl TrustGate for SwitchGate {
    fn check(&self) -> TrustVerdict {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.suspicious.load(Ordering::SeqCst) {
            TrustVerdict::Suspicious(vec![TrustSignal::RootArtifact("/system/xbin/su".into())])
        } else {
            TrustVerdict::Trusted
        }
    }
}

/// A raw store that counts every call.
#[derive(Default)]
pub struct CountingRawStore {
    inner: MemoryRawStore,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
}

impl CountingRawStore {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Seed bytes without touching the counters.
    pub fn seed(&self, alias: &str, bytes: &[u8]) {
        self.inner.write(alias, bytes).unwrap();
    }

    /// Peek at bytes without touching the counters.
    pub fn peek(&self, alias: &str) -> Option<Vec<u8>> {
        self.inner.read(alias).unwrap()
    }
}

impl RawStore for CountingRawStore {
    fn write(&self, alias: &str, bytes: &[u8]) -> VaultResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(alias, bytes)
    }

    fn read(&self, alias: &str) -> VaultResult<Option<Vec<u8>>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(alias)
    }

    fn remove(&self, alias: &str) -> VaultResult<()> {
        self.inner.remove(alias)
    }
}

/// A key store that counts successful `store` calls.
pub struct CountingKeyStore {
    inner: MemoryKeyStore,
    pub stores: AtomicUsize,
}

impl CountingKeyStore {
    pub fn new(inner: MemoryKeyStore) -> Self {
        Self {
            inner,
            stores: AtomicUsize::new(0),
        }
    }

    pub fn stores(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryKeyStore {
        &self.inner
    }
}

impl SecureKeyStore for CountingKeyStore {
    fn supports(&self, backing: KeyBacking) -> bool {
        self.inner.supports(backing)
    }

    fn load(&self, alias: &str) -> VaultResult<Option<KeyRecord>> {
        self.inner.load(alias)
    }

    fn store(&self, alias: &str, record: &KeyRecord) -> VaultResult<()> {
        self.inner.store(alias, record)?;
        self.stores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, alias: &str) -> VaultResult<()> {
        self.inner.delete(alias)
    }
}

pub struct Harness {
    pub store: SecureStore,
    pub gate: Arc<SwitchGate>,
    pub raw: Arc<CountingRawStore>,
    pub keys: Arc<MemoryKeyStore>,
}

pub fn harness_with(config: VaultConfig) -> Harness {
    let gate = Arc::new(SwitchGate::default());
    let raw = Arc::new(CountingRawStore::default());
    let keys = Arc::new(MemoryKeyStore::new());
    let store = SecureStore::new(config, gate.clone(), keys.clone(), raw.clone()).unwrap();
    Harness {
        store,
        gate,
        raw,
        keys,
    }
}

pub fn harness() -> Harness {
    harness_with(VaultConfig::default())
}
