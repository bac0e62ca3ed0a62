//! The secure storage façade.
//!
//! [`SecureStore`] sequences trust gate → key manager → cipher → raw store.
//! Each gated operation walks the same states:
//!
//! ```text
//! Idle ─► Checking ─┬─► Authorized ─► (encrypt / decrypt / rotate) ─► Idle
//!                   └─► Denied ─────► UntrustedEnvironment ─────────► Idle
//! ```
//!
//! `Authorized` is a value: the key-touching helpers below demand an
//! `Authorization`, and the only way to get one is a `Trusted` verdict from
//! a check made at the start of the same call. Nothing survives between
//! calls, so a failed operation leaves no partial state behind.
//!
//! Sealing and writing happen under the alias lock of the
//! [`KeyManager`], so a `put` racing a `rotate` of the same alias either
//! lands before the rotation (and is orphaned by it) or after it (under the
//! new key). It never persists a payload sealed under a destroyed key.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::audit::{AuditLog, AuditRecord, AuditSink, FileAuditSink, Operation, Outcome};
use crate::cipher::Cipher;
use crate::config::VaultConfig;
use crate::error::{VaultError, VaultResult};
use crate::keys::KeyMetadata;
use crate::keystore::SecureKeyStore;
use crate::manager::KeyManager;
use crate::passphrase;
use crate::payload::SealedPayload;
use crate::raw::RawStore;
use crate::trust::{HostTrustGate, TrustGate, TrustVerdict};

/// Proof that the trust gate approved the current operation.
///
/// Not constructible outside this module and not `Clone`: it is consumed
/// when the operation returns to `Idle`.
#[derive(Debug)]
struct Authorization<'a> {
    alias: &'a str,
    operation: Operation,
}

/// Which wrapping a persisted payload carries.
///
/// Each layer authenticates a different context, so a passphrase entry never
/// opens through `get` and a plain entry never through `get_with_passphrase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layer {
    Device,
    Passphrase,
}

const PASSPHRASE_CONTEXT: &[u8] = b"walletvault/passphrase:";

/// Trust-gated secret storage keyed by alias.
pub struct SecureStore {
    config: VaultConfig,
    gate: Arc<dyn TrustGate>,
    keys: KeyManager,
    cipher: Cipher,
    raw: Arc<dyn RawStore>,
    audit: Mutex<AuditLog>,
}

impl SecureStore {
    /// Assemble a store from its collaborators.
    ///
    /// Fails with [`VaultError::Config`] if `config.audit_path` cannot be
    /// opened.
    pub fn new(
        config: VaultConfig,
        gate: Arc<dyn TrustGate>,
        keystore: Arc<dyn SecureKeyStore>,
        raw: Arc<dyn RawStore>,
    ) -> VaultResult<Self> {
        let mut audit = AuditLog::with_capacity(config.audit_capacity);
        if let Some(path) = &config.audit_path {
            let sink = FileAuditSink::new(path)
                .map_err(|err| VaultError::Config(format!("audit file {}: {err}", path.display())))?;
            audit.add_forward_sink(Box::new(sink));
        }

        Ok(Self {
            keys: KeyManager::new(keystore).prefer_hardware(config.prefer_hardware),
            cipher: Cipher::new(config.cipher_suite),
            gate,
            raw,
            audit: Mutex::new(audit),
            config,
        })
    }

    /// A store gated by [`HostTrustGate`] over the real host, using
    /// `config.trust` as its policy.
    pub fn with_host_gate(
        config: VaultConfig,
        keystore: Arc<dyn SecureKeyStore>,
        raw: Arc<dyn RawStore>,
    ) -> VaultResult<Self> {
        let gate = Arc::new(HostTrustGate::host(config.trust.clone()));
        Self::new(config, gate, keystore, raw)
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// The key manager, for diagnostics and direct lifecycle control.
    pub fn key_manager(&self) -> &KeyManager {
        &self.keys
    }

    /// Metadata of the key currently stored for `alias`.
    pub fn key_metadata(&self, alias: &str) -> VaultResult<Option<KeyMetadata>> {
        self.keys.metadata(alias)
    }

    /// A snapshot of the audit log.
    pub fn audit_log(&self) -> AuditLog {
        self.audit().clone()
    }

    /// Forward every future audit record to `sink`.
    pub fn add_audit_sink(&self, sink: Box<dyn AuditSink>) {
        self.audit().add_forward_sink(sink);
    }

    // -----------------------------------------------------------------------
    // Gated operations
    // -----------------------------------------------------------------------

    /// Encrypt `plaintext` and persist it under `alias`, replacing any
    /// previous payload.
    pub fn put(&self, alias: &str, plaintext: &[u8]) -> VaultResult<()> {
        let auth = self.authorize(alias, Operation::Put)?;
        let result = self.seal_and_write(&auth, plaintext, Layer::Device);
        self.finish(auth, result)
    }

    /// Read and decrypt the payload persisted under `alias`.
    ///
    /// Fails with [`VaultError::NotFound`] when nothing is stored and with
    /// [`VaultError::AuthenticationFailed`] when the payload does not verify.
    pub fn get(&self, alias: &str) -> VaultResult<Vec<u8>> {
        let auth = self.authorize(alias, Operation::Get)?;
        let result = self.read_and_open(&auth, Layer::Device);
        self.finish(auth, result)
    }

    /// Like [`Self::put`], but `plaintext` is first sealed under a key
    /// stretched from `passphrase` (PBKDF2-HMAC-SHA256 with a fresh salt and
    /// `config.passphrase_iterations` rounds).
    pub fn put_with_passphrase(
        &self,
        alias: &str,
        plaintext: &[u8],
        passphrase: &[u8],
    ) -> VaultResult<()> {
        let auth = self.authorize(alias, Operation::PutWithPassphrase)?;
        let result = passphrase::seal(
            &self.cipher,
            passphrase,
            self.config.passphrase_iterations,
            plaintext,
            self.associated_data(alias, Layer::Device).as_deref(),
        )
        .and_then(|envelope| self.seal_and_write(&auth, &envelope, Layer::Passphrase));
        self.finish(auth, result)
    }

    /// Open a secret stored by [`Self::put_with_passphrase`].
    ///
    /// A wrong passphrase fails with [`VaultError::AuthenticationFailed`]; an
    /// envelope naming an unknown KDF with [`VaultError::UnsupportedVersion`].
    pub fn get_with_passphrase(&self, alias: &str, passphrase: &[u8]) -> VaultResult<Vec<u8>> {
        let auth = self.authorize(alias, Operation::GetWithPassphrase)?;
        let result = self.open_passphrase(&auth, passphrase).and_then(|inner| inner);
        self.finish(auth, result)
    }

    /// Whether `passphrase` opens the secret under `alias`.
    ///
    /// Only a wrong passphrase yields `Ok(false)`. A tampered or missing
    /// payload is still an error.
    pub fn check_passphrase(&self, alias: &str, passphrase: &[u8]) -> VaultResult<bool> {
        let auth = self.authorize(alias, Operation::CheckPassphrase)?;
        let result = self
            .open_passphrase(&auth, passphrase)
            .and_then(|inner| match inner {
                Ok(plaintext) => {
                    drop(Zeroizing::new(plaintext));
                    Ok(true)
                }
                Err(VaultError::AuthenticationFailed) => Ok(false),
                Err(err) => Err(err),
            });
        self.finish(auth, result)
    }

    /// Destroy the key for `alias` and create a new one.
    ///
    /// Nothing is re-encrypted: payloads sealed under the old key no longer
    /// open. Callers `put` again whatever they want to keep.
    pub fn rotate(&self, alias: &str) -> VaultResult<()> {
        let auth = self.authorize(alias, Operation::Rotate)?;
        let result = self.keys.rotate_key(auth.alias).map(drop);
        self.finish(auth, result)
    }

    // -----------------------------------------------------------------------
    // Ungated operations (never release a secret)
    // -----------------------------------------------------------------------

    /// Delete the payload under `alias`. The key is kept.
    pub fn remove(&self, alias: &str) -> VaultResult<()> {
        let result = self.raw.remove(alias);
        self.record(alias, Operation::Remove, &result);
        result
    }

    /// Whether a payload is persisted under `alias`.
    pub fn contains(&self, alias: &str) -> VaultResult<bool> {
        Ok(self.raw.read(alias)?.is_some())
    }

    /// Destroy key and payload for every alias in `aliases`.
    ///
    /// Runs even in an untrusted environment. Every alias is attempted; the
    /// first error, if any, is returned.
    pub fn wipe(&self, aliases: &[&str]) -> VaultResult<()> {
        let mut first_error = None;
        for alias in aliases {
            let result = self
                .keys
                .invalidate_key(alias)
                .and_then(|()| self.raw.remove(alias));
            self.record(alias, Operation::Wipe, &result);
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // -----------------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------------

    /// `Idle → Checking → Authorized | Denied`.
    fn authorize<'a>(&self, alias: &'a str, operation: Operation) -> VaultResult<Authorization<'a>> {
        debug!(alias, ?operation, "checking environment");
        match self.gate.check() {
            TrustVerdict::Trusted => Ok(Authorization { alias, operation }),
            TrustVerdict::Suspicious(signals) => {
                warn!(alias, ?operation, ?signals, "environment untrusted, operation denied");
                self.audit()
                    .append(AuditRecord::now(alias, operation, Outcome::Denied));
                Err(VaultError::UntrustedEnvironment(signals))
            }
        }
    }

    /// `Authorized → Idle`, whatever the result.
    fn finish<T>(&self, auth: Authorization<'_>, result: VaultResult<T>) -> VaultResult<T> {
        self.record(auth.alias, auth.operation, &result);
        result
    }

    fn record<T>(&self, alias: &str, operation: Operation, result: &VaultResult<T>) {
        let outcome = match result {
            Ok(_) => Outcome::Completed,
            Err(err) => {
                debug!(alias, ?operation, error = ?err.kind(), "operation failed");
                Outcome::Failed(err.kind())
            }
        };
        self.audit()
            .append(AuditRecord::now(alias, operation, outcome));
    }

    // -----------------------------------------------------------------------
    // Authorized paths
    // -----------------------------------------------------------------------

    fn associated_data(&self, alias: &str, layer: Layer) -> Option<Vec<u8>> {
        match layer {
            Layer::Device => self.config.bind_alias.then(|| alias.as_bytes().to_vec()),
            Layer::Passphrase => {
                let mut ad = PASSPHRASE_CONTEXT.to_vec();
                if self.config.bind_alias {
                    ad.extend_from_slice(alias.as_bytes());
                }
                Some(ad)
            }
        }
    }

    fn seal_and_write(
        &self,
        auth: &Authorization<'_>,
        plaintext: &[u8],
        layer: Layer,
    ) -> VaultResult<()> {
        let ad = self.associated_data(auth.alias, layer);
        let version = self.keys.with_key(auth.alias, |key| {
            let sealed = self.cipher.encrypt(key, plaintext, ad.as_deref())?;
            self.raw.write(auth.alias, &sealed.to_bytes())?;
            Ok(sealed.version())
        })?;
        debug!(alias = auth.alias, version, ?layer, "payload sealed");
        Ok(())
    }

    fn read_and_open(&self, auth: &Authorization<'_>, layer: Layer) -> VaultResult<Vec<u8>> {
        let bytes = self
            .raw
            .read(auth.alias)?
            .ok_or_else(|| VaultError::NotFound(auth.alias.to_string()))?;
        let sealed = SealedPayload::from_bytes(&bytes)?;

        let ad = self.associated_data(auth.alias, layer);
        self.keys
            .with_key(auth.alias, |key| self.cipher.decrypt(key, &sealed, ad.as_deref()))
    }

    /// Outer error: the device layer failed. Inner result: the passphrase layer.
    fn open_passphrase(
        &self,
        auth: &Authorization<'_>,
        passphrase: &[u8],
    ) -> VaultResult<VaultResult<Vec<u8>>> {
        let envelope = self.read_and_open(auth, Layer::Passphrase)?;
        Ok(passphrase::open(
            &self.cipher,
            passphrase,
            &envelope,
            self.associated_data(auth.alias, Layer::Device).as_deref(),
        ))
    }

    fn audit(&self) -> MutexGuard<'_, AuditLog> {
        // Records already appended stay valid if a sink panicked.
        self.audit.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
