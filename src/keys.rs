//! Key material and ownership.
//!
//! This module owns two responsibilities:
//! 1. Holding master key material in types that are opaque, non-cloneable,
//!    and zeroised on drop.
//! 2. Describing each key with metadata (backing, creation time, check value)
//!    that can be logged and persisted without revealing the key.
//!
//! A [`KeyHandle`] is what the cipher receives. It borrows nothing from the
//! key store and is dropped at the end of the operation that requested it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{self, KEY_LEN};
use crate::error::VaultError;

// ---------------------------------------------------------------------------
// Master key
// ---------------------------------------------------------------------------

/// Symmetric master key material for one alias.
///
/// - Not `Clone`. Cannot be duplicated without explicit conversion.
/// - Zeroised on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    /// Construct a `MasterKey` from raw bytes supplied by a key store backend.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Generate a fresh key from the system CSPRNG.
    pub fn generate() -> Result<Self, VaultError> {
        Ok(Self::from_bytes(crypto::generate_random_key()?))
    }

    /// Borrow the raw key bytes.
    ///
    /// Exposed so key store backends can persist the material. Nothing else
    /// outside the crate has a reason to call this.
    pub fn expose_secret(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Where a key's material lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyBacking {
    /// Secure hardware (TEE, secure enclave, StrongBox).
    Hardware,
    /// OS-protected software storage.
    Software,
}

impl std::fmt::Display for KeyBacking {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hardware => f.write_str("hardware"),
            Self::Software => f.write_str("software"),
        }
    }
}

/// Non-secret description of a stored key. Safe to log and persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    /// The alias the key was created for.
    pub alias: String,
    /// Backing chosen at creation. Never re-decided afterwards.
    pub backing: KeyBacking,
    /// When the key was created.
    pub created_at: DateTime<Utc>,
    /// HMAC-SHA256 of a fixed label under the key.
    pub check_value: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Key record
// ---------------------------------------------------------------------------

/// A key together with its metadata, as exchanged with a key store backend.
pub struct KeyRecord {
    pub key: MasterKey,
    pub metadata: KeyMetadata,
}

impl KeyRecord {
    /// Wrap a freshly generated key, computing its check value.
    pub(crate) fn new(alias: &str, key: MasterKey, backing: KeyBacking) -> Self {
        let check_value = crypto::key_check_value(key.expose_secret()).to_vec();
        Self {
            key,
            metadata: KeyMetadata {
                alias: alias.to_string(),
                backing,
                created_at: Utc::now(),
                check_value,
            },
        }
    }

    /// Self-test: the key must reproduce its recorded check value and belong
    /// to `alias`.
    pub(crate) fn self_test(&self, alias: &str) -> bool {
        self.metadata.alias == alias
            && crypto::verify_key_check_value(self.key.expose_secret(), &self.metadata.check_value)
    }

    pub(crate) fn into_handle(self) -> KeyHandle {
        KeyHandle {
            key: self.key,
            metadata: self.metadata,
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// A handle to an alias's master key, valid for the operation that obtained it.
///
/// - Not `Clone`.
/// - Zeroised on drop (through the inner [`MasterKey`]).
/// - Raw bytes are reachable only inside the crate.
pub struct KeyHandle {
    key: MasterKey,
    metadata: KeyMetadata,
}

impl KeyHandle {
    /// The alias this key belongs to.
    pub fn alias(&self) -> &str {
        &self.metadata.alias
    }

    /// Backing recorded at creation.
    pub fn backing(&self) -> KeyBacking {
        self.metadata.backing
    }

    /// Key metadata.
    pub fn metadata(&self) -> &KeyMetadata {
        &self.metadata
    }

    /// Stable, non-secret identifier of the key: the leading 8 bytes of the
    /// check value in hex. Two handles with equal fingerprints refer to the
    /// same key.
    pub fn fingerprint(&self) -> String {
        self.metadata
            .check_value
            .iter()
            .take(8)
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        self.key.expose_secret()
    }
}

impl std::fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyHandle")
            .field("alias", &self.metadata.alias)
            .field("backing", &self.metadata.backing)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}
