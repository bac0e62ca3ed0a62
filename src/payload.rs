//! Sealed payloads and their persisted wire format.
//!
//! ```text
//! [ version (1) ][ nonce_len (1) ][ nonce ][ tag_len (1) ][ tag ][ ciphertext ... ]
//! ```
//!
//! The version byte selects the AEAD suite and fixes the nonce and tag
//! lengths. Parsing checks the version first, then the declared lengths, so
//! malformed input is rejected before any cryptographic work runs.

use serde::{Deserialize, Serialize};

use crate::crypto::{NONCE_LEN, TAG_LEN};
use crate::error::VaultError;

/// The AEAD constructions walletvault can seal with. Each maps to exactly one
/// format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CipherSuite {
    /// Format version 1.
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    /// Format version 2.
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl CipherSuite {
    /// The format version written for payloads sealed with this suite.
    pub const fn version(self) -> u8 {
        match self {
            Self::Aes256Gcm => 1,
            Self::ChaCha20Poly1305 => 2,
        }
    }

    /// Resolve a format version to its suite.
    pub fn from_version(version: u8) -> Result<Self, VaultError> {
        match version {
            1 => Ok(Self::Aes256Gcm),
            2 => Ok(Self::ChaCha20Poly1305),
            other => Err(VaultError::UnsupportedVersion(other)),
        }
    }

    /// Nonce length fixed by this suite's format version.
    pub const fn nonce_len(self) -> usize {
        NONCE_LEN
    }

    /// Tag length fixed by this suite's format version.
    pub const fn tag_len(self) -> usize {
        TAG_LEN
    }
}

/// The persisted representation of one encrypted secret.
///
/// Immutable once produced. Any change to its bytes is caught by the tag
/// check on decrypt.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedPayload {
    version: u8,
    nonce: Vec<u8>,
    tag: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl std::fmt::Debug for SealedPayload {
    // Nonce and tag stay out of debug output.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedPayload")
            .field("version", &self.version)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

impl SealedPayload {
    pub(crate) fn new(version: u8, nonce: Vec<u8>, tag: Vec<u8>, ciphertext: Vec<u8>) -> Self {
        Self {
            version,
            nonce,
            tag,
            ciphertext,
        }
    }

    /// The format version byte.
    pub fn version(&self) -> u8 {
        self.version
    }

    pub(crate) fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub(crate) fn tag(&self) -> &[u8] {
        &self.tag
    }

    pub(crate) fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Length of the encrypted body (equal to the plaintext length).
    pub fn ciphertext_len(&self) -> usize {
        self.ciphertext.len()
    }

    /// Serialize to the persisted wire layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(3 + self.nonce.len() + self.tag.len() + self.ciphertext.len());
        out.push(self.version);
        // Lengths always fit: they are fixed per version and validated on parse.
        out.push(self.nonce.len() as u8);
        out.extend_from_slice(&self.nonce);
        out.push(self.tag.len() as u8);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse the persisted wire layout.
    ///
    /// Fails with `UnsupportedVersion` for an unknown version byte and with
    /// `MalformedPayload` when the declared lengths disagree with the version
    /// or the buffer is truncated.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VaultError> {
        let (&version, rest) = bytes
            .split_first()
            .ok_or(VaultError::MalformedPayload("empty buffer"))?;
        let suite = CipherSuite::from_version(version)?;

        let (&nonce_len, rest) = rest
            .split_first()
            .ok_or(VaultError::MalformedPayload("missing nonce length"))?;
        if usize::from(nonce_len) != suite.nonce_len() {
            return Err(VaultError::MalformedPayload("nonce length mismatch"));
        }
        if rest.len() < usize::from(nonce_len) {
            return Err(VaultError::MalformedPayload("truncated nonce"));
        }
        let (nonce, rest) = rest.split_at(usize::from(nonce_len));

        let (&tag_len, rest) = rest
            .split_first()
            .ok_or(VaultError::MalformedPayload("missing tag length"))?;
        if usize::from(tag_len) != suite.tag_len() {
            return Err(VaultError::MalformedPayload("tag length mismatch"));
        }
        if rest.len() < usize::from(tag_len) {
            return Err(VaultError::MalformedPayload("truncated tag"));
        }
        let (tag, ciphertext) = rest.split_at(usize::from(tag_len));

        Ok(Self::new(version, nonce.to_vec(), tag.to_vec(), ciphertext.to_vec()))
    }
}
