//! Passphrase sealing.
//!
//! A passphrase-sealed secret is wrapped twice: first under a key stretched
//! from the user's passphrase, then under the alias master key like any other
//! secret. Neither the device key alone nor the passphrase alone opens it.
//!
//! The inner envelope describes how its key was derived:
//!
//! ```text
//! [ kdf (1) ][ iterations (4, big-endian) ][ salt_len (1) ][ salt ][ sealed payload ... ]
//! ```
//!
//! The trailing sealed payload uses the ordinary wire format, so its own
//! version byte selects the AEAD suite. An unknown KDF byte is
//! `UnsupportedVersion`; a wrong passphrase is `AuthenticationFailed`.

use std::num::NonZeroU32;

use crate::cipher::Cipher;
use crate::crypto;
use crate::error::{VaultError, VaultResult};
use crate::payload::SealedPayload;

/// PBKDF2 rounds used for new envelopes unless configured otherwise.
pub const DEFAULT_ITERATIONS: u32 = 210_000;

/// Salt length for new envelopes.
pub const SALT_LEN: usize = 16;

const MIN_SALT_LEN: usize = 8;
const MAX_SALT_LEN: usize = 64;

/// Upper bound on stored round counts, so a forged envelope cannot stall a read.
const MAX_ITERATIONS: u32 = 10_000_000;

/// Key derivation functions an envelope can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kdf {
    /// PBKDF2 with HMAC-SHA256.
    Pbkdf2HmacSha256,
}

impl Kdf {
    pub const fn id(self) -> u8 {
        match self {
            Self::Pbkdf2HmacSha256 => 1,
        }
    }

    pub fn from_id(id: u8) -> Result<Self, VaultError> {
        match id {
            1 => Ok(Self::Pbkdf2HmacSha256),
            other => Err(VaultError::UnsupportedVersion(other)),
        }
    }
}

#[derive(Debug)]
struct Envelope {
    kdf: Kdf,
    iterations: NonZeroU32,
    salt: Vec<u8>,
    sealed: SealedPayload,
}

impl Envelope {
    fn to_bytes(&self) -> Vec<u8> {
        let sealed = self.sealed.to_bytes();
        let mut out = Vec::with_capacity(6 + self.salt.len() + sealed.len());
        out.push(self.kdf.id());
        out.extend_from_slice(&self.iterations.get().to_be_bytes());
        // Salt length is bounded by MAX_SALT_LEN.
        out.push(self.salt.len() as u8);
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&sealed);
        out
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, VaultError> {
        let (&kdf, rest) = bytes
            .split_first()
            .ok_or(VaultError::MalformedPayload("empty envelope"))?;
        let kdf = Kdf::from_id(kdf)?;

        if rest.len() < 4 {
            return Err(VaultError::MalformedPayload("truncated iteration count"));
        }
        let (count, rest) = rest.split_at(4);
        let count = u32::from_be_bytes([count[0], count[1], count[2], count[3]]);
        let iterations = NonZeroU32::new(count)
            .filter(|n| n.get() <= MAX_ITERATIONS)
            .ok_or(VaultError::MalformedPayload("iteration count out of range"))?;

        let (&salt_len, rest) = rest
            .split_first()
            .ok_or(VaultError::MalformedPayload("missing salt length"))?;
        let salt_len = usize::from(salt_len);
        if !(MIN_SALT_LEN..=MAX_SALT_LEN).contains(&salt_len) {
            return Err(VaultError::MalformedPayload("salt length out of range"));
        }
        if rest.len() < salt_len {
            return Err(VaultError::MalformedPayload("truncated salt"));
        }
        let (salt, sealed) = rest.split_at(salt_len);

        Ok(Self {
            kdf,
            iterations,
            salt: salt.to_vec(),
            sealed: SealedPayload::from_bytes(sealed)?,
        })
    }
}

/// Seal `plaintext` under a key stretched from `passphrase`, returning the
/// envelope bytes.
pub(crate) fn seal(
    cipher: &Cipher,
    passphrase: &[u8],
    iterations: u32,
    plaintext: &[u8],
    associated_data: Option<&[u8]>,
) -> VaultResult<Vec<u8>> {
    let iterations = NonZeroU32::new(iterations)
        .filter(|n| n.get() <= MAX_ITERATIONS)
        .ok_or_else(|| VaultError::Config(format!("passphrase iterations {iterations} out of range")))?;
    let mut salt = vec![0u8; SALT_LEN];
    crypto::fill_random(&mut salt)?;

    let key = crypto::derive_passphrase_key(passphrase, &salt, iterations);
    let sealed = cipher.encrypt_with(&key, plaintext, associated_data)?;

    Ok(Envelope {
        kdf: Kdf::Pbkdf2HmacSha256,
        iterations,
        salt,
        sealed,
    }
    .to_bytes())
}

/// Open envelope bytes produced by [`seal`].
pub(crate) fn open(
    cipher: &Cipher,
    passphrase: &[u8],
    envelope: &[u8],
    associated_data: Option<&[u8]>,
) -> VaultResult<Vec<u8>> {
    let envelope = Envelope::from_bytes(envelope)?;
    let key = match envelope.kdf {
        Kdf::Pbkdf2HmacSha256 => {
            crypto::derive_passphrase_key(passphrase, &envelope.salt, envelope.iterations)
        }
    };
    cipher.decrypt_with(&key, &envelope.sealed, associated_data)
}
