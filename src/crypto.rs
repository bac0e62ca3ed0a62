//! Low-level cryptographic operations.
//!
//! This module is the only place in the crate that imports `ring`. All other
//! modules encrypt, decrypt, draw randomness and self-test keys exclusively
//! through the functions exposed here.
//!
//! Primitive choices:
//! - **AEAD**: AES-256-GCM (format v1) or ChaCha20-Poly1305 (format v2)
//! - **Nonce**: 96-bit (12 bytes), generated fresh per operation via `SystemRandom`
//! - **Tag**: 128-bit (16 bytes)
//! - **Key size**: 256 bits (32 bytes)
//! - **Key check value**: HMAC-SHA256 over a fixed label
//! - **Passphrase KDF**: PBKDF2-HMAC-SHA256

use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, CHACHA20_POLY1305};
use std::num::NonZeroU32;

use ring::rand::{SecureRandom, SystemRandom};
use ring::{hmac, pbkdf2};
use zeroize::Zeroizing;

use crate::error::VaultError;
use crate::payload::CipherSuite;

/// Size of the nonce in bytes (96 bits). Shared by both suites.
pub const NONCE_LEN: usize = 12;

/// Size of the authentication tag in bytes (128 bits). Shared by both suites.
pub const TAG_LEN: usize = 16;

/// Size of a master key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Size of a key check value in bytes (full HMAC-SHA256 output).
pub const CHECK_LEN: usize = 32;

/// Label mixed into every key check value.
const CHECK_LABEL: &[u8] = b"walletvault/key-check/v1";

fn algorithm(suite: CipherSuite) -> &'static aead::Algorithm {
    match suite {
        CipherSuite::Aes256Gcm => &AES_256_GCM,
        CipherSuite::ChaCha20Poly1305 => &CHACHA20_POLY1305,
    }
}

fn bind_key(suite: CipherSuite, key_bytes: &[u8; KEY_LEN]) -> Result<LessSafeKey, VaultError> {
    let unbound = UnboundKey::new(algorithm(suite), key_bytes).map_err(|_| VaultError::InvalidKey)?;
    Ok(LessSafeKey::new(unbound))
}

/// Fill `buf` from the system CSPRNG.
pub fn fill_random(buf: &mut [u8]) -> Result<(), VaultError> {
    let rng = SystemRandom::new();
    rng.fill(buf).map_err(|_| VaultError::RandomnessFailure)
}

/// Generate a fresh random nonce.
///
/// There is no nonce caching or counter-based generation: every encryption
/// draws 96 new bits from the OS.
pub fn generate_nonce() -> Result<[u8; NONCE_LEN], VaultError> {
    let mut buf = [0u8; NONCE_LEN];
    fill_random(&mut buf)?;
    Ok(buf)
}

/// Generate a cryptographically secure random key.
pub fn generate_random_key() -> Result<[u8; KEY_LEN], VaultError> {
    let mut key = [0u8; KEY_LEN];
    fill_random(&mut key)?;
    Ok(key)
}

/// Encrypt `plaintext` under `key_bytes`, authenticating `aad`.
///
/// Returns the ciphertext (same length as the plaintext) and the detached tag.
pub fn seal(
    suite: CipherSuite,
    key_bytes: &[u8; KEY_LEN],
    nonce: [u8; NONCE_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_LEN]), VaultError> {
    let key = bind_key(suite, key_bytes)?;
    let mut in_out = plaintext.to_vec();

    let tag = key
        .seal_in_place_separate_tag(Nonce::assume_unique_for_key(nonce), Aad::from(aad), &mut in_out)
        .map_err(|_| VaultError::InvalidKey)?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_ref());
    Ok((in_out, tag_bytes))
}

/// Verify and decrypt `ciphertext` with its detached `tag`.
///
/// The tag is checked before any plaintext is released. On failure the
/// working buffer is dropped and the caller receives no partial output.
pub fn open(
    suite: CipherSuite,
    key_bytes: &[u8; KEY_LEN],
    nonce: [u8; NONCE_LEN],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
) -> Result<Vec<u8>, VaultError> {
    let key = bind_key(suite, key_bytes)?;

    let mut in_out = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    in_out.extend_from_slice(ciphertext);
    in_out.extend_from_slice(tag);

    let plaintext = key
        .open_in_place(Nonce::assume_unique_for_key(nonce), Aad::from(aad), &mut in_out)
        .map_err(|_| VaultError::AuthenticationFailed)?;

    Ok(plaintext.to_vec())
}

/// Compute the check value for a key.
///
/// The output identifies a key without revealing it, and lets a loaded key be
/// self-tested against the value recorded at creation.
pub fn key_check_value(key_bytes: &[u8; KEY_LEN]) -> [u8; CHECK_LEN] {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key_bytes);
    let tag = hmac::sign(&key, CHECK_LABEL);
    let mut out = [0u8; CHECK_LEN];
    out.copy_from_slice(tag.as_ref());
    out
}

/// Constant-time check that `expected` is the check value of `key_bytes`.
pub fn verify_key_check_value(key_bytes: &[u8; KEY_LEN], expected: &[u8]) -> bool {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key_bytes);
    hmac::verify(&key, CHECK_LABEL, expected).is_ok()
}

/// Stretch `passphrase` into a key with PBKDF2-HMAC-SHA256.
pub fn derive_passphrase_key(
    passphrase: &[u8],
    salt: &[u8],
    iterations: NonZeroU32,
) -> Zeroizing<[u8; KEY_LEN]> {
    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, iterations, salt, passphrase, &mut out[..]);
    out
}
