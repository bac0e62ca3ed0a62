//! Authenticated encryption of secrets into [`SealedPayload`]s.
//!
//! [`Cipher`] is stateless apart from the suite it seals new payloads with.
//! It is `Copy`, reentrant and holds no key: each call borrows a
//! [`KeyHandle`] for its own duration only.
//!
//! The version byte is prepended to the caller's associated data before it
//! reaches the AEAD, so a payload cannot be relabelled as another format.

use crate::crypto::{self, KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::error::VaultError;
use crate::keys::KeyHandle;
use crate::payload::{CipherSuite, SealedPayload};

/// Stateless AEAD transformer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cipher {
    suite: CipherSuite,
}

impl Cipher {
    /// A cipher that seals new payloads with `suite`.
    pub fn new(suite: CipherSuite) -> Self {
        Self { suite }
    }

    /// The suite used for new seals.
    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Seal `plaintext` under `key` with a fresh random nonce.
    ///
    /// `associated_data`, when given, is authenticated but not encrypted; the
    /// same bytes must be supplied to [`Self::decrypt`].
    pub fn encrypt(
        &self,
        key: &KeyHandle,
        plaintext: &[u8],
        associated_data: Option<&[u8]>,
    ) -> Result<SealedPayload, VaultError> {
        self.encrypt_with(key.as_bytes(), plaintext, associated_data)
    }

    pub(crate) fn encrypt_with(
        &self,
        key_bytes: &[u8; KEY_LEN],
        plaintext: &[u8],
        associated_data: Option<&[u8]>,
    ) -> Result<SealedPayload, VaultError> {
        let version = self.suite.version();
        let nonce = crypto::generate_nonce()?;
        let aad = bind_version(version, associated_data);

        let (ciphertext, tag) = crypto::seal(self.suite, key_bytes, nonce, &aad, plaintext)?;

        Ok(SealedPayload::new(version, nonce.to_vec(), tag.to_vec(), ciphertext))
    }

    /// Verify and open `payload` under `key`.
    ///
    /// The suite is chosen by the payload's version, not by this cipher's
    /// configured suite. Version and lengths are validated before any
    /// cryptographic work; on tag mismatch no plaintext is returned.
    pub fn decrypt(
        &self,
        key: &KeyHandle,
        payload: &SealedPayload,
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>, VaultError> {
        self.decrypt_with(key.as_bytes(), payload, associated_data)
    }

    pub(crate) fn decrypt_with(
        &self,
        key_bytes: &[u8; KEY_LEN],
        payload: &SealedPayload,
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>, VaultError> {
        let suite = CipherSuite::from_version(payload.version())?;

        let nonce: [u8; NONCE_LEN] = payload
            .nonce()
            .try_into()
            .map_err(|_| VaultError::MalformedPayload("nonce length mismatch"))?;
        let tag: [u8; TAG_LEN] = payload
            .tag()
            .try_into()
            .map_err(|_| VaultError::MalformedPayload("tag length mismatch"))?;

        let aad = bind_version(payload.version(), associated_data);
        crypto::open(suite, key_bytes, nonce, &aad, payload.ciphertext(), &tag)
    }
}

fn bind_version(version: u8, associated_data: Option<&[u8]>) -> Vec<u8> {
    let extra = associated_data.unwrap_or_default();
    let mut aad = Vec::with_capacity(1 + extra.len());
    aad.push(version);
    aad.extend_from_slice(extra);
    aad
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KeyBacking, KeyRecord, MasterKey};

    fn handle(alias: &str) -> KeyHandle {
        KeyRecord::new(alias, MasterKey::generate().unwrap(), KeyBacking::Software).into_handle()
    }

    #[test]
    fn test_roundtrip_with_and_without_aad() {
        let key = handle("wallet-seed");
        let cipher = Cipher::default();

        let sealed = cipher.encrypt(&key, b"abandon ability able", Some(b"wallet-seed".as_slice())).unwrap();
        assert_eq!(sealed.version(), 1);
        assert_eq!(
            cipher.decrypt(&key, &sealed, Some(b"wallet-seed".as_slice())).unwrap(),
            b"abandon ability able"
        );

        let bare = cipher.encrypt(&key, b"", None).unwrap();
        assert!(cipher.decrypt(&key, &bare, None).unwrap().is_empty());
    }

    #[test]
    fn test_missing_aad_fails_authentication() {
        let key = handle("a");
        let cipher = Cipher::default();
        let sealed = cipher.encrypt(&key, b"x", Some(b"a".as_slice())).unwrap();
        assert!(matches!(
            cipher.decrypt(&key, &sealed, None),
            Err(VaultError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let cipher = Cipher::default();
        let sealed = cipher.encrypt(&handle("a"), b"x", None).unwrap();
        assert!(matches!(
            cipher.decrypt(&handle("a"), &sealed, None),
            Err(VaultError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_decrypt_dispatches_on_version() {
        let key = handle("a");
        let chacha = Cipher::new(CipherSuite::ChaCha20Poly1305);
        let sealed = chacha.encrypt(&key, b"legacy", None).unwrap();
        assert_eq!(sealed.version(), 2);
        // A cipher configured for AES still opens v2 payloads.
        assert_eq!(Cipher::default().decrypt(&key, &sealed, None).unwrap(), b"legacy");
    }

    #[test]
    fn test_version_relabel_is_rejected() {
        let key = handle("a");
        let sealed = Cipher::default().encrypt(&key, b"x", None).unwrap();
        let mut bytes = sealed.to_bytes();
        bytes[0] = 2;
        let relabelled = SealedPayload::from_bytes(&bytes).unwrap();
        assert!(matches!(
            Cipher::default().decrypt(&key, &relabelled, None),
            Err(VaultError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_unknown_version_rejected_before_crypto() {
        let key = handle("a");
        let forged = SealedPayload::new(9, vec![0; NONCE_LEN], vec![0; TAG_LEN], vec![1, 2, 3]);
        assert!(matches!(
            Cipher::default().decrypt(&key, &forged, None),
            Err(VaultError::UnsupportedVersion(9))
        ));

        let short_nonce = SealedPayload::new(1, vec![0; 4], vec![0; TAG_LEN], vec![]);
        assert!(matches!(
            Cipher::default().decrypt(&key, &short_nonce, None),
            Err(VaultError::MalformedPayload(_))
        ));
    }
}
