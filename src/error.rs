//! Error types for walletvault.
//!
//! Every variant is a distinct failure mode of the secure-storage pipeline.
//! Messages are intentionally minimal: they signal *what* failed without
//! carrying plaintext, key material or nonces.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trust::TrustSignal;

/// Result alias used throughout the crate.
pub type VaultResult<T> = Result<T, VaultError>;

/// The single error type for all walletvault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The trust gate reported a suspicious environment. The operation was
    /// aborted before any key or storage access.
    #[error("untrusted environment: {}", join_signals(.0))]
    UntrustedEnvironment(Vec<TrustSignal>),

    /// The secure key store could not be reached (device locked, hardware
    /// fault). Safe to retry.
    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    /// A stored key failed its self-test and could not be recreated.
    #[error("key corrupted for alias {0}")]
    KeyCorrupted(String),

    /// Tag verification failed: tampering, wrong key or wrong associated data.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The payload's format version is not recognised.
    #[error("unsupported payload version: {0}")]
    UnsupportedVersion(u8),

    /// The payload bytes do not match the layout of their declared version.
    #[error("malformed payload: {0}")]
    MalformedPayload(&'static str),

    /// The raw persistence layer is unreachable.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// No payload is persisted under the alias.
    #[error("no entry for alias {0}")]
    NotFound(String),

    /// The system's random number generator failed to produce bytes.
    #[error("randomness source failed")]
    RandomnessFailure,

    /// Key material was rejected by the AEAD primitive.
    #[error("invalid key")]
    InvalidKey,

    /// Configuration could not be read or parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl VaultError {
    /// A data-free classification of the error, suitable for audit records.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UntrustedEnvironment(_) => ErrorKind::UntrustedEnvironment,
            Self::KeyUnavailable(_) => ErrorKind::KeyUnavailable,
            Self::KeyCorrupted(_) => ErrorKind::KeyCorrupted,
            Self::AuthenticationFailed => ErrorKind::AuthenticationFailed,
            Self::UnsupportedVersion(_) => ErrorKind::UnsupportedVersion,
            Self::MalformedPayload(_) => ErrorKind::MalformedPayload,
            Self::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::RandomnessFailure => ErrorKind::RandomnessFailure,
            Self::InvalidKey => ErrorKind::InvalidKey,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether retrying the same call later can succeed.
    ///
    /// Cryptographic failures are final for their inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::KeyUnavailable(_) | Self::StorageUnavailable(_))
    }
}

/// Variant tag of a [`VaultError`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UntrustedEnvironment,
    KeyUnavailable,
    KeyCorrupted,
    AuthenticationFailed,
    UnsupportedVersion,
    MalformedPayload,
    StorageUnavailable,
    NotFound,
    RandomnessFailure,
    InvalidKey,
    Config,
}

fn join_signals(signals: &[TrustSignal]) -> String {
    signals
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
