//! # walletvault
//!
//! Trust-gated secret storage for wallet seeds, private keys and other
//! sensitive values on devices that may be rooted, debuggable or physically
//! accessed.
//!
//! Every `put` and `get` runs the same pipeline:
//!
//! ```text
//! TrustGate::check ─► KeyManager::get_or_create_key ─► Cipher ─► RawStore
//! ```
//!
//! - [`trust`] decides, fresh on every call, whether the host may handle
//!   secrets at all.
//! - [`manager`] owns one master key per alias inside a [`keystore`],
//!   serializing first use per alias.
//! - [`cipher`] seals plaintext into a versioned, authenticated
//!   [`payload::SealedPayload`].
//! - [`passphrase`] adds an optional second layer under a key stretched from
//!   the user's passphrase.
//! - [`store`] composes them behind `put` / `get` / `rotate`.
//!
//! ## Public API
//!
//! Most callers need only [`SecureStore`], a [`VaultConfig`], a key store and
//! a raw store. The lower layers are public so platform bridges can supply
//! their own [`keystore::SecureKeyStore`], [`raw::RawStore`] and
//! [`trust::EnvironmentProbe`] implementations.

// Module declarations.
pub mod audit;
pub mod cipher;
pub mod config;
pub(crate) mod crypto;
pub mod error;
pub mod keys;
pub mod keystore;
pub mod manager;
pub mod passphrase;
pub mod payload;
pub mod raw;
pub mod store;
pub mod trust;

pub use config::{TrustPolicy, VaultConfig};
pub use error::{ErrorKind, VaultError, VaultResult};
pub use store::SecureStore;
pub use trust::{TrustGate, TrustSignal, TrustVerdict};
