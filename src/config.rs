//! Store configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audit;
use crate::error::VaultError;
use crate::passphrase;
use crate::payload::CipherSuite;

/// Root-management artifacts checked by default.
///
/// Every parent directory here is searchable by an unprivileged app on a
/// stock device, so a denied lookup never stands in for a hit. Magisk lives
/// under root-only directories and is found through the mount table instead.
const DEFAULT_ROOT_PATHS: &[&str] = &[
    "/system/app/Superuser.apk",
    "/system/bin/su",
    "/system/xbin/su",
    "/data/local/xbin/su",
    "/data/local/bin/su",
    "/system/sd/xbin/su",
    "/system/bin/failsafe/su",
    "/data/local/su",
    "/su/bin/su",
    "/system/xbin/busybox",
];

/// What the trust gate inspects and tolerates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustPolicy {
    pub root_paths: Vec<PathBuf>,
    /// Appended to `root_paths`; lets a config add paths without restating
    /// the defaults.
    pub extra_root_paths: Vec<PathBuf>,
    pub allow_emulator: bool,
    pub allow_debuggable: bool,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            root_paths: DEFAULT_ROOT_PATHS.iter().map(PathBuf::from).collect(),
            extra_root_paths: Vec::new(),
            allow_emulator: false,
            allow_debuggable: false,
        }
    }
}

/// Configuration for [`crate::store::SecureStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Suite for new seals. Existing payloads open with whatever suite their
    /// version names.
    pub cipher_suite: CipherSuite,
    /// Authenticate the alias as associated data.
    pub bind_alias: bool,
    /// Request hardware-backed keys when the key store offers them.
    pub prefer_hardware: bool,
    /// JSON-lines audit file, if any.
    pub audit_path: Option<PathBuf>,
    /// Most recent audit records kept in memory. Sinks receive all of them.
    pub audit_capacity: usize,
    /// PBKDF2 rounds for newly passphrase-sealed secrets. Existing payloads
    /// open with the count they recorded.
    pub passphrase_iterations: u32,
    pub trust: TrustPolicy,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            cipher_suite: CipherSuite::default(),
            bind_alias: true,
            prefer_hardware: true,
            audit_path: None,
            audit_capacity: audit::DEFAULT_CAPACITY,
            passphrase_iterations: passphrase::DEFAULT_ITERATIONS,
            trust: TrustPolicy::default(),
        }
    }
}

impl VaultConfig {
    pub fn from_json_str(json: &str) -> Result<Self, VaultError> {
        serde_json::from_str(json).map_err(|err| VaultError::Config(err.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, VaultError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|err| VaultError::Config(format!("{}: {err}", path.display())))?;
        Self::from_json_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_gives_defaults() {
        let config = VaultConfig::from_json_str("{}").unwrap();
        assert_eq!(config, VaultConfig::default());
        assert!(config.bind_alias);
        assert!(config.trust.root_paths.contains(&PathBuf::from("/system/xbin/su")));
        assert!(!config.trust.root_paths.contains(&PathBuf::from("/data/adb/magisk")));
    }

    #[test]
    fn test_partial_override() {
        let config = VaultConfig::from_json_str(
            r#"{
                "cipher_suite": "chacha20-poly1305",
                "prefer_hardware": false,
                "audit_capacity": 64,
                "passphrase_iterations": 600000,
                "trust": { "allow_emulator": true, "extra_root_paths": ["/opt/su"] }
            }"#,
        )
        .unwrap();
        assert_eq!(config.cipher_suite, CipherSuite::ChaCha20Poly1305);
        assert!(!config.prefer_hardware);
        assert_eq!(config.audit_capacity, 64);
        assert_eq!(config.passphrase_iterations, 600_000);
        assert!(config.trust.allow_emulator);
        assert!(!config.trust.allow_debuggable);
        assert_eq!(config.trust.extra_root_paths, vec![PathBuf::from("/opt/su")]);
        assert_eq!(config.trust.root_paths.len(), DEFAULT_ROOT_PATHS.len());
    }

    #[test]
    fn test_bad_json_is_config_error() {
        assert!(matches!(
            VaultConfig::from_json_str("{ \"bind_alias\": 3 }"),
            Err(VaultError::Config(_))
        ));
        assert!(matches!(
            VaultConfig::from_path("/nonexistent/walletvault.json"),
            Err(VaultError::Config(_))
        ));
    }
}
