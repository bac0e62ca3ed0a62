//! Environment trust gate.
//!
//! [`TrustGate::check`] inspects the host and returns a fresh
//! [`TrustVerdict`] on every call. Verdicts are never cached: root status can
//! change while the process runs. Inspection never fails outright; a probe
//! that cannot complete is itself reported as a signal.
//!
//! [`HostTrustGate`] evaluates a fixed, enumerated signal set through an
//! [`EnvironmentProbe`], so the detection logic is testable without a rooted
//! device.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::TrustPolicy;

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// One piece of evidence that the environment is compromised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "signal", content = "detail")]
pub enum TrustSignal {
    /// A root-management binary, package or directory exists.
    RootArtifact(PathBuf),
    /// The OS build is signed with test keys.
    TestKeysBuild,
    /// The build is debuggable or runs with `ro.secure=0`.
    DebuggableBuild,
    /// A system partition is mounted read-write.
    WritableSystemPartition(String),
    /// The host looks like an emulator.
    Emulator(String),
    /// A tracer is attached to this process.
    DebuggerAttached,
    /// An inspection step could not complete.
    InspectionFailed(String),
}

impl std::fmt::Display for TrustSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RootArtifact(path) => write!(f, "root artifact at {}", path.display()),
            Self::TestKeysBuild => write!(f, "test-keys build"),
            Self::DebuggableBuild => write!(f, "debuggable build"),
            Self::WritableSystemPartition(mount) => write!(f, "{mount} mounted read-write"),
            Self::Emulator(reason) => write!(f, "emulator ({reason})"),
            Self::DebuggerAttached => write!(f, "debugger attached"),
            Self::InspectionFailed(what) => write!(f, "inspection failed: {what}"),
        }
    }
}

/// Outcome of one trust check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustVerdict {
    Trusted,
    /// Every signal that fired, in evaluation order. Never empty.
    Suspicious(Vec<TrustSignal>),
}

impl TrustVerdict {
    /// Build a verdict from collected signals.
    pub fn from_signals(signals: Vec<TrustSignal>) -> Self {
        if signals.is_empty() {
            Self::Trusted
        } else {
            Self::Suspicious(signals)
        }
    }

    pub fn is_trusted(&self) -> bool {
        matches!(self, Self::Trusted)
    }
}

/// Decides whether the host may handle secrets right now.
///
/// Callers performing a key operation call `check` immediately before it and
/// abort on [`TrustVerdict::Suspicious`].
pub trait TrustGate: Send + Sync {
    fn check(&self) -> TrustVerdict;
}

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

/// Read-only OS inspection primitives.
///
/// Missing files and properties are `Ok(None)` / `Ok(false)`, not errors.
pub trait EnvironmentProbe: Send + Sync {
    /// Whether `path` exists.
    fn path_exists(&self, path: &Path) -> io::Result<bool>;

    /// A system build property such as `ro.build.tags`.
    fn property(&self, name: &str) -> io::Result<Option<String>>;

    /// Contents of the mount table.
    fn mounts(&self) -> io::Result<Option<String>>;

    /// Contents of this process's status file.
    fn process_status(&self) -> io::Result<Option<String>>;
}

/// Probe over the real filesystem.
///
/// Build properties are read from a `key=value` properties file
/// (`/system/build.prop` by default).
#[derive(Debug, Clone)]
pub struct HostProbe {
    build_prop: PathBuf,
    mounts: PathBuf,
    status: PathBuf,
}

impl Default for HostProbe {
    fn default() -> Self {
        Self {
            build_prop: PathBuf::from("/system/build.prop"),
            mounts: PathBuf::from("/proc/mounts"),
            status: PathBuf::from("/proc/self/status"),
        }
    }
}

impl HostProbe {
    /// A probe reading from explicit locations (for chroots and tests).
    pub fn with_paths(
        build_prop: impl Into<PathBuf>,
        mounts: impl Into<PathBuf>,
        status: impl Into<PathBuf>,
    ) -> Self {
        Self {
            build_prop: build_prop.into(),
            mounts: mounts.into(),
            status: status.into(),
        }
    }

    fn read_optional(path: &Path) -> io::Result<Option<String>> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl EnvironmentProbe for HostProbe {
    fn path_exists(&self, path: &Path) -> io::Result<bool> {
        match std::fs::symlink_metadata(path) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            // EACCES says nothing about the leaf; the caller reports it as an
            // inspection failure.
            Err(err) => Err(err),
        }
    }

    fn property(&self, name: &str) -> io::Result<Option<String>> {
        let Some(contents) = Self::read_optional(&self.build_prop)? else {
            return Ok(None);
        };
        Ok(parse_properties(&contents).remove(name))
    }

    fn mounts(&self) -> io::Result<Option<String>> {
        Self::read_optional(&self.mounts)
    }

    fn process_status(&self) -> io::Result<Option<String>> {
        Self::read_optional(&self.status)
    }
}

fn parse_properties(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Host gate
// ---------------------------------------------------------------------------

/// Partitions that must be mounted read-only on a stock device.
const SYSTEM_MOUNTS: &[&str] = &["/system", "/vendor"];

const EMULATOR_HARDWARE: &[&str] = &["goldfish", "ranchu", "vbox86"];

const EMULATOR_MODELS: &[&str] = &["google_sdk", "Emulator", "Android SDK built for"];

/// Mount sources or targets that only root managers create.
const ROOT_MOUNT_MARKERS: &[&str] = &["magisk", "/.magisk", "/debug_ramdisk"];

/// Multi-signal trust gate over an [`EnvironmentProbe`].
pub struct HostTrustGate<P: EnvironmentProbe = HostProbe> {
    probe: P,
    policy: TrustPolicy,
}

impl HostTrustGate<HostProbe> {
    /// A gate inspecting the real host.
    pub fn host(policy: TrustPolicy) -> Self {
        Self::new(HostProbe::default(), policy)
    }
}

impl<P: EnvironmentProbe> HostTrustGate<P> {
    pub fn new(probe: P, policy: TrustPolicy) -> Self {
        Self { probe, policy }
    }

    fn check_root_paths(&self, signals: &mut Vec<TrustSignal>) {
        let paths = self.policy.root_paths.iter().chain(&self.policy.extra_root_paths);
        for path in paths {
            match self.probe.path_exists(path) {
                Ok(true) => signals.push(TrustSignal::RootArtifact(path.clone())),
                Ok(false) => {}
                Err(err) => signals.push(TrustSignal::InspectionFailed(format!(
                    "stat {}: {}",
                    path.display(),
                    err.kind()
                ))),
            }
        }
    }

    fn property(&self, name: &str, signals: &mut Vec<TrustSignal>) -> Option<String> {
        match self.probe.property(name) {
            Ok(value) => value,
            Err(err) => {
                signals.push(TrustSignal::InspectionFailed(format!("property {name}: {}", err.kind())));
                None
            }
        }
    }

    fn check_build(&self, signals: &mut Vec<TrustSignal>) {
        if self
            .property("ro.build.tags", signals)
            .is_some_and(|tags| tags.contains("test-keys"))
        {
            signals.push(TrustSignal::TestKeysBuild);
        }

        let debuggable = self.property("ro.debuggable", signals).as_deref() == Some("1");
        let insecure = self.property("ro.secure", signals).as_deref() == Some("0");
        if (debuggable || insecure) && !self.policy.allow_debuggable {
            signals.push(TrustSignal::DebuggableBuild);
        }
    }

    fn check_emulator(&self, signals: &mut Vec<TrustSignal>) {
        if self.policy.allow_emulator {
            return;
        }
        if self.property("ro.kernel.qemu", signals).as_deref() == Some("1") {
            signals.push(TrustSignal::Emulator("qemu kernel".to_string()));
        }
        if let Some(hardware) = self.property("ro.hardware", signals) {
            if EMULATOR_HARDWARE.contains(&hardware.as_str()) {
                signals.push(TrustSignal::Emulator(format!("hardware {hardware}")));
            }
        }
        if let Some(model) = self.property("ro.product.model", signals) {
            if model == "sdk" || EMULATOR_MODELS.iter().any(|m| model.contains(m)) {
                signals.push(TrustSignal::Emulator(format!("model {model}")));
            }
        }
    }

    fn check_mounts(&self, signals: &mut Vec<TrustSignal>) {
        let table = match self.probe.mounts() {
            Ok(Some(table)) => table,
            Ok(None) => return,
            Err(err) => {
                signals.push(TrustSignal::InspectionFailed(format!("mounts: {}", err.kind())));
                return;
            }
        };
        // Fields: device mountpoint fstype options dump pass
        for line in table.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (Some(mountpoint), Some(options)) = (fields.get(1), fields.get(3)) else {
                continue;
            };
            if SYSTEM_MOUNTS.contains(mountpoint) && options.split(',').any(|o| o == "rw") {
                signals.push(TrustSignal::WritableSystemPartition((*mountpoint).to_string()));
            }
            let device = fields.first().copied().unwrap_or_default();
            if ROOT_MOUNT_MARKERS
                .iter()
                .any(|marker| device.contains(marker) || mountpoint.contains(marker))
            {
                let artifact = TrustSignal::RootArtifact(PathBuf::from(*mountpoint));
                if !signals.contains(&artifact) {
                    signals.push(artifact);
                }
            }
        }
    }

    fn check_tracer(&self, signals: &mut Vec<TrustSignal>) {
        let status = match self.probe.process_status() {
            Ok(Some(status)) => status,
            Ok(None) => return,
            Err(err) => {
                signals.push(TrustSignal::InspectionFailed(format!("process status: {}", err.kind())));
                return;
            }
        };
        let tracer = status
            .lines()
            .find_map(|line| line.strip_prefix("TracerPid:"))
            .map(str::trim);
        match tracer {
            Some("0") | None => {}
            Some(pid) if pid.parse::<u32>().is_ok() => signals.push(TrustSignal::DebuggerAttached),
            Some(_) => signals.push(TrustSignal::InspectionFailed("unreadable TracerPid".to_string())),
        }
    }
}

impl<P: EnvironmentProbe> TrustGate for HostTrustGate<P> {
    fn check(&self) -> TrustVerdict {
        let mut signals = Vec::new();
        self.check_root_paths(&mut signals);
        self.check_build(&mut signals);
        self.check_emulator(&mut signals);
        self.check_mounts(&mut signals);
        self.check_tracer(&mut signals);
        TrustVerdict::from_signals(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeProbe {
        paths: Vec<PathBuf>,
        denied: Vec<PathBuf>,
        props: HashMap<String, String>,
        mounts: Option<String>,
        status: Option<String>,
        broken_props: bool,
    }

    impl EnvironmentProbe for FakeProbe {
        fn path_exists(&self, path: &Path) -> io::Result<bool> {
            if self.denied.iter().any(|p| p == path) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
            }
            Ok(self.paths.iter().any(|p| p == path))
        }
        fn property(&self, name: &str) -> io::Result<Option<String>> {
            if self.broken_props {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
            }
            Ok(self.props.get(name).cloned())
        }
        fn mounts(&self) -> io::Result<Option<String>> {
            Ok(self.mounts.clone())
        }
        fn process_status(&self) -> io::Result<Option<String>> {
            Ok(self.status.clone())
        }
    }

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_clean_host_is_trusted() {
        let probe = FakeProbe {
            props: props(&[("ro.build.tags", "release-keys"), ("ro.debuggable", "0")]),
            mounts: Some("/dev/block/dm-0 /system ext4 ro,seclabel 0 0\n".into()),
            status: Some("Name:\tapp\nTracerPid:\t0\n".into()),
            ..FakeProbe::default()
        };
        let gate = HostTrustGate::new(probe, TrustPolicy::default());
        assert_eq!(gate.check(), TrustVerdict::Trusted);
    }

    #[test]
    fn test_collects_every_signal() {
        let probe = FakeProbe {
            paths: vec![PathBuf::from("/system/xbin/su")],
            props: props(&[
                ("ro.build.tags", "test-keys"),
                ("ro.secure", "0"),
                ("ro.hardware", "ranchu"),
            ]),
            mounts: Some("/dev/root /system ext4 rw,relatime 0 0\n".into()),
            status: Some("TracerPid:\t4242\n".into()),
            ..FakeProbe::default()
        };
        let gate = HostTrustGate::new(probe, TrustPolicy::default());
        let TrustVerdict::Suspicious(signals) = gate.check() else {
            panic!("expected suspicious verdict");
        };
        assert!(signals.contains(&TrustSignal::RootArtifact("/system/xbin/su".into())));
        assert!(signals.contains(&TrustSignal::TestKeysBuild));
        assert!(signals.contains(&TrustSignal::DebuggableBuild));
        assert!(signals.contains(&TrustSignal::Emulator("hardware ranchu".into())));
        assert!(signals.contains(&TrustSignal::WritableSystemPartition("/system".into())));
        assert!(signals.contains(&TrustSignal::DebuggerAttached));
    }

    #[test]
    fn test_policy_allowances() {
        let probe = FakeProbe {
            props: props(&[("ro.debuggable", "1"), ("ro.kernel.qemu", "1")]),
            ..FakeProbe::default()
        };
        let policy = TrustPolicy {
            allow_debuggable: true,
            allow_emulator: true,
            ..TrustPolicy::default()
        };
        assert!(HostTrustGate::new(probe, policy).check().is_trusted());
    }

    #[test]
    fn test_failed_inspection_is_suspicious() {
        let probe = FakeProbe {
            broken_props: true,
            ..FakeProbe::default()
        };
        let verdict = HostTrustGate::new(probe, TrustPolicy::default()).check();
        match verdict {
            TrustVerdict::Suspicious(signals) => assert!(signals
                .iter()
                .all(|s| matches!(s, TrustSignal::InspectionFailed(_)))),
            TrustVerdict::Trusted => panic!("probe failure must not be trusted"),
        }
    }

    #[test]
    fn test_host_probe_reads_property_file() {
        let dir = tempfile::tempdir().unwrap();
        let prop = dir.path().join("build.prop");
        std::fs::write(&prop, "# comment\nro.build.tags=release-keys\nro.debuggable = 1\n").unwrap();
        let probe = HostProbe::with_paths(&prop, dir.path().join("mounts"), dir.path().join("status"));

        assert_eq!(probe.property("ro.debuggable").unwrap().as_deref(), Some("1"));
        assert_eq!(probe.property("ro.missing").unwrap(), None);
        assert_eq!(probe.mounts().unwrap(), None);
        assert!(probe.path_exists(&prop).unwrap());
        assert!(!probe.path_exists(&dir.path().join("su")).unwrap());
    }

    #[test]
    fn test_denied_path_is_not_a_root_artifact() {
        let probe = FakeProbe {
            denied: vec![PathBuf::from("/data/adb/magisk")],
            ..FakeProbe::default()
        };
        let policy = TrustPolicy {
            extra_root_paths: vec![PathBuf::from("/data/adb/magisk")],
            ..TrustPolicy::default()
        };
        let TrustVerdict::Suspicious(signals) = HostTrustGate::new(probe, policy).check() else {
            panic!("an unreadable path cannot be trusted");
        };
        assert_eq!(signals.len(), 1);
        assert!(matches!(&signals[0], TrustSignal::InspectionFailed(what) if what.contains("/data/adb/magisk")));
    }

    #[test]
    fn test_default_policy_trusts_stock_host_with_root_only_dirs() {
        // /data/adb and /sbin deny lookups to apps on stock devices.
        let probe = FakeProbe {
            denied: vec![
                PathBuf::from("/data/adb/magisk"),
                PathBuf::from("/sbin/.magisk"),
                PathBuf::from("/sbin/su"),
            ],
            ..FakeProbe::default()
        };
        assert!(HostTrustGate::new(probe, TrustPolicy::default()).check().is_trusted());
    }

    #[test]
    fn test_magisk_mounts_are_root_artifacts() {
        let probe = FakeProbe {
            mounts: Some(
                "/dev/block/dm-0 /system ext4 ro 0 0\n\
                 magisk /system/bin/su tmpfs ro 0 0\n\
                 tmpfs /sbin/.magisk/mirror tmpfs rw 0 0\n"
                    .into(),
            ),
            ..FakeProbe::default()
        };
        let TrustVerdict::Suspicious(signals) =
            HostTrustGate::new(probe, TrustPolicy::default()).check()
        else {
            panic!("expected suspicious verdict");
        };
        assert_eq!(
            signals,
            vec![
                TrustSignal::RootArtifact("/system/bin/su".into()),
                TrustSignal::RootArtifact("/sbin/.magisk/mirror".into()),
            ]
        );
    }
}
