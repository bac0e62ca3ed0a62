//! Immutable audit logging.
//!
//! Records every façade operation: which alias, what was attempted, and how
//! it ended. Records never contain plaintext, keys or nonces. The log is
//! append-only and supports pluggable sinks for forwarding records to files
//! or other stores.
//!
//! The in-memory log keeps only the most recent records, up to its capacity.
//! Sinks receive every record.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// A sink that receives audit records. Implement this to forward records
/// to a file, database, or platform log.
pub trait AuditSink: Send {
    /// Append a record. Called for every façade operation.
    fn append(&mut self, record: AuditRecord);
}

/// The façade operation a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Put,
    Get,
    PutWithPassphrase,
    GetWithPassphrase,
    CheckPassphrase,
    Rotate,
    Remove,
    Wipe,
}

/// How the operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Authorized and finished.
    Completed,
    /// Stopped by the trust gate before touching keys or storage.
    Denied,
    /// Authorized, then failed.
    Failed(ErrorKind),
}

/// A permanent record of one façade operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub alias: String,
    pub operation: Operation,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn now(alias: &str, operation: Operation, outcome: Outcome) -> Self {
        Self {
            alias: alias.to_string(),
            operation,
            outcome,
            timestamp: Utc::now(),
        }
    }
}

/// Records kept in memory by [`AuditLog::new`].
pub const DEFAULT_CAPACITY: usize = 1024;

/// An append-only log of the most recent operations.
/// Can forward records to additional sinks via `add_forward_sink`.
#[derive(Serialize, Deserialize)]
pub struct AuditLog {
    records: VecDeque<AuditRecord>,
    capacity: usize,
    #[serde(skip)]
    forward_sinks: Vec<Box<dyn AuditSink>>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("records", &self.records)
            .field("capacity", &self.capacity)
            .field("forward_sinks", &self.forward_sinks.len())
            .finish()
    }
}

impl Clone for AuditLog {
    fn clone(&self) -> Self {
        Self {
            records: self.records.clone(),
            capacity: self.capacity,
            forward_sinks: Vec::new(), // Forward sinks are not cloned
        }
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log holding at most `capacity` records in memory. Zero keeps
    /// records in the sinks only.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
            forward_sinks: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add a sink to receive a copy of every record.
    pub fn add_forward_sink(&mut self, sink: Box<dyn AuditSink>) {
        self.forward_sinks.push(sink);
    }

    /// Append a new record to the log and forward to any attached sinks.
    /// The oldest in-memory record is evicted once the log is full.
    pub fn append(&mut self, record: AuditRecord) {
        for sink in &mut self.forward_sinks {
            sink.append(record.clone());
        }
        if self.capacity == 0 {
            return;
        }
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, AuditRecord> {
        self.records.iter()
    }
}

// ---------------------------------------------------------------------------
// Built-in sink: file
// ---------------------------------------------------------------------------

/// Writes audit records as JSON lines (one per record) to a file.
/// Creates the file if it doesn't exist; appends if it does.
pub struct FileAuditSink {
    file: std::fs::File,
}

impl FileAuditSink {
    /// Open or create a file for append-only audit logging.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl AuditSink for FileAuditSink {
    fn append(&mut self, record: AuditRecord) {
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "audit record not serializable");
                return;
            }
        };
        if let Err(err) = writeln!(self.file, "{line}").and_then(|()| self.file.flush()) {
            tracing::warn!(error = %err, "audit file write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_sink_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let mut log = AuditLog::new();
        log.add_forward_sink(Box::new(FileAuditSink::new(&path).unwrap()));
        log.append(AuditRecord::now("wallet-seed", Operation::Put, Outcome::Completed));
        log.append(AuditRecord::now(
            "wallet-seed",
            Operation::Get,
            Outcome::Failed(ErrorKind::AuthenticationFailed),
        ));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let second: AuditRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.operation, Operation::Get);
        assert_eq!(second.outcome, Outcome::Failed(ErrorKind::AuthenticationFailed));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_clone_drops_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = AuditLog::new();
        log.add_forward_sink(Box::new(FileAuditSink::new(dir.path().join("a.jsonl")).unwrap()));
        log.append(AuditRecord::now("a", Operation::Wipe, Outcome::Completed));
        let copy = log.clone();
        assert_eq!(copy.len(), 1);
        assert!(format!("{copy:?}").contains("forward_sinks: 0"));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut log = AuditLog::with_capacity(3);
        log.add_forward_sink(Box::new(FileAuditSink::new(&path).unwrap()));
        for i in 0..10 {
            log.append(AuditRecord::now(&format!("alias-{i}"), Operation::Get, Outcome::Completed));
        }

        assert_eq!(log.len(), 3);
        let aliases: Vec<_> = log.iter().map(|r| r.alias.as_str()).collect();
        assert_eq!(aliases, ["alias-7", "alias-8", "alias-9"]);
        // The sink still saw all of them.
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 10);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing_in_memory() {
        let mut log = AuditLog::with_capacity(0);
        log.append(AuditRecord::now("a", Operation::Put, Outcome::Completed));
        assert!(log.is_empty());
        assert_eq!(log.capacity(), 0);
    }
}
