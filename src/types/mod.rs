use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use zeroize_derive::{Zeroize, ZeroizeOnDrop};

use crate::types::error::RelayError;

pub mod error;
pub mod token;

/// An object discovered by listing the source bucket.
///
/// `key` is the full key in the source bucket. `name` is the key relative to
/// the configured source prefix; it is what gets classified and what the
/// remote file is called on the SFTP server.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceObject {
    pub key: String,
    pub name: String,
    pub size: i64,
    pub e_tag: Option<String>,
}

impl SourceObject {
    pub fn new(key: &str, prefix: &str, size: i64, e_tag: Option<String>) -> Self {
        let name = key
            .strip_prefix(prefix)
            .unwrap_or(key)
            .trim_start_matches('/')
            .to_string();
        Self {
            key: key.to_string(),
            name,
            size,
            e_tag,
        }
    }

    /// Last path segment of the key; virtual folders are discarded.
    pub fn base_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Status of a server-side archive copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStatus {
    Pending,
    Success,
    Failed,
    Aborted,
}

impl Display for CopyStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let status = match self {
            CopyStatus::Pending => "Pending",
            CopyStatus::Success => "Success",
            CopyStatus::Failed => "Failed",
            CopyStatus::Aborted => "Aborted",
        };
        f.write_str(status)
    }
}

/// An archive copy in flight.
///
/// `expected_e_tag` and `expected_size` are what the destination object must
/// report for the copy to be considered settled successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyOperation {
    pub source_uri: String,
    pub destination_bucket: String,
    pub destination_key: String,
    pub status: CopyStatus,
    pub expected_e_tag: Option<String>,
    pub expected_size: i64,
}

impl CopyOperation {
    pub fn destination(&self) -> String {
        format!("{}/{}", self.destination_bucket, self.destination_key)
    }
}

/// Result of an idempotent delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Per-object processing stage, reported with every object failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStage {
    Classifying,
    Downloading,
    Uploading,
    Archiving,
    Deleting,
}

impl Display for RelayStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let stage = match self {
            RelayStage::Classifying => "classifying",
            RelayStage::Downloading => "downloading",
            RelayStage::Uploading => "uploading",
            RelayStage::Archiving => "archiving",
            RelayStage::Deleting => "deleting",
        };
        f.write_str(stage)
    }
}

/// A single object's failure within a pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectFailure {
    pub name: String,
    pub stage: RelayStage,
    pub error: RelayError,
}

/// Final state of one object within a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Succeeded,
    Skipped,
    Failed(ObjectFailure),
}

/// Summary returned by every completed pass.
#[derive(Debug, Clone)]
pub struct PassSummary {
    pub pass_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub failures: Vec<ObjectFailure>,
    pub cancelled: bool,
}

impl PassSummary {
    pub fn total(&self) -> u64 {
        self.succeeded + self.skipped + self.failed
    }

    pub fn has_failure(&self) -> bool {
        self.failed > 0
    }
}

impl Display for PassSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "relay pass {}: succeeded={} skipped={} failed={}",
            self.pass_id, self.succeeded, self.skipped, self.failed
        )
    }
}

/// Thread-safe accumulator shared by the relayer workers of one pass.
#[derive(Debug, Default)]
pub struct PassStatsReport {
    succeeded: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    failures: Mutex<Vec<ObjectFailure>>,
}

impl PassStatsReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Succeeded => {
                self.succeeded.fetch_add(1, Ordering::SeqCst);
            }
            TaskOutcome::Skipped => {
                self.skipped.fetch_add(1, Ordering::SeqCst);
            }
            TaskOutcome::Failed(failure) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                self.failures.lock().unwrap().push(failure);
            }
        }
    }

    pub fn snapshot(
        &self,
        pass_id: Uuid,
        started_at: DateTime<Utc>,
        duration: Duration,
        cancelled: bool,
    ) -> PassSummary {
        PassSummary {
            pass_id,
            started_at,
            duration,
            succeeded: self.succeeded.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            failures: self.failures.lock().unwrap().clone(),
            cancelled,
        }
    }
}

/// S3 storage path specification.
#[derive(Debug, Clone, PartialEq)]
pub enum StoragePath {
    S3 { bucket: String, prefix: String },
}

/// AWS configuration file locations.
#[derive(Debug, Clone)]
pub struct ClientConfigLocation {
    pub aws_config_file: Option<PathBuf>,
    pub aws_shared_credentials_file: Option<PathBuf>,
}

/// AWS credential sources for the storage connection.
#[derive(Debug, Clone)]
pub enum S3Credentials {
    Profile(String),
    Credentials { access_keys: AccessKeys },
    FromEnvironment,
}

/// AWS access key pair, cleared from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccessKeys {
    pub access_key: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Debug for AccessKeys {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut keys = f.debug_struct("AccessKeys");
        let session_token = self
            .session_token
            .as_ref()
            .map_or("None", |_| "** redacted **");
        keys.field("access_key", &self.access_key)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &session_token);
        keys.finish()
    }
}

/// SFTP login, cleared from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SftpCredentials {
    pub username: String,
    pub password: String,
}

impl Debug for SftpCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SftpCredentials")
            .field("username", &self.username)
            .field("password", &"** redacted **")
            .finish()
    }
}
