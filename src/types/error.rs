use anyhow::Error;
use thiserror::Error;

use crate::types::CopyStatus;

/// Application-level error types for s3relay-rs.
///
/// Startup errors (`ConfigurationMissing`, `InvalidConfig`) abort the process
/// before any pass runs. Object-level errors are caught at the per-object
/// boundary of a pass and only reported through logs and the
/// [`PassSummary`](crate::types::PassSummary). Pass-level errors are returned
/// from [`RelayPipeline::run_pass`](crate::RelayPipeline::run_pass).
///
/// ## Exit Codes
///
/// Each variant maps to an exit code (via `exit_code()`):
/// - 0: Non-error conditions (Cancelled)
/// - 1: General errors (object-level and pass-level failures)
/// - 2: Configuration errors (ConfigurationMissing, InvalidConfig)
/// - 3: Overlapping pass (PassInProgress)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    /// A required configuration value was not provided.
    #[error("Required configuration is missing: {0}")]
    ConfigurationMissing(String),

    /// A configuration value was provided but is not usable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The source object could not be read (deleted, moved or backend unreachable).
    #[error("Source object '{key}' is unavailable: {message}")]
    SourceUnavailable { key: String, message: String },

    /// The SFTP session could not be established.
    #[error("Failed to connect to SFTP server {host}: {message}")]
    TransferConnectFailed { host: String, message: String },

    /// The payload could not be written to the SFTP server.
    #[error("Failed to upload to '{path}': {message}")]
    TransferUploadFailed { path: String, message: String },

    /// The backend rejected the archive copy request.
    #[error("Failed to start archive copy of '{key}': {message}")]
    CopyInitiationFailed { key: String, message: String },

    /// The archive bucket does not exist or cannot be resolved.
    #[error("Archive container '{bucket}' could not be resolved: {message}")]
    DestinationContainerUnresolved { bucket: String, message: String },

    /// The archive copy settled in a non-success state; the source is kept.
    #[error("Failed to copy '{key}' to '{destination}'. Copy status: {status}")]
    CopyVerificationFailed {
        key: String,
        destination: String,
        status: CopyStatus,
    },

    /// The archive copy did not settle within the configured timeout.
    #[error("Archive copy of '{key}' to '{destination}' still pending after {elapsed_milliseconds}ms")]
    CopyTimedOut {
        key: String,
        destination: String,
        elapsed_milliseconds: u64,
    },

    /// The source listing failed; the pass could not see every object.
    #[error("Listing source objects failed: {0}")]
    ListingFailed(String),

    /// Another pass is still running on this pipeline.
    #[error("A relay pass is already in progress")]
    PassInProgress,

    /// Operation cancelled.
    #[error("Operation cancelled")]
    Cancelled,
}

impl RelayError {
    /// Stable identifier used in structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::ConfigurationMissing(_) => "ConfigurationMissing",
            RelayError::InvalidConfig(_) => "InvalidConfig",
            RelayError::SourceUnavailable { .. } => "SourceUnavailable",
            RelayError::TransferConnectFailed { .. } => "TransferConnectFailed",
            RelayError::TransferUploadFailed { .. } => "TransferUploadFailed",
            RelayError::CopyInitiationFailed { .. } => "CopyInitiationFailed",
            RelayError::DestinationContainerUnresolved { .. } => "DestinationContainerUnresolved",
            RelayError::CopyVerificationFailed { .. } => "CopyVerificationFailed",
            RelayError::CopyTimedOut { .. } => "CopyTimedOut",
            RelayError::ListingFailed(_) => "ListingFailed",
            RelayError::PassInProgress => "PassInProgress",
            RelayError::Cancelled => "Cancelled",
        }
    }

    /// Get the appropriate process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            RelayError::Cancelled => 0,
            RelayError::ConfigurationMissing(_) | RelayError::InvalidConfig(_) => 2,
            RelayError::PassInProgress => 3,
            _ => 1,
        }
    }

    /// True for errors that only affect a single object within a pass.
    pub fn is_object_level(&self) -> bool {
        matches!(
            self,
            RelayError::SourceUnavailable { .. }
                | RelayError::TransferConnectFailed { .. }
                | RelayError::TransferUploadFailed { .. }
                | RelayError::CopyInitiationFailed { .. }
                | RelayError::DestinationContainerUnresolved { .. }
                | RelayError::CopyVerificationFailed { .. }
                | RelayError::CopyTimedOut { .. }
        )
    }
}

/// Check if an anyhow::Error wraps a cancellation error.
pub fn is_cancelled_error(e: &Error) -> bool {
    if let Some(err) = e.downcast_ref::<RelayError>() {
        return *err == RelayError::Cancelled;
    }
    false
}

/// Extract the exit code from an anyhow::Error, defaulting to 1.
pub fn exit_code_from_error(e: &Error) -> i32 {
    if let Some(err) = e.downcast_ref::<RelayError>() {
        return err.exit_code();
    }
    1
}
