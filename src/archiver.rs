//! Server-side archive copy followed by a verified source delete.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::CopyPollConfig;
use crate::storage::Storage;
use crate::types::error::RelayError;
use crate::types::token::PipelineCancellationToken;
use crate::types::{CopyOperation, CopyStatus, DeleteOutcome, SourceObject};

/// States of the copy completion poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollState {
    Waiting { attempt: u32 },
    Settled(CopyStatus),
    TimedOut,
    Cancelled,
}

/// Moves relayed objects from the source bucket into the archive bucket.
#[derive(Clone)]
pub struct ArchiveMover {
    storage: Storage,
    archive_bucket: String,
    poll_config: CopyPollConfig,
    cancellation_token: PipelineCancellationToken,
}

impl ArchiveMover {
    pub fn new(
        storage: Storage,
        archive_bucket: &str,
        poll_config: CopyPollConfig,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        Self {
            storage,
            archive_bucket: archive_bucket.to_string(),
            poll_config,
            cancellation_token,
        }
    }

    /// Start the server-side copy. The archive key is the base name of the
    /// source key.
    pub async fn begin_copy(&self, object: &SourceObject) -> Result<CopyOperation, RelayError> {
        let destination_key = object.base_name();

        let operation = self
            .storage
            .copy_object(object, &self.archive_bucket, destination_key)
            .await
            .map_err(|e| match e.downcast_ref::<RelayError>() {
                Some(relay_error) => relay_error.clone(),
                None => RelayError::CopyInitiationFailed {
                    key: object.key.clone(),
                    message: format!("{e:#}"),
                },
            })?;

        debug!(
            key = object.key,
            destination = operation.destination(),
            "archive copy started."
        );
        Ok(operation)
    }

    /// Poll until the copy leaves `Pending`.
    ///
    /// Sleeps one poll interval before every status check. Status lookups
    /// that fail are logged and retried on the next tick. Gives up with
    /// `CopyTimedOut` once the configured timeout has elapsed, or with
    /// `Cancelled` when the pipeline is cancelled.
    pub async fn await_copy_completion(
        &self,
        operation: &mut CopyOperation,
    ) -> Result<CopyStatus, RelayError> {
        let interval = Duration::from_millis(self.poll_config.poll_interval_milliseconds);
        let timeout = Duration::from_millis(self.poll_config.timeout_milliseconds);
        let started = Instant::now();

        let mut state = PollState::Waiting { attempt: 0 };
        loop {
            state = match state {
                PollState::Settled(status) => {
                    operation.status = status;
                    debug!(
                        destination = operation.destination(),
                        status = %status,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "archive copy settled."
                    );
                    return Ok(status);
                }
                PollState::TimedOut => {
                    return Err(RelayError::CopyTimedOut {
                        key: operation.source_uri.clone(),
                        destination: operation.destination(),
                        elapsed_milliseconds: started.elapsed().as_millis() as u64,
                    });
                }
                PollState::Cancelled => return Err(RelayError::Cancelled),
                PollState::Waiting { attempt } => {
                    if started.elapsed() >= timeout {
                        PollState::TimedOut
                    } else {
                        tokio::select! {
                            _ = tokio::time::sleep(interval) => {
                                self.poll_once(operation, attempt + 1).await
                            }
                            _ = self.cancellation_token.cancelled() => PollState::Cancelled,
                        }
                    }
                }
            };
        }
    }

    async fn poll_once(&self, operation: &CopyOperation, attempt: u32) -> PollState {
        match self.storage.get_copy_status(operation).await {
            Ok(CopyStatus::Pending) => {
                trace!(
                    destination = operation.destination(),
                    attempt,
                    "archive copy still pending."
                );
                PollState::Waiting { attempt }
            }
            Ok(status) => PollState::Settled(status),
            Err(e) => {
                warn!(
                    destination = operation.destination(),
                    attempt,
                    error = format!("{e:#}"),
                    "archive copy status lookup failed."
                );
                PollState::Waiting { attempt }
            }
        }
    }

    /// Delete the source object only if the archive copy succeeded.
    pub async fn delete_source_if_verified(
        &self,
        object: &SourceObject,
        operation: &CopyOperation,
    ) -> Result<DeleteOutcome, RelayError> {
        if operation.status != CopyStatus::Success {
            return Err(RelayError::CopyVerificationFailed {
                key: object.key.clone(),
                destination: self.archive_bucket.clone(),
                status: operation.status,
            });
        }

        let outcome = self
            .storage
            .delete_object_if_exists(&object.key)
            .await
            .map_err(|e| RelayError::SourceUnavailable {
                key: object.key.clone(),
                message: format!("{e:#}"),
            })?;

        if outcome == DeleteOutcome::NotFound {
            info!(key = object.key, "source object was already removed.");
        }
        Ok(outcome)
    }
}
