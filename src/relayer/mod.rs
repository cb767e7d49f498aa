//! Relay workers for the s3relay-rs pipeline.
//!
//! An [`ObjectRelayer`] takes listed objects from the shared channel and
//! drives each one through classify → download → upload → archive → delete.
//! Every object failure is caught here, logged and recorded in the
//! [`PassStatsReport`]; it never stops the worker or the pass.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::archiver::ArchiveMover;
use crate::classifier::Classifier;
use crate::stage::Stage;
use crate::transfer;
use crate::types::error::RelayError;
use crate::types::{ObjectFailure, PassStatsReport, RelayStage, SourceObject, TaskOutcome};


/// Pipeline worker that relays objects from the input channel.
pub struct ObjectRelayer {
    worker_index: u16,
    base: Stage,
    classifier: Arc<Classifier>,
    archiver: ArchiveMover,
    pass_stats_report: Arc<PassStatsReport>,
}

impl ObjectRelayer {
    pub fn new(
        base: Stage,
        worker_index: u16,
        classifier: Arc<Classifier>,
        pass_stats_report: Arc<PassStatsReport>,
    ) -> Self {
        let archiver = ArchiveMover::new(
            base.source.clone(),
            &base.config.archive_bucket,
            base.config.copy_poll_config,
            base.cancellation_token.clone(),
        );

        Self {
            worker_index,
            base,
            classifier,
            archiver,
            pass_stats_report,
        }
    }

    pub async fn relay(&mut self) -> Result<()> {
        debug!(worker_index = self.worker_index, "relay worker started.");

        let Some(receiver) = self.base.receiver.clone() else {
            return Ok(());
        };

        loop {
            tokio::select! {
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(object) => {
                            if let Some(outcome) = self.process_object(object).await {
                                self.pass_stats_report.record(outcome);
                            }
                            if self.base.cancellation_token.is_cancelled() {
                                info!(worker_index = self.worker_index, "relay worker has been cancelled.");
                                return Ok(());
                            }
                        },
                        Err(_) => {
                            // All senders dropped: listing is complete.
                            debug!(worker_index = self.worker_index, "relay worker has been completed.");
                            break;
                        }
                    }
                },
                _ = self.base.cancellation_token.cancelled() => {
                    info!(worker_index = self.worker_index, "relay worker has been cancelled.");
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    /// Returns `None` when the object was abandoned because of cancellation.
    pub(crate) async fn process_object(&self, object: SourceObject) -> Option<TaskOutcome> {
        info!(
            worker_index = self.worker_index,
            key = object.key,
            size = object.size,
            "processing object."
        );

        let Some(sub_path) = self.classifier.classify(&object.name) else {
            info!(
                worker_index = self.worker_index,
                key = object.key,
                stage = %RelayStage::Classifying,
                "skipping object: no classification rule matches its name."
            );
            return Some(TaskOutcome::Skipped);
        };

        match self.relay_object(&object, sub_path).await {
            Ok(()) => {
                info!(
                    worker_index = self.worker_index,
                    key = object.key,
                    sub_path = sub_path,
                    "object relayed and archived."
                );
                Some(TaskOutcome::Succeeded)
            }
            Err(failure) if failure.error == RelayError::Cancelled => {
                info!(
                    worker_index = self.worker_index,
                    key = object.key,
                    stage = %failure.stage,
                    "object relay cancelled."
                );
                None
            }
            Err(failure) => {
                error!(
                    worker_index = self.worker_index,
                    key = object.key,
                    stage = %failure.stage,
                    error_kind = failure.error.kind(),
                    error = %failure.error,
                    "failed to relay object."
                );
                Some(TaskOutcome::Failed(failure))
            }
        }
    }

    async fn relay_object(&self, object: &SourceObject, sub_path: &str) -> Result<(), ObjectFailure> {
        let failed = |stage: RelayStage| {
            let name = object.name.clone();
            move |error: RelayError| ObjectFailure { name, stage, error }
        };

        let payload = self
            .download(object)
            .await
            .map_err(failed(RelayStage::Downloading))?;

        self.deliver(payload, sub_path, &object.name)
            .await
            .map_err(failed(RelayStage::Uploading))?;

        let mut operation = self
            .archiver
            .begin_copy(object)
            .await
            .map_err(failed(RelayStage::Archiving))?;
        self.archiver
            .await_copy_completion(&mut operation)
            .await
            .map_err(failed(RelayStage::Archiving))?;

        self.archiver
            .delete_source_if_verified(object, &operation)
            .await
            .map_err(|error| match error {
                RelayError::CopyVerificationFailed { .. } => failed(RelayStage::Archiving)(error),
                _ => failed(RelayStage::Deleting)(error),
            })?;

        Ok(())
    }

    async fn download(&self, object: &SourceObject) -> Result<Vec<u8>, RelayError> {
        if self.base.cancellation_token.is_cancelled() {
            return Err(RelayError::Cancelled);
        }

        let payload = self
            .base
            .source
            .get_object(&object.key)
            .await
            .map_err(|e| RelayError::SourceUnavailable {
                key: object.key.clone(),
                message: format!("{e:#}"),
            })?;

        debug!(key = object.key, bytes = payload.len(), "object downloaded.");
        Ok(payload)
    }

    /// Connect, ensure `{base}/{sub_path}`, upload, and always disconnect.
    async fn deliver(&self, payload: Vec<u8>, sub_path: &str, name: &str) -> Result<(), RelayError> {
        let base_path = &self.base.config.sftp_config.base_path;
        let directory = transfer::target_directory(base_path, sub_path);
        let remote_path = transfer::target_file_path(base_path, sub_path, name);

        let mut client = self.base.transfer.create_client();

        let result = match client.connect().await {
            Err(e) => Err(RelayError::TransferConnectFailed {
                host: self.base.transfer.host().to_string(),
                message: format!("{e:#}"),
            }),
            Ok(()) => {
                let upload_result = match client.ensure_directory(&directory).await {
                    Ok(()) => client.upload(payload, &remote_path).await,
                    Err(e) => Err(e),
                };
                upload_result.map_err(|e| RelayError::TransferUploadFailed {
                    path: remote_path.clone(),
                    message: format!("{e:#}"),
                })
            }
        };

        if let Err(e) = client.disconnect().await {
            warn!(
                host = self.base.transfer.host(),
                error = format!("{e:#}"),
                "failed to close SFTP session."
            );
            self.base.set_warning();
        }

        if result.is_ok() {
            debug!(path = remote_path, "object uploaded.");
        }
        result
    }
}
