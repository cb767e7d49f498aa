//! Relay pipeline orchestrator.
//!
//! Creates and connects the stages of one relay pass: List → Relay. The
//! lister streams the source listing into a bounded channel and
//! `worker_size` ObjectRelayer workers consume it (MPMC). With the default
//! single worker, objects are relayed strictly in listing order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_channel::Receiver;
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::classifier::Classifier;
use crate::config::Config;
use crate::lister::ObjectLister;
use crate::relayer::ObjectRelayer;
use crate::stage::Stage;
use crate::storage::{self, Storage};
use crate::transfer::{SftpTransferClientFactory, TransferConnector};
use crate::types::error::RelayError;
use crate::types::token::PipelineCancellationToken;
use crate::types::{PassStatsReport, PassSummary, SourceObject};

/// The relay pipeline.
///
/// Holds the immutable configuration and the backends; each call to
/// [`run_pass`](RelayPipeline::run_pass) performs one complete pass over the
/// source bucket. Passes never overlap: a call made while another pass is
/// still running fails with [`RelayError::PassInProgress`].
///
/// ## Pipeline stages
///
/// ```text
/// ObjectLister → ObjectRelayer Workers (MPMC)
/// ```
///
/// ## Usage
///
/// ```no_run
/// # async fn example() -> anyhow::Result<()> {
/// use s3relay_rs::config::args::build_config_from_args;
/// use s3relay_rs::{RelayPipeline, create_pipeline_cancellation_token};
///
/// let config = build_config_from_args([
///     "s3relay",
///     "--source", "s3://exportcontainer-live/",
///     "--archive-bucket", "archive-live",
///     "--sftp-host", "sftp.example.com",
///     "--sftp-user", "relay",
///     "--sftp-password", "secret",
/// ])
/// .map_err(anyhow::Error::msg)?;
///
/// let pipeline = RelayPipeline::new(config, create_pipeline_cancellation_token()).await;
/// let summary = pipeline.run_pass().await?;
/// println!(
///     "succeeded={} skipped={} failed={}",
///     summary.succeeded, summary.skipped, summary.failed
/// );
/// # Ok(())
/// # }
/// ```
pub struct RelayPipeline {
    config: Config,
    source: Storage,
    transfer: TransferConnector,
    classifier: Arc<Classifier>,
    cancellation_token: PipelineCancellationToken,
    has_warning: Arc<AtomicBool>,
    run_lock: tokio::sync::Mutex<()>,
}

/// Error bookkeeping for a single pass.
#[derive(Clone, Default)]
struct PassErrors {
    listing_error: Arc<Mutex<Option<anyhow::Error>>>,
    errors: Arc<Mutex<VecDeque<anyhow::Error>>>,
}

impl PassErrors {
    fn record_error(&self, error: anyhow::Error) {
        self.errors.lock().unwrap().push_back(error);
    }

    fn record_listing_error(&self, error: anyhow::Error) {
        *self.listing_error.lock().unwrap() = Some(error);
    }
}

impl RelayPipeline {
    /// Create a pipeline with the S3 source and SFTP destination described
    /// by `config`.
    pub async fn new(config: Config, cancellation_token: PipelineCancellationToken) -> Self {
        let source = storage::create_storage(config.clone(), cancellation_token.clone()).await;
        let transfer = Box::new(SftpTransferClientFactory::new(config.sftp_config.clone()));

        Self::with_components(config, source, transfer, cancellation_token)
    }

    /// Create a pipeline over caller-provided backends.
    pub fn with_components(
        config: Config,
        source: Storage,
        transfer: TransferConnector,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        let classifier = Arc::new(Classifier::new(config.classification_rules.clone()));

        Self {
            config,
            source,
            transfer,
            classifier,
            cancellation_token,
            has_warning: Arc::new(AtomicBool::new(false)),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Run one complete pass over the source bucket.
    ///
    /// Object-level failures never fail the pass; they are counted in the
    /// returned [`PassSummary`]. Errors are returned only when the pass
    /// itself could not run properly: an overlapping pass
    /// (`PassInProgress`), a cancelled pipeline (`Cancelled`), a failed
    /// listing (`ListingFailed`) or a panicked worker. A `ListingFailed`
    /// error carries the [`PassSummary`] of the objects that were listed
    /// before the failure; get it with `downcast_ref::<PassSummary>()`.
    pub async fn run_pass(&self) -> Result<PassSummary> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| anyhow!(RelayError::PassInProgress))?;

        if self.cancellation_token.is_cancelled() {
            return Err(anyhow!(RelayError::Cancelled));
        }

        let pass_id = Uuid::new_v4();
        let span = info_span!("relay_pass", pass_id = %pass_id);
        self.execute_pass(pass_id).instrument(span).await
    }

    /// Check if any warning occurred in any pass of this pipeline.
    pub fn has_warning(&self) -> bool {
        self.has_warning.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Internal methods
    // -----------------------------------------------------------------------

    async fn execute_pass(&self, pass_id: Uuid) -> Result<PassSummary> {
        let started_at = Utc::now();
        let start_time = tokio::time::Instant::now();
        info!("relay pass started.");

        let pass_token = self.cancellation_token.child_token();
        let pass_stats_report = Arc::new(PassStatsReport::new());
        let pass_errors = PassErrors::default();

        // Stage 1: List source objects
        let (listed_objects, lister_handle) = self.list_source(&pass_token, &pass_errors);

        // Stage 2: Spawn relay workers
        let worker_handles = self.relay_objects(
            listed_objects,
            &pass_token,
            &pass_errors,
            pass_stats_report.clone(),
        );

        for handle in std::iter::once(lister_handle).chain(worker_handles) {
            if let Err(e) = handle.await {
                pass_errors.record_error(anyhow!("relay pass task failed: {}", e));
            }
        }

        let summary = pass_stats_report.snapshot(
            pass_id,
            started_at,
            start_time.elapsed(),
            self.cancellation_token.is_cancelled(),
        );
        log_summary(&summary);

        if let Some(e) = pass_errors.errors.lock().unwrap().pop_front() {
            return Err(e);
        }
        if let Some(e) = pass_errors.listing_error.lock().unwrap().take() {
            // The summary rides along so callers still see what was relayed.
            return Err(anyhow!(RelayError::ListingFailed(format!("{e:#}"))).context(summary));
        }

        Ok(summary)
    }

    /// Stage 1: Spawn the ObjectLister to list source objects.
    ///
    /// A listing failure does not cancel the pass: objects already listed
    /// are still relayed, then the pass reports `ListingFailed`.
    fn list_source(
        &self,
        pass_token: &PipelineCancellationToken,
        pass_errors: &PassErrors,
    ) -> (Receiver<SourceObject>, JoinHandle<()>) {
        let (sender, receiver) =
            async_channel::bounded::<SourceObject>(self.config.object_listing_queue_size as usize);

        let stage = Stage::new(
            self.config.clone(),
            dyn_clone::clone_box(&*self.source),
            dyn_clone::clone_box(&*self.transfer),
            None,
            Some(sender),
            pass_token.clone(),
            self.has_warning.clone(),
        );

        let max_keys = self.config.max_keys;
        let pass_errors = pass_errors.clone();
        let cancellation_token = pass_token.clone();

        let handle = tokio::spawn(
            async move {
                let lister = ObjectLister::new(stage);
                let join_result =
                    tokio::spawn(async move { lister.list_source(max_keys).await }.in_current_span())
                        .await;

                match join_result {
                    Ok(Ok(())) => {
                        debug!("object lister completed successfully.");
                    }
                    Ok(Err(e)) => {
                        error!(error = format!("{e:#}"), "object lister failed.");
                        pass_errors.record_listing_error(e);
                    }
                    Err(e) => {
                        cancellation_token.cancel();
                        error!("object lister task panicked: {}", e);
                        pass_errors.record_error(anyhow!("object lister task panicked: {}", e));
                    }
                }
            }
            .in_current_span(),
        );

        (receiver, handle)
    }

    /// Stage 2: Spawn ObjectRelayer workers using MPMC pattern.
    fn relay_objects(
        &self,
        objects_to_be_relayed: Receiver<SourceObject>,
        pass_token: &PipelineCancellationToken,
        pass_errors: &PassErrors,
        pass_stats_report: Arc<PassStatsReport>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.config.worker_size as usize);

        for worker_index in 0..self.config.worker_size {
            let stage = Stage::new(
                self.config.clone(),
                dyn_clone::clone_box(&*self.source),
                dyn_clone::clone_box(&*self.transfer),
                Some(objects_to_be_relayed.clone()),
                None,
                pass_token.clone(),
                self.has_warning.clone(),
            );

            let mut object_relayer = ObjectRelayer::new(
                stage,
                worker_index,
                self.classifier.clone(),
                pass_stats_report.clone(),
            );

            let pass_errors = pass_errors.clone();
            let cancellation_token = pass_token.clone();

            handles.push(tokio::spawn(
                async move {
                    let join_result =
                        tokio::spawn(async move { object_relayer.relay().await }.in_current_span())
                            .await;

                    match join_result {
                        Ok(Ok(())) => {
                            debug!(worker_index, "relay worker completed successfully.");
                        }
                        Ok(Err(e)) => {
                            cancellation_token.cancel();
                            error!(worker_index, "relay worker failed: {}", e);
                            pass_errors.record_error(e);
                        }
                        Err(e) => {
                            cancellation_token.cancel();
                            error!(worker_index, "relay worker task panicked: {}", e);
                            pass_errors
                                .record_error(anyhow!("relay worker panicked: {}", e));
                        }
                    }
                }
                .in_current_span(),
            ));
        }

        handles
    }
}

fn log_summary(summary: &PassSummary) {
    let duration_sec = format!("{:.3}", summary.duration.as_secs_f32());

    for failure in &summary.failures {
        warn!(
            name = failure.name,
            stage = %failure.stage,
            error_kind = failure.error.kind(),
            "object left in source: {}",
            failure.error
        );
    }

    info!(
        succeeded = summary.succeeded,
        skipped = summary.skipped,
        failed = summary.failed,
        cancelled = summary.cancelled,
        duration_sec = duration_sec,
        "relay pass completed."
    );
}
