//! Fixed-cadence trigger for relay passes.

use std::time::Duration;

use anyhow::Result;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::ScheduleConfig;
use crate::pipeline::RelayPipeline;
use crate::types::error::RelayError;
use crate::types::token::PipelineCancellationToken;

/// Runs a pass immediately and then once every interval until cancelled.
///
/// A tick that arrives while a pass is still running is skipped rather than
/// queued. Pass errors are logged and never stop the schedule.
pub struct Scheduler<'a> {
    pipeline: &'a RelayPipeline,
    schedule_config: ScheduleConfig,
    cancellation_token: PipelineCancellationToken,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        pipeline: &'a RelayPipeline,
        schedule_config: ScheduleConfig,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        Self {
            pipeline,
            schedule_config,
            cancellation_token,
        }
    }

    /// Returns the number of passes started once the token is cancelled.
    pub async fn run(&self) -> Result<u64> {
        let period = Duration::from_secs(self.schedule_config.interval_seconds);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_seconds = self.schedule_config.interval_seconds,
            "relay scheduler started."
        );

        let mut pass_count = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    debug!("relay scheduler cancelled.");
                    break;
                }
                _ = interval.tick() => {}
            }

            pass_count += 1;
            match self.pipeline.run_pass().await {
                Ok(summary) if summary.cancelled => break,
                Ok(_) => {}
                Err(e) => match e.downcast_ref::<RelayError>() {
                    Some(RelayError::Cancelled) => break,
                    Some(RelayError::PassInProgress) => {
                        warn!("previous relay pass still running; tick skipped.");
                    }
                    _ => error!(error = format!("{e:#}"), "relay pass failed."),
                },
            }
        }

        info!(passes = pass_count, "relay scheduler stopped.");
        Ok(pass_count)
    }
}
