use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use tracing::{debug, error, info, trace};

use s3relay_rs::config::Config;
use s3relay_rs::{
    CLIArgs, RelayPipeline, Scheduler, create_pipeline_cancellation_token, exit_code_from_error,
    is_cancelled_error,
};

mod ctrl_c_handler;
mod tracing_init;

const EXIT_CODE_FAILURE: i32 = 1;
const EXIT_CODE_WARNING: i32 = 3;

/// s3relay - Scheduled relay from Amazon S3 to an SFTP server.
///
/// This binary is a thin wrapper over the s3relay-rs library.
/// All core functionality is implemented in the library crate.
#[cfg_attr(coverage_nightly, coverage(off))]
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config_exit_if_err();

    if let Some(shell) = config.auto_complete_shell {
        generate(
            shell,
            &mut CLIArgs::command(),
            "s3relay",
            &mut std::io::stdout(),
        );

        return Ok(());
    }

    start_tracing_if_necessary(&config);

    trace!("config = {:?}", config);

    run(config).await
}

#[cfg_attr(coverage_nightly, coverage(off))]
fn load_config_exit_if_err() -> Config {
    match Config::try_from(CLIArgs::parse()) {
        Ok(config) => config,
        Err(error_message) => {
            clap::Error::raw(clap::error::ErrorKind::ValueValidation, error_message).exit()
        }
    }
}

fn start_tracing_if_necessary(config: &Config) -> bool {
    let Some(tracing_config) = config.tracing_config.as_ref() else {
        return false;
    };

    tracing_init::init_tracing(tracing_config);
    true
}

#[cfg_attr(coverage_nightly, coverage(off))]
async fn run(config: Config) -> Result<()> {
    let warn_as_error = config.warn_as_error;
    let schedule_config = config.schedule_config;

    let cancellation_token = create_pipeline_cancellation_token();
    ctrl_c_handler::spawn_ctrl_c_handler(cancellation_token.clone());

    let start_time = tokio::time::Instant::now();
    debug!("relay pipeline start.");

    let pipeline = RelayPipeline::new(config, cancellation_token.clone()).await;

    let has_failure = if schedule_config.run_once {
        match pipeline.run_pass().await {
            Ok(summary) => summary.has_failure(),
            Err(e) => {
                if is_cancelled_error(&e) {
                    debug!("relay cancelled by user.");
                    return Ok(());
                }
                error!(error = format!("{e:#}"), "s3relay failed.");
                std::process::exit(exit_code_from_error(&e));
            }
        }
    } else {
        let passes = Scheduler::new(&pipeline, schedule_config, cancellation_token)
            .run()
            .await?;
        info!(passes = passes, "s3relay scheduler has been stopped.");
        false
    };

    let duration_sec = format!("{:.3}", start_time.elapsed().as_secs_f32());

    if has_failure {
        error!(duration_sec = duration_sec, "s3relay completed with failures.");
        std::process::exit(EXIT_CODE_FAILURE);
    }

    debug!(duration_sec = duration_sec, "s3relay has been completed.");

    if pipeline.has_warning() {
        if warn_as_error {
            std::process::exit(EXIT_CODE_FAILURE);
        }
        std::process::exit(EXIT_CODE_WARNING);
    }

    Ok(())
}
