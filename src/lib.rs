/*!
# Overview
s3relay-rs is a scheduled relay from an Amazon S3 bucket to an SFTP server.

On every pass it lists the source bucket, classifies each object by its file
name prefix, uploads matching objects to a sub-directory of the SFTP server,
copies them server-side into an archive bucket and removes the source object
once the archive copy is verified.

## Features
- **Classification**: case-insensitive, ordered prefix rules (`Invoice_` → `Invoices`,
  `Credit_` → `Credits`, `Stock_` → `Stock` by default, configurable)
- **Safe moves**: the source object is deleted only after the archive copy is
  observed as successful; uploads go through a temporary file and a rename
- **Failure isolation**: a failing object is logged and counted, the pass goes on
- **Bounded polling**: archive copy polling has a configurable interval and timeout
- **No overlap**: a pipeline never runs two passes at the same time
- **Library-First**: the s3relay CLI is a thin wrapper over this library

## As a Library

```toml
[dependencies]
s3relay-rs = "0.1"
tokio = { version = "1", features = ["full"] }
```

```no_run
use s3relay_rs::config::args::parse_from_args;
use s3relay_rs::{Config, RelayPipeline, create_pipeline_cancellation_token};

#[tokio::main]
async fn main() {
    let args = vec![
        "s3relay",
        "--source",
        "s3://exportcontainer-live/",
        "--archive-bucket",
        "archive-live",
        "--sftp-host",
        "sftp.example.com",
        "--sftp-user",
        "relay",
        "--sftp-password",
        "secret",
    ];

    let parsed_args = parse_from_args(args).unwrap();
    let config = Config::try_from(parsed_args).unwrap();
    let cancellation_token = create_pipeline_cancellation_token();
    let pipeline = RelayPipeline::new(config, cancellation_token).await;

    match pipeline.run_pass().await {
        Ok(summary) => println!(
            "succeeded={} skipped={} failed={}",
            summary.succeeded, summary.skipped, summary.failed
        ),
        Err(e) => eprintln!("{e:?}"),
    }
}
```
*/

#![allow(clippy::collapsible_if)]

pub mod archiver;
pub mod classifier;
pub mod config;
pub mod lister;
pub mod pipeline;
pub mod relayer;
pub mod scheduler;
pub mod stage;
pub mod storage;
pub mod transfer;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::Config;
pub use config::args::CLIArgs;
pub use pipeline::RelayPipeline;
pub use scheduler::Scheduler;
pub use types::error::{RelayError, exit_code_from_error, is_cancelled_error};
pub use types::token::{PipelineCancellationToken, create_pipeline_cancellation_token};
pub use types::{PassSummary, SourceObject};
