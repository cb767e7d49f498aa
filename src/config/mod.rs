pub mod args;

use crate::classifier::{ClassificationRule, default_rules};
use crate::types::{ClientConfigLocation, S3Credentials, SftpCredentials, StoragePath};
use aws_smithy_types::checksum_config::RequestChecksumCalculation;

/// Main configuration for the s3relay-rs pipeline.
///
/// Built once at startup (usually from [`args::CLIArgs`]) and passed by value
/// into [`RelayPipeline`](crate::RelayPipeline). Nothing in the pipeline reads
/// the environment after this point.
///
/// ```
/// use s3relay_rs::Config;
///
/// let config = Config::for_source("exportcontainer-live", "", "archive-live");
/// assert_eq!(config.worker_size, 1);
/// assert_eq!(config.sftp_config.port, 22);
/// assert_eq!(config.sftp_config.base_path, "/Inbound/");
/// assert_eq!(config.copy_poll_config.poll_interval_milliseconds, 500);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub source: StoragePath,
    pub archive_bucket: String,
    pub source_client_config: Option<ClientConfig>,
    pub sftp_config: SftpConfig,
    pub classification_rules: Vec<ClassificationRule>,
    pub copy_poll_config: CopyPollConfig,
    pub tracing_config: Option<TracingConfig>,
    pub worker_size: u16,
    pub max_keys: i32,
    pub object_listing_queue_size: u32,
    pub schedule_config: ScheduleConfig,
    pub warn_as_error: bool,
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

impl Config {
    /// Create a `Config` with defaults for the given source bucket/prefix and
    /// archive bucket. SFTP host and credentials are left empty.
    pub fn for_source(bucket: &str, prefix: &str, archive_bucket: &str) -> Self {
        Config {
            source: StoragePath::S3 {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
            },
            archive_bucket: archive_bucket.to_string(),
            ..Config::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            source: StoragePath::S3 {
                bucket: String::new(),
                prefix: String::new(),
            },
            archive_bucket: String::new(),
            source_client_config: None,
            sftp_config: SftpConfig::default(),
            classification_rules: default_rules(),
            copy_poll_config: CopyPollConfig::default(),
            tracing_config: None,
            worker_size: 1,
            max_keys: 1000,
            object_listing_queue_size: 1000,
            schedule_config: ScheduleConfig::default(),
            warn_as_error: false,
            auto_complete_shell: None,
        }
    }
}

/// SFTP destination settings.
#[derive(Debug, Clone)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub credentials: SftpCredentials,
    pub base_path: String,
    pub connect_timeout_milliseconds: u64,
    pub host_key_sha256: Option<String>,
    pub upload_via_temp_file: bool,
}

impl Default for SftpConfig {
    fn default() -> Self {
        SftpConfig {
            host: String::new(),
            port: 22,
            credentials: SftpCredentials {
                username: String::new(),
                password: String::new(),
            },
            base_path: "/Inbound/".to_string(),
            connect_timeout_milliseconds: 30_000,
            host_key_sha256: None,
            upload_via_temp_file: true,
        }
    }
}

/// Bounds for archive copy completion polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyPollConfig {
    pub poll_interval_milliseconds: u64,
    pub timeout_milliseconds: u64,
}

impl Default for CopyPollConfig {
    fn default() -> Self {
        CopyPollConfig {
            poll_interval_milliseconds: 500,
            timeout_milliseconds: 300_000,
        }
    }
}

/// Built-in trigger settings used by the `s3relay` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub interval_seconds: u64,
    pub run_once: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            interval_seconds: 60,
            run_once: false,
        }
    }
}

/// AWS S3 client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_config_location: ClientConfigLocation,
    pub credential: S3Credentials,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub retry_config: RetryConfig,
    pub cli_timeout_config: CLITimeoutConfig,
    pub disable_stalled_stream_protection: bool,
    pub request_checksum_calculation: RequestChecksumCalculation,
}

/// Retry configuration for AWS SDK operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub aws_max_attempts: u32,
    pub initial_backoff_milliseconds: u64,
}

/// Timeout configuration for AWS SDK operations.
#[derive(Debug, Clone)]
pub struct CLITimeoutConfig {
    pub operation_timeout_milliseconds: Option<u64>,
    pub operation_attempt_timeout_milliseconds: Option<u64>,
    pub connect_timeout_milliseconds: Option<u64>,
    pub read_timeout_milliseconds: Option<u64>,
}

/// Tracing (logging) configuration.
#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub tracing_level: log::Level,
    pub json_tracing: bool,
    pub aws_sdk_tracing: bool,
    pub span_events_tracing: bool,
    pub disable_color_tracing: bool,
}
