use crate::classifier::{ClassificationRule, default_rules};
use crate::config::{
    CLITimeoutConfig, ClientConfig, Config, CopyPollConfig, RetryConfig, ScheduleConfig,
    SftpConfig, TracingConfig,
};
use crate::types::error::RelayError;
use crate::types::{AccessKeys, ClientConfigLocation, S3Credentials, SftpCredentials, StoragePath};
use aws_smithy_types::checksum_config::RequestChecksumCalculation;
use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::ffi::OsString;
use std::path::PathBuf;


// ---------------------------------------------------------------------------
// Default constants
// ---------------------------------------------------------------------------

const DEFAULT_SFTP_PORT: u16 = 22;
const DEFAULT_SFTP_BASE_PATH: &str = "/Inbound/";
const DEFAULT_SFTP_CONNECT_TIMEOUT_MILLISECONDS: u64 = 30_000;
const DEFAULT_SFTP_DIRECT_UPLOAD: bool = false;
const DEFAULT_COPY_POLL_INTERVAL_MILLISECONDS: u64 = 500;
const DEFAULT_COPY_TIMEOUT_MILLISECONDS: u64 = 300_000;
const DEFAULT_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_RUN_ONCE: bool = false;
const DEFAULT_WORKER_SIZE: u16 = 1;
const DEFAULT_MAX_KEYS: i32 = 1000;
const DEFAULT_OBJECT_LISTING_QUEUE_SIZE: u32 = 1000;
const DEFAULT_AWS_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_INITIAL_BACKOFF_MILLISECONDS: u64 = 100;
const DEFAULT_JSON_TRACING: bool = false;
const DEFAULT_AWS_SDK_TRACING: bool = false;
const DEFAULT_SPAN_EVENTS_TRACING: bool = false;
const DEFAULT_DISABLE_COLOR_TRACING: bool = false;
const DEFAULT_WARN_AS_ERROR: bool = false;
const DEFAULT_FORCE_PATH_STYLE: bool = false;
const DEFAULT_DISABLE_STALLED_STREAM_PROTECTION: bool = false;

// ---------------------------------------------------------------------------
// Environment variable names of required settings
// ---------------------------------------------------------------------------

const ENV_SOURCE: &str = "RELAY_SOURCE";
const ENV_ARCHIVE_BUCKET: &str = "DESTINATION_CONTAINER_NAME";
const ENV_SFTP_HOST: &str = "SFTP_HOST";
const ENV_SFTP_USER: &str = "SFTP_USER";
const ENV_SFTP_PASSWORD: &str = "SFTP_PASSWORD";

// ---------------------------------------------------------------------------
// Error messages
// ---------------------------------------------------------------------------

const ERROR_MESSAGE_INVALID_SOURCE: &str =
    "Source must be an S3 path starting with 's3://' (e.g., s3://bucket/prefix).";
const ERROR_MESSAGE_WORKER_SIZE_ZERO: &str = "Worker size must be at least 1.";
const ERROR_MESSAGE_MAX_KEYS_OUT_OF_RANGE: &str = "Max keys must be between 1 and 1000.";
const ERROR_MESSAGE_OBJECT_LISTING_QUEUE_SIZE_ZERO: &str =
    "Object listing queue size must be at least 1.";
const ERROR_MESSAGE_COPY_POLL_INTERVAL_ZERO: &str = "Copy poll interval must be at least 1ms.";
const ERROR_MESSAGE_COPY_TIMEOUT_TOO_SMALL: &str =
    "Copy timeout must be greater than or equal to the copy poll interval.";
const ERROR_MESSAGE_INTERVAL_ZERO: &str = "Schedule interval must be at least 1 second.";
const ERROR_MESSAGE_SFTP_PORT_ZERO: &str = "SFTP port must not be 0.";
const ERROR_MESSAGE_ARCHIVE_SAME_AS_SOURCE: &str =
    "Archive bucket must differ from the source bucket.";
const ERROR_MESSAGE_INVALID_HOST_KEY: &str =
    "SFTP host key fingerprint must be 64 hexadecimal characters (colons allowed).";

// ---------------------------------------------------------------------------
// Value parser helpers
// ---------------------------------------------------------------------------

fn check_s3_source(s: &str) -> Result<String, String> {
    if s.starts_with("s3://") && s.len() > 5 {
        Ok(s.to_string())
    } else {
        Err(ERROR_MESSAGE_INVALID_SOURCE.to_string())
    }
}

fn parse_classification_rule(s: &str) -> Result<ClassificationRule, String> {
    s.parse()
}

// ---------------------------------------------------------------------------
// CLIArgs (clap-derived argument struct)
// ---------------------------------------------------------------------------

/// s3relay - Relay classified S3 objects to an SFTP server, then archive them.
///
/// Every pass lists the source bucket, uploads each object whose name matches
/// a classification rule to <SFTP_BASE_PATH>/<SUB_PATH>/<NAME>, copies it to
/// the archive bucket and deletes the source once the copy is verified.
///
/// Example:
///   s3relay --source s3://exports/ --archive-bucket exports-archive \
///           --sftp-host sftp.example.com --sftp-user relay --run-once
#[derive(Parser, Clone, Debug)]
#[command(name = "s3relay", version, about, long_about = None)]
pub struct CLIArgs {
    /// S3 source path: s3://<BUCKET_NAME>[/prefix]
    #[arg(long, env = ENV_SOURCE, value_parser = check_s3_source, help_heading = "Source")]
    pub source: Option<String>,

    /// Bucket receiving verified archive copies.
    #[arg(long, env = ENV_ARCHIVE_BUCKET, value_parser = NonEmptyStringValueParser::new(), help_heading = "Source")]
    pub archive_bucket: Option<String>,

    /// Routing rule PREFIX=SUB_PATH (repeatable; evaluated in order).
    #[arg(
        long = "classification-rule",
        env = "RELAY_CLASSIFICATION_RULES",
        value_delimiter = ',',
        value_parser = parse_classification_rule,
        help_heading = "Source",
        long_help = r#"Routing rule PREFIX=SUB_PATH. Repeat the option (or comma separate the
environment variable) to add rules; the first matching prefix wins.
Matching is case-insensitive.
Default: Invoice_=Invoices,Credit_=Credits,Stock_=Stock"#
    )]
    pub classification_rules: Vec<ClassificationRule>,

    // -----------------------------------------------------------------------
    // SFTP options
    // -----------------------------------------------------------------------
    /// SFTP server host name.
    #[arg(long, env = ENV_SFTP_HOST, value_parser = NonEmptyStringValueParser::new(), help_heading = "SFTP")]
    pub sftp_host: Option<String>,

    /// SFTP server port.
    #[arg(long, env = "SFTP_PORT", default_value_t = DEFAULT_SFTP_PORT, help_heading = "SFTP")]
    pub sftp_port: u16,

    /// SFTP user name.
    #[arg(long, env = ENV_SFTP_USER, value_parser = NonEmptyStringValueParser::new(), help_heading = "SFTP")]
    pub sftp_user: Option<String>,

    /// SFTP password.
    #[arg(long, env = ENV_SFTP_PASSWORD, hide_env_values = true, help_heading = "SFTP")]
    pub sftp_password: Option<String>,

    /// Remote base directory; sub paths are created beneath it.
    #[arg(long, env = "SFTP_BASE_PATH", default_value = DEFAULT_SFTP_BASE_PATH, help_heading = "SFTP")]
    pub sftp_base_path: String,

    /// TCP connect and session timeout in milliseconds.
    #[arg(long, env, default_value_t = DEFAULT_SFTP_CONNECT_TIMEOUT_MILLISECONDS, help_heading = "SFTP")]
    pub sftp_connect_timeout_milliseconds: u64,

    /// Expected SHA-256 fingerprint (hex) of the server host key.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "SFTP")]
    pub sftp_host_key_sha256: Option<String>,

    /// Write directly to the final remote path instead of a temporary file + rename.
    #[arg(long, env, default_value_t = DEFAULT_SFTP_DIRECT_UPLOAD, help_heading = "SFTP")]
    pub sftp_direct_upload: bool,

    // -----------------------------------------------------------------------
    // Archive options
    // -----------------------------------------------------------------------
    /// Interval between archive copy status checks in milliseconds.
    #[arg(long, env, default_value_t = DEFAULT_COPY_POLL_INTERVAL_MILLISECONDS, help_heading = "Archive")]
    pub copy_poll_interval_milliseconds: u64,

    /// Give up waiting for an archive copy after this many milliseconds.
    #[arg(long, env, default_value_t = DEFAULT_COPY_TIMEOUT_MILLISECONDS, help_heading = "Archive")]
    pub copy_timeout_milliseconds: u64,

    // -----------------------------------------------------------------------
    // Schedule options
    // -----------------------------------------------------------------------
    /// Seconds between the start of consecutive passes.
    #[arg(long, env, default_value_t = DEFAULT_INTERVAL_SECONDS, help_heading = "Schedule")]
    pub interval_seconds: u64,

    /// Run a single pass and exit.
    #[arg(long, env, default_value_t = DEFAULT_RUN_ONCE, help_heading = "Schedule")]
    pub run_once: bool,

    // -----------------------------------------------------------------------
    // Performance options
    // -----------------------------------------------------------------------
    /// Number of concurrent relay workers. 1 keeps listing order.
    #[arg(long, env, default_value_t = DEFAULT_WORKER_SIZE, help_heading = "Performance")]
    pub worker_size: u16,

    /// Object listing channel queue size.
    #[arg(long, env, default_value_t = DEFAULT_OBJECT_LISTING_QUEUE_SIZE, help_heading = "Performance")]
    pub object_listing_queue_size: u32,

    // -----------------------------------------------------------------------
    // Logging options
    // -----------------------------------------------------------------------
    /// Verbosity level. -q (quiet), default (info), -v, -vv.
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    /// Output logs in JSON format.
    #[arg(long, env, default_value_t = DEFAULT_JSON_TRACING, help_heading = "Logging")]
    pub json_tracing: bool,

    /// Enable AWS SDK tracing.
    #[arg(long, env, default_value_t = DEFAULT_AWS_SDK_TRACING, help_heading = "Logging")]
    pub aws_sdk_tracing: bool,

    /// Enable tracing span events.
    #[arg(long, env, default_value_t = DEFAULT_SPAN_EVENTS_TRACING, help_heading = "Logging")]
    pub span_events_tracing: bool,

    /// Disable colored output in logs.
    #[arg(long, env, default_value_t = DEFAULT_DISABLE_COLOR_TRACING, help_heading = "Logging")]
    pub disable_color_tracing: bool,

    // -----------------------------------------------------------------------
    // Retry options
    // -----------------------------------------------------------------------
    /// Maximum retry attempts for AWS SDK operations.
    #[arg(long, env, default_value_t = DEFAULT_AWS_MAX_ATTEMPTS, help_heading = "Retry")]
    pub aws_max_attempts: u32,

    /// Initial backoff in milliseconds for retries.
    #[arg(long, env, default_value_t = DEFAULT_INITIAL_BACKOFF_MILLISECONDS, help_heading = "Retry")]
    pub initial_backoff_milliseconds: u64,

    // -----------------------------------------------------------------------
    // Timeout options
    // -----------------------------------------------------------------------
    /// Overall operation timeout in milliseconds.
    #[arg(long, env, help_heading = "Timeout")]
    pub operation_timeout_milliseconds: Option<u64>,

    /// Per-attempt operation timeout in milliseconds.
    #[arg(long, env, help_heading = "Timeout")]
    pub operation_attempt_timeout_milliseconds: Option<u64>,

    /// Connection timeout in milliseconds.
    #[arg(long, env, help_heading = "Timeout")]
    pub connect_timeout_milliseconds: Option<u64>,

    /// Read timeout in milliseconds.
    #[arg(long, env, help_heading = "Timeout")]
    pub read_timeout_milliseconds: Option<u64>,

    // -----------------------------------------------------------------------
    // AWS configuration
    // -----------------------------------------------------------------------
    /// AWS config file path.
    #[arg(long, env, help_heading = "AWS")]
    pub aws_config_file: Option<PathBuf>,

    /// AWS shared credentials file path.
    #[arg(long, env, help_heading = "AWS")]
    pub aws_shared_credentials_file: Option<PathBuf>,

    /// AWS profile. If not set, credentials come from the environment chain.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub source_profile: Option<String>,

    /// AWS access key ID.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub source_access_key: Option<String>,

    /// AWS secret access key.
    #[arg(long, env, hide_env_values = true, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub source_secret_key: Option<String>,

    /// AWS session token.
    #[arg(long, env, hide_env_values = true, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub source_session_token: Option<String>,

    /// AWS region.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub source_region: Option<String>,

    /// Custom S3-compatible endpoint URL (e.g. MinIO).
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub source_endpoint_url: Option<String>,

    /// Force path-style access (required for some S3-compatible services).
    #[arg(long, env, default_value_t = DEFAULT_FORCE_PATH_STYLE, help_heading = "AWS")]
    pub source_force_path_style: bool,

    /// Disable stalled stream protection.
    #[arg(long, env, default_value_t = DEFAULT_DISABLE_STALLED_STREAM_PROTECTION, help_heading = "AWS")]
    pub disable_stalled_stream_protection: bool,

    // -----------------------------------------------------------------------
    // Advanced options
    // -----------------------------------------------------------------------
    /// Treat warnings (e.g. failed SFTP disconnects) as errors.
    #[arg(long, env, default_value_t = DEFAULT_WARN_AS_ERROR, help_heading = "Advanced")]
    pub warn_as_error: bool,

    /// Max keys per listing request.
    #[arg(long, env, default_value_t = DEFAULT_MAX_KEYS, help_heading = "Advanced")]
    pub max_keys: i32,

    /// Generate shell completions.
    #[arg(long, env, help_heading = "Advanced")]
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

// ---------------------------------------------------------------------------
// parse_from_args (public API)
// ---------------------------------------------------------------------------

/// Parse command-line arguments into a `CLIArgs` struct.
///
/// # Example
///
/// ```
/// use s3relay_rs::config::args::parse_from_args;
///
/// let args = vec!["s3relay", "--source", "s3://exports/", "--run-once"];
/// let cli_args = parse_from_args(args).unwrap();
/// assert!(cli_args.run_once);
/// ```
pub fn parse_from_args<I, T>(args: I) -> Result<CLIArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    CLIArgs::try_parse_from(args)
}

/// Parse arguments and build a Config in one step.
pub fn build_config_from_args<I, T>(args: I) -> Result<Config, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli_args = CLIArgs::try_parse_from(args).map_err(|e| e.to_string())?;
    Config::try_from(cli_args)
}

// ---------------------------------------------------------------------------
// Validation and Config conversion
// ---------------------------------------------------------------------------

fn required(value: &Option<String>, name: &str) -> Result<String, String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.clone()),
        _ => Err(RelayError::ConfigurationMissing(name.to_string()).to_string()),
    }
}

fn invalid(message: &str) -> String {
    RelayError::InvalidConfig(message.to_string()).to_string()
}

impl CLIArgs {
    fn validate(&self) -> Result<(), String> {
        if self.worker_size == 0 {
            return Err(invalid(ERROR_MESSAGE_WORKER_SIZE_ZERO));
        }
        if !(1..=1000).contains(&self.max_keys) {
            return Err(invalid(ERROR_MESSAGE_MAX_KEYS_OUT_OF_RANGE));
        }
        if self.object_listing_queue_size == 0 {
            return Err(invalid(ERROR_MESSAGE_OBJECT_LISTING_QUEUE_SIZE_ZERO));
        }
        if self.copy_poll_interval_milliseconds == 0 {
            return Err(invalid(ERROR_MESSAGE_COPY_POLL_INTERVAL_ZERO));
        }
        if self.copy_timeout_milliseconds < self.copy_poll_interval_milliseconds {
            return Err(invalid(ERROR_MESSAGE_COPY_TIMEOUT_TOO_SMALL));
        }
        if self.interval_seconds == 0 {
            return Err(invalid(ERROR_MESSAGE_INTERVAL_ZERO));
        }
        if self.sftp_port == 0 {
            return Err(invalid(ERROR_MESSAGE_SFTP_PORT_ZERO));
        }
        Ok(())
    }

    fn parse_source(&self) -> Result<StoragePath, String> {
        let uri = required(&self.source, ENV_SOURCE)?;
        let without_scheme = &uri[5..];

        let (bucket, prefix) = match without_scheme.find('/') {
            Some(idx) => {
                let bucket = &without_scheme[..idx];
                let mut prefix = without_scheme[idx + 1..].to_string();
                // Keys are classified by the name below the prefix "folder".
                if !prefix.is_empty() && !prefix.ends_with('/') {
                    prefix.push('/');
                }
                (bucket.to_string(), prefix)
            }
            None => (without_scheme.to_string(), String::new()),
        };

        if bucket.is_empty() {
            return Err(invalid(ERROR_MESSAGE_INVALID_SOURCE));
        }

        Ok(StoragePath::S3 { bucket, prefix })
    }

    fn build_sftp_config(&self) -> Result<SftpConfig, String> {
        let host = required(&self.sftp_host, ENV_SFTP_HOST)?;
        let username = required(&self.sftp_user, ENV_SFTP_USER)?;
        let password = match &self.sftp_password {
            Some(p) if !p.is_empty() => p.clone(),
            _ => {
                return Err(
                    RelayError::ConfigurationMissing(ENV_SFTP_PASSWORD.to_string()).to_string()
                );
            }
        };

        let host_key_sha256 = match &self.sftp_host_key_sha256 {
            Some(fingerprint) => Some(normalize_fingerprint(fingerprint)?),
            None => None,
        };

        Ok(SftpConfig {
            host,
            port: self.sftp_port,
            credentials: SftpCredentials { username, password },
            base_path: self.sftp_base_path.clone(),
            connect_timeout_milliseconds: self.sftp_connect_timeout_milliseconds,
            host_key_sha256,
            upload_via_temp_file: !self.sftp_direct_upload,
        })
    }

    fn build_client_config(&self) -> Option<ClientConfig> {
        let credential = if let Some(ref profile) = self.source_profile {
            S3Credentials::Profile(profile.clone())
        } else if let Some(ref access_key) = self.source_access_key {
            let secret_key = self.source_secret_key.clone().unwrap_or_default();
            S3Credentials::Credentials {
                access_keys: AccessKeys {
                    access_key: access_key.clone(),
                    secret_access_key: secret_key,
                    session_token: self.source_session_token.clone(),
                },
            }
        } else {
            S3Credentials::FromEnvironment
        };

        Some(ClientConfig {
            client_config_location: ClientConfigLocation {
                aws_config_file: self.aws_config_file.clone(),
                aws_shared_credentials_file: self.aws_shared_credentials_file.clone(),
            },
            credential,
            region: self.source_region.clone(),
            endpoint_url: self.source_endpoint_url.clone(),
            force_path_style: self.source_force_path_style,
            retry_config: RetryConfig {
                aws_max_attempts: self.aws_max_attempts,
                initial_backoff_milliseconds: self.initial_backoff_milliseconds,
            },
            cli_timeout_config: CLITimeoutConfig {
                operation_timeout_milliseconds: self.operation_timeout_milliseconds,
                operation_attempt_timeout_milliseconds: self.operation_attempt_timeout_milliseconds,
                connect_timeout_milliseconds: self.connect_timeout_milliseconds,
                read_timeout_milliseconds: self.read_timeout_milliseconds,
            },
            disable_stalled_stream_protection: self.disable_stalled_stream_protection,
            request_checksum_calculation: RequestChecksumCalculation::WhenRequired,
        })
    }

    fn build_tracing_config(&self) -> Option<TracingConfig> {
        let log_level = self.verbosity.log_level()?;

        Some(TracingConfig {
            tracing_level: log_level,
            json_tracing: self.json_tracing,
            aws_sdk_tracing: self.aws_sdk_tracing,
            span_events_tracing: self.span_events_tracing,
            disable_color_tracing: self.disable_color_tracing,
        })
    }
}

/// Lowercase hex without separators.
fn normalize_fingerprint(fingerprint: &str) -> Result<String, String> {
    let normalized: String = fingerprint
        .chars()
        .filter(|c| *c != ':')
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if normalized.len() != 64 || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid(ERROR_MESSAGE_INVALID_HOST_KEY));
    }
    Ok(normalized)
}

impl TryFrom<CLIArgs> for Config {
    type Error = String;

    fn try_from(args: CLIArgs) -> Result<Self, Self::Error> {
        let tracing_config = args.build_tracing_config();

        // Completion generation needs no connection settings.
        if args.auto_complete_shell.is_some() {
            return Ok(Config {
                tracing_config,
                auto_complete_shell: args.auto_complete_shell,
                ..Config::default()
            });
        }

        args.validate()?;

        let source = args.parse_source()?;
        let archive_bucket = required(&args.archive_bucket, ENV_ARCHIVE_BUCKET)?;
        let StoragePath::S3 { ref bucket, .. } = source;
        if *bucket == archive_bucket {
            return Err(invalid(ERROR_MESSAGE_ARCHIVE_SAME_AS_SOURCE));
        }

        let sftp_config = args.build_sftp_config()?;
        let source_client_config = args.build_client_config();

        let classification_rules = if args.classification_rules.is_empty() {
            default_rules()
        } else {
            args.classification_rules.clone()
        };

        Ok(Config {
            source,
            archive_bucket,
            source_client_config,
            sftp_config,
            classification_rules,
            copy_poll_config: CopyPollConfig {
                poll_interval_milliseconds: args.copy_poll_interval_milliseconds,
                timeout_milliseconds: args.copy_timeout_milliseconds,
            },
            tracing_config,
            worker_size: args.worker_size,
            max_keys: args.max_keys,
            object_listing_queue_size: args.object_listing_queue_size,
            schedule_config: ScheduleConfig {
                interval_seconds: args.interval_seconds,
                run_once: args.run_once,
            },
            warn_as_error: args.warn_as_error,
            auto_complete_shell: args.auto_complete_shell,
        })
    }
}
