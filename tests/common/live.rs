//! Live backend helpers for the `e2e_test` cfg.
//!
//! S3 access uses the `s3relay-e2e-test` AWS profile. The SFTP server is
//! taken from `S3RELAY_E2E_SFTP_HOST`, `S3RELAY_E2E_SFTP_PORT` (default 22),
//! `S3RELAY_E2E_SFTP_USER`, `S3RELAY_E2E_SFTP_PASSWORD` and
//! `S3RELAY_E2E_SFTP_BASE_PATH` (default `/upload`). Every helper works in a
//! unique bucket or directory that is removed on drop.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use ssh2::{HashType, Session, Sftp};
use uuid::Uuid;

use s3relay_rs::Config;
use s3relay_rs::config::SftpConfig;
use s3relay_rs::config::args::build_config_from_args;
use s3relay_rs::transfer::join_remote_path;
use s3relay_rs::types::SftpCredentials;

/// AWS profile used for all E2E tests.
pub const AWS_PROFILE: &str = "s3relay-e2e-test";

/// Used for bucket creation when the profile has no region.
const DEFAULT_REGION: &str = "us-east-1";

/// Default timeout for E2E tests (5 minutes).
pub const E2E_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

/// RAII guard that deletes all objects and the bucket when dropped.
pub struct BucketGuard {
    helper: Arc<S3TestHelper>,
    bucket: String,
}

impl Drop for BucketGuard {
    fn drop(&mut self) {
        let helper = self.helper.clone();
        let bucket = self.bucket.clone();
        // The runtime may already be shutting down after a failed assertion.
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current().block_on(async move {
                    helper.delete_bucket_cascade(&bucket).await;
                })
            });
        }));
    }
}

/// S3 client built with the e2e profile plus bucket and object helpers.
pub struct S3TestHelper {
    client: Client,
    region: String,
}

impl S3TestHelper {
    pub async fn new() -> Arc<Self> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .profile_name(AWS_PROFILE)
            .load()
            .await;

        let region = sdk_config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let client = Client::new(&sdk_config);

        Arc::new(Self { client, region })
    }

    pub fn bucket_guard(self: &Arc<Self>, bucket: &str) -> BucketGuard {
        BucketGuard {
            helper: Arc::clone(self),
            bucket: bucket.to_string(),
        }
    }

    pub fn generate_bucket_name(&self) -> String {
        format!("s3relay-e2e-{}", Uuid::new_v4())
    }

    pub async fn create_bucket(&self, bucket: &str) {
        let mut builder = self.client.create_bucket().bucket(bucket);

        // us-east-1 must NOT specify a location constraint
        if self.region != "us-east-1" {
            let constraint = BucketLocationConstraint::from(self.region.as_str());
            let config = CreateBucketConfiguration::builder()
                .location_constraint(constraint)
                .build();
            builder = builder.create_bucket_configuration(config);
        }

        builder
            .send()
            .await
            .unwrap_or_else(|e| panic!("Failed to create bucket {bucket}: {e}"));
    }

    pub async fn delete_bucket_cascade(&self, bucket: &str) {
        for key in self.list_keys(bucket, "").await {
            let _ = self
                .client
                .delete_object()
                .bucket(bucket)
                .key(&key)
                .send()
                .await;
        }
        let _ = self.client.delete_bucket().bucket(bucket).send().await;
    }

    pub async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .unwrap_or_else(|e| panic!("Failed to put {key} into {bucket}: {e}"));
    }

    pub async fn get_object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .ok()?;
        let body = output.body.collect().await.ok()?;
        Some(body.into_bytes().to_vec())
    }

    pub async fn list_keys(&self, bucket: &str, prefix: &str) -> Vec<String> {
        let mut keys = Vec::new();
        let mut continuation_token = None;
        loop {
            let Ok(output) = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token)
                .send()
                .await
            else {
                return keys;
            };
            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(String::from)),
            );
            if output.is_truncated() != Some(true) {
                return keys;
            }
            continuation_token = output.next_continuation_token().map(String::from);
        }
    }

    /// Config reading `source` with the e2e profile; SFTP settings from `sftp`.
    pub fn build_config(source: &str, archive_bucket: &str, sftp: &SftpConfig) -> Config {
        let port = sftp.port.to_string();
        build_config_from_args([
            "s3relay",
            "--source",
            source,
            "--archive-bucket",
            archive_bucket,
            "--source-profile",
            AWS_PROFILE,
            "--sftp-host",
            sftp.host.as_str(),
            "--sftp-port",
            port.as_str(),
            "--sftp-user",
            sftp.credentials.username.as_str(),
            "--sftp-password",
            sftp.credentials.password.as_str(),
            "--sftp-base-path",
            sftp.base_path.as_str(),
            "--copy-poll-interval-milliseconds",
            "200",
            "--copy-timeout-milliseconds",
            "30000",
        ])
        .unwrap_or_else(|e| panic!("Failed to build config: {e}"))
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn required_env(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} must be set for SFTP E2E tests"))
}

/// Independent ssh2 session used to inspect and prepare the SFTP server.
///
/// Works under a unique directory below the configured base path; the
/// directory tree is removed on drop.
pub struct SftpTestHelper {
    config: SftpConfig,
    root: String,
    sftp: Sftp,
    session: Session,
}

impl SftpTestHelper {
    pub fn new() -> Self {
        let host = required_env("S3RELAY_E2E_SFTP_HOST");
        let port: u16 = env_or("S3RELAY_E2E_SFTP_PORT", "22")
            .parse()
            .expect("S3RELAY_E2E_SFTP_PORT must be a port number");
        let username = required_env("S3RELAY_E2E_SFTP_USER");
        let password = required_env("S3RELAY_E2E_SFTP_PASSWORD");
        let base_path = env_or("S3RELAY_E2E_SFTP_BASE_PATH", "/upload");

        let tcp = TcpStream::connect((host.as_str(), port))
            .unwrap_or_else(|e| panic!("Failed to connect to {host}:{port}: {e}"));
        let mut session = Session::new().unwrap();
        session.set_tcp_stream(tcp);
        session.handshake().unwrap();
        session.userauth_password(&username, &password).unwrap();
        let sftp = session.sftp().unwrap();

        let root = join_remote_path(&base_path, &format!("s3relay-e2e-{}", Uuid::new_v4()));
        sftp.mkdir(Path::new(&root), 0o755)
            .unwrap_or_else(|e| panic!("Failed to create {root}: {e}"));

        let config = SftpConfig {
            host,
            port,
            credentials: SftpCredentials { username, password },
            base_path: root.clone(),
            connect_timeout_milliseconds: 10_000,
            ..SftpConfig::default()
        };

        Self {
            config,
            root,
            sftp,
            session,
        }
    }

    /// Client settings whose base path is this helper's directory.
    pub fn config(&self) -> SftpConfig {
        self.config.clone()
    }

    pub fn path(&self, relative: &str) -> String {
        join_remote_path(&self.root, relative)
    }

    pub fn host_key_sha256(&self) -> String {
        self.session
            .host_key_hash(HashType::Sha256)
            .map(|hash| hash.iter().map(|b| format!("{b:02x}")).collect())
            .expect("server did not provide a SHA-256 host key hash")
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        let mut file = self.sftp.open(Path::new(path)).ok()?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).ok()?;
        Some(contents)
    }

    pub fn write(&self, path: &str, contents: &[u8]) {
        let mut file = self.sftp.create(Path::new(path)).unwrap();
        file.write_all(contents).unwrap();
    }

    pub fn mkdir(&self, path: &str) {
        self.sftp.mkdir(Path::new(path), 0o755).unwrap();
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.sftp
            .stat(Path::new(path))
            .is_ok_and(|stat| stat.is_dir())
    }

    /// File and directory names directly inside `dir`, sorted.
    pub fn list(&self, dir: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .sftp
            .readdir(Path::new(dir))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(path, _)| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .collect();
        names.sort();
        names
    }

    fn remove_tree(&self, path: &Path) {
        if let Ok(entries) = self.sftp.readdir(path) {
            for (child, stat) in entries {
                if stat.is_dir() {
                    self.remove_tree(&child);
                } else {
                    let _ = self.sftp.unlink(&child);
                }
            }
        }
        let _ = self.sftp.rmdir(path);
    }
}

impl Drop for SftpTestHelper {
    fn drop(&mut self) {
        let root = self.root.clone();
        self.remove_tree(Path::new(&root));
    }
}
