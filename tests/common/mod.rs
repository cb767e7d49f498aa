//! Shared integration test infrastructure for s3relay-rs.
//!
//! Provides an in-memory object store (`MemoryBuckets`) and an in-memory
//! SFTP server (`MemorySftp`) wired through the public storage and transfer
//! traits, so whole passes can run without AWS or an SSH server.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_channel::Sender;
use async_trait::async_trait;

use s3relay_rs::config::CopyPollConfig;
use s3relay_rs::storage::StorageTrait;
use s3relay_rs::transfer::{TransferClient, TransferClientFactory};
use s3relay_rs::types::{CopyOperation, CopyStatus, DeleteOutcome, SftpCredentials, SourceObject};
use s3relay_rs::{Config, PipelineCancellationToken, RelayPipeline};

pub const SOURCE_BUCKET: &str = "exportcontainer-live";
pub const ARCHIVE_BUCKET: &str = "archive-live";

pub fn test_config() -> Config {
    let mut config = Config::for_source(SOURCE_BUCKET, "", ARCHIVE_BUCKET);
    config.sftp_config.host = "sftp.example.com".to_string();
    config.sftp_config.credentials = SftpCredentials {
        username: "relay".to_string(),
        password: "secret".to_string(),
    };
    config.copy_poll_config = CopyPollConfig {
        poll_interval_milliseconds: 500,
        timeout_milliseconds: 5_000,
    };
    config
}

pub fn build_pipeline(
    config: Config,
    buckets: &MemoryBuckets,
    sftp: &MemorySftp,
    cancellation_token: PipelineCancellationToken,
) -> RelayPipeline {
    RelayPipeline::with_components(
        config,
        Box::new(buckets.clone()),
        Box::new(sftp.clone()),
        cancellation_token,
    )
}

#[derive(Default)]
struct BucketState {
    source: BTreeMap<String, Vec<u8>>,
    archive: BTreeMap<String, Vec<u8>>,
    // Number of status checks before a copy reports its final status.
    copy_latency_polls: u32,
    polls: HashMap<String, u32>,
    final_status: HashMap<String, CopyStatus>,
}

/// Source and archive buckets held in memory.
#[derive(Clone, Default)]
pub struct MemoryBuckets {
    state: Arc<Mutex<BucketState>>,
}

impl MemoryBuckets {
    pub fn with_source(objects: &[(&str, &str)]) -> Self {
        let buckets = Self::default();
        for (key, body) in objects {
            buckets.put_source(key, body);
        }
        buckets
    }

    pub fn put_source(&self, key: &str, body: &str) {
        self.state
            .lock()
            .unwrap()
            .source
            .insert(key.to_string(), body.as_bytes().to_vec());
    }

    pub fn source_keys(&self) -> Vec<String> {
        self.state.lock().unwrap().source.keys().cloned().collect()
    }

    pub fn archive(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().archive.get(key).cloned()
    }

    pub fn archive_keys(&self) -> Vec<String> {
        self.state.lock().unwrap().archive.keys().cloned().collect()
    }

    /// Copies report `Pending` for this many status checks.
    pub fn set_copy_latency_polls(&self, polls: u32) {
        self.state.lock().unwrap().copy_latency_polls = polls;
    }

    /// Force the archive copy of `destination_key` to settle on `status`.
    pub fn settle_copy_as(&self, destination_key: &str, status: CopyStatus) {
        self.state
            .lock()
            .unwrap()
            .final_status
            .insert(destination_key.to_string(), status);
    }
}

#[async_trait]
impl StorageTrait for MemoryBuckets {
    async fn list_objects(&self, sender: &Sender<SourceObject>, _max_keys: i32) -> Result<()> {
        let listed: Vec<SourceObject> = {
            let state = self.state.lock().unwrap();
            state
                .source
                .iter()
                .map(|(key, body)| SourceObject::new(key, "", body.len() as i64, None))
                .collect()
        };
        for object in listed {
            sender.send(object).await?;
        }
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .source
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("NoSuchKey: {key}"))
    }

    async fn delete_object_if_exists(&self, key: &str) -> Result<DeleteOutcome> {
        Ok(match self.state.lock().unwrap().source.remove(key) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NotFound,
        })
    }

    async fn copy_object(
        &self,
        object: &SourceObject,
        destination_bucket: &str,
        destination_key: &str,
    ) -> Result<CopyOperation> {
        let mut state = self.state.lock().unwrap();
        let body = state
            .source
            .get(&object.key)
            .cloned()
            .ok_or_else(|| anyhow!("NoSuchKey: {}", object.key))?;
        let expected_size = body.len() as i64;
        if state.final_status.get(destination_key) != Some(&CopyStatus::Failed) {
            state.archive.insert(destination_key.to_string(), body);
        }
        state.polls.insert(destination_key.to_string(), 0);

        Ok(CopyOperation {
            source_uri: format!("s3://{SOURCE_BUCKET}/{}", object.key),
            destination_bucket: destination_bucket.to_string(),
            destination_key: destination_key.to_string(),
            status: CopyStatus::Pending,
            expected_e_tag: None,
            expected_size,
        })
    }

    async fn get_copy_status(&self, operation: &CopyOperation) -> Result<CopyStatus> {
        let mut state = self.state.lock().unwrap();
        let latency = state.copy_latency_polls;
        let polls = state
            .polls
            .entry(operation.destination_key.clone())
            .or_insert(0);
        *polls += 1;
        if *polls <= latency {
            return Ok(CopyStatus::Pending);
        }
        Ok(state
            .final_status
            .get(&operation.destination_key)
            .copied()
            .unwrap_or(CopyStatus::Success))
    }
}

#[derive(Default)]
struct SftpState {
    directories: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    reject_uploads_to: BTreeSet<String>,
    sessions_opened: u32,
    sessions_closed: u32,
}

/// SFTP server held in memory. `/` always exists.
#[derive(Clone)]
pub struct MemorySftp {
    host: String,
    state: Arc<Mutex<SftpState>>,
}

impl Default for MemorySftp {
    fn default() -> Self {
        let mut state = SftpState::default();
        state.directories.insert("/".to_string());
        Self {
            host: "sftp.example.com".to_string(),
            state: Arc::new(Mutex::new(state)),
        }
    }
}

impl MemorySftp {
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn file_paths(&self) -> Vec<String> {
        self.state.lock().unwrap().files.keys().cloned().collect()
    }

    pub fn reject_uploads_to(&self, path: &str) {
        self.state
            .lock()
            .unwrap()
            .reject_uploads_to
            .insert(path.to_string());
    }

    pub fn open_sessions(&self) -> u32 {
        let state = self.state.lock().unwrap();
        state.sessions_opened - state.sessions_closed
    }
}

impl TransferClientFactory for MemorySftp {
    fn create_client(&self) -> Box<dyn TransferClient> {
        Box::new(MemorySftpClient {
            server: self.clone(),
            connected: false,
        })
    }

    fn host(&self) -> &str {
        &self.host
    }
}

struct MemorySftpClient {
    server: MemorySftp,
    connected: bool,
}

impl MemorySftpClient {
    fn state(&self) -> Result<std::sync::MutexGuard<'_, SftpState>> {
        if !self.connected {
            return Err(anyhow!("SFTP session is not connected."));
        }
        Ok(self.server.state.lock().unwrap())
    }
}

#[async_trait]
impl TransferClient for MemorySftpClient {
    async fn connect(&mut self) -> Result<()> {
        self.server.state.lock().unwrap().sessions_opened += 1;
        self.connected = true;
        Ok(())
    }

    async fn ensure_directory(&mut self, path: &str) -> Result<()> {
        let mut state = self.state()?;
        let mut current = String::new();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current.push('/');
            current.push_str(component);
            state.directories.insert(current.clone());
        }
        Ok(())
    }

    async fn upload(&mut self, payload: Vec<u8>, remote_path: &str) -> Result<()> {
        let mut state = self.state()?;
        if state.reject_uploads_to.contains(remote_path) {
            return Err(anyhow!("Permission denied: {remote_path}"));
        }
        let parent = match remote_path.rsplit_once('/') {
            Some(("", _)) | None => "/",
            Some((parent, _)) => parent,
        };
        if !state.directories.contains(parent) {
            return Err(anyhow!("No such file: {parent}"));
        }
        state.files.insert(remote_path.to_string(), payload);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.connected {
            self.connected = false;
            self.server.state.lock().unwrap().sessions_closed += 1;
        }
        Ok(())
    }
}

#[cfg(e2e_test)]
mod live;
#[cfg(e2e_test)]
pub use live::*;

/// Wraps an async E2E test body with a timeout.
///
/// Usage:
/// ```ignore
/// #[tokio::test]
/// async fn e2e_my_test() {
///     e2e_timeout!(async {
///         // test body here
///     });
/// }
/// ```
#[cfg(e2e_test)]
#[macro_export]
macro_rules! e2e_timeout {
    ($body:expr) => {
        tokio::time::timeout(common::E2E_TIMEOUT, $body)
            .await
            .expect("E2E test timed out")
    };
}
