//! Shared test utilities for the s3relay library crate.
//!
//! In-memory storage and transfer doubles plus canonical config helpers used
//! across the unit test modules.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_channel::Sender;
use async_trait::async_trait;
use tokio::sync::Notify;

use crate::config::{Config, CopyPollConfig};
use crate::storage::StorageTrait;
use crate::transfer::{TransferClient, TransferClientFactory};
use crate::types::error::RelayError;
use crate::types::{CopyOperation, CopyStatus, DeleteOutcome, SftpCredentials, SourceObject};

/// Initialise a dummy tracing subscriber for tests.
///
/// Uses `try_init` so that only the first call in a process actually
/// installs the subscriber; subsequent calls are silently ignored.
pub(crate) fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}

/// Create a default [`Config`] suitable for most unit tests.
///
/// Key defaults: bucket=`"test-bucket"` without prefix, archive bucket
/// `"archive"`, one worker, copy polling every 10ms with a 1s timeout.
pub(crate) fn make_test_config() -> Config {
    let mut config = Config::for_source("test-bucket", "", "archive");
    config.sftp_config.host = "sftp.example.com".to_string();
    config.sftp_config.credentials = SftpCredentials {
        username: "relay".to_string(),
        password: "secret".to_string(),
    };
    config.copy_poll_config = CopyPollConfig {
        poll_interval_milliseconds: 10,
        timeout_milliseconds: 1000,
    };
    config
}

#[derive(Default)]
struct MockStorageState {
    objects: Vec<(String, Vec<u8>)>,
    archived: Vec<(String, String)>,
    copy_statuses: VecDeque<CopyStatus>,
    copy_status_lookup_failures: u32,
    copy_status_polls: u32,
    copy_error: Option<Option<RelayError>>,
    unavailable_keys: HashSet<String>,
    list_error: Option<String>,
    list_gate: Option<Arc<Notify>>,
    list_calls: u32,
}

/// In-memory source bucket.
///
/// Copy status lookups replay the configured sequence; the last entry
/// repeats. With no sequence configured every copy succeeds on first poll.
#[derive(Clone, Default)]
pub(crate) struct MockStorage {
    state: Arc<Mutex<MockStorageState>>,
}

impl MockStorage {
    pub(crate) fn with_objects(objects: &[(&str, &str)]) -> Self {
        let storage = MockStorage::default();
        for (key, content) in objects {
            storage.put(key, content);
        }
        storage
    }

    pub(crate) fn put(&self, key: &str, content: &str) {
        self.state
            .lock()
            .unwrap()
            .objects
            .push((key.to_string(), content.as_bytes().to_vec()));
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .objects
            .iter()
            .any(|(k, _)| k == key)
    }

    pub(crate) fn archived(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().archived.clone()
    }

    pub(crate) fn set_copy_statuses(&self, statuses: &[CopyStatus]) {
        self.state.lock().unwrap().copy_statuses = statuses.iter().copied().collect();
    }

    pub(crate) fn set_copy_status_lookup_failures(&self, count: u32) {
        self.state.lock().unwrap().copy_status_lookup_failures = count;
    }

    pub(crate) fn copy_status_poll_count(&self) -> u32 {
        self.state.lock().unwrap().copy_status_polls
    }

    /// `None` fails with a generic backend error.
    pub(crate) fn fail_copy_with(&self, error: Option<RelayError>) {
        self.state.lock().unwrap().copy_error = Some(error);
    }

    pub(crate) fn make_unavailable(&self, key: &str) {
        self.state
            .lock()
            .unwrap()
            .unavailable_keys
            .insert(key.to_string());
    }

    /// Fail listing after every stored object has been sent.
    pub(crate) fn fail_listing_with(&self, message: &str) {
        self.state.lock().unwrap().list_error = Some(message.to_string());
    }

    /// Hold listing until the returned notify is signalled.
    pub(crate) fn gate_listing(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().list_gate = Some(gate.clone());
        gate
    }

    pub(crate) fn list_call_count(&self) -> u32 {
        self.state.lock().unwrap().list_calls
    }
}

#[async_trait]
impl StorageTrait for MockStorage {
    async fn list_objects(&self, sender: &Sender<SourceObject>, _max_keys: i32) -> Result<()> {
        let (objects, gate) = {
            let mut state = self.state.lock().unwrap();
            state.list_calls += 1;
            let objects: Vec<SourceObject> = state
                .objects
                .iter()
                .map(|(key, content)| SourceObject::new(key, "", content.len() as i64, None))
                .collect();
            (objects, state.list_gate.clone())
        };

        if let Some(gate) = gate {
            gate.notified().await;
        }

        for object in objects {
            if sender.send(object).await.is_err() {
                return Ok(());
            }
        }

        match self.state.lock().unwrap().list_error.clone() {
            Some(message) => Err(anyhow!(message)),
            None => Ok(()),
        }
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let state = self.state.lock().unwrap();
        if state.unavailable_keys.contains(key) {
            return Err(anyhow!("backend unreachable"));
        }
        state
            .objects
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| anyhow!("NoSuchKey: {key}"))
    }

    async fn delete_object_if_exists(&self, key: &str) -> Result<DeleteOutcome> {
        let mut state = self.state.lock().unwrap();
        let before = state.objects.len();
        state.objects.retain(|(k, _)| k != key);
        if state.objects.len() < before {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }

    async fn copy_object(
        &self,
        object: &SourceObject,
        destination_bucket: &str,
        destination_key: &str,
    ) -> Result<CopyOperation> {
        let mut state = self.state.lock().unwrap();
        match state.copy_error.clone() {
            Some(Some(relay_error)) => return Err(anyhow!(relay_error)),
            Some(None) => return Err(anyhow!("AccessDenied")),
            None => {}
        }

        state
            .archived
            .push((destination_bucket.to_string(), destination_key.to_string()));
        Ok(CopyOperation {
            source_uri: format!("s3://test-bucket/{}", object.key),
            destination_bucket: destination_bucket.to_string(),
            destination_key: destination_key.to_string(),
            status: CopyStatus::Pending,
            expected_e_tag: object.e_tag.clone(),
            expected_size: object.size,
        })
    }

    async fn get_copy_status(&self, _operation: &CopyOperation) -> Result<CopyStatus> {
        let mut state = self.state.lock().unwrap();
        state.copy_status_polls += 1;

        if state.copy_status_lookup_failures > 0 {
            state.copy_status_lookup_failures -= 1;
            return Err(anyhow!("InternalError"));
        }

        let status = if state.copy_statuses.len() > 1 {
            state.copy_statuses.pop_front()
        } else {
            state.copy_statuses.front().copied()
        };
        Ok(status.unwrap_or(CopyStatus::Success))
    }
}

#[derive(Default)]
struct MockTransferState {
    directories: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    fail_connect: bool,
    fail_upload_paths: HashSet<String>,
    fail_disconnect: bool,
    connects: u32,
    disconnects: u32,
}

/// In-memory SFTP destination shared by every client it creates.
#[derive(Clone, Default)]
pub(crate) struct MockTransfer {
    state: Arc<Mutex<MockTransferState>>,
}

impl MockTransfer {
    pub(crate) fn fail_connect(&self) {
        self.state.lock().unwrap().fail_connect = true;
    }

    pub(crate) fn fail_upload_to(&self, path: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_upload_paths
            .insert(path.to_string());
    }

    pub(crate) fn fail_disconnect(&self) {
        self.state.lock().unwrap().fail_disconnect = true;
    }

    pub(crate) fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub(crate) fn file_paths(&self) -> Vec<String> {
        self.state.lock().unwrap().files.keys().cloned().collect()
    }

    pub(crate) fn has_directory(&self, path: &str) -> bool {
        self.state.lock().unwrap().directories.contains(path)
    }

    pub(crate) fn connect_count(&self) -> u32 {
        self.state.lock().unwrap().connects
    }

    pub(crate) fn disconnect_count(&self) -> u32 {
        self.state.lock().unwrap().disconnects
    }
}

impl TransferClientFactory for MockTransfer {
    fn create_client(&self) -> Box<dyn TransferClient> {
        Box::new(MockTransferClient {
            state: self.state.clone(),
            connected: false,
        })
    }

    fn host(&self) -> &str {
        "mock-sftp"
    }
}

struct MockTransferClient {
    state: Arc<Mutex<MockTransferState>>,
    connected: bool,
}

#[async_trait]
impl TransferClient for MockTransferClient {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_connect {
            return Err(anyhow!("authentication failed"));
        }
        state.connects += 1;
        self.connected = true;
        Ok(())
    }

    async fn ensure_directory(&mut self, path: &str) -> Result<()> {
        if !self.connected {
            return Err(anyhow!("not connected"));
        }
        self.state
            .lock()
            .unwrap()
            .directories
            .insert(path.to_string());
        Ok(())
    }

    async fn upload(&mut self, payload: Vec<u8>, remote_path: &str) -> Result<()> {
        if !self.connected {
            return Err(anyhow!("not connected"));
        }
        let mut state = self.state.lock().unwrap();
        if state.fail_upload_paths.contains(remote_path) {
            return Err(anyhow!("permission denied"));
        }
        let directory = remote_path
            .rsplit_once('/')
            .map(|(directory, _)| directory)
            .unwrap_or_default();
        if !state.directories.contains(directory) {
            return Err(anyhow!("no such directory: {directory}"));
        }
        state.files.insert(remote_path.to_string(), payload);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.disconnects += 1;
        self.connected = false;
        if state.fail_disconnect {
            return Err(anyhow!("connection reset"));
        }
        Ok(())
    }
}
