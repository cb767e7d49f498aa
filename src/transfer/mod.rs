//! SFTP delivery of relayed payloads.
//!
//! A [`TransferClient`] is short-lived: the relayer asks the
//! [`TransferClientFactory`] for a fresh client per object, connects, ensures
//! the target directory, uploads and always disconnects afterwards. There is
//! no pooling or reuse of sessions across objects.

use anyhow::Result;
use async_trait::async_trait;
use dyn_clone::DynClone;

pub mod sftp;

pub use sftp::SftpTransferClientFactory;

/// Type alias for a boxed transfer client factory.
pub type TransferConnector = Box<dyn TransferClientFactory + Send + Sync>;

/// One connection to the transfer destination.
#[async_trait]
pub trait TransferClient: Send {
    /// Open and authenticate the session.
    async fn connect(&mut self) -> Result<()>;

    /// Make sure `path` exists as a directory. A directory created by
    /// someone else between the check and the create counts as success.
    async fn ensure_directory(&mut self, path: &str) -> Result<()>;

    /// Write the whole payload to `remote_path`. On error no file at
    /// `remote_path` may be treated as complete.
    async fn upload(&mut self, payload: Vec<u8>, remote_path: &str) -> Result<()>;

    /// Close the session. Callers only log failures.
    async fn disconnect(&mut self) -> Result<()>;
}

/// Creates a new, unconnected [`TransferClient`] per transfer attempt.
pub trait TransferClientFactory: DynClone {
    fn create_client(&self) -> Box<dyn TransferClient>;

    /// Host name used in diagnostics.
    fn host(&self) -> &str;
}

dyn_clone::clone_trait_object!(TransferClientFactory);

/// Join remote path segments with a single `/`.
///
/// Trailing slashes of `base` and leading/trailing slashes of `segment` are
/// ignored, so `"/Inbound/"` + `"Invoices"` gives `"/Inbound/Invoices"`.
pub fn join_remote_path(base: &str, segment: &str) -> String {
    let base = base.trim_end_matches('/');
    let segment = segment.trim_matches('/');
    if segment.is_empty() {
        return if base.is_empty() {
            "/".to_string()
        } else {
            base.to_string()
        };
    }
    format!("{base}/{segment}")
}

/// `{base}/{sub_path}`
pub fn target_directory(base_path: &str, sub_path: &str) -> String {
    join_remote_path(base_path, sub_path)
}

/// `{base}/{sub_path}/{name}`
pub fn target_file_path(base_path: &str, sub_path: &str, name: &str) -> String {
    join_remote_path(&target_directory(base_path, sub_path), name)
}
