use anyhow::Result;
use async_channel::Sender;
use async_trait::async_trait;
use dyn_clone::DynClone;

use crate::config::Config;
use crate::types::token::PipelineCancellationToken;
use crate::types::{CopyOperation, CopyStatus, DeleteOutcome, SourceObject};

pub mod s3;

/// Type alias for a boxed Storage trait object.
pub type Storage = Box<dyn StorageTrait + Send + Sync>;

/// Object storage operations needed by the relay pipeline.
///
/// Implementations return `anyhow::Result`; the relayer maps failures onto
/// [`RelayError`](crate::types::error::RelayError) variants at each stage
/// boundary. Errors that already carry a `RelayError` (e.g. an unresolvable
/// archive bucket) are kept as they are.
#[async_trait]
pub trait StorageTrait: DynClone {
    /// List every object under the source prefix and send it to the channel
    /// in listing order.
    ///
    /// Listing failures are treated as unrecoverable for the pass.
    async fn list_objects(&self, sender: &Sender<SourceObject>, max_keys: i32) -> Result<()>;

    /// Download the whole object into memory.
    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete the object; absence is not an error.
    async fn delete_object_if_exists(&self, key: &str) -> Result<DeleteOutcome>;

    /// Start a server-side copy of the object into another bucket.
    async fn copy_object(
        &self,
        object: &SourceObject,
        destination_bucket: &str,
        destination_key: &str,
    ) -> Result<CopyOperation>;

    /// Observe the current status of an archive copy.
    async fn get_copy_status(&self, operation: &CopyOperation) -> Result<CopyStatus>;
}

dyn_clone::clone_trait_object!(StorageTrait);

/// Create the S3 storage for the configured source bucket.
pub async fn create_storage(
    config: Config,
    cancellation_token: PipelineCancellationToken,
) -> Storage {
    let client_config = config.source_client_config.clone();
    let source = config.source.clone();

    s3::create_s3_storage(source, client_config, cancellation_token).await
}
