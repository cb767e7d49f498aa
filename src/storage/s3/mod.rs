pub mod client_builder;

use anyhow::{Context, Result, anyhow};
use async_channel::Sender;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use std::sync::Arc;

use crate::config::ClientConfig;
use crate::storage::{Storage, StorageTrait};
use crate::types::error::RelayError;
use crate::types::token::PipelineCancellationToken;
use crate::types::{CopyOperation, CopyStatus, DeleteOutcome, SourceObject, StoragePath};

const NO_SUCH_BUCKET_ERROR_CODE: &str = "NoSuchBucket";

/// Extracts the S3 error code and message from an AWS SDK error.
///
/// For service errors (S3 API responses), returns the S3 error code
/// (e.g. "AccessDenied", "NoSuchKey") and the human-readable error
/// message from the response. For other error types (network, timeout,
/// construction failure), returns "N/A" as the code and the full error
/// description as the message.
fn extract_sdk_error_details<E: std::fmt::Display + ProvideErrorMetadata>(
    e: &SdkError<E>,
) -> (String, String) {
    if let Some(service_err) = e.as_service_error() {
        (
            service_err.code().unwrap_or("unknown").to_string(),
            service_err.message().unwrap_or("no message").to_string(),
        )
    } else {
        ("N/A".to_string(), e.to_string())
    }
}

/// Create the S3 storage for the source bucket.
///
/// Without a client configuration the storage is created without a client
/// and every API call fails; this is only useful in tests.
pub async fn create_s3_storage(
    path: StoragePath,
    client_config: Option<ClientConfig>,
    cancellation_token: PipelineCancellationToken,
) -> Storage {
    let StoragePath::S3 { bucket, prefix } = path;

    let client = if let Some(ref client_config) = client_config {
        Some(Arc::new(client_config.create_client().await))
    } else {
        None
    };

    Box::new(S3Storage {
        bucket,
        prefix,
        cancellation_token,
        client,
    })
}

/// S3 storage used by the relay pipeline: listing and reading the source
/// bucket, copying into the archive bucket and deleting verified sources.
#[derive(Clone)]
struct S3Storage {
    bucket: String,
    prefix: String,
    cancellation_token: PipelineCancellationToken,
    client: Option<Arc<Client>>,
}

impl S3Storage {
    fn client(&self) -> Result<&Client> {
        self.client
            .as_deref()
            .ok_or_else(|| anyhow!("S3 client is not configured for bucket '{}'.", self.bucket))
    }
}

#[async_trait]
impl StorageTrait for S3Storage {
    async fn list_objects(&self, sender: &Sender<SourceObject>, max_keys: i32) -> Result<()> {
        let client = self.client()?;
        let mut continuation_token: Option<String> = None;

        loop {
            if self.cancellation_token.is_cancelled() {
                tracing::info!("Listing cancelled");
                break;
            }

            let output = client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&self.prefix)
                .set_continuation_token(continuation_token.clone())
                .max_keys(max_keys)
                .send()
                .await
                .map_err(|e| {
                    let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                    tracing::error!(
                        bucket = self.bucket,
                        prefix = self.prefix,
                        s3_error_code = s3_error_code,
                        s3_error_message = s3_error_message,
                        "S3 ListObjectsV2 API call failed for s3://{}/{}: {} ({}).",
                        self.bucket,
                        self.prefix,
                        s3_error_code,
                        s3_error_message,
                    );
                    anyhow!(e).context("aws_sdk_s3::client::list_objects_v2() failed.")
                })?;

            for object in output.contents() {
                if self.cancellation_token.is_cancelled() {
                    return Ok(());
                }

                let Some(key) = object.key() else {
                    continue;
                };
                // Zero-byte folder placeholders are not payloads.
                if key.ends_with('/') {
                    continue;
                }

                let source_object = SourceObject::new(
                    key,
                    &self.prefix,
                    object.size().unwrap_or_default(),
                    object.e_tag().map(String::from),
                );
                if let Err(e) = sender
                    .send(source_object)
                    .await
                    .context("async_channel::Sender::send() failed.")
                {
                    return if !sender.is_closed() { Err(e) } else { Ok(()) };
                }
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(String::from);
            } else {
                break;
            }
        }

        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let output = self
            .client()?
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::error!(
                    bucket = self.bucket,
                    key = key,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 GetObject API call failed for s3://{}/{}: {} ({}).",
                    self.bucket,
                    key,
                    s3_error_code,
                    s3_error_message,
                );
                anyhow!(e).context("aws_sdk_s3::client::get_object() failed.")
            })?;

        let body = output
            .body
            .collect()
            .await
            .context("aws_sdk_s3::primitives::ByteStream::collect() failed.")?;

        Ok(body.into_bytes().to_vec())
    }

    async fn delete_object_if_exists(&self, key: &str) -> Result<DeleteOutcome> {
        let client = self.client()?;

        let head_result = client.head_object().bucket(&self.bucket).key(key).send().await;
        if let Err(e) = head_result {
            if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                tracing::debug!(bucket = self.bucket, key = key, "Source already absent.");
                return Ok(DeleteOutcome::NotFound);
            }
            let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
            tracing::warn!(
                bucket = self.bucket,
                key = key,
                s3_error_code = s3_error_code,
                s3_error_message = s3_error_message,
                "S3 HeadObject API call failed for s3://{}/{}: {} ({}).",
                self.bucket,
                key,
                s3_error_code,
                s3_error_message,
            );
            return Err(anyhow!(e).context("aws_sdk_s3::client::head_object() failed."));
        }

        client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::warn!(
                    bucket = self.bucket,
                    key = key,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 DeleteObject API call failed for s3://{}/{}: {} ({}).",
                    self.bucket,
                    key,
                    s3_error_code,
                    s3_error_message,
                );
                anyhow!(e).context("aws_sdk_s3::client::delete_object() failed.")
            })?;

        Ok(DeleteOutcome::Deleted)
    }

    async fn copy_object(
        &self,
        object: &SourceObject,
        destination_bucket: &str,
        destination_key: &str,
    ) -> Result<CopyOperation> {
        let output = self
            .client()?
            .copy_object()
            .copy_source(build_copy_source(&self.bucket, &object.key))
            .bucket(destination_bucket)
            .key(destination_key)
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::error!(
                    source_bucket = self.bucket,
                    key = object.key,
                    destination_bucket = destination_bucket,
                    destination_key = destination_key,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 CopyObject API call failed for s3://{}/{} -> s3://{}/{}: {} ({}).",
                    self.bucket,
                    object.key,
                    destination_bucket,
                    destination_key,
                    s3_error_code,
                    s3_error_message,
                );
                if s3_error_code == NO_SUCH_BUCKET_ERROR_CODE {
                    anyhow!(RelayError::DestinationContainerUnresolved {
                        bucket: destination_bucket.to_string(),
                        message: s3_error_message,
                    })
                } else {
                    anyhow!(e).context("aws_sdk_s3::client::copy_object() failed.")
                }
            })?;

        let expected_e_tag = output
            .copy_object_result()
            .and_then(|result| result.e_tag())
            .map(String::from)
            .or_else(|| object.e_tag.clone());

        Ok(CopyOperation {
            source_uri: format!("s3://{}/{}", self.bucket, object.key),
            destination_bucket: destination_bucket.to_string(),
            destination_key: destination_key.to_string(),
            status: CopyStatus::Pending,
            expected_e_tag,
            expected_size: object.size,
        })
    }

    async fn get_copy_status(&self, operation: &CopyOperation) -> Result<CopyStatus> {
        let head_result = self
            .client()?
            .head_object()
            .bucket(&operation.destination_bucket)
            .key(&operation.destination_key)
            .send()
            .await;

        match head_result {
            Ok(head) => Ok(evaluate_copy_status(
                operation,
                head.e_tag(),
                head.content_length().unwrap_or_default(),
            )),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                Ok(CopyStatus::Pending)
            }
            Err(e) => {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::warn!(
                    destination = operation.destination(),
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 HeadObject API call failed for s3://{}: {} ({}).",
                    operation.destination(),
                    s3_error_code,
                    s3_error_message,
                );
                Err(anyhow!(e).context("aws_sdk_s3::client::head_object() failed."))
            }
        }
    }
}

/// `CopySource` header value: `bucket/key` with the key URL-encoded.
fn build_copy_source(bucket: &str, key: &str) -> String {
    let encoded_key = urlencoding::encode(key).replace("%2F", "/");
    format!("{bucket}/{encoded_key}")
}

/// Compare the archived object with what the copy was expected to produce.
/// The ETag decides when both sides have one; otherwise the size does.
fn evaluate_copy_status(
    operation: &CopyOperation,
    actual_e_tag: Option<&str>,
    actual_size: i64,
) -> CopyStatus {
    let matches = match (operation.expected_e_tag.as_deref(), actual_e_tag) {
        (Some(expected), Some(actual)) => expected == actual,
        _ => operation.expected_size == actual_size,
    };

    if matches {
        CopyStatus::Success
    } else {
        CopyStatus::Failed
    }
}
