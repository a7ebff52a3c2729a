use anyhow::Context;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_runtime::env_config::file::{EnvConfigFileKind, EnvConfigFiles};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use aws_types::SdkConfig;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use super::{RemoteMetadata, RemoteStore};
use crate::config::StoreSettings;
use crate::{RelayError, Result};

/// S3 rejects multipart chunks smaller than this, except for the last one
pub const MIN_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Remote store backed by an S3 bucket
///
/// Folders are key prefixes ending in `/`, materialized by an empty marker
/// object so they can be found by name like any other object. Identifiers are
/// object keys.
pub struct S3Store {
    client: S3Client,
    bucket: String,
    chunk_size: usize,
}

impl S3Store {
    pub fn new(client: S3Client, bucket: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            chunk_size: chunk_size.max(MIN_CHUNK_SIZE),
        }
    }

    /// Build a client from the storage settings, reading credentials from the configured file
    pub async fn connect(settings: &StoreSettings) -> Result<Self> {
        let profile_files = EnvConfigFiles::builder()
            .with_file(EnvConfigFileKind::Credentials, settings.credentials_file.clone())
            .build();

        let sdk_config: SdkConfig = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .profile_files(profile_files)
            .load()
            .await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &settings.endpoint {
            tracing::info!("Using custom S3 endpoint: {}", endpoint);
            s3_config = s3_config.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self::new(
            S3Client::from_conf(s3_config.build()),
            settings.bucket.clone(),
            settings.chunk_size_bytes,
        ))
    }

    /// Check whether an exact key exists in the bucket
    async fn key_exists(&self, key: &str) -> Result<bool> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(err) => Err(err).with_context(|| format!("Failed to look up s3://{}/{}", self.bucket, key)),
        }
    }

    /// Upload every chunk of the file and return the completed parts
    ///
    /// Cancellation is checked before each chunk; a chunk already in flight
    /// is allowed to finish.
    async fn upload_parts(
        &self,
        local_path: &Path,
        key: &str,
        upload_id: &str,
        progress: &(dyn Fn(f64) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<Vec<CompletedPart>> {
        let total = tokio::fs::metadata(local_path)
            .await
            .with_context(|| format!("Cannot access {}", local_path.display()))?
            .len();
        let mut file = tokio::fs::File::open(local_path)
            .await
            .with_context(|| format!("Cannot open {}", local_path.display()))?;

        let mut parts = Vec::new();
        let mut sent = 0u64;
        let mut part_number = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(RelayError::Cancelled.into());
            }

            let chunk = read_chunk(&mut file, self.chunk_size).await?;
            if chunk.is_empty() && part_number > 1 {
                break;
            }
            let chunk_len = chunk.len();

            let response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .with_context(|| format!("Failed to upload part {} of {}", part_number, key))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(response.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );

            sent += chunk_len as u64;
            progress(if total == 0 { 1.0 } else { sent as f64 / total as f64 });
            tracing::debug!("Uploaded part {} of {} ({}/{} bytes)", part_number, key, sent, total);

            if chunk_len < self.chunk_size {
                break;
            }
            part_number += 1;
        }

        Ok(parts)
    }
}

#[async_trait]
impl RemoteStore for S3Store {
    async fn find_by_name(&self, name: &str, parent: &str) -> Result<Option<String>> {
        let object = object_key(name, parent);
        if self.key_exists(&object).await? {
            return Ok(Some(object));
        }

        let folder = folder_key(name, parent);
        if self.key_exists(&folder).await? {
            return Ok(Some(folder));
        }

        Ok(None)
    }

    async fn create(&self, metadata: &RemoteMetadata) -> Result<String> {
        let key = folder_key(&metadata.name, &metadata.parent);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(&metadata.mime_type)
            .body(ByteStream::from_static(b""))
            .send()
            .await
            .with_context(|| format!("Failed to create folder s3://{}/{}", self.bucket, key))?;

        Ok(key)
    }

    async fn upload_resumable(
        &self,
        local_path: &Path,
        name: &str,
        parent: &str,
        mime_type: &str,
        progress: &(dyn Fn(f64) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<String> {
        let key = object_key(name, parent);
        tracing::info!("Uploading {} to s3://{}/{}", local_path.display(), self.bucket, key);

        let upload = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(mime_type)
            .send()
            .await
            .context("Failed to start multipart upload")?;
        let upload_id = upload
            .upload_id()
            .ok_or_else(|| RelayError::Store(format!("No upload id returned for {}", key)))?
            .to_string();

        let parts = match self.upload_parts(local_path, &key, &upload_id, progress, cancel).await {
            Ok(parts) => parts,
            Err(err) => {
                tracing::info!("Aborting multipart upload of {}: {:#}", key, err);
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(&key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    tracing::warn!("Failed to abort multipart upload for {}: {}", key, abort_err);
                }
                return Err(err);
            }
        };

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .context("Failed to complete multipart upload")?;

        Ok(key)
    }

    fn name(&self) -> &'static str {
        "S3"
    }
}

/// Normalize a configured folder into a key prefix (`""` or `"a/b/"`)
pub fn normalize_prefix(folder: &str) -> String {
    let trimmed = folder.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

fn object_key(name: &str, parent: &str) -> String {
    format!("{}{}", normalize_prefix(parent), name)
}

fn folder_key(name: &str, parent: &str) -> String {
    format!("{}{}/", normalize_prefix(parent), name)
}

/// Read up to `size` bytes, stopping early only at end of file
async fn read_chunk(file: &mut tokio::fs::File, size: usize) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; size];
    let mut filled = 0;

    while filled < size {
        let read = file.read(&mut buffer[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }

    buffer.truncate(filled);
    Ok(buffer)
}
