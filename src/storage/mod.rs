use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub mod s3;

pub use s3::S3Store;

use crate::{RelayError, Result};

/// Content type used for folder placeholders
pub const FOLDER_MIME_TYPE: &str = "application/x-directory";

/// Metadata for an object created without uploaded content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMetadata {
    pub name: String,
    pub parent: String,
    pub mime_type: String,
}

impl RemoteMetadata {
    pub fn folder(name: &str, parent: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: parent.to_string(),
            mime_type: FOLDER_MIME_TYPE.to_string(),
        }
    }
}

/// Outcome of a duplicate-checked upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    /// Remote identifier of the stored object
    pub id: String,

    /// True when an object with the same name was already present
    pub skipped: bool,
}

/// Remote object store reached through list/create/upload primitives
///
/// Identifiers are opaque strings; a parent is the identifier of a folder.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Look up an object by exact name directly under `parent`
    async fn find_by_name(&self, name: &str, parent: &str) -> Result<Option<String>>;

    /// Create an empty object (a folder) and return its identifier
    async fn create(&self, metadata: &RemoteMetadata) -> Result<String>;

    /// Upload a local file in chunks, reporting fractional progress after each chunk
    ///
    /// Once `cancel` fires the upload stops between chunks, discards what was
    /// sent so far and fails with [`RelayError::Cancelled`].
    async fn upload_resumable(
        &self,
        local_path: &Path,
        name: &str,
        parent: &str,
        mime_type: &str,
        progress: &(dyn Fn(f64) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<String>;

    /// Get the name of this backend
    fn name(&self) -> &'static str;
}

/// Resolve the folder `name` under `parent`, creating it on first use
///
/// Repeated calls with the same pair return the same identifier and never
/// create a second folder.
pub async fn ensure_folder(store: &dyn RemoteStore, name: &str, parent: &str) -> Result<String> {
    if let Some(existing) = store.find_by_name(name, parent).await? {
        tracing::info!("Folder '{}' already exists ({})", name, existing);
        return Ok(existing);
    }

    let created = store.create(&RemoteMetadata::folder(name, parent)).await?;
    tracing::info!("Created folder '{}' ({})", name, created);
    Ok(created)
}

/// Upload `local_path` into `parent` unless an object with the same file name exists
pub async fn upload_unique(
    store: &dyn RemoteStore,
    local_path: &Path,
    parent: &str,
    mime_type: &str,
    progress: &(dyn Fn(f64) + Send + Sync),
    cancel: &CancellationToken,
) -> Result<UploadResult> {
    let name = local_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| RelayError::Store(format!("No file name in {}", local_path.display())))?;

    if let Some(existing) = store.find_by_name(&name, parent).await? {
        tracing::info!("'{}' already exists in folder ({}), skipping upload", name, existing);
        return Ok(UploadResult {
            id: existing,
            skipped: true,
        });
    }

    let id = store
        .upload_resumable(local_path, &name, parent, mime_type, progress, cancel)
        .await?;
    tracing::info!("Uploaded '{}' -> {}", name, id);

    Ok(UploadResult { id, skipped: false })
}
