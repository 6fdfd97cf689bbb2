//! The completion pipeline: drains a finished scratch upload into the durable [`storage::Backend`]
//! and reclaims scratch space, grounded on the teacher's upload-then-commit shape in
//! `crates/local_backend/src/storage.rs::storage_upload`.

use futures::StreamExt;
use scratch::{
    ScratchStore,
    UploadDescriptor,
};
use storage::{
    Backend,
    Storage,
    StoredFile,
    UploadRequest,
};
use tokio_util::io::ReaderStream;

use crate::error::AppError;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
const DEFAULT_CATEGORY: &str = "unsorted";

/// Ingest `descriptor`'s scratch payload into `backend`, then reclaim the scratch entry.
///
/// At-most-once: if `descriptor.completed` is already set (a prior attempt ingested the
/// object but crashed before scratch cleanup), this skips straight to reclamation instead of
/// re-uploading (Design Note on restart idempotency).
pub async fn on_upload_complete(
    scratch: &ScratchStore,
    backend: &Backend,
    mut descriptor: UploadDescriptor,
) -> Result<StoredFile, AppError> {
    if descriptor.completed {
        let stored = backend.get(&descriptor.uid).await?;
        scratch.remove(&descriptor.uid).await?;
        return Ok(stored);
    }

    let name = descriptor.metadata.get("filename").cloned().unwrap_or_else(|| descriptor.uid.clone());
    let mime_type = descriptor
        .metadata
        .get("filetype")
        .or_else(|| descriptor.metadata.get("mime_type"))
        .cloned()
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_owned());
    let category = descriptor.metadata.get("category").cloned().unwrap_or_else(|| DEFAULT_CATEGORY.to_owned());
    let created_at = chrono::DateTime::parse_from_rfc3339(&descriptor.created_at)
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|_| chrono::Utc::now().timestamp());
    let expires = descriptor.expires_at().map(|dt| dt.timestamp());

    let file = tokio::fs::File::open(scratch.payload_path(&descriptor.uid)).await.map_err(AppError::internal)?;
    let body: storage::ByteStream = ReaderStream::new(file).boxed();

    let request = UploadRequest {
        uid: descriptor.uid.clone(),
        name,
        size: descriptor.offset,
        created_at,
        expires,
        metadata: descriptor.metadata.clone(),
        mime_type,
        category,
    };

    let stored = backend.upload(request, body).await?;

    descriptor.completed = true;
    scratch.write_descriptor(&descriptor).await?;
    scratch.remove(&descriptor.uid).await?;

    Ok(stored)
}
