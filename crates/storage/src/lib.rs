//! The durable storage abstraction that completed uploads are drained into.
//!
//! `Storage` is a capability set implemented by two variants, [`local::LocalBackend`] and
//! [`s3::S3Backend`], selected at startup and wrapped in the tagged-union [`Backend`] so
//! callers never depend on which variant is live.

pub mod local;
pub mod s3;

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

pub use local::LocalBackend;
pub use s3::{S3Backend, S3Config};

/// A stream of raw payload bytes, as read from or written to a backend.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("object {0:?} not found")]
    NotFound(String),
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
    #[error("storage transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

/// Parameters for creating a new object in the backend.
#[derive(Clone, Debug)]
pub struct UploadRequest {
    pub uid: String,
    pub name: String,
    pub size: u64,
    pub created_at: i64,
    pub expires: Option<i64>,
    pub metadata: BTreeMap<String, String>,
    pub mime_type: String,
    pub category: String,
}

/// Metadata for a file that has been fully ingested into the backend.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StoredFile {
    pub uid: String,
    pub name: String,
    pub size: u64,
    pub created_at: i64,
    pub expires: Option<i64>,
    pub metadata: BTreeMap<String, String>,
    pub mime_type: String,
    pub category: String,
}

impl StoredFile {
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires, Some(expires) if expires < now)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    CreatedAt,
    Size,
    Name,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Clone, Debug, Default)]
pub struct ListParams {
    pub prefix: Option<String>,
    pub limit: usize,
    pub offset: usize,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
}

#[derive(Clone, Debug, Default)]
pub struct SearchParams {
    pub query: Option<String>,
    pub file_type: Option<String>,
    pub owner: Option<String>,
    pub created_after: Option<i64>,
    pub created_before: Option<i64>,
    pub limit: usize,
    pub offset: usize,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
}

/// Durable home for completed uploads. Implemented by [`LocalBackend`] and [`S3Backend`].
#[async_trait]
pub trait Storage: Send + Sync {
    async fn upload(&self, req: UploadRequest, body: ByteStream) -> Result<StoredFile, StorageError>;
    async fn download(&self, uid: &str) -> Result<(StoredFile, ByteStream), StorageError>;
    async fn get(&self, uid: &str) -> Result<StoredFile, StorageError>;
    async fn delete(&self, uid: &str) -> Result<(), StorageError>;
    async fn list(&self, params: ListParams) -> Result<Vec<StoredFile>, StorageError>;
    async fn search(&self, params: SearchParams) -> Result<Vec<StoredFile>, StorageError>;
}

/// Tagged union over the two reference backends. Do not retain the raw `storage` reference
/// inside persisted [`StoredFile`] records — it is a runtime-only association (Design Note).
#[derive(Clone, Debug)]
pub enum Backend {
    Local(LocalBackend),
    S3(S3Backend),
}

#[async_trait]
impl Storage for Backend {
    async fn upload(&self, req: UploadRequest, body: ByteStream) -> Result<StoredFile, StorageError> {
        match self {
            Backend::Local(b) => b.upload(req, body).await,
            Backend::S3(b) => b.upload(req, body).await,
        }
    }

    async fn download(&self, uid: &str) -> Result<(StoredFile, ByteStream), StorageError> {
        match self {
            Backend::Local(b) => b.download(uid).await,
            Backend::S3(b) => b.download(uid).await,
        }
    }

    async fn get(&self, uid: &str) -> Result<StoredFile, StorageError> {
        match self {
            Backend::Local(b) => b.get(uid).await,
            Backend::S3(b) => b.get(uid).await,
        }
    }

    async fn delete(&self, uid: &str) -> Result<(), StorageError> {
        match self {
            Backend::Local(b) => b.delete(uid).await,
            Backend::S3(b) => b.delete(uid).await,
        }
    }

    async fn list(&self, params: ListParams) -> Result<Vec<StoredFile>, StorageError> {
        match self {
            Backend::Local(b) => b.list(params).await,
            Backend::S3(b) => b.list(params).await,
        }
    }

    async fn search(&self, params: SearchParams) -> Result<Vec<StoredFile>, StorageError> {
        match self {
            Backend::Local(b) => b.search(params).await,
            Backend::S3(b) => b.search(params).await,
        }
    }
}

/// Sort by one of the three total orders, breaking ties by `uid` ascending so pagination
/// stays stable, then window by `offset..offset+limit`.
pub(crate) fn sort_and_window(
    mut files: Vec<StoredFile>,
    sort_by: SortBy,
    sort_order: SortOrder,
    offset: usize,
    limit: usize,
) -> Vec<StoredFile> {
    files.sort_by(|a, b| {
        let primary = match sort_by {
            SortBy::CreatedAt => a.created_at.cmp(&b.created_at),
            SortBy::Size => a.size.cmp(&b.size),
            SortBy::Name => a.name.cmp(&b.name),
        };
        let primary = match sort_order {
            SortOrder::Asc => primary,
            SortOrder::Desc => primary.reverse(),
        };
        primary.then_with(|| a.uid.cmp(&b.uid))
    });
    files.into_iter().skip(offset).take(limit).collect()
}

/// Substring-or-prefix match used by both `list`'s name-prefix filter and `search`'s
/// name/uid substring filter.
pub(crate) fn matches_query(file: &StoredFile, query: &str) -> bool {
    file.name.contains(query) || file.uid.contains(query)
}
