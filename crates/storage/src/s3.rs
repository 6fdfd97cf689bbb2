//! S3-compatible storage backend. Object key = `uid`; `StoredFile` fields other than the
//! blob itself ride along as S3 user metadata (`x-amz-meta-*`).

use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{
        Credentials,
        Region,
    },
    error::SdkError,
    operation::{
        get_object::GetObjectError,
        head_object::HeadObjectError,
    },
    primitives::ByteStream as AwsByteStream,
    Client,
};
use futures::StreamExt;

use crate::{
    matches_query,
    sort_and_window,
    ByteStream,
    ListParams,
    SearchParams,
    StoredFile,
    Storage,
    StorageError,
    UploadRequest,
};

/// S3 `list-objects-v2` only returns one page at a time and never sorts; `search` falls
/// back to an in-memory scan over up to this many pages before giving up and logging a
/// warning rather than paginating unboundedly (Design Note / Open Question (c)).
pub const S3_SEARCH_PAGE_CEILING: usize = 100;

const META_NAME: &str = "name";
const META_CREATED_AT: &str = "created-at";
const META_EXPIRES: &str = "expires";
const META_MIME_TYPE: &str = "mime-type";
const META_CATEGORY: &str = "category";
const META_CUSTOM_PREFIX: &str = "meta-";

#[derive(Clone, Debug)]
pub struct S3Config {
    pub bucket_name: String,
    pub endpoint_url: Option<String>,
    pub region_name: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

#[derive(Clone, Debug)]
pub struct S3Backend {
    client: Client,
    bucket: String,
}

impl S3Backend {
    pub async fn new(config: S3Config) -> anyhow::Result<Self> {
        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "static",
        );
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region_name))
            .credentials_provider(credentials);
        if let Some(endpoint) = config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let shared_config = loader.load().await;
        let client = Client::new(&shared_config);
        Ok(Self {
            client,
            bucket: config.bucket_name,
        })
    }

    /// Validate that a metadata key satisfies S3's user-metadata header restrictions
    /// (lowercase ASCII letters, digits, hyphen) and reject it otherwise rather than
    /// silently mangling it (Design Note).
    fn validate_metadata_key(key: &str) -> Result<(), StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if valid {
            Ok(())
        } else {
            Err(StorageError::InvalidMetadata(format!(
                "metadata key {key:?} is not valid S3 user-metadata (lowercase alnum, '-', '_' only)"
            )))
        }
    }

    fn to_user_metadata(req: &UploadRequest) -> Result<BTreeMap<String, String>, StorageError> {
        let mut out = BTreeMap::new();
        out.insert(META_NAME.to_owned(), req.name.clone());
        out.insert(META_CREATED_AT.to_owned(), req.created_at.to_string());
        if let Some(expires) = req.expires {
            out.insert(META_EXPIRES.to_owned(), expires.to_string());
        }
        out.insert(META_MIME_TYPE.to_owned(), req.mime_type.clone());
        out.insert(META_CATEGORY.to_owned(), req.category.clone());
        for (k, v) in &req.metadata {
            Self::validate_metadata_key(k)?;
            out.insert(format!("{META_CUSTOM_PREFIX}{k}"), v.clone());
        }
        Ok(out)
    }

    fn from_object(
        uid: String,
        size: u64,
        user_metadata: BTreeMap<String, String>,
    ) -> StoredFile {
        let mut metadata = BTreeMap::new();
        for (k, v) in &user_metadata {
            if let Some(stripped) = k.strip_prefix(META_CUSTOM_PREFIX) {
                metadata.insert(stripped.to_owned(), v.clone());
            }
        }
        StoredFile {
            name: user_metadata.get(META_NAME).cloned().unwrap_or_else(|| uid.clone()),
            created_at: user_metadata
                .get(META_CREATED_AT)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            expires: user_metadata.get(META_EXPIRES).and_then(|v| v.parse().ok()),
            mime_type: user_metadata
                .get(META_MIME_TYPE)
                .cloned()
                .unwrap_or_else(|| "application/octet-stream".to_owned()),
            category: user_metadata
                .get(META_CATEGORY)
                .cloned()
                .unwrap_or_else(|| "unsorted".to_owned()),
            uid,
            size,
            metadata,
        }
    }

    async fn head(&self, uid: &str) -> Result<StoredFile, StorageError> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(uid)
            .send()
            .await
            .map_err(|e| match &e {
                SdkError::ServiceError(se) if matches!(se.err(), HeadObjectError::NotFound(_)) => {
                    StorageError::NotFound(uid.to_owned())
                },
                _ => StorageError::Transport(e.into()),
            })?;
        let size = output.content_length().unwrap_or(0).max(0) as u64;
        let user_metadata: BTreeMap<String, String> = output
            .metadata()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect();
        Ok(Self::from_object(uid.to_owned(), size, user_metadata))
    }
}

#[async_trait]
impl Storage for S3Backend {
    async fn upload(&self, req: UploadRequest, mut body: ByteStream) -> Result<StoredFile, StorageError> {
        let user_metadata = Self::to_user_metadata(&req)?;
        let mut buf = Vec::with_capacity(req.size as usize);
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| StorageError::Transport(e.into()))?;
            buf.extend_from_slice(&chunk);
        }
        let size = buf.len() as u64;
        let mut put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&req.uid)
            .content_type(&req.mime_type)
            .body(AwsByteStream::from(buf));
        for (k, v) in &user_metadata {
            put = put.metadata(k, v);
        }
        put.send().await.map_err(|e| StorageError::Transport(e.into()))?;

        Ok(Self::from_object(req.uid, size, user_metadata))
    }

    async fn download(&self, uid: &str) -> Result<(StoredFile, ByteStream), StorageError> {
        let meta = self.head(uid).await?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(uid)
            .send()
            .await
            .map_err(|e| match &e {
                SdkError::ServiceError(se) if matches!(se.err(), GetObjectError::NoSuchKey(_)) => {
                    StorageError::NotFound(uid.to_owned())
                },
                _ => StorageError::Transport(e.into()),
            })?;
        let stream = tokio_util::io::ReaderStream::new(output.body.into_async_read()).boxed();
        Ok((meta, stream))
    }

    async fn get(&self, uid: &str) -> Result<StoredFile, StorageError> {
        self.head(uid).await
    }

    async fn delete(&self, uid: &str) -> Result<(), StorageError> {
        // S3 delete-object is idempotent and does not 404 on a missing key, so probe first
        // to honor the not-found contract the tus engine and management API depend on.
        self.head(uid).await?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(uid)
            .send()
            .await
            .map_err(|e| StorageError::Transport(e.into()))?;
        Ok(())
    }

    async fn list(&self, params: ListParams) -> Result<Vec<StoredFile>, StorageError> {
        let files = self.scan_all(params.prefix.as_deref(), S3_SEARCH_PAGE_CEILING).await?;
        Ok(sort_and_window(files, params.sort_by, params.sort_order, params.offset, params.limit))
    }

    async fn search(&self, params: SearchParams) -> Result<Vec<StoredFile>, StorageError> {
        let mut files = self.scan_all(None, S3_SEARCH_PAGE_CEILING).await?;
        if let Some(query) = &params.query {
            files.retain(|f| matches_query(f, query));
        }
        if let Some(file_type) = &params.file_type {
            files.retain(|f| f.name.ends_with(file_type.as_str()));
        }
        if let Some(owner) = &params.owner {
            files.retain(|f| f.metadata.get("owner").is_some_and(|v| v == owner));
        }
        if let Some(after) = params.created_after {
            files.retain(|f| f.created_at > after);
        }
        if let Some(before) = params.created_before {
            files.retain(|f| f.created_at < before);
        }
        Ok(sort_and_window(files, params.sort_by, params.sort_order, params.offset, params.limit))
    }
}

impl S3Backend {
    /// List every object under `prefix` (server-side) and `head_object` each one to pick up
    /// user metadata, up to `page_ceiling` pages of the listing. S3 returns lexicographic
    /// order only, so any requested sort is applied afterwards in memory.
    async fn scan_all(&self, prefix: Option<&str>, page_ceiling: usize) -> Result<Vec<StoredFile>, StorageError> {
        let mut paginator = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .set_prefix(prefix.map(str::to_owned))
            .into_paginator()
            .send();

        let mut files = vec![];
        let mut pages = 0;
        while let Some(page) = paginator.next().await {
            let page = page.map_err(|e| StorageError::Transport(e.into()))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                match self.head(key).await {
                    Ok(meta) => files.push(meta),
                    Err(StorageError::NotFound(_)) => continue,
                    Err(e) => return Err(e),
                }
            }
            pages += 1;
            if pages >= page_ceiling {
                tracing::warn!(
                    bucket = %self.bucket,
                    pages,
                    "S3 backend search/list hit the page ceiling; results may be incomplete"
                );
                break;
            }
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn rejects_invalid_metadata_keys() {
        assert!(S3Backend::validate_metadata_key("owner").is_ok());
        assert!(S3Backend::validate_metadata_key("Owner").is_err());
        assert!(S3Backend::validate_metadata_key("owner name").is_err());
        assert!(S3Backend::validate_metadata_key("").is_err());
    }

    #[test]
    fn user_metadata_round_trips_custom_keys() {
        let req = UploadRequest {
            uid: "u1".into(),
            name: "f.txt".into(),
            size: 3,
            created_at: 100,
            expires: Some(200),
            metadata: BTreeMap::from([("owner".to_owned(), "alice".to_owned())]),
            mime_type: "text/plain".into(),
            category: "docs".into(),
        };
        let user_metadata = S3Backend::to_user_metadata(&req).unwrap();
        let stored = S3Backend::from_object("u1".into(), 3, user_metadata);
        assert_eq!(stored.metadata.get("owner"), Some(&"alice".to_owned()));
        assert_eq!(stored.category, "docs");
        assert_eq!(stored.expires, Some(200));
    }
}
