//! Local filesystem storage backend.
//!
//! Layout: `root_dir/<uid>/<name>` holds the blob, `root_dir/<uid>/meta.json` holds a
//! `{uid, name, size, created_at, expires, metadata}` sidecar. `mime_type` / `category` are
//! folded into that JSON document too, since they're part of `StoredFile`.

use std::path::PathBuf;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

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

#[derive(Clone, Debug)]
pub struct LocalBackend {
    root_dir: PathBuf,
}

impl LocalBackend {
    pub async fn new(root_dir: PathBuf) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&root_dir).await?;
        Ok(Self { root_dir })
    }

    fn dir_for(&self, uid: &str) -> PathBuf {
        self.root_dir.join(uid)
    }

    fn meta_path(&self, uid: &str) -> PathBuf {
        self.dir_for(uid).join("meta.json")
    }

    async fn read_meta(&self, uid: &str) -> Result<StoredFile, StorageError> {
        let bytes = tokio::fs::read(self.meta_path(uid))
            .await
            .map_err(|_| StorageError::NotFound(uid.to_owned()))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::Transport(anyhow::anyhow!(e).context("corrupt meta.json")))
    }

    async fn all_meta(&self) -> Result<Vec<StoredFile>, StorageError> {
        let mut files = vec![];
        let mut entries = tokio::fs::read_dir(&self.root_dir)
            .await
            .map_err(|e| StorageError::Transport(e.into()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::Transport(e.into()))?
        {
            if !entry
                .file_type()
                .await
                .map_err(|e| StorageError::Transport(e.into()))?
                .is_dir()
            {
                continue;
            }
            let uid = entry.file_name().to_string_lossy().into_owned();
            match self.read_meta(&uid).await {
                Ok(meta) => files.push(meta),
                Err(StorageError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl Storage for LocalBackend {
    async fn upload(&self, req: UploadRequest, mut body: ByteStream) -> Result<StoredFile, StorageError> {
        let dir = self.dir_for(&req.uid);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::Transport(e.into()))?;
        let data_path = dir.join(&req.name);
        let mut file = tokio::fs::File::create(&data_path)
            .await
            .map_err(|e| StorageError::Transport(e.into()))?;
        let mut size = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| StorageError::Transport(e.into()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| StorageError::Transport(e.into()))?;
            size += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| StorageError::Transport(e.into()))?;

        let stored = StoredFile {
            uid: req.uid,
            name: req.name,
            size,
            created_at: req.created_at,
            expires: req.expires,
            metadata: req.metadata,
            mime_type: req.mime_type,
            category: req.category,
        };
        let json = serde_json::to_vec_pretty(&stored)
            .map_err(|e| StorageError::Transport(anyhow::anyhow!(e)))?;
        tokio::fs::write(self.meta_path(&stored.uid), json)
            .await
            .map_err(|e| StorageError::Transport(e.into()))?;
        Ok(stored)
    }

    async fn download(&self, uid: &str) -> Result<(StoredFile, ByteStream), StorageError> {
        let meta = self.read_meta(uid).await?;
        let data_path = self.dir_for(uid).join(&meta.name);
        let file = tokio::fs::File::open(&data_path)
            .await
            .map_err(|_| StorageError::NotFound(uid.to_owned()))?;
        let stream = ReaderStream::new(file).boxed();
        Ok((meta, stream))
    }

    async fn get(&self, uid: &str) -> Result<StoredFile, StorageError> {
        self.read_meta(uid).await
    }

    async fn delete(&self, uid: &str) -> Result<(), StorageError> {
        let dir = self.dir_for(uid);
        if !dir.exists() {
            return Err(StorageError::NotFound(uid.to_owned()));
        }
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| StorageError::Transport(e.into()))
    }

    async fn list(&self, params: ListParams) -> Result<Vec<StoredFile>, StorageError> {
        let mut files = self.all_meta().await?;
        if let Some(prefix) = &params.prefix {
            files.retain(|f| f.name.starts_with(prefix.as_str()) || f.uid.starts_with(prefix.as_str()));
        }
        Ok(sort_and_window(files, params.sort_by, params.sort_order, params.offset, params.limit))
    }

    async fn search(&self, params: SearchParams) -> Result<Vec<StoredFile>, StorageError> {
        let mut files = self.all_meta().await?;
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

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use futures::stream;

    use super::*;

    fn body(bytes: &'static [u8]) -> ByteStream {
        stream::once(async move { Ok(bytes::Bytes::from_static(bytes)) }).boxed()
    }

    fn req(uid: &str, name: &str, created_at: i64) -> UploadRequest {
        UploadRequest {
            uid: uid.to_owned(),
            name: name.to_owned(),
            size: 0,
            created_at,
            expires: None,
            metadata: BTreeMap::new(),
            mime_type: "application/octet-stream".to_owned(),
            category: "unsorted".to_owned(),
        }
    }

    #[tokio::test]
    async fn upload_then_download_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path().to_owned()).await.unwrap();
        let stored = backend
            .upload(req("abc123", "test.txt", 1000), body(b"hello world"))
            .await
            .unwrap();
        assert_eq!(stored.size, 11);

        let (meta, mut stream) = backend.download("abc123").await.unwrap();
        assert_eq!(meta.name, "test.txt");
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"hello world");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path().to_owned()).await.unwrap();
        assert!(matches!(backend.get("nope").await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path().to_owned()).await.unwrap();
        backend.upload(req("abc", "f.bin", 1), body(b"x")).await.unwrap();
        backend.delete("abc").await.unwrap();
        assert!(matches!(backend.get("abc").await, Err(StorageError::NotFound(_))));
        assert!(matches!(backend.delete("abc").await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_sorts_and_windows() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path().to_owned()).await.unwrap();
        for (uid, created_at) in [("a", 3), ("b", 1), ("c", 2)] {
            backend.upload(req(uid, "f.bin", created_at), body(b"x")).await.unwrap();
        }
        let files = backend
            .list(ListParams {
                sort_by: crate::SortBy::CreatedAt,
                sort_order: crate::SortOrder::Asc,
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        let uids: Vec<_> = files.iter().map(|f| f.uid.clone()).collect();
        assert_eq!(uids, vec!["b", "c", "a"]);
    }
}
