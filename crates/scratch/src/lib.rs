//! The scratch area: byte-accurate append-only storage of a partial upload payload plus an
//! atomic JSON sidecar for its [`UploadDescriptor`], keyed by uid.

pub mod locks;

use std::{
    collections::BTreeMap,
    path::{
        Path,
        PathBuf,
    },
};

use bytes::Bytes;
use chrono::{
    DateTime,
    Duration as ChronoDuration,
    SecondsFormat,
    Utc,
};
use futures::{
    Stream,
    StreamExt,
};
use serde::{
    Deserialize,
    Serialize,
};
use tokio::io::AsyncWriteExt;

pub use locks::LockTable;

#[derive(thiserror::Error, Debug)]
pub enum ScratchError {
    #[error("upload {0:?} not found")]
    NotFound(String),
    #[error("upload {0:?} already exists")]
    AlreadyExists(String),
    #[error("offset conflict: expected {expected}, got {actual}")]
    OffsetConflict { expected: u64, actual: u64 },
    #[error("scratch io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt sidecar for {0:?}: {1}")]
    CorruptSidecar(String, serde_json::Error),
}

/// One in-flight upload's bookkeeping record, persisted alongside its partial payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadDescriptor {
    pub uid: String,
    pub size: Option<u64>,
    pub offset: u64,
    pub metadata: BTreeMap<String, String>,
    pub created_at: String,
    pub expires: String,
    pub defer_length: bool,
    /// Stamped true after a successful backend ingestion but before scratch removal, so a
    /// restart mid-reclamation resumes cleanup idempotently (Design Note).
    pub completed: bool,
}

impl UploadDescriptor {
    pub fn new(uid: String, size: Option<u64>, metadata: BTreeMap<String, String>, ttl_seconds: i64) -> Self {
        let now = Utc::now();
        let expires = now + ChronoDuration::seconds(ttl_seconds);
        Self {
            uid,
            size,
            offset: 0,
            metadata,
            created_at: now.to_rfc3339_opts(SecondsFormat::Micros, true),
            expires: expires.to_rfc3339_opts(SecondsFormat::Micros, true),
            defer_length: size.is_none(),
            completed: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.defer_length && self.size == Some(self.offset)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.expires)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires| expires < now)
    }
}

#[derive(Clone, Debug)]
pub struct ScratchStore {
    files_dir: PathBuf,
}

impl ScratchStore {
    pub async fn new(files_dir: PathBuf) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(&files_dir).await?;
        Ok(Self { files_dir })
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    pub fn payload_path(&self, uid: &str) -> PathBuf {
        self.files_dir.join(uid)
    }

    pub fn sidecar_path(&self, uid: &str) -> PathBuf {
        self.files_dir.join(format!("{uid}.info"))
    }

    pub async fn create(&self, descriptor: &UploadDescriptor) -> Result<(), ScratchError> {
        let payload_path = self.payload_path(&descriptor.uid);
        if tokio::fs::try_exists(&payload_path).await? {
            return Err(ScratchError::AlreadyExists(descriptor.uid.clone()));
        }
        tokio::fs::File::create(&payload_path).await?.sync_all().await?;
        self.write_descriptor(descriptor).await?;
        Ok(())
    }

    pub async fn read(&self, uid: &str) -> Result<Option<UploadDescriptor>, ScratchError> {
        match tokio::fs::read(self.sidecar_path(uid)).await {
            Ok(bytes) => {
                let descriptor = serde_json::from_slice(&bytes)
                    .map_err(|e| ScratchError::CorruptSidecar(uid.to_owned(), e))?;
                Ok(Some(descriptor))
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, uid: &str) -> bool {
        tokio::fs::try_exists(self.payload_path(uid)).await.unwrap_or(false)
    }

    /// Rewrite the sidecar via write-to-temp-then-rename so a crash mid-write never leaves
    /// a torn JSON document behind (Atomicity requirement).
    pub async fn write_descriptor(&self, descriptor: &UploadDescriptor) -> Result<(), ScratchError> {
        let json = serde_json::to_vec_pretty(descriptor)
            .map_err(|e| ScratchError::CorruptSidecar(descriptor.uid.clone(), e))?;
        let final_path = self.sidecar_path(&descriptor.uid);
        let tmp_path = self.files_dir.join(format!("{}.info.tmp", descriptor.uid));
        let mut tmp = tokio::fs::File::create(&tmp_path).await?;
        tmp.write_all(&json).await?;
        tmp.sync_all().await?;
        drop(tmp);
        tokio::fs::rename(&tmp_path, &final_path).await?;
        Ok(())
    }

    /// Append the bytes of `stream` to the payload, advancing and persisting
    /// `descriptor.offset` after every chunk. `expected_offset` must match the descriptor's
    /// current offset or the call fails with `offset-conflict` before writing anything.
    ///
    /// Flushes the payload append before updating the sidecar so a restart that re-reads
    /// the sidecar always sees an offset at or below the true persisted byte count
    /// (Atomicity requirement).
    pub async fn append<S>(&self, uid: &str, mut stream: S, expected_offset: u64) -> Result<u64, ScratchError>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Unpin,
    {
        let mut descriptor = self.read(uid).await?.ok_or_else(|| ScratchError::NotFound(uid.to_owned()))?;
        if descriptor.offset != expected_offset {
            return Err(ScratchError::OffsetConflict {
                expected: descriptor.offset,
                actual: expected_offset,
            });
        }

        let mut file = tokio::fs::OpenOptions::new().append(true).open(self.payload_path(uid)).await?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }
            file.write_all(&chunk).await?;
            file.flush().await?;
            file.sync_data().await?;
            descriptor.offset += chunk.len() as u64;
            self.write_descriptor(&descriptor).await?;
        }
        Ok(descriptor.offset)
    }

    /// Delete both payload and sidecar. Idempotent: missing files are not an error.
    pub async fn remove(&self, uid: &str) -> Result<(), ScratchError> {
        for path in [self.payload_path(uid), self.sidecar_path(uid)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {},
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Enumerate every sidecar currently on disk, for the expiration sweep.
    pub async fn list_descriptors(&self) -> Result<Vec<UploadDescriptor>, ScratchError> {
        let mut out = vec![];
        let mut entries = tokio::fs::read_dir(&self.files_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(uid) = name.strip_suffix(".info") else { continue };
            if let Some(descriptor) = self.read(uid).await? {
                out.push(descriptor);
            }
        }
        Ok(out)
    }
}
