//! Route handlers implementing the state machine and header contract from §4.C, grounded on
//! the teacher's streaming-upload handler shape in `crates/local_backend/src/storage.rs`.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
};

use axum::{
    body::Body,
    extract::{
        Path,
        State,
    },
    http::{
        HeaderMap,
        StatusCode,
    },
    response::{
        IntoResponse,
        Response,
    },
};
use bytes::Bytes;
use futures::{
    stream,
    Stream,
    StreamExt,
};
use rand::Rng;
use scratch::UploadDescriptor;
use tokio_util::io::ReaderStream;

use super::headers::{
    decode_metadata,
    encode_metadata,
    TUS_EXTENSION,
    TUS_EXTENSIONS,
    TUS_MAX_SIZE,
    TUS_RESUMABLE,
    TUS_VERSION,
    TUS_VERSION_VALUE,
    UPLOAD_DEFER_LENGTH,
    UPLOAD_EXPIRES,
    UPLOAD_LENGTH,
    UPLOAD_METADATA,
    UPLOAD_OFFSET,
};
use crate::{
    completion,
    error::AppError,
    state::SharedState,
};

const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

fn generate_uid() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}

fn capability_headers(builder: axum::http::response::Builder, max_size: u64) -> axum::http::response::Builder {
    builder
        .header(TUS_RESUMABLE, TUS_VERSION_VALUE)
        .header(TUS_VERSION, TUS_VERSION_VALUE)
        .header(TUS_EXTENSION, TUS_EXTENSIONS)
        .header(TUS_MAX_SIZE, max_size.to_string())
}

fn is_offset_octet_stream(headers: &HeaderMap) -> bool {
    headers.get(axum::http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) == Some(OFFSET_OCTET_STREAM)
}

fn build_location(headers: &HeaderMap, prefix: &str, uid: &str) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(axum::http::header::HOST))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{scheme}://{host}/{prefix}/{uid}")
}

fn filename_for(descriptor: &UploadDescriptor) -> String {
    descriptor.metadata.get("filename").cloned().unwrap_or_else(|| descriptor.uid.clone())
}

fn mime_type_for(descriptor: &UploadDescriptor) -> String {
    descriptor
        .metadata
        .get("filetype")
        .or_else(|| descriptor.metadata.get("mime_type"))
        .cloned()
        .unwrap_or_else(|| "application/octet-stream".to_owned())
}

/// Wrap an axum request-body stream so it yields at most `remaining` bytes: full chunks
/// while under budget, a truncated head slice at the boundary, nothing after. Sets
/// `truncated` if the body carried more than `remaining` bytes (§4.C oversize rule).
fn bounded_stream(
    inner: impl Stream<Item = Result<Bytes, axum::Error>> + Send + Unpin + 'static,
    remaining: u64,
    truncated: Arc<AtomicBool>,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
    stream::unfold((inner, remaining, false), move |(mut inner, remaining, done)| {
        let truncated = truncated.clone();
        async move {
            if done {
                return None;
            }
            if remaining == 0 {
                loop {
                    match inner.next().await {
                        None => return None,
                        Some(Err(e)) => {
                            return Some((Err(std::io::Error::new(std::io::ErrorKind::Other, e)), (inner, 0, true)))
                        },
                        Some(Ok(chunk)) if chunk.is_empty() => continue,
                        Some(Ok(_)) => {
                            truncated.store(true, Ordering::Relaxed);
                            return None;
                        },
                    }
                }
            }
            match inner.next().await {
                None => None,
                Some(Err(e)) => Some((Err(std::io::Error::new(std::io::ErrorKind::Other, e)), (inner, 0, true))),
                Some(Ok(chunk)) if (chunk.len() as u64) <= remaining => {
                    let new_remaining = remaining - chunk.len() as u64;
                    Some((Ok(chunk), (inner, new_remaining, false)))
                },
                Some(Ok(chunk)) => {
                    let head = chunk.slice(0..remaining as usize);
                    truncated.store(true, Ordering::Relaxed);
                    Some((Ok(head), (inner, 0, false)))
                },
            }
        }
    })
}

async fn maybe_complete(state: &SharedState, descriptor: UploadDescriptor) -> Result<(), AppError> {
    if descriptor.is_complete() {
        completion::on_upload_complete(&state.scratch, &state.backend, descriptor).await?;
    }
    Ok(())
}

pub async fn options_root(State(state): State<SharedState>) -> Result<Response, AppError> {
    Ok(capability_headers(Response::builder().status(StatusCode::NO_CONTENT), state.config.tus.max_size)
        .body(Body::empty())
        .map_err(AppError::internal)?)
}

pub async fn options_upload(State(state): State<SharedState>, Path(uid): Path<String>) -> Result<Response, AppError> {
    if state.scratch.read(&uid).await?.is_none() {
        return Err(AppError::NotFound);
    }
    Ok(capability_headers(Response::builder().status(StatusCode::NO_CONTENT), state.config.tus.max_size)
        .body(Body::empty())
        .map_err(AppError::internal)?)
}

pub async fn create_upload(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    state.auth.check(&headers)?;

    let defer_length = headers
        .get(UPLOAD_DEFER_LENGTH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "1")
        .unwrap_or(false);

    let size = if defer_length {
        None
    } else {
        let raw = headers
            .get(UPLOAD_LENGTH)
            .ok_or_else(|| AppError::InvalidRequest("Upload-Length is required".to_owned()))?
            .to_str()
            .map_err(|_| AppError::InvalidRequest("Upload-Length is not valid ASCII".to_owned()))?;
        let value: u64 =
            raw.parse().map_err(|_| AppError::InvalidRequest(format!("Upload-Length {raw:?} is not numeric")))?;
        Some(value)
    };

    if let Some(size) = size {
        if size > state.config.tus.max_size {
            return Err(AppError::Oversize { offset: 0 });
        }
    }

    let metadata = match headers.get(UPLOAD_METADATA) {
        Some(value) => {
            let raw = value.to_str().map_err(|_| AppError::InvalidRequest("Upload-Metadata is not valid ASCII".to_owned()))?;
            decode_metadata(raw)?
        },
        None => BTreeMap::new(),
    };

    let uid = generate_uid();
    let descriptor = UploadDescriptor::new(uid.clone(), size, metadata, state.config.tus.ttl_seconds());
    state.scratch.create(&descriptor).await?;

    if is_offset_octet_stream(&headers) {
        let truncated = Arc::new(AtomicBool::new(false));
        let bounded = bounded_stream(body.into_data_stream(), state.config.tus.max_size, truncated.clone());
        let new_offset = state.scratch.append(&uid, Box::pin(bounded), 0).await?;
        if truncated.load(Ordering::Relaxed) {
            return Err(AppError::Oversize { offset: new_offset });
        }
        let descriptor = state.scratch.read(&uid).await?.ok_or(AppError::NotFound)?;
        maybe_complete(&state, descriptor).await?;
    }

    let location = build_location(&headers, &state.config.tus.prefix, &uid);
    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header(axum::http::header::LOCATION, location)
        .header(TUS_RESUMABLE, TUS_VERSION_VALUE)
        .body(Body::empty())
        .map_err(AppError::internal)?)
}

pub async fn head_upload(State(state): State<SharedState>, Path(uid): Path<String>) -> Result<Response, AppError> {
    let descriptor = state.scratch.read(&uid).await?.ok_or(AppError::NotFound)?;
    if !state.scratch.exists(&uid).await {
        return Err(AppError::NotFound);
    }

    let upload_length = match descriptor.size {
        Some(size) => size.to_string(),
        None => String::new(),
    };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(TUS_RESUMABLE, TUS_VERSION_VALUE)
        .header(UPLOAD_OFFSET, descriptor.offset.to_string())
        .header(UPLOAD_LENGTH, upload_length)
        .header(axum::http::header::CACHE_CONTROL, "no-store")
        .header(UPLOAD_METADATA, encode_metadata(&descriptor.metadata))
        .body(Body::empty())
        .map_err(AppError::internal)?)
}

pub async fn patch_upload(
    State(state): State<SharedState>,
    Path(uid): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    state.auth.check(&headers)?;

    if !is_offset_octet_stream(&headers) {
        return Err(AppError::UnsupportedMediaType);
    }

    // Reading the descriptor doesn't require the per-uid lock (the lock only serializes
    // writers); a racing PATCH can still move the offset between this check and the next
    // read, so re-read after the lock is held before trusting `descriptor.offset` for
    // anything but the 409 message below.
    let Some(_guard) = state.locks.try_acquire(&uid) else {
        let expected = state.scratch.read(&uid).await?.ok_or(AppError::NotFound)?.offset;
        return Err(AppError::OffsetConflict { expected });
    };
    let mut descriptor = state.scratch.read(&uid).await?.ok_or(AppError::NotFound)?;

    let upload_offset: u64 = headers
        .get(UPLOAD_OFFSET)
        .ok_or_else(|| AppError::InvalidRequest("Upload-Offset is required".to_owned()))?
        .to_str()
        .ok()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| AppError::InvalidRequest("Upload-Offset is not numeric".to_owned()))?;
    if upload_offset != descriptor.offset {
        return Err(AppError::OffsetConflict { expected: descriptor.offset });
    }

    // Deferred-length completion: a later PATCH declares the final size via Upload-Length
    // equal to the current offset (resolved Open Question, see DESIGN.md).
    if descriptor.defer_length {
        if let Some(raw) = headers.get(UPLOAD_LENGTH) {
            let declared: u64 = raw
                .to_str()
                .ok()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| AppError::InvalidRequest("Upload-Length is not numeric".to_owned()))?;
            if declared != descriptor.offset {
                return Err(AppError::InvalidRequest(
                    "Upload-Length on a deferred upload must equal the current offset".to_owned(),
                ));
            }
            descriptor.size = Some(declared);
            descriptor.defer_length = false;
            state.scratch.write_descriptor(&descriptor).await?;
        }
    }

    let remaining = state.config.tus.max_size.saturating_sub(descriptor.offset);
    let truncated = Arc::new(AtomicBool::new(false));
    let bounded = bounded_stream(body.into_data_stream(), remaining, truncated.clone());
    let new_offset = state.scratch.append(&uid, Box::pin(bounded), upload_offset).await?;

    if truncated.load(Ordering::Relaxed) {
        return Ok(Response::builder()
            .status(StatusCode::PAYLOAD_TOO_LARGE)
            .header(UPLOAD_OFFSET, new_offset.to_string())
            .header(TUS_RESUMABLE, TUS_VERSION_VALUE)
            .body(Body::empty())
            .map_err(AppError::internal)?);
    }

    let descriptor = state.scratch.read(&uid).await?.ok_or(AppError::NotFound)?;
    let expires = descriptor.expires.clone();
    maybe_complete(&state, descriptor).await?;

    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(UPLOAD_OFFSET, new_offset.to_string())
        .header(TUS_RESUMABLE, TUS_VERSION_VALUE)
        .header(UPLOAD_EXPIRES, expires)
        .body(Body::empty())
        .map_err(AppError::internal)?)
}

pub async fn delete_upload(
    State(state): State<SharedState>,
    Path(uid): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    state.auth.check(&headers)?;
    // Block until any in-flight PATCH drains before tearing down scratch (§5).
    let _guard = state.locks.acquire(&uid).await;
    if state.scratch.read(&uid).await?.is_none() {
        return Err(AppError::NotFound);
    }
    state.scratch.remove(&uid).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn download_upload(State(state): State<SharedState>, Path(uid): Path<String>) -> Result<Response, AppError> {
    let descriptor = state.scratch.read(&uid).await?.ok_or(AppError::NotFound)?;
    let file = tokio::fs::File::open(state.scratch.payload_path(&uid)).await.map_err(|_| AppError::NotFound)?;
    let body = Body::from_stream(ReaderStream::new(file));

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, mime_type_for(&descriptor))
        .header(axum::http::header::CONTENT_LENGTH, descriptor.offset.to_string())
        .header(
            axum::http::header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename_for(&descriptor)),
        )
        .body(body)
        .map_err(AppError::internal)?)
}
