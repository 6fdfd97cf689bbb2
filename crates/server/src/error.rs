//! The §7 error taxonomy, collapsed into one `AppError` that renders both the HTTP status
//! and a `{code, message}` JSON body — the same shape as the teacher's
//! `common::http::HttpResponseError` / `ResponseErrorMessage`, without the Sentry
//! classification this server has no use for.

use axum::{
    http::StatusCode,
    response::{
        IntoResponse,
        Response,
    },
    Json,
};
use serde::Serialize;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("not found")]
    NotFound,
    #[error("offset conflict: expected {expected}")]
    OffsetConflict { expected: u64 },
    #[error("upload exceeds max size")]
    Oversize { offset: u64 },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unsupported media type")]
    UnsupportedMediaType,
    #[error("authentication denied")]
    AuthDenied,
    #[error("storage backend error: {0}")]
    Backend(#[from] storage::StorageError),
    #[error("scratch store error: {0}")]
    Scratch(#[from] scratch::ScratchError),
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl AppError {
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        AppError::Internal(err.into())
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::NotFound => "NotFound",
            AppError::OffsetConflict { .. } => "OffsetConflict",
            AppError::Oversize { .. } => "Oversize",
            AppError::InvalidRequest(_) => "InvalidRequest",
            AppError::UnsupportedMediaType => "UnsupportedMediaType",
            AppError::AuthDenied => "AuthDenied",
            AppError::Backend(_) => "BackendTransport",
            AppError::Scratch(scratch::ScratchError::NotFound(_)) => "NotFound",
            AppError::Scratch(scratch::ScratchError::OffsetConflict { .. }) => "OffsetConflict",
            AppError::Scratch(_) => "Internal",
            AppError::Internal(_) => "Internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::OffsetConflict { .. } => StatusCode::CONFLICT,
            AppError::Oversize { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::AuthDenied => StatusCode::UNAUTHORIZED,
            AppError::Backend(storage::StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Scratch(scratch::ScratchError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Scratch(scratch::ScratchError::OffsetConflict { .. }) => StatusCode::CONFLICT,
            AppError::Scratch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        // `not-found` never logs above INFO; everything else that reaches this point is
        // worth a WARN, and `Internal` gets full detail at ERROR (§7 propagation policy).
        match &self {
            AppError::NotFound | AppError::Backend(storage::StorageError::NotFound(_)) => {
                tracing::info!(error = %self, "request failed");
            },
            AppError::Internal(e) => tracing::error!(error = %e, "internal error"),
            other => tracing::warn!(error = %other, "request failed"),
        }
        let body = ErrorBody { code: self.code(), message: self.to_string() };
        (status, Json(body)).into_response()
    }
}
