//! Management API (§4.E): `list` / `get` (metadata or streamed download) / `delete` over
//! the storage backend for already-ingested files, grounded on the teacher's list/get
//! handlers in `crates/local_backend/src/storage.rs`. `search` is part of the storage
//! backend trait (for future surfaces) but is not exposed through this API, per §4.E's
//! fixed route set.

use axum::{
    body::Body,
    extract::{
        Path,
        Query,
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
    routing::get,
    Json,
    Router,
};
use serde::Deserialize;
use storage::{
    ListParams,
    SortBy,
    SortOrder,
    Storage,
};

use crate::{
    error::AppError,
    state::SharedState,
};

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/list", get(list_files))
        .route("/{uid}", get(get_file).delete(delete_file))
}

fn default_limit() -> usize {
    10
}

fn parse_sort_by(raw: Option<&str>) -> SortBy {
    match raw {
        Some("size") => SortBy::Size,
        Some("name") => SortBy::Name,
        _ => SortBy::CreatedAt,
    }
}

fn parse_sort_order(raw: Option<&str>) -> SortOrder {
    match raw {
        Some("asc") | Some("ASC") => SortOrder::Asc,
        _ => SortOrder::Desc,
    }
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
    sort_by: Option<String>,
    sort_order: Option<String>,
    prefix: Option<String>,
}

async fn list_files(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    state.auth.check(&headers)?;
    let params = ListParams {
        prefix: query.prefix,
        limit: query.limit,
        offset: query.offset,
        sort_by: parse_sort_by(query.sort_by.as_deref()),
        sort_order: parse_sort_order(query.sort_order.as_deref()),
    };
    let files = state.backend.list(params).await?;
    Ok(Json(files))
}

#[derive(Deserialize)]
pub struct GetQuery {
    #[serde(default)]
    meta: bool,
}

async fn get_file(
    State(state): State<SharedState>,
    Path(uid): Path<String>,
    headers: HeaderMap,
    Query(query): Query<GetQuery>,
) -> Result<Response, AppError> {
    state.auth.check(&headers)?;
    if query.meta {
        let file = state.backend.get(&uid).await?;
        return Ok(Json(file).into_response());
    }

    let (file, stream) = state.backend.download(&uid).await?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, file.mime_type.clone())
        .header(axum::http::header::CONTENT_LENGTH, file.size.to_string())
        .header(axum::http::header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", file.name))
        .body(Body::from_stream(stream))
        .map_err(AppError::internal)?)
}

async fn delete_file(
    State(state): State<SharedState>,
    Path(uid): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    state.auth.check(&headers)?;
    state.backend.delete(&uid).await?;
    Ok(StatusCode::NO_CONTENT)
}
