//! The tus 1.0.0 protocol engine: route table plus the state machine in §4.C, mounted under
//! the configurable `tus.prefix` (default `files`).

pub mod handlers;
pub mod headers;

use axum::{
    routing::{
        get,
        options,
    },
    Router,
};

use crate::state::SharedState;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", options(handlers::options_root).post(handlers::create_upload))
        .route(
            "/{uid}",
            get(handlers::download_upload)
                .head(handlers::head_upload)
                .patch(handlers::patch_upload)
                .delete(handlers::delete_upload)
                .options(handlers::options_upload),
        )
}
