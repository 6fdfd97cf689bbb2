//! Top-level route assembly: mounts the tus engine under `tus.prefix`, the management API
//! under `api.prefix`, and the ambient probes, then layers CORS and request tracing the way
//! the teacher's `crates/local_backend/src/router.rs::router`/`cors` do.

use std::time::Duration;

use axum::{
    http::{
        HeaderName,
        HeaderValue,
        Method,
    },
    Router,
};
use tower_http::{
    cors::{
        AllowHeaders,
        AllowOrigin,
        CorsLayer,
    },
    trace::TraceLayer,
};

use crate::{
    config::ApiConfig,
    management,
    probes,
    state::SharedState,
    tus,
};

pub fn router(state: SharedState) -> Router {
    let tus_prefix = format!("/{}", state.config.tus.prefix.trim_matches('/'));
    let api_prefix = format!("/{}", state.config.api.prefix.trim_matches('/'));
    let cors = cors(&state.config.api);

    Router::new()
        .nest(&tus_prefix, tus::router())
        .nest(&api_prefix, management::router())
        .merge(probes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors(config: &ApiConfig) -> CorsLayer {
    let origin = if config.cors_origins.is_empty() {
        AllowOrigin::any()
    } else {
        let values: Vec<HeaderValue> = config.cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(values)
    };
    let headers = if config.cors_headers.is_empty() {
        AllowHeaders::mirror_request()
    } else {
        let values: Vec<HeaderName> = config.cors_headers.iter().filter_map(|h| h.parse().ok()).collect();
        AllowHeaders::list(values)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_headers(headers)
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::HEAD,
            Method::OPTIONS,
            Method::PATCH,
            Method::DELETE,
            Method::PUT,
        ])
        .max_age(Duration::from_secs(86_400))
}
