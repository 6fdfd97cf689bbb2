//! Ambient, ungated endpoints: the tus-PUT signature probe (§6) and a liveness check.

use axum::{
    routing::{
        get,
        put,
    },
    Json,
    Router,
};
use serde::Serialize;

use crate::state::SharedState;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const VERIFIER: &str = "tus-storage-server";
const COMPATIBLE_VERSIONS: &[&str] = &["1.0.0"];

#[derive(Serialize)]
struct SignatureBody {
    version: &'static str,
    verifier: &'static str,
    compatible_versions: &'static [&'static str],
}

async fn signature() -> Json<SignatureBody> {
    Json(SignatureBody { version: VERSION, verifier: VERIFIER, compatible_versions: COMPATIBLE_VERSIONS })
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

async fn healthz() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

pub fn router() -> Router<SharedState> {
    Router::new().route("/signature", put(signature)).route("/healthz", get(healthz))
}
