//! End-to-end coverage of the scenarios in §8: happy path, resume, offset conflict,
//! oversize, deferred length, termination. Drives the real router with `tower::ServiceExt`,
//! the same style as the teacher's `router.rs` tests.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{
        Request,
        StatusCode,
    },
};
use http_body_util::BodyExt;
use scratch::{
    LockTable,
    ScratchStore,
};
use storage::{
    Backend,
    LocalBackend,
};
use tower::ServiceExt;
use tus_storage_server::{
    auth::AuthGate,
    config::{
        ApiConfig,
        Config,
        LocalStorageConfig,
        LoggingConfig,
        S3StorageConfig,
        StorageType,
        TusConfig,
    },
    router,
    state::AppState,
};

struct TestApp {
    router: axum::Router,
    _scratch_dir: tempfile::TempDir,
    _backend_dir: tempfile::TempDir,
}

async fn test_app(max_size: u64) -> TestApp {
    let scratch_dir = tempfile::tempdir().unwrap();
    let backend_dir = tempfile::tempdir().unwrap();
    let scratch = ScratchStore::new(scratch_dir.path().to_owned()).await.unwrap();
    let backend = Backend::Local(LocalBackend::new(backend_dir.path().to_owned()).await.unwrap());
    let config = Config {
        app_name: "test".to_owned(),
        debug: true,
        bind_address: "127.0.0.1:0".to_owned(),
        storage_type: StorageType::Local,
        local_storage: LocalStorageConfig { base_path: backend_dir.path().to_owned() },
        s3_storage: S3StorageConfig::default(),
        tus: TusConfig {
            max_size,
            expiration_period: 86_400,
            files_dir: scratch_dir.path().to_owned(),
            prefix: "files".to_owned(),
        },
        api: ApiConfig::default(),
        logging: LoggingConfig::default(),
    };
    let state = Arc::new(AppState {
        scratch,
        locks: Arc::new(LockTable::new()),
        backend,
        config: Arc::new(config),
        auth: AuthGate::allow_all(),
    });
    TestApp { router: router::router(state), _scratch_dir: scratch_dir, _backend_dir: backend_dir }
}

fn header<'a>(resp: &'a axum::http::Response<Body>, name: &str) -> &'a str {
    resp.headers().get(name).unwrap().to_str().unwrap()
}

async fn body_bytes(resp: axum::http::Response<Body>) -> bytes::Bytes {
    resp.into_body().collect().await.unwrap().to_bytes()
}

fn location_uid(location: &str) -> String {
    location.rsplit('/').next().unwrap().to_owned()
}

#[tokio::test]
async fn happy_path_small_file() {
    let app = test_app(1 << 20).await;

    let create = Request::builder()
        .method("POST")
        .uri("/files/")
        .header("Upload-Length", "11")
        .header("Upload-Metadata", "filename dGVzdC50eHQ=")
        .body(Body::empty())
        .unwrap();
    let resp = app.router.clone().oneshot(create).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let uid = location_uid(header(&resp, "location"));

    let patch = Request::builder()
        .method("PATCH")
        .uri(format!("/files/{uid}"))
        .header("Content-Type", "application/offset+octet-stream")
        .header("Upload-Offset", "0")
        .body(Body::from("hello world"))
        .unwrap();
    let resp = app.router.clone().oneshot(patch).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&resp, "upload-offset"), "11");

    let head = Request::builder().method("HEAD").uri(format!("/files/{uid}")).body(Body::empty()).unwrap();
    let resp = app.router.clone().oneshot(head).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "upload-offset"), "11");
    assert_eq!(header(&resp, "upload-length"), "11");

    let get = Request::builder().method("GET").uri(format!("/api/{uid}")).body(Body::empty()).unwrap();
    let resp = app.router.clone().oneshot(get).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_bytes(resp).await.as_ref(), b"hello world");
}

#[tokio::test]
async fn resume_with_correct_offset() {
    let app = test_app(1 << 20).await;

    let create = Request::builder().method("POST").uri("/files/").header("Upload-Length", "11").body(Body::empty()).unwrap();
    let resp = app.router.clone().oneshot(create).await.unwrap();
    let uid = location_uid(header(&resp, "location"));

    let patch1 = Request::builder()
        .method("PATCH")
        .uri(format!("/files/{uid}"))
        .header("Content-Type", "application/offset+octet-stream")
        .header("Upload-Offset", "0")
        .body(Body::from("hello "))
        .unwrap();
    let resp = app.router.clone().oneshot(patch1).await.unwrap();
    assert_eq!(header(&resp, "upload-offset"), "6");

    let head = Request::builder().method("HEAD").uri(format!("/files/{uid}")).body(Body::empty()).unwrap();
    let resp = app.router.clone().oneshot(head).await.unwrap();
    assert_eq!(header(&resp, "upload-offset"), "6");

    let patch2 = Request::builder()
        .method("PATCH")
        .uri(format!("/files/{uid}"))
        .header("Content-Type", "application/offset+octet-stream")
        .header("Upload-Offset", "6")
        .body(Body::from("world"))
        .unwrap();
    let resp = app.router.clone().oneshot(patch2).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&resp, "upload-offset"), "11");
}

#[tokio::test]
async fn replayed_patch_is_rejected_with_offset_conflict() {
    let app = test_app(1 << 20).await;

    let create = Request::builder().method("POST").uri("/files/").header("Upload-Length", "11").body(Body::empty()).unwrap();
    let resp = app.router.clone().oneshot(create).await.unwrap();
    let uid = location_uid(header(&resp, "location"));

    let patch = |offset: &'static str, body: &'static str| {
        Request::builder()
            .method("PATCH")
            .uri(format!("/files/{uid}"))
            .header("Content-Type", "application/offset+octet-stream")
            .header("Upload-Offset", offset)
            .body(Body::from(body))
            .unwrap()
    };

    let resp = app.router.clone().oneshot(patch("0", "hello world")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = app.router.clone().oneshot(patch("0", "hello world")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let head = Request::builder().method("HEAD").uri(format!("/files/{uid}")).body(Body::empty()).unwrap();
    let resp = app.router.clone().oneshot(head).await.unwrap();
    assert_eq!(header(&resp, "upload-offset"), "11");
}

#[tokio::test]
async fn oversize_upload_length_rejected_at_creation() {
    let app = test_app(100).await;

    let create = Request::builder().method("POST").uri("/files/").header("Upload-Length", "200").body(Body::empty()).unwrap();
    let resp = app.router.clone().oneshot(create).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn oversize_patch_is_truncated_to_max_size() {
    let app = test_app(100).await;

    let create = Request::builder().method("POST").uri("/files/").header("Upload-Length", "100").body(Body::empty()).unwrap();
    let resp = app.router.clone().oneshot(create).await.unwrap();
    let uid = location_uid(header(&resp, "location"));

    let payload = vec![b'x'; 150];
    let patch = Request::builder()
        .method("PATCH")
        .uri(format!("/files/{uid}"))
        .header("Content-Type", "application/offset+octet-stream")
        .header("Upload-Offset", "0")
        .body(Body::from(payload))
        .unwrap();
    let resp = app.router.clone().oneshot(patch).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(header(&resp, "upload-offset"), "100");

    let head = Request::builder().method("HEAD").uri(format!("/files/{uid}")).body(Body::empty()).unwrap();
    let resp = app.router.clone().oneshot(head).await.unwrap();
    assert_eq!(header(&resp, "upload-offset"), "100");
}

#[tokio::test]
async fn deferred_length_completes_on_later_upload_length_header() {
    let app = test_app(1 << 20).await;

    let create = Request::builder().method("POST").uri("/files/").header("Upload-Defer-Length", "1").body(Body::empty()).unwrap();
    let resp = app.router.clone().oneshot(create).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let uid = location_uid(header(&resp, "location"));

    let patch1 = Request::builder()
        .method("PATCH")
        .uri(format!("/files/{uid}"))
        .header("Content-Type", "application/offset+octet-stream")
        .header("Upload-Offset", "0")
        .body(Body::from(vec![b'a'; 50]))
        .unwrap();
    let resp = app.router.clone().oneshot(patch1).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&resp, "upload-offset"), "50");

    let head = Request::builder().method("HEAD").uri(format!("/files/{uid}")).body(Body::empty()).unwrap();
    let resp = app.router.clone().oneshot(head).await.unwrap();
    assert_eq!(header(&resp, "upload-length"), "");

    // Declares the final length equal to the current offset; completes without more bytes.
    let patch2 = Request::builder()
        .method("PATCH")
        .uri(format!("/files/{uid}"))
        .header("Content-Type", "application/offset+octet-stream")
        .header("Upload-Offset", "50")
        .header("Upload-Length", "50")
        .body(Body::empty())
        .unwrap();
    let resp = app.router.clone().oneshot(patch2).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let get = Request::builder().method("GET").uri(format!("/api/{uid}")).body(Body::empty()).unwrap();
    let resp = app.router.clone().oneshot(get).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_bytes(resp).await.len(), 50);
}

#[tokio::test]
async fn delete_terminates_upload() {
    let app = test_app(1 << 20).await;

    let create = Request::builder().method("POST").uri("/files/").header("Upload-Length", "11").body(Body::empty()).unwrap();
    let resp = app.router.clone().oneshot(create).await.unwrap();
    let uid = location_uid(header(&resp, "location"));

    let patch = Request::builder()
        .method("PATCH")
        .uri(format!("/files/{uid}"))
        .header("Content-Type", "application/offset+octet-stream")
        .header("Upload-Offset", "0")
        .body(Body::from("hello "))
        .unwrap();
    app.router.clone().oneshot(patch).await.unwrap();

    let delete = Request::builder().method("DELETE").uri(format!("/files/{uid}")).body(Body::empty()).unwrap();
    let resp = app.router.clone().oneshot(delete).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let head = Request::builder().method("HEAD").uri(format!("/files/{uid}")).body(Body::empty()).unwrap();
    let resp = app.router.clone().oneshot(head).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn creation_with_upload_drains_body_immediately() {
    let app = test_app(1 << 20).await;

    let create = Request::builder()
        .method("POST")
        .uri("/files/")
        .header("Upload-Length", "11")
        .header("Content-Type", "application/offset+octet-stream")
        .body(Body::from("hello world"))
        .unwrap();
    let resp = app.router.clone().oneshot(create).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let uid = location_uid(header(&resp, "location"));

    let get = Request::builder().method("GET").uri(format!("/api/{uid}")).body(Body::empty()).unwrap();
    let resp = app.router.clone().oneshot(get).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_bytes(resp).await.as_ref(), b"hello world");
}
