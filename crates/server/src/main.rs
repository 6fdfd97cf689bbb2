use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use scratch::{
    LockTable,
    ScratchStore,
};
use storage::{
    Backend,
    LocalBackend,
    S3Backend,
    S3Config,
};
use tus_storage_server::{
    auth::AuthGate,
    config::{
        Cli,
        Config,
        StorageType,
    },
    expiry,
    logging,
    router,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config).context("loading configuration")?;
    logging::init(&config.logging);
    tracing::info!(app_name = %config.app_name, storage_type = ?config.storage_type, "starting tus-storage-server");

    let backend = match config.storage_type {
        StorageType::Local => {
            Backend::Local(LocalBackend::new(config.local_storage.base_path.clone()).await.context("opening local storage")?)
        },
        StorageType::S3 => Backend::S3(
            S3Backend::new(S3Config {
                bucket_name: config.s3_storage.bucket_name.clone(),
                endpoint_url: config.s3_storage.endpoint_url.clone(),
                region_name: config.s3_storage.region_name.clone(),
                access_key_id: config.s3_storage.access_key_id.clone(),
                secret_access_key: config.s3_storage.secret_access_key.clone(),
            })
            .await
            .context("connecting to S3 storage")?,
        ),
    };

    let scratch = ScratchStore::new(config.tus.files_dir.clone()).await.context("opening scratch store")?;
    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState {
        scratch,
        locks: Arc::new(LockTable::new()),
        backend,
        config: Arc::new(config),
        auth: AuthGate::allow_all(),
    });

    tokio::spawn(expiry::run(state.clone()));

    let app = router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_address).await.context("binding listener")?;
    tracing::info!(bind_address, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received Ctrl-C, shutting down"),
        Err(e) => tracing::error!(error = %e, "failed to install Ctrl-C handler"),
    }
}
