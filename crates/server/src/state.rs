//! Shared application state threaded through every router via axum's `State` extractor,
//! mirroring the teacher's `RouterState` (`crates/local_backend/src/lib.rs`).

use std::sync::Arc;

use scratch::LockTable;
use storage::Backend;

use crate::{
    auth::AuthGate,
    config::Config,
};

pub struct AppState {
    pub scratch: scratch::ScratchStore,
    pub locks: Arc<LockTable>,
    pub backend: Backend,
    pub config: Arc<Config>,
    pub auth: AuthGate,
}

pub type SharedState = Arc<AppState>;
