//! Authentication is out of scope for the core (§1); it is modelled here as an opaque
//! predicate invoked before each protected operation so the tus engine and management API
//! don't need to know how identity is actually established.

use std::sync::Arc;

use axum::http::HeaderMap;

use crate::error::AppError;

#[derive(Clone)]
pub struct AuthGate(Arc<dyn Fn(&HeaderMap) -> bool + Send + Sync>);

impl AuthGate {
    pub fn new(predicate: impl Fn(&HeaderMap) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    /// The default: every request is authorized. A real deployment supplies its own
    /// predicate (API key header check, session cookie, ...) at wiring time.
    pub fn allow_all() -> Self {
        Self::new(|_| true)
    }

    pub fn check(&self, headers: &HeaderMap) -> Result<(), AppError> {
        if (self.0)(headers) {
            Ok(())
        } else {
            Err(AppError::AuthDenied)
        }
    }
}
