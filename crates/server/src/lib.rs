//! tus 1.0.0 resumable-upload server: protocol engine, completion pipeline, and management
//! API over a pluggable local/S3 storage backend.

pub mod auth;
pub mod completion;
pub mod config;
pub mod error;
pub mod expiry;
pub mod logging;
pub mod management;
pub mod probes;
pub mod router;
pub mod state;
pub mod tus;
