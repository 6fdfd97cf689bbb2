//! Logging setup, driven by `logging.level` / `logging.format` (§6). `tracing` +
//! `tracing-subscriber` in the teacher's own idiom (`crates/local_backend`'s
//! `tracing-subscriber` init), scaled down from the teacher's sentry/appender-backed
//! version since neither applies here.

use tracing_subscriber::{
    fmt,
    EnvFilter,
};

use crate::config::LoggingConfig;

pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_tracing_level().to_string()));

    let subscriber = fmt().with_env_filter(filter);
    if config.format.eq_ignore_ascii_case("json") {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
