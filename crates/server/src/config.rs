//! Configuration: a `clap` CLI surface for the one real knob (which TOML file to load),
//! mirroring the teacher's `LocalConfig: clap::Parser`, with the document itself following
//! the field set fixed by the spec (§6).

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Clone, Debug)]
#[command(version, about = "Resumable (tus) upload server")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    pub config: PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub app_name: String,
    #[serde(default)]
    pub debug: bool,
    /// Not enumerated by name in the spec's option table, but a server needs somewhere to
    /// listen; supplemented the same way as `tus.prefix`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    pub storage_type: StorageType,
    #[serde(default)]
    pub local_storage: LocalStorageConfig,
    #[serde(default)]
    pub s3_storage: S3StorageConfig,
    #[serde(default)]
    pub tus: TusConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
        Ok(config)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Local,
    S3,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LocalStorageConfig {
    #[serde(default = "default_local_base_path")]
    pub base_path: PathBuf,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self { base_path: default_local_base_path() }
    }
}

fn default_local_base_path() -> PathBuf {
    PathBuf::from("storage")
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_owned()
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct S3StorageConfig {
    #[serde(default)]
    pub bucket_name: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_region")]
    pub region_name: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

#[derive(Clone, Debug, Deserialize)]
pub struct TusConfig {
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    #[serde(default = "default_expiration_period")]
    pub expiration_period: u64,
    #[serde(default = "default_files_dir")]
    pub files_dir: PathBuf,
    /// Route prefix the tus surface is mounted under (not enumerated by name in the spec's
    /// option table, but §4.C calls it out as "configurable {prefix} (default files)").
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for TusConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            expiration_period: default_expiration_period(),
            files_dir: default_files_dir(),
            prefix: default_prefix(),
        }
    }
}

fn default_max_size() -> u64 {
    1 << 30 // 1 GiB
}

fn default_expiration_period() -> u64 {
    86_400
}

fn default_files_dir() -> PathBuf {
    PathBuf::from("scratch")
}

fn default_prefix() -> String {
    "files".to_owned()
}

impl TusConfig {
    /// The expiration sweep runs at most every `expiration_period / 10`, hourly by default
    /// (§4.C).
    pub fn sweep_interval(&self) -> std::time::Duration {
        let tenth = self.expiration_period / 10;
        std::time::Duration::from_secs(tenth.clamp(1, 3600))
    }

    /// Seconds a descriptor lives before the expiration sweep reclaims it, matching
    /// `sweep_interval`'s own second-granularity handling of `expiration_period`.
    pub fn ttl_seconds(&self) -> i64 {
        self.expiration_period as i64
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default)]
    pub cors_headers: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            prefix: default_api_prefix(),
            cors_origins: vec![],
            cors_headers: vec![],
        }
    }
}

fn default_api_prefix() -> String {
    "/api".to_owned()
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warning => tracing::Level::WARN,
            LogLevel::Error | LogLevel::Critical => tracing::Level::ERROR,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: LogLevel::default(), format: default_log_format() }
    }
}

fn default_log_format() -> String {
    "text".to_owned()
}
