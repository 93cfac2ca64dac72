//! Worker configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;
use vgen_models::EncoderMode;

use crate::error::{WorkerError, WorkerResult};

/// Where the processing code and model assets come from.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapConfig {
    /// Git remote to sync from
    pub repo_url: String,
    /// Branch to track
    pub branch: String,
    /// Local checkout directory
    pub code_dir: PathBuf,
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub bootstrap: BootstrapConfig,
    /// HTTP bind host
    pub host: String,
    /// HTTP bind port
    pub port: u16,
    /// Per-job scratch directories are created here
    pub work_dir: PathBuf,
    /// Overall job deadline; a job may ask for less
    pub job_timeout: Duration,
    /// Maximum bytes for downloaded or inline sources
    pub max_file_size: u64,
    pub download_timeout: Duration,
    /// Directory that path sources may read from
    pub input_dir: Option<PathBuf>,
    /// ONNX segmentation model
    pub model_path: PathBuf,
    pub model_input_size: u32,
    pub encoder_mode: EncoderMode,
    /// Probe the encoded file and fail when its frame count differs
    pub verify_frames: bool,
    /// PostgreSQL catalog; takes precedence over `catalog_file`
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Static JSON catalog
    pub catalog_file: Option<PathBuf>,
    /// Upload artifacts to R2 instead of the local output directory
    pub r2_enabled: bool,
    pub output_dir: PathBuf,
    /// Base URL for locally stored artifacts
    pub public_base_url: Option<String>,
    /// Default object-key folder
    pub output_folder: String,
    pub metrics_enabled: bool,
    /// Maximum HTTP request body
    pub max_body_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bootstrap: BootstrapConfig {
                repo_url: String::new(),
                branch: "main".to_string(),
                code_dir: PathBuf::from("/app/code"),
            },
            host: "0.0.0.0".to_string(),
            port: 8000,
            work_dir: PathBuf::from("/tmp/vgen"),
            job_timeout: Duration::from_secs(600),
            max_file_size: 100 * 1024 * 1024,
            download_timeout: Duration::from_secs(300),
            input_dir: None,
            model_path: PathBuf::from("models/birefnet-general.onnx"),
            model_input_size: 1024,
            encoder_mode: EncoderMode::Auto,
            verify_frames: true,
            database_url: None,
            database_max_connections: 5,
            catalog_file: None,
            r2_enabled: false,
            output_dir: PathBuf::from("/tmp/vgen/output"),
            public_base_url: None,
            output_folder: "videos".to_string(),
            metrics_enabled: true,
            // base64 inflates a 100 MiB inline source to ~134 MiB
            max_body_size: 160 * 1024 * 1024,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    ///
    /// Fails when `CODE_REPO_URL` is missing, `ENCODER_MODE` is unknown, or a timeout is zero.
    pub fn from_env() -> WorkerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> WorkerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let repo_url = var("CODE_REPO_URL")
            .ok_or_else(|| WorkerError::config_error("CODE_REPO_URL must be set"))?;

        let code_dir = var("CODE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.bootstrap.code_dir);

        let encoder_mode = match var("ENCODER_MODE") {
            Some(mode) => mode.parse().map_err(WorkerError::config_error)?,
            None => defaults.encoder_mode,
        };

        let model_path = resolve_against(
            &code_dir,
            var("SEGMENTATION_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),
        );

        Ok(Self {
            bootstrap: BootstrapConfig {
                repo_url,
                branch: var("CODE_BRANCH").unwrap_or(defaults.bootstrap.branch),
                code_dir,
            },
            host: var("WORKER_HOST").unwrap_or(defaults.host),
            port: parse_or(&var, "PORT", defaults.port),
            work_dir: var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            job_timeout: seconds(&var, "WORKER_JOB_TIMEOUT", defaults.job_timeout)?,
            max_file_size: parse_or(&var, "MAX_FILE_SIZE", defaults.max_file_size),
            download_timeout: seconds(&var, "DOWNLOAD_TIMEOUT", defaults.download_timeout)?,
            input_dir: var("INPUT_DIR").map(PathBuf::from),
            model_path,
            model_input_size: parse_or(&var, "SEGMENTATION_INPUT_SIZE", defaults.model_input_size),
            encoder_mode,
            verify_frames: flag(&var, "ENCODER_VERIFY_FRAMES", defaults.verify_frames),
            database_url: var("DATABASE_URL"),
            database_max_connections: parse_or(
                &var,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            catalog_file: var("CATALOG_FILE").map(PathBuf::from),
            r2_enabled: flag(&var, "R2_ENABLED", defaults.r2_enabled),
            output_dir: var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            public_base_url: var("PUBLIC_BASE_URL"),
            output_folder: var("OUTPUT_FOLDER").unwrap_or(defaults.output_folder),
            metrics_enabled: flag(&var, "METRICS_ENABLED", defaults.metrics_enabled),
            max_body_size: parse_or(&var, "MAX_BODY_SIZE", defaults.max_body_size),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse `key`, keeping `default` (with a warning) when the value is malformed.
fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match var(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, default = ?default, "Ignoring malformed setting");
            default
        }),
        None => default,
    }
}

fn flag(var: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match var(key) {
        Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
            warn!(key, value = %raw, default, "Ignoring malformed boolean setting");
            default
        }),
        None => default,
    }
}

/// A whole number of seconds, at least one.
fn seconds(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> WorkerResult<Duration> {
    match parse_or(var, key, default.as_secs()) {
        0 => Err(WorkerError::config_error(format!("{} must be at least 1 second", key))),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn resolve_against(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
