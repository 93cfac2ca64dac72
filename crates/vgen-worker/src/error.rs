//! Worker error types.
//!
//! Display strings carry a kind prefix so automation reading `{error}` can tell
//! input problems from inference, audio selection, and encoding failures.

use std::time::Duration;
use thiserror::Error;

use vgen_catalog::CatalogError;
use vgen_media::MediaError;
use vgen_models::RequestError;
use vgen_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Audio selection failed: {0}")]
    AssetSelection(String),

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Storage failed: {0}")]
    Storage(String),

    #[error("Job timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("{0}")]
    Upstream(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Code bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkerError {
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    pub fn asset_selection(msg: impl Into<String>) -> Self {
        Self::AssetSelection(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn bootstrap(msg: impl Into<String>) -> Self {
        Self::Bootstrap(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::Input(_) => "input",
            WorkerError::Inference(_) => "inference",
            WorkerError::AssetSelection(_) => "asset_selection",
            WorkerError::Encode(_) => "encode",
            WorkerError::Storage(_) => "storage",
            WorkerError::Timeout(_) => "timeout",
            WorkerError::Upstream(_) => "upstream",
            WorkerError::Config(_) => "config",
            WorkerError::Bootstrap(_) => "bootstrap",
            WorkerError::Internal(_) => "internal",
        }
    }
}

impl From<MediaError> for WorkerError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Inference(msg) => WorkerError::Inference(msg),
            MediaError::ModelNotFound(path) => {
                WorkerError::Inference(format!("model not found: {}", path))
            }
            MediaError::Encode { .. } | MediaError::HardwareUnavailable(_) => {
                WorkerError::Encode(err.to_string())
            }
            MediaError::Timeout(secs) => WorkerError::Timeout(Duration::from_secs(secs)),
            MediaError::DownloadFailed { .. }
            | MediaError::FileNotFound(_)
            | MediaError::InvalidVideo(_)
            | MediaError::InvalidInput(_)
            | MediaError::UnsupportedFormat(_)
            | MediaError::SecurityViolation(_)
            | MediaError::ResourceLimit(_)
            | MediaError::FfprobeFailed { .. } => WorkerError::Input(err.to_string()),
            other => WorkerError::Internal(other.detailed()),
        }
    }
}

impl From<CatalogError> for WorkerError {
    fn from(err: CatalogError) -> Self {
        WorkerError::AssetSelection(err.to_string())
    }
}

impl From<StorageError> for WorkerError {
    fn from(err: StorageError) -> Self {
        WorkerError::Storage(err.to_string())
    }
}

impl From<RequestError> for WorkerError {
    fn from(err: RequestError) -> Self {
        WorkerError::Input(err.to_string())
    }
}

impl From<std::io::Error> for WorkerError {
    fn from(err: std::io::Error) -> Self {
        WorkerError::Internal(err.to_string())
    }
}
