//! Contracts with the calling workflow engine.
//!
//! The worker's `/run` response (and the serverless platform's status envelope around it)
//! is an [`UpstreamPayload`]. The post-processing step turns that payload into a
//! [`WorkflowOutput`]: either `{error}` or a one-element list of [`JobSuccess`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::result::{JobFailure, JobResult, JobSuccess};

/// Used when an upstream failure carries neither `error` nor `message`.
pub const UNKNOWN_UPSTREAM_ERROR: &str = "Unknown upstream error";

/// Video block of a successful upstream payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UpstreamVideo {
    pub filename: String,
    pub download_url: String,
    /// Usually a string token; other JSON scalars are stringified.
    #[serde(default)]
    pub randomization: Option<Value>,
}

/// Payload as seen by the workflow engine.
///
/// Fields are all optional because the engine may see the worker's own response, the
/// platform envelope `{status, output: {...}}`, or a failure produced before the worker ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UpstreamPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<UpstreamVideo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    /// Nested handler output inside a platform envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Box<UpstreamPayload>>,
}

/// Interpretation of an [`UpstreamPayload`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamOutcome {
    Failed { error: String },
    Completed(JobSuccess),
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn randomization_text(value: Option<Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    }
}

impl UpstreamPayload {
    pub fn signals_error(&self) -> bool {
        self.status
            .as_deref()
            .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "error" | "failed"))
            .unwrap_or(false)
    }

    /// Error text with the explicit `error` field taking precedence over `message`.
    fn error_text(&self) -> String {
        non_empty(&self.error)
            .or_else(|| non_empty(&self.message))
            .unwrap_or(UNKNOWN_UPSTREAM_ERROR)
            .to_string()
    }

    /// Classify the payload.
    ///
    /// 1. An error status fails with `error`, else `message`, else a generic text.
    /// 2. A video block succeeds.
    /// 3. A nested `output` is classified recursively.
    /// 4. Anything else fails with the same `error`/`message` precedence.
    pub fn outcome(self) -> UpstreamOutcome {
        if self.signals_error() {
            return UpstreamOutcome::Failed {
                error: self.error_text(),
            };
        }
        if let Some(video) = self.video {
            return UpstreamOutcome::Completed(JobSuccess {
                filename: video.filename,
                video_url: video.download_url,
                randomization: randomization_text(video.randomization),
                processing_time: self.processing_time.unwrap_or(0.0),
            });
        }
        if let Some(inner) = self.output {
            return inner.outcome();
        }
        if non_empty(&self.error).is_none() && non_empty(&self.message).is_none() {
            return UpstreamOutcome::Failed {
                error: "upstream payload has no video".to_string(),
            };
        }
        UpstreamOutcome::Failed {
            error: self.error_text(),
        }
    }

    pub fn into_workflow_output(self) -> WorkflowOutput {
        match self.outcome() {
            UpstreamOutcome::Failed { error } => WorkflowOutput::Failure(JobFailure { error }),
            UpstreamOutcome::Completed(success) => WorkflowOutput::Items(vec![success]),
        }
    }
}

impl From<&JobResult> for UpstreamPayload {
    fn from(result: &JobResult) -> Self {
        match result {
            JobResult::Success(s) => UpstreamPayload {
                status: Some("success".to_string()),
                message: Some("Video generated successfully".to_string()),
                video: Some(UpstreamVideo {
                    filename: s.filename.clone(),
                    download_url: s.video_url.clone(),
                    randomization: s.randomization.clone().map(Value::String),
                }),
                processing_time: Some(s.processing_time),
                ..Default::default()
            },
            JobResult::Failure(f) => UpstreamPayload {
                status: Some("error".to_string()),
                error: Some(f.error.clone()),
                ..Default::default()
            },
        }
    }
}

/// Output handed back to the workflow engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum WorkflowOutput {
    Failure(JobFailure),
    Items(Vec<JobSuccess>),
}
