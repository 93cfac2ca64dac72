//! The job result contract.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A successfully rendered video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobSuccess {
    pub filename: String,
    pub video_url: String,
    /// Audit token for the audio track used, `null` when no track was overlaid.
    #[serde(default)]
    pub randomization: Option<String>,
    /// Wall-clock seconds for the whole pipeline.
    pub processing_time: f64,
}

/// A failed job with a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobFailure {
    pub error: String,
}

/// Exactly one of the two shapes is produced per job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum JobResult {
    Success(JobSuccess),
    Failure(JobFailure),
}

impl JobResult {
    pub fn failure(error: impl Into<String>) -> Self {
        JobResult::Failure(JobFailure { error: error.into() })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            JobResult::Failure(f) => Some(&f.error),
            JobResult::Success(_) => None,
        }
    }

    pub fn success(&self) -> Option<&JobSuccess> {
        match self {
            JobResult::Success(s) => Some(s),
            JobResult::Failure(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_shape() {
        let result = JobResult::Success(JobSuccess {
            filename: "vgen_a.mp4".into(),
            video_url: "https://cdn/videos/vgen_a.mp4".into(),
            randomization: None,
            processing_time: 1.5,
        });
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({
                "filename": "vgen_a.mp4",
                "video_url": "https://cdn/videos/vgen_a.mp4",
                "randomization": null,
                "processing_time": 1.5
            })
        );
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_failure_shape() {
        let value = serde_json::to_value(JobResult::failure("boom")).unwrap();
        assert_eq!(value, json!({"error": "boom"}));
    }

    #[test]
    fn test_untagged_deserialize() {
        let failure: JobResult = serde_json::from_value(json!({"error": "x"})).unwrap();
        assert_eq!(failure.error(), Some("x"));

        let success: JobResult = serde_json::from_value(json!({
            "filename": "f.mp4",
            "video_url": "u",
            "processing_time": 2.0
        }))
        .unwrap();
        assert!(success.is_success());
        assert_eq!(success.success().unwrap().randomization, None);
    }
}
