//! Job request definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::encoding::OutputFormat;
use crate::track::TrackFilter;

/// Default background colour used when the caller asks for neither a colour nor transparency.
pub const DEFAULT_BACKGROUND: [u8; 3] = [255, 255, 255];

/// Default object-key folder for produced artifacts.
pub const DEFAULT_FOLDER: &str = "videos";

/// Caller-supplied correlation token identifying a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// Generate a new random correlation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe form of the token.
    ///
    /// Characters outside `[A-Za-z0-9_-]` become `_` and the result is capped at 48 chars.
    /// A short digest of the raw token is appended so two tokens that sanitize to the same
    /// text still produce different stems.
    pub fn file_stem(&self) -> String {
        let mut sanitized: String = self
            .0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .take(48)
            .collect();
        if sanitized.is_empty() {
            sanitized.push_str("job");
        }
        format!("{}_{}", sanitized, short_digest(&self.0))
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// First 8 hex chars of the SHA-256 of `input`.
pub fn short_digest(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest[..4].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Where the job's source media comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum MediaSource {
    /// An `http(s)://` URL or a path relative to the worker's input directory.
    Reference(String),
    /// Base64-encoded bytes carried in the request.
    Inline {
        inline: String,
        /// File extension hint (`mp4`, `mov`, `png`...).
        #[serde(default)]
        format: Option<String>,
    },
}

impl MediaSource {
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            MediaSource::Reference(r) if r.starts_with("http://") || r.starts_with("https://")
        )
    }

    /// Short description for logs; never includes inline payloads.
    pub fn describe(&self) -> String {
        match self {
            MediaSource::Reference(r) => r.clone(),
            MediaSource::Inline { inline, format } => format!(
                "inline({} b64 chars, format={})",
                inline.len(),
                format.as_deref().unwrap_or("unknown")
            ),
        }
    }
}

/// How the job treats audio overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    /// No audio track; the selector is never consulted.
    Disabled,
    /// Overlay if a track is available; otherwise produce a silent video.
    Optional,
    /// No track means the job fails.
    Required,
}

/// What the segmented foreground is composited onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Background {
    Color([u8; 3]),
    Transparent,
}

/// Processing options carried alongside the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[validate(schema(function = "validate_options"))]
pub struct ProcessingOptions {
    /// Overlay a randomly selected catalog track.
    #[serde(default)]
    pub overlay_audio: bool,

    /// Fail the job if no track can be used. Requires `overlay_audio`.
    #[serde(default)]
    pub audio_required: bool,

    /// Restrict selection to a subset of the catalog.
    #[serde(default)]
    #[validate(nested)]
    pub audio_filter: Option<TrackFilter>,

    /// Seed for reproducible selection. Random when absent.
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default)]
    pub output_format: OutputFormat,

    /// Solid background colour `[r, g, b]`.
    #[serde(default)]
    pub bgcolor: Option<[u8; 3]>,

    /// Keep the background transparent (webm only).
    #[serde(default)]
    pub transparent_background: bool,

    /// Binarise and soften the matte before compositing.
    #[serde(default = "default_true")]
    pub post_process_mask: bool,

    /// Keep every n-th decoded frame.
    #[serde(default = "default_frame_step")]
    #[validate(range(min = 1, max = 30))]
    pub frame_step: u32,

    /// Upper bound on frames processed.
    #[serde(default)]
    #[validate(range(min = 1))]
    pub max_frames: Option<u32>,

    /// Object-key folder for the artifact.
    #[serde(default = "default_folder")]
    #[validate(length(min = 1, max = 64), custom(function = "validate_folder"))]
    pub folder: String,

    /// Job deadline; the worker's own deadline still applies if shorter.
    #[serde(default)]
    #[validate(range(min = 1, max = 3600))]
    pub timeout_seconds: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_frame_step() -> u32 {
    1
}

fn default_folder() -> String {
    DEFAULT_FOLDER.to_string()
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            overlay_audio: false,
            audio_required: false,
            audio_filter: None,
            seed: None,
            output_format: OutputFormat::default(),
            bgcolor: None,
            transparent_background: false,
            post_process_mask: true,
            frame_step: 1,
            max_frames: None,
            folder: default_folder(),
            timeout_seconds: None,
        }
    }
}

impl ProcessingOptions {
    pub fn audio_mode(&self) -> AudioMode {
        match (self.overlay_audio, self.audio_required) {
            (false, _) => AudioMode::Disabled,
            (true, false) => AudioMode::Optional,
            (true, true) => AudioMode::Required,
        }
    }

    pub fn background(&self) -> Background {
        if self.transparent_background {
            Background::Transparent
        } else {
            Background::Color(self.bgcolor.unwrap_or(DEFAULT_BACKGROUND))
        }
    }
}

fn validate_options(options: &ProcessingOptions) -> Result<(), ValidationError> {
    if options.audio_required && !options.overlay_audio {
        return Err(ValidationError::new("audio_required")
            .with_message("audio_required needs overlay_audio".into()));
    }
    if options.transparent_background {
        if !options.output_format.supports_alpha() {
            return Err(ValidationError::new("transparent_background").with_message(
                format!(
                    "transparent background is not supported for {}",
                    options.output_format
                )
                .into(),
            ));
        }
        if options.bgcolor.is_some() {
            return Err(ValidationError::new("bgcolor")
                .with_message("bgcolor conflicts with transparent_background".into()));
        }
    }
    Ok(())
}

fn validate_folder(folder: &str) -> Result<(), ValidationError> {
    let valid = folder.split('/').all(|seg| {
        !seg.is_empty()
            && seg != ".."
            && seg != "."
            && seg
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    });
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("folder")
            .with_message("folder must be slash-separated [A-Za-z0-9_-] segments".into()))
    }
}

fn validate_correlation_id(id: &CorrelationId) -> Result<(), ValidationError> {
    let len = id.as_str().trim().len();
    if len == 0 || len > 128 {
        return Err(ValidationError::new("correlation_id")
            .with_message("correlation_id must be 1-128 characters".into()));
    }
    Ok(())
}

fn validate_source(source: &MediaSource) -> Result<(), ValidationError> {
    match source {
        MediaSource::Reference(r) if r.trim().is_empty() => {
            Err(ValidationError::new("source").with_message("source reference is empty".into()))
        }
        MediaSource::Inline { inline, .. } if inline.trim().is_empty() => {
            Err(ValidationError::new("source").with_message("inline source is empty".into()))
        }
        _ => Ok(()),
    }
}

/// One request to transform a source video into a processed output video.
///
/// Immutable once accepted by the handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct JobRequest {
    /// Correlation token; `id` is accepted as an alias.
    #[serde(default, alias = "id")]
    #[validate(custom(function = "validate_correlation_id"))]
    pub correlation_id: CorrelationId,

    #[serde(default)]
    #[validate(required(message = "job has no media source"), custom(function = "validate_source"))]
    pub source: Option<MediaSource>,

    #[serde(flatten)]
    #[validate(nested)]
    pub options: ProcessingOptions,
}

impl JobRequest {
    /// Create a request for `source` with default options.
    pub fn new(source: MediaSource) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            source: Some(source),
            options: ProcessingOptions::default(),
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = CorrelationId::from_string(id);
        self
    }

    pub fn with_audio(mut self, required: bool) -> Self {
        self.options.overlay_audio = true;
        self.options.audio_required = required;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.options.seed = Some(seed);
        self
    }

    /// Parse and validate a raw JSON payload.
    pub fn parse(value: serde_json::Value) -> Result<Self, RequestError> {
        let request: JobRequest = serde_json::from_value(value)?;
        request.validate()?;
        Ok(request)
    }
}

/// Why a raw payload could not become a [`JobRequest`].
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("malformed job request: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid job request: {}", flatten_validation(.0))]
    Invalid(#[from] ValidationErrors),
}

fn flatten_validation(errors: &ValidationErrors) -> String {
    let mut messages = Vec::new();
    collect_messages(errors, "", &mut messages);
    if messages.is_empty() {
        errors.to_string()
    } else {
        messages.join("; ")
    }
}

fn collect_messages(errors: &ValidationErrors, prefix: &str, out: &mut Vec<String>) {
    use validator::ValidationErrorsKind;

    for (field, kind) in errors.errors() {
        let field = field.to_string();
        let path = match (prefix.is_empty(), field == "__all__") {
            (true, _) => field,
            (false, true) => prefix.to_string(),
            (false, false) => format!("{}.{}", prefix, field),
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                for err in list {
                    let msg = err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| err.code.to_string());
                    if path == "__all__" {
                        out.push(msg);
                    } else {
                        out.push(format!("{}: {}", path, msg));
                    }
                }
            }
            ValidationErrorsKind::Struct(inner) => collect_messages(inner, &path, out),
            ValidationErrorsKind::List(map) => {
                for (idx, inner) in map {
                    collect_messages(inner, &format!("{}[{}]", path, idx), out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_minimal_request() {
        let req = JobRequest::parse(json!({"source": "a.mp4"})).unwrap();
        assert_eq!(req.source, Some(MediaSource::Reference("a.mp4".into())));
        assert_eq!(req.options.audio_mode(), AudioMode::Disabled);
        assert_eq!(req.options.frame_step, 1);
        assert!(req.options.post_process_mask);
        assert_eq!(req.options.folder, "videos");
        assert!(!req.correlation_id.as_str().is_empty());
    }

    #[test]
    fn test_id_alias_and_inline_source() {
        let req = JobRequest::parse(json!({
            "id": "job-42",
            "source": {"inline": "AAAA", "format": "mp4"},
            "overlay_audio": true
        }))
        .unwrap();
        assert_eq!(req.correlation_id.as_str(), "job-42");
        assert!(matches!(req.source, Some(MediaSource::Inline { .. })));
        assert_eq!(req.options.audio_mode(), AudioMode::Optional);
    }

    #[test]
    fn test_builder_matches_parsed_payload() {
        let built = JobRequest::new(MediaSource::Reference("a.mp4".into()))
            .with_correlation_id("job-7")
            .with_audio(true)
            .with_seed(11);
        assert!(built.validate().is_ok());

        let parsed = JobRequest::parse(json!({
            "id": "job-7",
            "source": "a.mp4",
            "overlay_audio": true,
            "audio_required": true,
            "seed": 11
        }))
        .unwrap();
        assert_eq!(built.correlation_id, parsed.correlation_id);
        assert_eq!(built.options.audio_mode(), AudioMode::Required);
        assert_eq!(built.options.seed, parsed.options.seed);
    }

    #[test]
    fn test_missing_source_is_invalid() {
        let err = JobRequest::parse(json!({"overlay_audio": true})).unwrap_err();
        assert!(matches!(err, RequestError::Invalid(_)));
        assert!(err.to_string().contains("no media source"), "{}", err);
    }

    #[test]
    fn test_empty_source_is_invalid() {
        let err = JobRequest::parse(json!({"source": "  "})).unwrap_err();
        assert!(err.to_string().contains("source reference is empty"), "{}", err);
    }

    #[test]
    fn test_wrong_type_is_malformed() {
        let err = JobRequest::parse(json!({"source": "a.mp4", "frame_step": "two"})).unwrap_err();
        assert!(matches!(err, RequestError::Malformed(_)));
    }

    #[test]
    fn test_transparent_requires_webm() {
        let err = JobRequest::parse(json!({"source": "a.mp4", "transparent_background": true}))
            .unwrap_err();
        assert!(err.to_string().contains("transparent"), "{}", err);

        let ok = JobRequest::parse(json!({
            "source": "a.mp4",
            "transparent_background": true,
            "output_format": "webm"
        }))
        .unwrap();
        assert_eq!(ok.options.background(), Background::Transparent);
    }

    #[test]
    fn test_audio_required_needs_overlay() {
        let err =
            JobRequest::parse(json!({"source": "a.mp4", "audio_required": true})).unwrap_err();
        assert!(err.to_string().contains("audio_required"), "{}", err);
    }

    #[test]
    fn test_frame_step_bounds() {
        assert!(JobRequest::parse(json!({"source": "a.mp4", "frame_step": 0})).is_err());
        assert!(JobRequest::parse(json!({"source": "a.mp4", "frame_step": 31})).is_err());
        assert!(JobRequest::parse(json!({"source": "a.mp4", "frame_step": 2})).is_ok());
    }

    #[test]
    fn test_folder_rejects_traversal() {
        assert!(JobRequest::parse(json!({"source": "a.mp4", "folder": "../etc"})).is_err());
        assert!(JobRequest::parse(json!({"source": "a.mp4", "folder": "clips/2026"})).is_ok());
    }

    #[test]
    fn test_background_default_and_color() {
        let mut opts = ProcessingOptions::default();
        assert_eq!(opts.background(), Background::Color(DEFAULT_BACKGROUND));
        opts.bgcolor = Some([0, 255, 0]);
        assert_eq!(opts.background(), Background::Color([0, 255, 0]));
    }

    #[test]
    fn test_file_stem_is_safe_and_distinct() {
        let a = CorrelationId::from_string("job/1");
        let b = CorrelationId::from_string("job:1");
        assert!(a.file_stem().starts_with("job_1_"));
        assert!(b.file_stem().starts_with("job_1_"));
        assert_ne!(a.file_stem(), b.file_stem());
        assert_eq!(a.file_stem(), CorrelationId::from_string("job/1").file_stem());
        assert!(CorrelationId::from_string("???").file_stem().starts_with("___"));
    }
}
