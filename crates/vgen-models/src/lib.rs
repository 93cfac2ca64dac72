//! Shared data models for the VGen worker.
//!
//! This crate provides Serde-serializable types for:
//! - Job requests and processing options
//! - Audio catalog tracks and randomization tokens
//! - Job results and the workflow-engine contracts
//! - Encoding configuration
//! - The job stage state machine

pub mod encoding;
pub mod job;
pub mod result;
pub mod stage;
pub mod track;
pub mod workflow;

// Re-export common types
pub use encoding::{EncoderBackend, EncoderMode, EncodingConfig, OutputFormat};
pub use job::{
    AudioMode, Background, CorrelationId, JobRequest, MediaSource, ProcessingOptions, RequestError,
};
pub use result::{JobFailure, JobResult, JobSuccess};
pub use stage::JobStage;
pub use track::{AudioTrack, RandomizationToken, TokenParseError, TrackFilter};
pub use workflow::{UpstreamOutcome, UpstreamPayload, UpstreamVideo, WorkflowOutput};
