//! Media pipeline for the VGen worker.
//!
//! This crate provides:
//! - FFmpeg command building and execution with timeout/cancellation
//! - FFprobe metadata and frame counting
//! - Frame decoding into numbered PNG sequences
//! - Background segmentation via ONNX Runtime and matte compositing
//! - Hardware (NVENC) encoding with software fallback
//! - Media source resolution (HTTP download, inline bytes, local input directory)

pub mod command;
pub mod encoder;
pub mod error;
pub mod frames;
pub mod probe;
pub mod progress;
pub mod segmentation;
pub mod source;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use encoder::{
    discard_artifact, encoder_for_mode, nvenc_available, EncodeRequest, FallbackEncoder,
    FfmpegEncoder, VideoArtifact, VideoEncoder,
};
pub use error::{MediaError, MediaResult};
pub use frames::{DecodeOptions, FfmpegFrameDecoder, FrameDecoder, FrameSet};
pub use probe::{count_frames, probe_video, VideoInfo};
pub use progress::FfmpegProgress;
pub use segmentation::{
    composite, process_frames, refine_matte, OrtSegmenter, SegmentationEngine, SegmentationResult,
    SegmenterConfig,
};
pub use source::{HttpSourceResolver, SourceResolver, SourceResolverConfig};
