//! Video encoding strategies.
//!
//! [`FfmpegEncoder`] drives one concrete backend (NVENC or libx264/libvpx). [`FallbackEncoder`]
//! composes two encoders so a hardware failure degrades to software instead of failing the job.
//! Which composition is used is decided once, at startup, by [`encoder_for_mode`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use vgen_models::{EncoderBackend, EncoderMode, EncodingConfig, OutputFormat};

use crate::command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::frames::FrameSet;
use crate::probe::count_frames;

/// What to encode and where.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub frames: FrameSet,
    /// Local audio file to overlay.
    pub audio: Option<PathBuf>,
    pub format: OutputFormat,
    /// Keep the alpha channel of RGBA frames (formats that support it only).
    pub alpha: bool,
    pub output: PathBuf,
}

/// A finished video file.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoArtifact {
    pub path: PathBuf,
    pub backend: EncoderBackend,
    pub frame_count: usize,
    pub has_audio: bool,
    pub size_bytes: u64,
}

/// Turns a frame sequence (and optional audio) into a single video file.
#[async_trait]
pub trait VideoEncoder: Send + Sync {
    fn name(&self) -> &str;

    async fn encode(&self, request: &EncodeRequest) -> MediaResult<VideoArtifact>;
}

/// FFmpeg encoder for one backend.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    backend: EncoderBackend,
    verify_frames: bool,
    timeout_secs: Option<u64>,
}

impl FfmpegEncoder {
    pub fn new(backend: EncoderBackend) -> Self {
        Self {
            backend,
            verify_frames: true,
            timeout_secs: None,
        }
    }

    pub fn nvenc() -> Self {
        Self::new(EncoderBackend::Nvenc)
    }

    pub fn software() -> Self {
        Self::new(EncoderBackend::Software)
    }

    /// Probe the artifact afterwards and fail on a frame-count mismatch.
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify_frames = verify;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Backend actually used for `format`. Formats without a hardware codec always use software.
    fn effective_backend(&self, format: OutputFormat) -> EncoderBackend {
        if format.supports_hardware() {
            self.backend
        } else {
            EncoderBackend::Software
        }
    }

    pub fn build_command(&self, request: &EncodeRequest) -> FfmpegCommand {
        let backend = self.effective_backend(request.format);
        let alpha = request.alpha && request.format.supports_alpha();
        let config = EncodingConfig::for_output(request.format, backend, alpha);

        let mut cmd = FfmpegCommand::new(request.frames.pattern(), &request.output).input_args([
            "-framerate".to_string(),
            format!("{:.6}", request.frames.fps),
            "-start_number".to_string(),
            "0".to_string(),
        ]);

        if let Some(audio) = &request.audio {
            // Pad the audio so -shortest always ends on the last video frame.
            cmd = cmd
                .extra_input(Vec::<String>::new(), audio)
                .map("0:v:0")
                .map("1:a:0")
                .audio_filter("apad")
                .output_arg("-shortest");
        }

        // 4:2:0 chroma needs even dimensions
        cmd.video_filter("scale=trunc(iw/2)*2:trunc(ih/2)*2")
            .output_args(config.to_ffmpeg_args(request.audio.is_some()))
    }
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    fn name(&self) -> &str {
        self.backend.as_str()
    }

    async fn encode(&self, request: &EncodeRequest) -> MediaResult<VideoArtifact> {
        let backend = self.effective_backend(request.format);
        if request.frames.is_empty() {
            return Err(MediaError::invalid_input("no frames to encode"));
        }

        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let cmd = self.build_command(request);
        let mut runner = FfmpegRunner::new();
        if let Some(secs) = self.timeout_secs {
            runner = runner.with_timeout(secs);
        }

        let progress = runner
            .run(&cmd)
            .await
            .map_err(|e| MediaError::encode(backend.as_str(), e.detailed()))?;

        debug!(
            encoder = backend.as_str(),
            frames = progress.frame,
            dropped = progress.dropped_frames,
            speed = progress.speed,
            "Encode finished"
        );

        let expected = request.frames.count;
        if self.verify_frames {
            verify_frame_count(&request.output, expected, backend).await?;
        }

        let size_bytes = tokio::fs::metadata(&request.output).await?.len();
        if size_bytes == 0 {
            return Err(MediaError::encode(backend.as_str(), "empty output file"));
        }

        info!(
            encoder = backend.as_str(),
            frames = expected,
            size_bytes,
            output = %request.output.display(),
            "Video encoded"
        );

        Ok(VideoArtifact {
            path: request.output.clone(),
            backend,
            frame_count: expected,
            has_audio: request.audio.is_some(),
            size_bytes,
        })
    }
}

/// Count the frames actually muxed into `path` and fail unless there are `expected`.
async fn verify_frame_count(
    path: &Path,
    expected: usize,
    backend: EncoderBackend,
) -> MediaResult<()> {
    let actual = count_frames(path)
        .await
        .map_err(|e| MediaError::encode(backend.as_str(), e.detailed()))?;
    if actual != expected as u64 {
        return Err(MediaError::encode(
            backend.as_str(),
            format!("frame count mismatch: expected {}, got {}", expected, actual),
        ));
    }
    Ok(())
}

/// Tries `primary`, then `fallback` when the primary fails.
pub struct FallbackEncoder {
    primary: Arc<dyn VideoEncoder>,
    fallback: Arc<dyn VideoEncoder>,
    name: String,
}

impl FallbackEncoder {
    pub fn new(primary: Arc<dyn VideoEncoder>, fallback: Arc<dyn VideoEncoder>) -> Self {
        let name = format!("{}+{}", primary.name(), fallback.name());
        Self {
            primary,
            fallback,
            name,
        }
    }
}

#[async_trait]
impl VideoEncoder for FallbackEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn encode(&self, request: &EncodeRequest) -> MediaResult<VideoArtifact> {
        let primary_err = match self.primary.encode(request).await {
            Ok(artifact) => return Ok(artifact),
            Err(e @ MediaError::Timeout(_)) => return Err(e),
            Err(e) => e,
        };

        warn!(
            primary = self.primary.name(),
            fallback = self.fallback.name(),
            error = %primary_err,
            "Primary encoder failed, falling back"
        );
        metrics::counter!(
            "vgen_encoder_fallbacks_total",
            "from" => self.primary.name().to_string(),
            "to" => self.fallback.name().to_string()
        )
        .increment(1);

        // Never let a partial file from the failed attempt survive.
        discard_artifact(&request.output).await;

        self.fallback.encode(request).await.map_err(|fallback_err| {
            MediaError::encode(
                self.name.clone(),
                format!("{}; fallback: {}", primary_err, fallback_err),
            )
        })
    }
}

/// Whether FFmpeg has a working NVENC encoder on this host. Cached for the process.
pub fn nvenc_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(detect_nvenc)
}

fn detect_nvenc() -> bool {
    if check_ffmpeg().is_err() {
        return false;
    }

    let listed = std::process::Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).contains("h264_nvenc"))
        .unwrap_or(false);
    if !listed {
        debug!("h264_nvenc not compiled into ffmpeg");
        return false;
    }

    // Listed encoders can still fail without a usable device; try a tiny encode.
    let works = std::process::Command::new("ffmpeg")
        .args([
            "-hide_banner",
            "-v",
            "error",
            "-f",
            "lavfi",
            "-i",
            "color=c=black:s=256x256:d=0.1",
            "-c:v",
            "h264_nvenc",
            "-f",
            "null",
            "-",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false);

    info!(available = works, "NVENC probe finished");
    works
}

/// Build the encoder strategy for `mode`.
///
/// `Auto` without NVENC skips the hardware attempt entirely. `HardwareOnly` without NVENC is
/// a configuration error.
pub fn encoder_for_mode(
    mode: EncoderMode,
    nvenc: bool,
    verify_frames: bool,
    timeout_secs: Option<u64>,
) -> MediaResult<Arc<dyn VideoEncoder>> {
    let configure = |encoder: FfmpegEncoder| {
        let encoder = encoder.with_verification(verify_frames);
        match timeout_secs {
            Some(secs) => encoder.with_timeout(secs),
            None => encoder,
        }
    };

    let encoder: Arc<dyn VideoEncoder> = match (mode, nvenc) {
        (EncoderMode::SoftwareOnly, _) | (EncoderMode::Auto, false) => {
            Arc::new(configure(FfmpegEncoder::software()))
        }
        (EncoderMode::HardwareOnly, true) => Arc::new(configure(FfmpegEncoder::nvenc())),
        (EncoderMode::HardwareOnly, false) => {
            return Err(MediaError::HardwareUnavailable(
                "hardware encoder mode configured but NVENC is not available".to_string(),
            ))
        }
        (EncoderMode::Auto, true) => Arc::new(FallbackEncoder::new(
            Arc::new(configure(FfmpegEncoder::nvenc())),
            Arc::new(configure(FfmpegEncoder::software())),
        )),
    };

    info!(mode = %mode, nvenc, encoder = encoder.name(), "Encoder configured");
    Ok(encoder)
}

/// Remove `path` if it exists.
pub async fn discard_artifact(path: &Path) {
    if tokio::fs::remove_file(path).await.is_ok() {
        debug!(path = %path.display(), "Discarded partial artifact");
    }
}
