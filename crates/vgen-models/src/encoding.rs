//! Video encoding configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// NVENC hardware H.264 codec
pub const NVENC_VIDEO_CODEC: &str = "h264_nvenc";
/// VP9 codec used for webm output (keeps alpha)
pub const VP9_VIDEO_CODEC: &str = "libvpx-vp9";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Audio codec for webm output
pub const WEBM_AUDIO_CODEC: &str = "libopus";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "fast";
/// NVENC preset (p1 fastest .. p7 best quality)
pub const NVENC_PRESET: &str = "p4";
/// Default CRF / CQ
pub const DEFAULT_CRF: u8 = 18;
/// VP9 constant-quality value
pub const VP9_CRF: u8 = 30;
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "192k";
/// Default pixel format
pub const DEFAULT_PIXEL_FORMAT: &str = "yuv420p";
/// Pixel format with alpha plane (VP9 only)
pub const ALPHA_PIXEL_FORMAT: &str = "yuva420p";
/// Frame rate assumed when the source does not report one
pub const DEFAULT_FPS: f64 = 30.0;

/// Container of the produced artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Mov,
    Webm,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Mov => "mov",
            OutputFormat::Webm => "webm",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "video/mp4",
            OutputFormat::Mov => "video/quicktime",
            OutputFormat::Webm => "video/webm",
        }
    }

    /// Whether the container/codec pair can carry an alpha channel.
    pub fn supports_alpha(&self) -> bool {
        matches!(self, OutputFormat::Webm)
    }

    /// Whether a hardware encoder exists for this format.
    pub fn supports_hardware(&self) -> bool {
        !matches!(self, OutputFormat::Webm)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Encoder selection policy, fixed at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum EncoderMode {
    /// Hardware first, software on failure or absence.
    #[default]
    Auto,
    /// Hardware only; failures are fatal.
    HardwareOnly,
    /// Never touch the hardware encoder.
    SoftwareOnly,
}

impl EncoderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncoderMode::Auto => "auto",
            EncoderMode::HardwareOnly => "hardware",
            EncoderMode::SoftwareOnly => "software",
        }
    }
}

impl fmt::Display for EncoderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncoderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(EncoderMode::Auto),
            "hardware" | "hardware_only" | "nvenc" => Ok(EncoderMode::HardwareOnly),
            "software" | "software_only" | "cpu" => Ok(EncoderMode::SoftwareOnly),
            other => Err(format!("unknown encoder mode '{}'", other)),
        }
    }
}

/// Concrete encoder implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EncoderBackend {
    Nvenc,
    Software,
}

impl EncoderBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncoderBackend::Nvenc => "nvenc",
            EncoderBackend::Software => "software",
        }
    }
}

impl fmt::Display for EncoderBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Video encoding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EncodingConfig {
    /// Video codec (e.g., "libx264", "h264_nvenc")
    pub codec: String,

    /// Encoding preset; VP9 has none
    pub preset: Option<String>,

    /// Quality (CRF for x264/VP9, CQ for NVENC; lower is better)
    pub crf: u8,

    pub pixel_format: String,

    pub audio_codec: String,

    pub audio_bitrate: String,

    /// Use hardware acceleration (NVENC)
    pub use_nvenc: bool,

    /// Additional FFmpeg output arguments
    pub extra_args: Vec<String>,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: DEFAULT_VIDEO_CODEC.to_string(),
            preset: Some(DEFAULT_PRESET.to_string()),
            crf: DEFAULT_CRF,
            pixel_format: DEFAULT_PIXEL_FORMAT.to_string(),
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            audio_bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
            use_nvenc: false,
            extra_args: vec!["-movflags".to_string(), "+faststart".to_string()],
        }
    }
}

impl EncodingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for `format` on `backend`.
    ///
    /// `alpha` only has an effect for formats that support it.
    pub fn for_output(format: OutputFormat, backend: EncoderBackend, alpha: bool) -> Self {
        match format {
            OutputFormat::Webm => Self {
                codec: VP9_VIDEO_CODEC.to_string(),
                preset: None,
                crf: VP9_CRF,
                pixel_format: if alpha {
                    ALPHA_PIXEL_FORMAT
                } else {
                    DEFAULT_PIXEL_FORMAT
                }
                .to_string(),
                audio_codec: WEBM_AUDIO_CODEC.to_string(),
                audio_bitrate: "128k".to_string(),
                use_nvenc: false,
                extra_args: vec!["-b:v".to_string(), "0".to_string()],
            },
            OutputFormat::Mp4 | OutputFormat::Mov => {
                let config = Self::default();
                match backend {
                    EncoderBackend::Nvenc => config.with_nvenc(),
                    EncoderBackend::Software => config,
                }
            }
        }
    }

    /// Enable NVENC hardware acceleration.
    pub fn with_nvenc(mut self) -> Self {
        self.use_nvenc = true;
        self.codec = NVENC_VIDEO_CODEC.to_string();
        self.preset = Some(NVENC_PRESET.to_string());
        self
    }

    /// Convert to FFmpeg output arguments. Audio codec flags are only emitted with audio.
    pub fn to_ffmpeg_args(&self, with_audio: bool) -> Vec<String> {
        let mut args = vec!["-c:v".to_string(), self.codec.clone()];

        if let Some(preset) = &self.preset {
            args.extend_from_slice(&["-preset".to_string(), preset.clone()]);
        }

        // CRF is not used with NVENC, use -cq instead
        if self.use_nvenc {
            args.extend_from_slice(&["-cq".to_string(), self.crf.to_string()]);
        } else {
            args.extend_from_slice(&["-crf".to_string(), self.crf.to_string()]);
        }

        args.extend_from_slice(&["-pix_fmt".to_string(), self.pixel_format.clone()]);

        if with_audio {
            args.extend_from_slice(&[
                "-c:a".to_string(),
                self.audio_codec.clone(),
                "-b:a".to_string(),
                self.audio_bitrate.clone(),
            ]);
        } else {
            args.push("-an".to_string());
        }

        args.extend(self.extra_args.clone());

        args
    }
}
