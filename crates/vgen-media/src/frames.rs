//! Frame sequences on disk and decoding video into them.
//!
//! Frames are stored as `frame_000000.png`, `frame_000001.png`, ... in a directory; the
//! numeric suffix is the presentation order and is what the encoder reads back.

use async_trait::async_trait;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::probe_video;

/// printf-style pattern understood by FFmpeg's image2 muxer/demuxer.
pub const FRAME_PATTERN: &str = "frame_%06d.png";

/// Name of the frame at `index`.
pub fn frame_file_name(index: usize) -> String {
    format!("frame_{:06}.png", index)
}

/// An ordered sequence of frames stored in one directory.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSet {
    pub dir: PathBuf,
    pub count: usize,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

impl FrameSet {
    pub fn new(dir: impl Into<PathBuf>, count: usize, fps: f64, width: u32, height: u32) -> Self {
        Self {
            dir: dir.into(),
            count,
            fps,
            width,
            height,
        }
    }

    /// Scan `dir` for consecutive frames starting at index 0.
    ///
    /// Dimensions are read from the first frame.
    pub fn scan(dir: impl Into<PathBuf>, fps: f64) -> MediaResult<Self> {
        let dir = dir.into();
        let mut count = 0usize;
        while dir.join(frame_file_name(count)).is_file() {
            count += 1;
        }

        let (width, height) = if count > 0 {
            image::image_dimensions(dir.join(frame_file_name(0)))?
        } else {
            (0, 0)
        };

        Ok(Self::new(dir, count, fps, width, height))
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn path(&self, index: usize) -> PathBuf {
        self.dir.join(frame_file_name(index))
    }

    pub fn pattern(&self) -> PathBuf {
        self.dir.join(FRAME_PATTERN)
    }

    pub fn paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        (0..self.count).map(move |i| self.path(i))
    }

    pub fn load(&self, index: usize) -> MediaResult<DynamicImage> {
        if index >= self.count {
            return Err(MediaError::internal(format!(
                "frame {} out of range (count {})",
                index, self.count
            )));
        }
        Ok(image::open(self.path(index))?)
    }

    /// Duration of the sequence at its frame rate.
    pub fn duration_secs(&self) -> f64 {
        if self.fps > 0.0 {
            self.count as f64 / self.fps
        } else {
            0.0
        }
    }
}

/// Frame selection applied while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Keep every n-th frame (1 keeps all).
    pub frame_step: u32,
    /// Stop after this many kept frames.
    pub max_frames: Option<u32>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            frame_step: 1,
            max_frames: None,
        }
    }
}

/// Decodes a media file into a [`FrameSet`].
#[async_trait]
pub trait FrameDecoder: Send + Sync {
    async fn decode(
        &self,
        source: &Path,
        out_dir: &Path,
        options: &DecodeOptions,
    ) -> MediaResult<FrameSet>;
}

/// FFmpeg-backed decoder writing RGB PNG frames.
#[derive(Debug, Clone, Default)]
pub struct FfmpegFrameDecoder {
    timeout_secs: Option<u64>,
}

impl FfmpegFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    fn build_command(
        &self,
        source: &Path,
        out_dir: &Path,
        options: &DecodeOptions,
    ) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::new(source, out_dir.join(FRAME_PATTERN));

        if options.frame_step > 1 {
            cmd = cmd.video_filter(format!("select='not(mod(n\\,{}))'", options.frame_step));
        }

        // passthrough keeps one output image per selected input frame
        cmd = cmd
            .output_args(["-fps_mode", "passthrough", "-an", "-pix_fmt", "rgb24"])
            .output_args(["-start_number", "0"]);

        if let Some(max) = options.max_frames {
            cmd = cmd.max_frames(max);
        }

        cmd
    }
}

#[async_trait]
impl FrameDecoder for FfmpegFrameDecoder {
    async fn decode(
        &self,
        source: &Path,
        out_dir: &Path,
        options: &DecodeOptions,
    ) -> MediaResult<FrameSet> {
        if options.frame_step == 0 {
            return Err(MediaError::invalid_input("frame_step must be at least 1"));
        }

        let info = probe_video(source).await?;
        tokio::fs::create_dir_all(out_dir).await?;

        let cmd = self.build_command(source, out_dir, options);
        let mut runner = FfmpegRunner::new();
        if let Some(secs) = self.timeout_secs {
            runner = runner.with_timeout(secs);
        }
        let progress = runner.run(&cmd).await?;
        debug!(frames = progress.frame, "Decode finished");

        let fps = info.fps / options.frame_step as f64;
        let frames = FrameSet::scan(out_dir, fps)?;

        info!(
            source = %source.display(),
            frames = frames.count,
            fps = frames.fps,
            width = frames.width,
            height = frames.height,
            "Decoded source into frames"
        );

        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_frames(dir: &Path, n: usize) {
        for i in 0..n {
            let img = RgbImage::from_pixel(4, 2, Rgb([i as u8, 0, 0]));
            img.save(dir.join(frame_file_name(i))).unwrap();
        }
    }

    #[test]
    fn test_frame_names_sort_in_order() {
        assert_eq!(frame_file_name(0), "frame_000000.png");
        assert_eq!(frame_file_name(1234), "frame_001234.png");
        assert!(frame_file_name(9) < frame_file_name(10));
    }

    #[test]
    fn test_scan_counts_consecutive_frames() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 3);
        // a gap ends the sequence
        RgbImage::new(4, 2).save(dir.path().join(frame_file_name(5))).unwrap();

        let set = FrameSet::scan(dir.path(), 24.0).unwrap();
        assert_eq!(set.count, 3);
        assert_eq!((set.width, set.height), (4, 2));
        assert_eq!(set.load(2).unwrap().to_rgb8().get_pixel(0, 0)[0], 2);
        assert!(set.load(3).is_err());
        assert!((set.duration_secs() - 0.125).abs() < 1e-9);
    }

    #[test]
    fn test_scan_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let set = FrameSet::scan(dir.path(), 30.0).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.paths().count(), 0);
    }

    #[test]
    fn test_decode_command_applies_step_and_cap() {
        let decoder = FfmpegFrameDecoder::new();
        let args = decoder
            .build_command(
                Path::new("in.mp4"),
                Path::new("/tmp/out"),
                &DecodeOptions {
                    frame_step: 3,
                    max_frames: Some(10),
                },
            )
            .build_args();
        assert!(args.contains(&"select='not(mod(n\\,3))'".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-frames:v" && w[1] == "10"));
        assert!(args.windows(2).any(|w| w[0] == "-start_number" && w[1] == "0"));
        assert_eq!(args.last().unwrap(), "/tmp/out/frame_%06d.png");
    }

    #[test]
    fn test_decode_command_without_step_has_no_filter() {
        let args = FfmpegFrameDecoder::new()
            .build_command(Path::new("in.mp4"), Path::new("out"), &DecodeOptions::default())
            .build_args();
        assert!(!args.contains(&"-vf".to_string()));
        assert!(!args.contains(&"-frames:v".to_string()));
    }
}
