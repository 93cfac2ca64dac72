//! Background segmentation using an ONNX matting model (BiRefNet family).
//!
//! The model is loaded once per process and shared read-only between jobs:
//! - CUDA on Linux with NVIDIA GPU (when `cuda` feature enabled)
//! - CPU fallback on all platforms
//!
//! Session access is serialized through a mutex; callers that also need to keep the
//! accelerator exclusive across a whole job do so one level up.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use vgen_models::Background;

use crate::error::{MediaError, MediaResult};
use crate::frames::{frame_file_name, FrameSet};

/// ImageNet normalization used by the model's training pipeline.
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Matte values at or above this become foreground when post-processing.
const BINARIZE_THRESHOLD: u8 = 128;
/// Gaussian sigma used to soften binarized matte edges.
const EDGE_SOFTEN_SIGMA: f32 = 1.0;

/// Foreground matte for one frame, same size as the frame. 255 = foreground.
#[derive(Debug, Clone)]
pub struct SegmentationResult {
    pub matte: GrayImage,
}

/// A loaded segmentation model.
///
/// Implementations hold no per-job state: the same frame gives the same matte.
pub trait SegmentationEngine: Send + Sync {
    fn model_name(&self) -> &str;

    fn segment(&self, frame: &RgbImage) -> MediaResult<SegmentationResult>;
}

/// Configuration for [`OrtSegmenter`].
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Path to ONNX model file
    pub model_path: PathBuf,
    /// Square input resolution the model expects
    pub input_size: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/birefnet-general.onnx"),
            input_size: 1024,
        }
    }
}

/// ONNX Runtime segmentation engine.
pub struct OrtSegmenter {
    session: Mutex<Session>,
    output_name: String,
    model_name: String,
    config: SegmenterConfig,
}

impl OrtSegmenter {
    /// Load the model. Fails if the file is missing or cannot be loaded.
    pub fn new(config: SegmenterConfig) -> MediaResult<Self> {
        if config.input_size == 0 {
            return Err(MediaError::invalid_input("segmentation input size must be positive"));
        }
        if !config.model_path.exists() {
            return Err(MediaError::model_not_found(config.model_path.display().to_string()));
        }

        let session = create_session(&config.model_path)?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| MediaError::inference("model declares no outputs"))?;

        let model_name = config
            .model_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "segmentation".to_string());

        info!(
            model_path = %config.model_path.display(),
            input_size = config.input_size,
            output = %output_name,
            "Segmentation model loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            output_name,
            model_name,
            config,
        })
    }

    /// Resize, normalize and lay out as NCHW `[1, 3, S, S]`.
    fn preprocess(&self, frame: &RgbImage) -> MediaResult<Value> {
        let size = self.config.input_size;
        let resized = image::imageops::resize(frame, size, size, FilterType::Triangle);
        let s = size as usize;

        let mut input = Array4::<f32>::zeros((1, 3, s, s));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] =
                    (pixel[c] as f32 / 255.0 - MEAN[c]) / STD[c];
            }
        }

        let shape = vec![1usize, 3, s, s];
        Tensor::from_array((shape, input.into_raw_vec().into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| MediaError::inference(format!("failed to create input tensor: {}", e)))
    }

    fn run_inference(&self, input: Value) -> MediaResult<Vec<f32>> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| MediaError::internal("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| MediaError::inference(format!("ONNX inference failed: {}", e)))?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| MediaError::inference(format!("missing {} tensor", self.output_name)))?;

        let tensor = output
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::inference(format!("failed to extract tensor: {}", e)))?;

        Ok(tensor.1.to_vec())
    }
}

impl SegmentationEngine for OrtSegmenter {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn segment(&self, frame: &RgbImage) -> MediaResult<SegmentationResult> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(MediaError::inference("empty frame"));
        }
        let input = self.preprocess(frame)?;
        let logits = self.run_inference(input)?;
        let matte = logits_to_matte(
            &logits,
            self.config.input_size,
            frame.width(),
            frame.height(),
        )?;
        Ok(SegmentationResult { matte })
    }
}

/// Sigmoid, min-max normalize to 0..=255, then resize to the frame size.
pub(crate) fn logits_to_matte(
    logits: &[f32],
    input_size: u32,
    width: u32,
    height: u32,
) -> MediaResult<GrayImage> {
    let expected = (input_size as usize) * (input_size as usize);
    if logits.len() != expected {
        return Err(MediaError::inference(format!(
            "unexpected output size: expected {} values, got {}",
            expected,
            logits.len()
        )));
    }
    if logits.iter().any(|v| !v.is_finite()) {
        return Err(MediaError::inference("model produced non-finite values"));
    }

    let probs: Vec<f32> = logits.iter().map(|v| 1.0 / (1.0 + (-v).exp())).collect();
    let (min, max) = probs
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), &p| (lo.min(p), hi.max(p)));
    let range = max - min;

    let pixels: Vec<u8> = probs
        .iter()
        .map(|p| {
            let norm = if range > f32::EPSILON { (p - min) / range } else { *p };
            (norm * 255.0).round().clamp(0.0, 255.0) as u8
        })
        .collect();

    let matte = GrayImage::from_raw(input_size, input_size, pixels)
        .ok_or_else(|| MediaError::inference("failed to build matte buffer"))?;

    if (width, height) == (input_size, input_size) {
        return Ok(matte);
    }
    Ok(image::imageops::resize(&matte, width, height, FilterType::Triangle))
}

/// Binarize the matte and soften the resulting edges.
pub fn refine_matte(matte: &GrayImage) -> GrayImage {
    let binary = GrayImage::from_fn(matte.width(), matte.height(), |x, y| {
        if matte.get_pixel(x, y)[0] >= BINARIZE_THRESHOLD {
            Luma([255])
        } else {
            Luma([0])
        }
    });
    image::imageops::blur(&binary, EDGE_SOFTEN_SIGMA)
}

/// Composite `frame` over `background` using `matte` as alpha.
pub fn composite(
    frame: &RgbImage,
    matte: &GrayImage,
    background: Background,
) -> MediaResult<DynamicImage> {
    if frame.dimensions() != matte.dimensions() {
        return Err(MediaError::inference(format!(
            "matte {:?} does not match frame {:?}",
            matte.dimensions(),
            frame.dimensions()
        )));
    }

    Ok(match background {
        Background::Transparent => {
            DynamicImage::ImageRgba8(RgbaImage::from_fn(frame.width(), frame.height(), |x, y| {
                let p = frame.get_pixel(x, y);
                Rgba([p[0], p[1], p[2], matte.get_pixel(x, y)[0]])
            }))
        }
        Background::Color(bg) => {
            DynamicImage::ImageRgb8(RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
                let p = frame.get_pixel(x, y);
                let a = matte.get_pixel(x, y)[0] as u32;
                let blend =
                    |fg: u8, bg: u8| ((fg as u32 * a + bg as u32 * (255 - a) + 127) / 255) as u8;
                Rgb([blend(p[0], bg[0]), blend(p[1], bg[1]), blend(p[2], bg[2])])
            }))
        }
    })
}

/// Segment every frame of `input` in order and write composited frames to `out_dir`.
///
/// Output frame `i` always corresponds to input frame `i`. `cancel` is checked between
/// frames; once set, the loop stops with [`MediaError::Cancelled`].
pub fn process_frames(
    engine: &dyn SegmentationEngine,
    input: &FrameSet,
    out_dir: &Path,
    background: Background,
    post_process: bool,
    cancel: &AtomicBool,
) -> MediaResult<FrameSet> {
    std::fs::create_dir_all(out_dir)?;

    for index in 0..input.count {
        if cancel.load(Ordering::Relaxed) {
            debug!(frame = index, total = input.count, "Segmentation cancelled");
            return Err(MediaError::Cancelled);
        }
        let frame = input.load(index)?.to_rgb8();
        let result = engine.segment(&frame)?;

        let matte = if result.matte.dimensions() == frame.dimensions() {
            result.matte
        } else {
            image::imageops::resize(
                &result.matte,
                frame.width(),
                frame.height(),
                FilterType::Triangle,
            )
        };
        let matte = if post_process { refine_matte(&matte) } else { matte };

        composite(&frame, &matte, background)?.save(out_dir.join(frame_file_name(index)))?;

        if index % 50 == 0 {
            debug!(
                frame = index,
                total = input.count,
                model = engine.model_name(),
                "Segmented frame"
            );
        }
    }

    Ok(FrameSet::new(out_dir, input.count, input.fps, input.width, input.height))
}

fn create_session(model_path: &Path) -> MediaResult<Session> {
    let model_bytes = std::fs::read(model_path)
        .map_err(|e| MediaError::internal(format!("Failed to read model file: {}", e)))?;

    let builder = Session::builder()
        .map_err(|e| MediaError::internal(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| MediaError::internal(format!("Failed to set optimization level: {}", e)))?;

    // Try CUDA on Linux with cuda feature
    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!("Using CUDA execution provider for segmentation");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, using CPU");
    }

    info!("Using CPU execution provider for segmentation");
    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| MediaError::internal(format!("Failed to load ONNX model: {}", e)))
}
