//! Deterministic stand-ins for the handler's collaborators.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{GrayImage, Luma, Rgb, RgbImage};
use tempfile::TempDir;

use vgen_catalog::{AssetSelector, CatalogResult, InMemoryTrackRepository, TrackRepository};
use vgen_media::frames::frame_file_name;
use vgen_media::{
    DecodeOptions, EncodeRequest, FrameDecoder, FrameSet, MediaError, MediaResult,
    SegmentationEngine, SegmentationResult, SourceResolver, VideoArtifact, VideoEncoder,
};
use vgen_models::{AudioTrack, EncoderBackend, MediaSource, TrackFilter};
use vgen_storage::LocalArtifactStore;
use vgen_worker::{Accelerator, HandlerSettings, JobHandler, JobServices};

pub const CDN: &str = "https://cdn.test";

/// Tracks how many jobs are inside an accelerator call at once.
#[derive(Default)]
pub struct GpuOccupancy {
    active: AtomicUsize,
    max: AtomicUsize,
}

impl GpuOccupancy {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max_concurrent(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct StubResolver {
    pub failing_urls: Vec<String>,
    pub fetched: Mutex<Vec<String>>,
}

#[async_trait]
impl SourceResolver for StubResolver {
    async fn resolve(&self, source: &MediaSource, dest_dir: &Path) -> MediaResult<PathBuf> {
        if let MediaSource::Reference(r) = source {
            if r.starts_with("missing") {
                return Err(MediaError::download_failed(format!("{}: 404 Not Found", r)));
            }
        }
        let path = dest_dir.join("source.mp4");
        tokio::fs::write(&path, b"video").await?;
        Ok(path)
    }

    async fn fetch(&self, url: &str, dest_dir: &Path, stem: &str) -> MediaResult<PathBuf> {
        if self.failing_urls.iter().any(|u| u == url) {
            return Err(MediaError::download_failed(format!("{}: 503", url)));
        }
        self.fetched.lock().unwrap().push(url.to_string());
        let path = dest_dir.join(format!("{}.mp3", stem));
        tokio::fs::write(&path, b"audio").await?;
        Ok(path)
    }
}

/// Writes `frames` 4x2 frames whose red channel is the frame index.
pub struct StubDecoder {
    pub frames: usize,
    pub seen: Mutex<Vec<DecodeOptions>>,
}

#[async_trait]
impl FrameDecoder for StubDecoder {
    async fn decode(
        &self,
        _source: &Path,
        out_dir: &Path,
        options: &DecodeOptions,
    ) -> MediaResult<FrameSet> {
        self.seen.lock().unwrap().push(*options);
        std::fs::create_dir_all(out_dir)?;

        let count = match options.max_frames {
            Some(max) => self.frames.min(max as usize),
            None => self.frames,
        };
        for i in 0..count {
            RgbImage::from_pixel(4, 2, Rgb([i as u8, 10, 20]))
                .save(out_dir.join(frame_file_name(i)))?;
        }
        let (w, h) = if count > 0 { (4, 2) } else { (0, 0) };
        Ok(FrameSet::new(out_dir, count, 30.0, w, h))
    }
}

/// Marks every pixel as foreground.
pub struct StubEngine {
    pub delay: Duration,
    pub fail: bool,
    pub gpu: Arc<GpuOccupancy>,
    pub calls: AtomicUsize,
}

impl SegmentationEngine for StubEngine {
    fn model_name(&self) -> &str {
        "stub-matte"
    }

    fn segment(&self, frame: &RgbImage) -> MediaResult<SegmentationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MediaError::inference("accelerator fault"));
        }
        self.gpu.enter();
        std::thread::sleep(self.delay);
        self.gpu.exit();
        Ok(SegmentationResult {
            matte: GrayImage::from_pixel(frame.width(), frame.height(), Luma([255])),
        })
    }
}

/// Records the red channel of each frame in the order it was handed over.
pub struct StubEncoder {
    pub fail: bool,
    pub gpu: Arc<GpuOccupancy>,
    pub order: Mutex<Vec<u8>>,
    pub audio: Mutex<Vec<Option<PathBuf>>>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl VideoEncoder for StubEncoder {
    fn name(&self) -> &str {
        "stub"
    }

    async fn encode(&self, request: &EncodeRequest) -> MediaResult<VideoArtifact> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MediaError::encode("nvenc+software", "nvenc: no device; fallback: exit 1"));
        }

        self.gpu.enter();
        let mut reds = Vec::with_capacity(request.frames.count);
        for i in 0..request.frames.count {
            reds.push(request.frames.load(i)?.to_rgb8().get_pixel(0, 0)[0]);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.gpu.exit();

        *self.order.lock().unwrap() = reds;
        self.audio.lock().unwrap().push(request.audio.clone());
        tokio::fs::write(&request.output, b"mp4").await?;

        Ok(VideoArtifact {
            path: request.output.clone(),
            backend: EncoderBackend::Software,
            frame_count: request.frames.count,
            has_audio: request.audio.is_some(),
            size_bytes: 3,
        })
    }
}

/// Catalog wrapper that counts lookups.
pub struct CountingRepository {
    inner: InMemoryTrackRepository,
    pub calls: AtomicUsize,
}

#[async_trait]
impl TrackRepository for CountingRepository {
    async fn count(&self, filter: &TrackFilter) -> CatalogResult<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.count(filter).await
    }

    async fn nth(&self, filter: &TrackFilter, offset: u64) -> CatalogResult<Option<AudioTrack>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.nth(filter, offset).await
    }

    async fn id_range(&self) -> CatalogResult<Option<(i64, i64)>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.id_range().await
    }

    async fn get(&self, id: i64) -> CatalogResult<Option<AudioTrack>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get(id).await
    }

    async fn find_by_name(&self, name: &str) -> CatalogResult<Option<AudioTrack>> {
        self.inner.find_by_name(name).await
    }

    async fn ping(&self) -> CatalogResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "counting"
    }
}

pub fn track(id: i64, name: &str) -> AudioTrack {
    AudioTrack::new(id, name, format!("https://x/{}.mp3", id)).with_duration(30.0)
}

pub struct HarnessBuilder {
    frames: usize,
    tracks: Vec<AudioTrack>,
    timeout: Duration,
    inference_delay: Duration,
    failing_urls: Vec<String>,
    engine_fails: bool,
    encoder_fails: bool,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            frames: 3,
            tracks: Vec::new(),
            timeout: Duration::from_secs(30),
            inference_delay: Duration::ZERO,
            failing_urls: Vec::new(),
            engine_fails: false,
            encoder_fails: false,
        }
    }
}

impl HarnessBuilder {
    pub fn frames(mut self, n: usize) -> Self {
        self.frames = n;
        self
    }

    pub fn tracks(mut self, tracks: Vec<AudioTrack>) -> Self {
        self.tracks = tracks;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn inference_delay(mut self, delay: Duration) -> Self {
        self.inference_delay = delay;
        self
    }

    pub fn failing_url(mut self, url: &str) -> Self {
        self.failing_urls.push(url.to_string());
        self
    }

    pub fn engine_fails(mut self) -> Self {
        self.engine_fails = true;
        self
    }

    pub fn encoder_fails(mut self) -> Self {
        self.encoder_fails = true;
        self
    }

    pub fn build(self) -> Harness {
        let work = TempDir::new().unwrap();
        let gpu = Arc::new(GpuOccupancy::default());

        let resolver = Arc::new(StubResolver {
            failing_urls: self.failing_urls,
            ..Default::default()
        });
        let decoder = Arc::new(StubDecoder {
            frames: self.frames,
            seen: Mutex::new(Vec::new()),
        });
        let engine = Arc::new(StubEngine {
            delay: self.inference_delay,
            fail: self.engine_fails,
            gpu: gpu.clone(),
            calls: AtomicUsize::new(0),
        });
        let encoder = Arc::new(StubEncoder {
            fail: self.encoder_fails,
            gpu: gpu.clone(),
            order: Mutex::new(Vec::new()),
            audio: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        });
        let catalog = Arc::new(CountingRepository {
            inner: InMemoryTrackRepository::new(self.tracks).unwrap(),
            calls: AtomicUsize::new(0),
        });
        let accelerator = Accelerator::new();
        let output_dir = work.path().join("output");

        let services = JobServices {
            resolver: resolver.clone(),
            decoder: decoder.clone(),
            engine: engine.clone(),
            encoder: encoder.clone(),
            selector: AssetSelector::new(catalog.clone()),
            store: Arc::new(LocalArtifactStore::new(&output_dir, Some(CDN.to_string()))),
            accelerator: accelerator.clone(),
        };
        let settings = HandlerSettings {
            work_dir: work.path().join("jobs"),
            job_timeout: self.timeout,
            default_folder: "videos".to_string(),
            upload_retries: 0,
        };

        Harness {
            handler: JobHandler::new(services, settings),
            output_dir,
            work,
            resolver,
            decoder,
            engine,
            encoder,
            catalog,
            accelerator,
            gpu,
        }
    }
}

pub struct Harness {
    pub handler: JobHandler,
    pub output_dir: PathBuf,
    pub work: TempDir,
    pub resolver: Arc<StubResolver>,
    pub decoder: Arc<StubDecoder>,
    pub engine: Arc<StubEngine>,
    pub encoder: Arc<StubEncoder>,
    pub catalog: Arc<CountingRepository>,
    pub accelerator: Accelerator,
    pub gpu: Arc<GpuOccupancy>,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub fn encoder_calls(&self) -> usize {
        self.encoder.calls.load(Ordering::SeqCst)
    }

    pub fn catalog_calls(&self) -> usize {
        self.catalog.calls.load(Ordering::SeqCst)
    }

    /// Files left under the job scratch root.
    pub fn leftover_job_dirs(&self) -> usize {
        std::fs::read_dir(self.work.path().join("jobs"))
            .map(|d| d.count())
            .unwrap_or(0)
    }
}
