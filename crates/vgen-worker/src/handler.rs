//! Job handler: one request in, exactly one [`JobResult`] out.
//!
//! The pipeline runs `resolve -> decode -> segment -> (select audio) -> encode -> store`
//! in its own task under the job deadline. Every failure, including a panic inside a
//! stage or a missed deadline, becomes a `{error}` result at this boundary.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, Instrument};
use validator::Validate;

use vgen_catalog::{AssetSelector, DEFAULT_CANDIDATES};
use vgen_media::{
    discard_artifact, process_frames, DecodeOptions, EncodeRequest, FrameDecoder, FrameSet,
    SegmentationEngine, SourceResolver, VideoEncoder,
};
use vgen_models::{
    AudioMode, Background, CorrelationId, JobRequest, JobResult, JobStage, JobSuccess, MediaSource,
    OutputFormat, RandomizationToken,
};
use vgen_storage::{object_key, ArtifactStore};

use crate::accelerator::Accelerator;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::{retry_async, RetryConfig};

/// Collaborators the handler drives. All are shared, read-only across jobs.
#[derive(Clone)]
pub struct JobServices {
    pub resolver: Arc<dyn SourceResolver>,
    pub decoder: Arc<dyn FrameDecoder>,
    /// Loaded once at startup; never reloaded by a job.
    pub engine: Arc<dyn SegmentationEngine>,
    pub encoder: Arc<dyn VideoEncoder>,
    pub selector: AssetSelector,
    pub store: Arc<dyn ArtifactStore>,
    pub accelerator: Accelerator,
}

/// Handler limits taken from [`WorkerConfig`].
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub work_dir: PathBuf,
    pub job_timeout: Duration,
    /// Folder used when a job keeps the default `videos` folder.
    pub default_folder: String,
    pub upload_retries: u32,
}

impl HandlerSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            job_timeout: config.job_timeout,
            default_folder: config.output_folder.clone(),
            upload_retries: 3,
        }
    }

    fn effective_timeout(&self, requested_secs: Option<u64>) -> Duration {
        match requested_secs {
            Some(secs) => Duration::from_secs(secs).min(self.job_timeout),
            None => self.job_timeout,
        }
    }
}

/// Raises its flag when dropped, which happens when the job task is aborted mid-await.
#[derive(Default)]
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// What the pipeline produced before timing is attached.
#[derive(Debug)]
struct Rendered {
    filename: String,
    video_url: String,
    randomization: Option<RandomizationToken>,
}

#[derive(Clone)]
pub struct JobHandler {
    services: Arc<JobServices>,
    settings: Arc<HandlerSettings>,
}

impl JobHandler {
    pub fn new(services: JobServices, settings: HandlerSettings) -> Self {
        Self {
            services: Arc::new(services),
            settings: Arc::new(settings),
        }
    }

    pub fn services(&self) -> &JobServices {
        &self.services
    }

    /// Parse a raw payload and handle it. Malformed payloads become input errors.
    pub async fn handle_value(&self, payload: serde_json::Value) -> JobResult {
        match JobRequest::parse(payload) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                let err = WorkerError::from(e);
                metrics::record_job_received();
                metrics::record_job_failed(err.kind());
                tracing::warn!(error = %err, "Rejected job payload");
                JobResult::failure(err.to_string())
            }
        }
    }

    /// Run one job to a terminal result.
    pub async fn handle(&self, request: JobRequest) -> JobResult {
        let started = Instant::now();
        metrics::record_job_received();

        let logger = JobLogger::new(&request.correlation_id, "generate_video");
        let span = logger.create_span();
        let timeout = self.settings.effective_timeout(request.options.timeout_seconds);

        let outcome = match request.validate() {
            Err(e) => Err(WorkerError::from(vgen_models::RequestError::from(e))),
            Ok(()) => {
                logger.log_start(&describe_job(&request));
                let job = self.clone();
                let task_logger = logger.clone();
                let mut task = tokio::spawn(
                    async move { job.run(request, task_logger).await }.instrument(span),
                );

                match tokio::time::timeout(timeout, &mut task).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(join_err)) => Err(WorkerError::internal(format!(
                        "job task aborted: {}",
                        join_err
                    ))),
                    Err(_) => {
                        // Dropping the task kills child processes and flags inference to stop
                        // before its next frame.
                        task.abort();
                        Err(WorkerError::Timeout(timeout))
                    }
                }
            }
        };

        let processing_time = started.elapsed().as_secs_f64();
        match outcome {
            Ok(rendered) => {
                metrics::record_job_completed(processing_time);
                logger.log_completion(&format!(
                    "{} in {:.2}s",
                    rendered.video_url, processing_time
                ));
                JobResult::Success(JobSuccess {
                    filename: rendered.filename,
                    video_url: rendered.video_url,
                    randomization: rendered.randomization.map(|t| t.to_string()),
                    processing_time,
                })
            }
            Err(err) => {
                metrics::record_job_failed(err.kind());
                logger.log_error(err.kind(), &err.to_string());
                JobResult::failure(err.to_string())
            }
        }
    }

    async fn run(&self, request: JobRequest, logger: JobLogger) -> WorkerResult<Rendered> {
        let mut stages = StageTracker::new(logger);
        let result = self.pipeline(&request, &mut stages).await;
        if let Err(err) = &result {
            stages.fail(err);
        }
        result
    }

    async fn pipeline(
        &self,
        request: &JobRequest,
        stages: &mut StageTracker,
    ) -> WorkerResult<Rendered> {
        let source = request
            .source
            .as_ref()
            .ok_or_else(|| WorkerError::input("job has no media source"))?;
        let options = &request.options;

        tokio::fs::create_dir_all(&self.settings.work_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix("job-")
            .tempdir_in(&self.settings.work_dir)?;

        stages.advance(JobStage::Decoding, &source.describe())?;
        let frames = self.decode(source, request, scratch.path()).await?;

        stages.advance(JobStage::Inferring, &format!("{} frames", frames.count))?;
        let background = options.background();
        let processed = self
            .segment(frames, background, options.post_process_mask, scratch.path())
            .await?;
        metrics::record_frames_processed(processed.count);

        let audio = match options.audio_mode() {
            AudioMode::Disabled => {
                metrics::record_audio_selection("skipped");
                None
            }
            mode => {
                stages.advance(JobStage::SelectingAudio, mode_label(mode))?;
                self.select_audio(request, mode, scratch.path(), stages.logger()).await?
            }
        };

        stages.advance(JobStage::Encoding, self.services.encoder.name())?;
        let (audio_path, token) = match audio {
            Some((path, token)) => (Some(path), Some(token)),
            None => (None, None),
        };
        let filename = output_filename(&request.correlation_id, options.output_format);
        let encode_request = EncodeRequest {
            frames: processed,
            audio: audio_path,
            format: options.output_format,
            alpha: background == Background::Transparent,
            output: scratch.path().join(&filename),
        };
        let artifact = self.encode(&encode_request).await?;

        let folder = if options.folder == vgen_models::job::DEFAULT_FOLDER {
            self.settings.default_folder.as_str()
        } else {
            options.folder.as_str()
        };
        let key = object_key(folder, &filename)?;
        let video_url = self
            .store(&artifact.path, &key, options.output_format.content_type())
            .await?;

        stages.advance(JobStage::Completed, &key)?;
        Ok(Rendered {
            filename,
            video_url,
            randomization: token,
        })
    }

    async fn decode(
        &self,
        source: &MediaSource,
        request: &JobRequest,
        scratch: &Path,
    ) -> WorkerResult<FrameSet> {
        let input = self.services.resolver.resolve(source, scratch).await?;
        let options = DecodeOptions {
            frame_step: request.options.frame_step,
            max_frames: request.options.max_frames,
        };
        let frames = self
            .services
            .decoder
            .decode(&input, &scratch.join("frames"), &options)
            .await?;

        if frames.is_empty() {
            return Err(WorkerError::input("source decoded to zero frames"));
        }
        Ok(frames)
    }

    /// Segment every frame on a blocking thread while holding the accelerator.
    async fn segment(
        &self,
        frames: FrameSet,
        background: Background,
        post_process: bool,
        scratch: &Path,
    ) -> WorkerResult<FrameSet> {
        let lease = self.services.accelerator.acquire().await?;
        let engine = self.services.engine.clone();
        let out_dir = scratch.join("processed");
        let cancel = CancelOnDrop::default();
        let flag = cancel.0.clone();

        let task = tokio::task::spawn_blocking(move || {
            let _lease = lease;
            process_frames(engine.as_ref(), &frames, &out_dir, background, post_process, &flag)
        });

        let processed = task
            .await
            .map_err(|e| WorkerError::inference(format!("segmentation task failed: {}", e)))??;
        Ok(processed)
    }

    /// Draw audio candidates and download the first one that works.
    async fn select_audio(
        &self,
        request: &JobRequest,
        mode: AudioMode,
        scratch: &Path,
        logger: &JobLogger,
    ) -> WorkerResult<Option<(PathBuf, RandomizationToken)>> {
        let seed = request.options.seed.unwrap_or_else(rand::random);
        let candidates = match self
            .services
            .selector
            .select_candidates(request.options.audio_filter.as_ref(), seed, DEFAULT_CANDIDATES)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) if mode == AudioMode::Optional => {
                logger.log_warning(&format!(
                    "catalog unavailable, continuing without audio: {}",
                    e
                ));
                metrics::record_audio_selection("empty");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if candidates.is_empty() {
            metrics::record_audio_selection("empty");
            return match mode {
                AudioMode::Required => {
                    Err(WorkerError::asset_selection("no audio track available"))
                }
                _ => {
                    logger.log_warning("no audio track available, continuing without audio");
                    Ok(None)
                }
            };
        }

        let tried = candidates.len();
        let mut last_error = None;
        for candidate in candidates {
            let stem = format!("audio_{}", candidate.track.id);
            match self.services.resolver.fetch(&candidate.track.url, scratch, &stem).await {
                Ok(path) => {
                    metrics::record_audio_selection("selected");
                    info!(
                        track_id = candidate.track.id,
                        track = %candidate.track.name,
                        "Selected audio track"
                    );
                    return Ok(Some((path, candidate.token)));
                }
                Err(e) => {
                    logger.log_warning(&format!(
                        "audio track {} unusable: {}",
                        candidate.track.id, e
                    ));
                    last_error = Some(e);
                }
            }
        }

        metrics::record_audio_selection("download_failed");
        let detail = last_error.map(|e| e.to_string()).unwrap_or_default();
        match mode {
            AudioMode::Required => Err(WorkerError::asset_selection(format!(
                "none of {} audio candidates could be downloaded: {}",
                tried, detail
            ))),
            _ => {
                logger.log_warning("continuing without audio");
                Ok(None)
            }
        }
    }

    async fn encode(&self, request: &EncodeRequest) -> WorkerResult<vgen_media::VideoArtifact> {
        let _lease = self.services.accelerator.acquire().await?;
        let artifact = self.services.encoder.encode(request).await?;

        // Frame counts are checked against ffprobe inside the encoder when
        // ENCODER_VERIFY_FRAMES is on; the artifact only echoes the request.
        if artifact.size_bytes == 0 {
            discard_artifact(&artifact.path).await;
            return Err(WorkerError::encode(format!(
                "{} produced an empty file",
                self.services.encoder.name()
            )));
        }
        Ok(artifact)
    }

    async fn store(&self, path: &Path, key: &str, content_type: &str) -> WorkerResult<String> {
        let store = &self.services.store;
        let retry = RetryConfig::new(format!("{} upload", store.backend()))
            .with_max_retries(self.settings.upload_retries);

        let started = Instant::now();
        let url = retry_async(&retry, |e: &vgen_storage::StorageError| e.is_transient(), || {
            store.store(path, key, content_type)
        })
        .await
        .into_result()?;
        metrics::record_upload_duration(store.backend(), started.elapsed().as_secs_f64());
        Ok(url)
    }
}

/// `vgen_{correlation stem}.{ext}`: stable for one correlation id, distinct across ids.
pub fn output_filename(id: &CorrelationId, format: OutputFormat) -> String {
    format!("vgen_{}.{}", id.file_stem(), format.extension())
}

fn describe_job(request: &JobRequest) -> String {
    let source = request
        .source
        .as_ref()
        .map(|s| s.describe())
        .unwrap_or_else(|| "<none>".to_string());
    format!(
        "source={} format={} audio={}",
        source,
        request.options.output_format,
        mode_label(request.options.audio_mode())
    )
}

fn mode_label(mode: AudioMode) -> &'static str {
    match mode {
        AudioMode::Disabled => "disabled",
        AudioMode::Optional => "optional",
        AudioMode::Required => "required",
    }
}

/// Enforces the stage machine and records how long each stage took.
struct StageTracker {
    logger: JobLogger,
    current: JobStage,
    entered: Instant,
}

impl StageTracker {
    fn new(logger: JobLogger) -> Self {
        Self {
            logger,
            current: JobStage::Received,
            entered: Instant::now(),
        }
    }

    fn logger(&self) -> &JobLogger {
        &self.logger
    }

    fn advance(&mut self, next: JobStage, message: &str) -> WorkerResult<()> {
        if !self.current.can_transition_to(next) {
            return Err(WorkerError::internal(format!(
                "illegal stage transition {} -> {}",
                self.current, next
            )));
        }
        metrics::record_stage_duration(self.current.as_str(), self.entered.elapsed().as_secs_f64());
        self.current = next;
        self.entered = Instant::now();
        self.logger.log_stage(next, message);
        Ok(())
    }

    fn fail(&mut self, err: &WorkerError) {
        if self.current.can_transition_to(JobStage::Failed) {
            metrics::record_stage_duration(
                self.current.as_str(),
                self.entered.elapsed().as_secs_f64(),
            );
            self.logger
                .log_stage(JobStage::Failed, &format!("failed during {}: {}", self.current, err));
            self.current = JobStage::Failed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_filename_is_stable_per_id() {
        let a = CorrelationId::from_string("job-1");
        let b = CorrelationId::from_string("job-2");
        assert_eq!(output_filename(&a, OutputFormat::Mp4), output_filename(&a, OutputFormat::Mp4));
        assert_ne!(output_filename(&a, OutputFormat::Mp4), output_filename(&b, OutputFormat::Mp4));
        assert!(output_filename(&a, OutputFormat::Webm).ends_with(".webm"));
        assert!(output_filename(&a, OutputFormat::Mp4).starts_with("vgen_job-1_"));
    }

    #[test]
    fn test_stage_tracker_rejects_skipping_inference() {
        let logger = JobLogger::new(&CorrelationId::from_string("t"), "test");
        let mut stages = StageTracker::new(logger);
        stages.advance(JobStage::Decoding, "").unwrap();
        assert!(stages.advance(JobStage::Encoding, "").is_err());
        stages.advance(JobStage::Inferring, "").unwrap();
        stages.advance(JobStage::Encoding, "").unwrap();
        stages.fail(&WorkerError::encode("boom"));
        assert_eq!(stages.current, JobStage::Failed);
    }

    #[test]
    fn test_effective_timeout_never_exceeds_worker_limit() {
        let settings = HandlerSettings {
            work_dir: PathBuf::from("/tmp"),
            job_timeout: Duration::from_secs(60),
            default_folder: "videos".into(),
            upload_retries: 0,
        };
        assert_eq!(settings.effective_timeout(Some(5)), Duration::from_secs(5));
        assert_eq!(settings.effective_timeout(Some(600)), Duration::from_secs(60));
    }
}
