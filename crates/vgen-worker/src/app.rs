//! Process wiring: builds every long-lived collaborator once, before the first job.

use std::sync::Arc;

use tracing::info;

use vgen_catalog::{AssetSelector, InMemoryTrackRepository, PgTrackRepository, TrackRepository};
use vgen_media::{
    check_ffmpeg, check_ffprobe, encoder_for_mode, nvenc_available, FfmpegFrameDecoder,
    HttpSourceResolver, OrtSegmenter, SegmentationEngine, SegmenterConfig, SourceResolverConfig,
};
use vgen_storage::{ArtifactStore, LocalArtifactStore, R2Client};

use crate::accelerator::Accelerator;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::handler::{HandlerSettings, JobHandler, JobServices};

/// Load the model and connect every dependency.
pub async fn build_handler(config: &WorkerConfig) -> WorkerResult<JobHandler> {
    check_ffmpeg().map_err(|e| WorkerError::config_error(e.to_string()))?;
    check_ffprobe().map_err(|e| WorkerError::config_error(e.to_string()))?;

    let engine = load_engine(config).await?;

    let nvenc = tokio::task::spawn_blocking(nvenc_available)
        .await
        .map_err(|e| WorkerError::internal(format!("NVENC probe failed: {}", e)))?;
    let encoder = encoder_for_mode(config.encoder_mode, nvenc, config.verify_frames, None)
        .map_err(|e| WorkerError::config_error(e.to_string()))?;

    let resolver = HttpSourceResolver::new(SourceResolverConfig {
        max_file_size: config.max_file_size,
        download_timeout: config.download_timeout,
        input_dir: config.input_dir.clone(),
    })?;

    let services = JobServices {
        resolver: Arc::new(resolver),
        decoder: Arc::new(FfmpegFrameDecoder::new()),
        engine,
        encoder,
        selector: AssetSelector::new(open_catalog(config).await?),
        store: open_store(config).await?,
        accelerator: Accelerator::new(),
    };

    Ok(JobHandler::new(services, HandlerSettings::from_config(config)))
}

/// Load the segmentation model on a blocking thread. Happens once per process.
pub async fn load_engine(config: &WorkerConfig) -> WorkerResult<Arc<dyn SegmentationEngine>> {
    let segmenter_config = SegmenterConfig {
        model_path: config.model_path.clone(),
        input_size: config.model_input_size,
    };
    info!(model = %segmenter_config.model_path.display(), "Loading segmentation model");

    let segmenter = tokio::task::spawn_blocking(move || OrtSegmenter::new(segmenter_config))
        .await
        .map_err(|e| WorkerError::internal(format!("model loader panicked: {}", e)))??;
    Ok(Arc::new(segmenter))
}

/// PostgreSQL when `DATABASE_URL` is set, else the configured or builtin JSON catalog.
pub async fn open_catalog(config: &WorkerConfig) -> WorkerResult<Arc<dyn TrackRepository>> {
    let repo: Arc<dyn TrackRepository> = match (&config.database_url, &config.catalog_file) {
        (Some(url), _) => {
            let repo = PgTrackRepository::connect(url, config.database_max_connections).await?;
            repo.migrate().await?;
            Arc::new(repo)
        }
        (None, Some(path)) => Arc::new(InMemoryTrackRepository::from_json_file(path)?),
        (None, None) => {
            let repo = InMemoryTrackRepository::builtin()?;
            info!(tracks = repo.len(), "Using builtin catalog");
            Arc::new(repo)
        }
    };
    Ok(repo)
}

pub async fn open_store(config: &WorkerConfig) -> WorkerResult<Arc<dyn ArtifactStore>> {
    let store: Arc<dyn ArtifactStore> = if config.r2_enabled {
        Arc::new(R2Client::from_env().await?)
    } else {
        Arc::new(LocalArtifactStore::new(
            config.output_dir.clone(),
            config.public_base_url.clone(),
        ))
    };
    info!(backend = store.backend(), "Artifact store ready");
    Ok(store)
}
