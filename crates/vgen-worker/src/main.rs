//! Video generation worker binary.

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vgen_worker::{
    app, create_router, metrics, sync_code, AppState, WorkerConfig, WorkerError, WorkerResult,
};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    let _ = rustls::crypto::ring::default_provider().install_default();

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();
    info!("Starting vgen-worker");

    if let Err(e) = run().await {
        error!(kind = e.kind(), "Worker failed: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

/// Colored output for dev, JSON for production.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vgen=info,ort=warn,sqlx=warn,tower_http=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run() -> WorkerResult<()> {
    let config = WorkerConfig::from_env()?;
    info!(
        repo = %config.bootstrap.repo_url,
        branch = %config.bootstrap.branch,
        encoder_mode = %config.encoder_mode,
        job_timeout_secs = config.job_timeout.as_secs(),
        r2 = config.r2_enabled,
        "Worker config loaded"
    );

    // Code and model assets must be current before the first job.
    let bootstrap = config.bootstrap.clone();
    let synced = tokio::task::spawn_blocking(move || sync_code(&bootstrap))
        .await
        .map_err(|e| WorkerError::bootstrap(format!("sync task panicked: {}", e)))??;
    info!(commit = synced.short_commit(), "Code ready");

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().map_err(|e| WorkerError::config_error(e.to_string()))?)
    } else {
        None
    };

    let handler = app::build_handler(&config).await?;
    let router = create_router(AppState::new(handler, metrics_handle), config.max_body_size);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| WorkerError::config_error(format!("cannot bind {}: {}", addr, e)))?;
    info!("Listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| WorkerError::internal(format!("server error: {}", e)))?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal");
}
