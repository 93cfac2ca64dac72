//! HTTP surface: job entrypoint, workflow post-processing, probes and metrics.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use serde_json::Value;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use vgen_media::{check_ffmpeg, nvenc_available};
use vgen_models::{UpstreamPayload, WorkflowOutput};

use crate::handler::JobHandler;
use crate::metrics;

#[derive(Clone)]
pub struct AppState {
    pub handler: JobHandler,
    pub metrics: Option<PrometheusHandle>,
    in_flight: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(handler: JobHandler, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            handler,
            metrics,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Jobs currently inside `/run` or `/runsync`.
    pub fn jobs_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Counts one running job until dropped, including when the client disconnects.
struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        let running = counter.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_jobs_in_flight(running);
        Self(counter.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let running = self.0.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_jobs_in_flight(running);
    }
}

/// Build the router.
pub fn create_router(state: AppState, max_body_size: usize) -> Router {
    let job_routes = Router::new()
        .route("/run", post(run_job))
        .route("/runsync", post(run_job))
        .route("/postprocess", post(postprocess));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ping", get(health))
        .route("/ready", get(ready));

    let metrics_routes = match state.metrics.clone() {
        Some(handle) => {
            Router::new().route("/metrics", get(move || async move { handle.render() }))
        }
        None => Router::new(),
    };

    Router::new()
        .merge(job_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Pull the job out of a `{id?, input}` envelope. A bare job object is accepted too.
fn unwrap_envelope(body: Value) -> Value {
    let Value::Object(mut envelope) = body else {
        return body;
    };
    let Some(mut input) = envelope.remove("input") else {
        return Value::Object(envelope);
    };

    if let (Some(Value::String(id)), Value::Object(job)) = (envelope.remove("id"), &mut input) {
        if !job.contains_key("correlation_id") && !job.contains_key("id") {
            job.insert("correlation_id".to_string(), Value::String(id));
        }
    }
    input
}

/// Run one job and answer with the upstream-payload envelope.
async fn run_job(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Json<UpstreamPayload> {
    let _running = InFlightGuard::enter(&state.in_flight);
    let result = state.handler.handle_value(unwrap_envelope(body)).await;
    Json(UpstreamPayload::from(&result))
}

/// Convert an upstream payload into the workflow output contract.
async fn postprocess(Json(body): Json<Value>) -> Json<WorkflowOutput> {
    let output = match serde_json::from_value::<UpstreamPayload>(body) {
        Ok(payload) => payload.into_workflow_output(),
        Err(e) => WorkflowOutput::Failure(vgen_models::JobFailure {
            error: format!("malformed upstream payload: {}", e),
        }),
    };
    Json(output)
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Liveness probe. Touches nothing but the clock.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub ffmpeg: CheckStatus,
    pub nvenc: CheckStatus,
    pub model: CheckStatus,
    pub catalog: CheckStatus,
    pub storage: CheckStatus,
}

#[derive(Serialize)]
pub struct CheckStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl CheckStatus {
    fn ok(detail: Option<String>, latency_ms: Option<u64>) -> Self {
        Self {
            status: "ok".to_string(),
            detail,
            error: None,
            latency_ms,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            detail: None,
            error: Some(msg.into()),
            latency_ms: None,
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Readiness probe. NVENC absence is reported but does not fail readiness.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let services = state.handler.services();

    let ffmpeg = match check_ffmpeg() {
        Ok(path) => CheckStatus::ok(Some(path.display().to_string()), None),
        Err(e) => CheckStatus::error(e.to_string()),
    };

    let nvenc = CheckStatus::ok(
        Some(if nvenc_available() { "available" } else { "unavailable" }.to_string()),
        None,
    );

    let model = CheckStatus::ok(Some(services.engine.model_name().to_string()), None);

    let catalog = {
        let start = Instant::now();
        let repo = services.selector.repository();
        match repo.ping().await {
            Ok(()) => CheckStatus::ok(
                Some(repo.backend().to_string()),
                Some(start.elapsed().as_millis() as u64),
            ),
            Err(e) => CheckStatus::error(e.to_string()),
        }
    };

    let storage = {
        let start = Instant::now();
        match services.store.check().await {
            Ok(()) => CheckStatus::ok(
                Some(services.store.backend().to_string()),
                Some(start.elapsed().as_millis() as u64),
            ),
            Err(e) => CheckStatus::error(e.to_string()),
        }
    };

    let all_ok = ffmpeg.is_ok() && catalog.is_ok() && storage.is_ok();
    let response = ReadinessResponse {
        status: if all_ok { "ready" } else { "degraded" }.to_string(),
        checks: ReadinessChecks {
            ffmpeg,
            nvenc,
            model,
            catalog,
            storage,
        },
    };

    let code = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}
