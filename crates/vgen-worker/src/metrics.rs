//! Prometheus metrics for the worker.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle that renders `/metrics`.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // Job metrics
    pub const JOBS_RECEIVED_TOTAL: &str = "vgen_jobs_received_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vgen_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vgen_jobs_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "vgen_job_duration_seconds";
    pub const JOBS_IN_FLIGHT: &str = "vgen_jobs_in_flight";

    // Pipeline metrics
    pub const STAGE_DURATION_SECONDS: &str = "vgen_stage_duration_seconds";
    pub const FRAMES_PROCESSED_TOTAL: &str = "vgen_frames_processed_total";
    pub const ACCELERATOR_WAIT_SECONDS: &str = "vgen_accelerator_wait_seconds";

    // Audio metrics
    pub const AUDIO_SELECTIONS_TOTAL: &str = "vgen_audio_selections_total";

    // Storage metrics
    pub const UPLOAD_DURATION_SECONDS: &str = "vgen_upload_duration_seconds";
}

pub fn record_job_received() {
    counter!(names::JOBS_RECEIVED_TOTAL).increment(1);
}

pub fn record_job_completed(duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS).record(duration_secs);
}

/// Record a failed job under its error kind.
pub fn record_job_failed(kind: &'static str) {
    let labels = [("kind", kind)];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn set_jobs_in_flight(count: usize) {
    gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
}

pub fn record_stage_duration(stage: &'static str, duration_secs: f64) {
    let labels = [("stage", stage)];
    histogram!(names::STAGE_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_frames_processed(count: usize) {
    counter!(names::FRAMES_PROCESSED_TOTAL).increment(count as u64);
}

pub fn record_accelerator_wait(duration_secs: f64) {
    histogram!(names::ACCELERATOR_WAIT_SECONDS).record(duration_secs);
}

/// `outcome` is one of `selected`, `empty`, `download_failed`, `skipped`.
pub fn record_audio_selection(outcome: &'static str) {
    let labels = [("outcome", outcome)];
    counter!(names::AUDIO_SELECTIONS_TOTAL, &labels).increment(1);
}

pub fn record_upload_duration(backend: &'static str, duration_secs: f64) {
    let labels = [("backend", backend)];
    histogram!(names::UPLOAD_DURATION_SECONDS, &labels).record(duration_secs);
}
