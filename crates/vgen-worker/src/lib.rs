//! Serverless GPU worker for background-replacement video generation.
//!
//! This crate provides:
//! - The job handler that turns one request into exactly one result
//! - Exclusive accelerator leasing for inference and hardware encoding
//! - Git-based code bootstrap at process start
//! - The HTTP surface (job entrypoint, workflow post-processing, probes, metrics)

pub mod accelerator;
pub mod app;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod server;

pub use accelerator::{Accelerator, AcceleratorLease};
pub use bootstrap::{sync_code, SyncOutcome};
pub use config::{BootstrapConfig, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use handler::{output_filename, HandlerSettings, JobHandler, JobServices};
pub use logging::JobLogger;
pub use server::{create_router, AppState};
