//! Exclusive access to the GPU context.
//!
//! One job at a time may run inference or a hardware encode. A lease is cheap to clone;
//! the accelerator is free again only after every clone is dropped, so a blocking
//! inference thread that outlives its job still holds it until the call returns.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

#[derive(Debug, Clone)]
pub struct Accelerator {
    permits: Arc<Semaphore>,
}

impl Default for Accelerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Accelerator {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    /// Wait until the accelerator is free.
    pub async fn acquire(&self) -> WorkerResult<AcceleratorLease> {
        let started = Instant::now();
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::internal("accelerator semaphore closed"))?;

        let waited = started.elapsed().as_secs_f64();
        metrics::record_accelerator_wait(waited);
        if waited > 1.0 {
            debug!(waited_secs = waited, "Waited for accelerator");
        }

        Ok(AcceleratorLease {
            _permit: Arc::new(permit),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.permits.available_permits() == 0
    }
}

/// Proof of exclusive accelerator access.
#[derive(Debug, Clone)]
pub struct AcceleratorLease {
    _permit: Arc<OwnedSemaphorePermit>,
}
