//! Worker scheduler - decides how many worker pipelines run at once

use crate::execution::cancel::{Interrupted, RunSignal};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Strategy for scheduling worker pipelines
///
/// The master pipeline always runs on its own; this only limits workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// One worker pipeline at a time, in declared order
    Sequential,

    /// All worker pipelines concurrently
    #[default]
    Parallel,

    /// At most N worker pipelines concurrently
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    /// Number of worker pipelines allowed to run at once
    pub fn concurrency(&self, workers: usize) -> usize {
        match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => workers.max(1),
            SchedulingStrategy::LimitedParallel(max) => (*max).clamp(1, workers.max(1)),
        }
    }
}

/// Hands out run slots to worker pipelines
#[derive(Debug, Clone)]
pub struct WorkerScheduler {
    slots: Arc<Semaphore>,
}

impl WorkerScheduler {
    pub fn new(strategy: SchedulingStrategy, workers: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(strategy.concurrency(workers))),
        }
    }

    /// Wait for a slot; gives up when the run is interrupted
    pub async fn admit(&self, signal: &RunSignal) -> Result<OwnedSemaphorePermit, Interrupted> {
        match signal.guard(self.slots.clone().acquire_owned()).await? {
            Ok(permit) => Ok(permit),
            // The semaphore is never closed while the scheduler lives
            Err(_closed) => Err(Interrupted::Cancelled),
        }
    }
}
