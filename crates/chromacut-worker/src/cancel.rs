use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chromacut_pipeline::Cancellation;

/// Shared cancellation floor.
///
/// Every job whose generation is below the floor is stale. The owner
/// raises the floor; the worker polls it between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    floor: Arc<AtomicU64>,
}

impl CancelToken {
    /// A token with floor 0 (nothing cancelled).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every job requested before `generation`. The floor never
    /// moves backwards.
    pub fn cancel_before(&self, generation: u64) {
        self.floor.fetch_max(generation, Ordering::AcqRel);
    }

    /// Current floor.
    #[must_use]
    pub fn floor(&self) -> u64 {
        self.floor.load(Ordering::Acquire)
    }

    /// Whether a job at `generation` has been cancelled.
    #[must_use]
    pub fn is_stale(&self, generation: u64) -> bool {
        generation < self.floor()
    }

    /// A [`Cancellation`] view for one job.
    #[must_use]
    pub const fn for_job(&self, generation: u64) -> JobCancel<'_> {
        JobCancel {
            token: self,
            generation,
        }
    }
}

/// [`Cancellation`] for a single job generation.
#[derive(Debug, Clone, Copy)]
pub struct JobCancel<'a> {
    token: &'a CancelToken,
    generation: u64,
}

impl Cancellation for JobCancel<'_> {
    fn is_cancelled(&self) -> bool {
        self.token.is_stale(self.generation)
    }
}
