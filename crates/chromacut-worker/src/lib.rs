//! Off-thread execution and debounced scheduling for chromacut.
//!
//! The [`Orchestrator`] owns the current source, parameters, cached keyed
//! base and displayed output. Parameter edits are classified as heavy or
//! light, debounced, and dispatched to an [`Executor`]; responses carry
//! the generation they were requested at, and anything older than the
//! latest request is discarded. [`ThreadExecutor`] runs jobs on a
//! dedicated native thread so the caller's thread never blocks on pixel
//! work.
//!
//! The orchestrator is sans-IO with respect to time: every method that
//! can start work takes the current [`Instant`](web_time::Instant), and
//! [`Orchestrator::next_deadline`] tells the caller when to poll next.

mod cancel;
mod config;
mod executor;
mod job;
mod orchestrator;

pub use cancel::{CancelToken, JobCancel};
pub use config::SchedulerConfig;
pub use executor::{Executor, ThreadExecutor};
pub use job::{Job, JobKind, JobResponse, execute};
pub use orchestrator::{Orchestrator, OrchestratorState, PipelineResult, Update};

use chromacut_pipeline::PipelineError;

/// Errors surfaced by the worker layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    /// The worker thread is gone; [`Executor::restart`] brings it back.
    #[error("worker is not running")]
    Disconnected,

    /// The worker thread could not be started.
    #[error("failed to start worker thread: {0}")]
    Spawn(String),

    /// A job panicked; the worker itself survived.
    #[error("worker panicked while processing: {0}")]
    Panicked(String),

    /// The pipeline returned an error.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl WorkerError {
    /// True when the executor must be restarted before it can take more
    /// work.
    #[must_use]
    pub const fn needs_restart(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Spawn(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_errors_convert() {
        let err: WorkerError = PipelineError::Cancelled.into();
        assert_eq!(err, WorkerError::Pipeline(PipelineError::Cancelled));
        assert_eq!(err.to_string(), "pipeline run was cancelled");
    }

    #[test]
    fn restart_needed_only_for_dead_workers() {
        assert!(WorkerError::Disconnected.needs_restart());
        assert!(WorkerError::Spawn("nope".into()).needs_restart());
        assert!(!WorkerError::Panicked("boom".into()).needs_restart());
    }
}
