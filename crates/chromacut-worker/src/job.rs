use chromacut_pipeline::{
    CachedBase, ChangeClass, ParameterSet, PipelineError, RgbaImage, RunOutput, WebClock,
    run_heavy, run_light,
};
use tracing::{debug, info, warn};

use crate::WorkerError;
use crate::cancel::CancelToken;

/// What a job has to compute.
#[derive(Debug, Clone)]
pub enum JobKind {
    /// Sample, classify and refine from the source.
    Heavy {
        /// Source raster.
        source: RgbaImage,
        /// Parameters to run with.
        params: ParameterSet,
    },
    /// Refine a cached base.
    Light {
        /// Keyed base from an earlier heavy run.
        base: CachedBase,
        /// Parameters to run with.
        params: ParameterSet,
    },
}

impl JobKind {
    /// Which tier this job runs.
    #[must_use]
    pub const fn class(&self) -> ChangeClass {
        match self {
            Self::Heavy { .. } => ChangeClass::Heavy,
            Self::Light { .. } => ChangeClass::Light,
        }
    }
}

/// A unit of work tagged with the generation it was requested at.
#[derive(Debug, Clone)]
pub struct Job {
    /// Request generation, echoed in the response.
    pub generation: u64,
    /// The work.
    pub kind: JobKind,
}

/// Result of a [`Job`].
#[derive(Debug)]
pub struct JobResponse {
    /// Generation of the job this answers.
    pub generation: u64,
    /// Tier that ran.
    pub class: ChangeClass,
    /// Output or failure.
    pub outcome: Result<RunOutput, WorkerError>,
}

/// Run `job` to completion on the current thread.
///
/// `cancel` is polled between stages; a stale job returns
/// [`PipelineError::Cancelled`] without finishing.
pub fn execute(job: Job, cancel: &CancelToken) -> JobResponse {
    let generation = job.generation;
    let class = job.kind.class();
    let guard = cancel.for_job(generation);
    let result = match &job.kind {
        JobKind::Heavy { source, params } => run_heavy(source, params, &guard, &WebClock),
        JobKind::Light { base, params } => run_light(base, params, &guard, &WebClock),
    };
    match &result {
        Ok(output) => info!(
            generation,
            %class,
            duration_ms = output.diagnostics.total_duration.as_secs_f64() * 1000.0,
            "job finished"
        ),
        Err(PipelineError::Cancelled) => debug!(generation, %class, "job cancelled"),
        Err(e) => warn!(generation, %class, error = %e, "job failed"),
    }
    JobResponse {
        generation,
        class,
        outcome: result.map_err(WorkerError::from),
    }
}
