//! Debounced, generation-checked scheduling of pipeline runs.
//!
//! Every accepted request bumps a monotonically increasing generation.
//! At most one job is in flight; a newer request waits in `pending`
//! until its debounce window has elapsed and the in-flight job has come
//! back. A response is shown only if its generation is still the latest,
//! so the displayed output always reflects the most recent request.
//!
//! A stale heavy response still carries a keyed base. If that base's
//! fingerprint matches the current source and heavy parameters it is
//! adopted, which lets a light edit made while keying was in progress go
//! straight to the light tier.
//!
//! While a manual edit is open nothing is dispatched, and a current result
//! that arrives is held back until the edit closes.

use chromacut_pipeline::{
    CachedBase, ChangeClass, ChromaColor, ParameterSet, PipelineDiagnostics, PipelineError,
    RgbaImage, heavy_fingerprint, raster, source_digest,
};
use tracing::{debug, info, warn};
use web_time::Instant;

use crate::WorkerError;
use crate::config::SchedulerConfig;
use crate::executor::Executor;
use crate::job::{Job, JobKind, JobResponse};

/// Observable scheduler state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Output is current; nothing pending.
    Idle,
    /// A change is waiting out its debounce window.
    Debouncing(ChangeClass),
    /// A heavy job is in flight.
    HeavyRunning,
    /// A light job is in flight.
    LightRunning,
    /// A manual edit is open; dispatch is held.
    Suspended,
    /// The last attempt failed; [`Orchestrator::retry`] resumes.
    Failed(WorkerError),
}

/// Something that happened during [`Orchestrator::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// A response was current and is now displayed.
    Applied {
        /// Generation of the response.
        generation: u64,
        /// Tier that produced it.
        class: ChangeClass,
    },
    /// A current response arrived during a manual edit and is held until
    /// the edit closes.
    Held {
        /// Generation of the response.
        generation: u64,
        /// Tier that produced it.
        class: ChangeClass,
    },
    /// A response arrived after a newer request and was discarded.
    Superseded {
        /// Generation of the response.
        generation: u64,
        /// Tier that produced it.
        class: ChangeClass,
        /// True when its keyed base was still valid and was kept.
        base_adopted: bool,
    },
    /// The latest request failed. The previous output stays displayed.
    Failed {
        /// Generation that failed.
        generation: u64,
        /// Why.
        error: WorkerError,
    },
}

/// What the caller should display.
#[derive(Debug, Clone, Copy)]
pub struct PipelineResult<'a> {
    /// Latest output, or the untouched source before the first result.
    pub raster: &'a RgbaImage,
    /// Key color behind `raster`; `None` while showing the source.
    pub used_chroma: Option<ChromaColor>,
    /// True while a newer request has not produced output yet.
    pub tuning_dirty: bool,
}

#[derive(Debug)]
struct Pending {
    class: ChangeClass,
    due: Instant,
}

#[derive(Debug)]
struct InFlight {
    class: ChangeClass,
    generation: u64,
}

#[derive(Debug)]
struct Displayed {
    raster: RgbaImage,
    used_chroma: Option<ChromaColor>,
}

#[derive(Debug)]
struct Held {
    generation: u64,
    class: ChangeClass,
    output: Displayed,
    diagnostics: PipelineDiagnostics,
}

/// Owns the pipeline state for one source image.
pub struct Orchestrator<E> {
    executor: E,
    config: SchedulerConfig,
    source: RgbaImage,
    source_digest: u64,
    params: ParameterSet,
    base: Option<CachedBase>,
    output: Option<Displayed>,
    diagnostics: Option<PipelineDiagnostics>,
    generation: u64,
    pending: Option<Pending>,
    in_flight: Option<InFlight>,
    editing: bool,
    held: Option<Held>,
    failure: Option<(ChangeClass, WorkerError)>,
}

impl<E: Executor> Orchestrator<E> {
    /// Take ownership of `source` and schedule the first heavy run, due
    /// at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidGeometry`] for a zero-area source.
    pub fn new(
        executor: E,
        config: SchedulerConfig,
        source: RgbaImage,
        params: &ParameterSet,
        now: Instant,
    ) -> Result<Self, PipelineError> {
        raster::validate(&source)?;
        let source_digest = source_digest(&source);
        let mut orchestrator = Self {
            executor,
            config,
            source,
            source_digest,
            params: params.clamped(),
            base: None,
            output: None,
            diagnostics: None,
            generation: 0,
            pending: None,
            in_flight: None,
            editing: false,
            held: None,
            failure: None,
        };
        orchestrator.schedule(ChangeClass::Heavy, now);
        Ok(orchestrator)
    }

    /// Replace the source image. The new image is keyed without waiting
    /// for a debounce window.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidGeometry`] for a zero-area source;
    /// the current source stays in place.
    pub fn set_source(&mut self, source: RgbaImage, now: Instant) -> Result<(), PipelineError> {
        raster::validate(&source)?;
        self.source_digest = source_digest(&source);
        self.source = source;
        self.output = None;
        self.diagnostics = None;
        info!(
            width = self.source.width(),
            height = self.source.height(),
            "source replaced"
        );
        self.schedule(ChangeClass::Heavy, now);
        Ok(())
    }

    /// Apply a parameter edit. Out-of-range values are clamped.
    ///
    /// Returns the class of the change, or `None` if nothing observable
    /// changed (in which case nothing is scheduled).
    pub fn set_params(&mut self, params: &ParameterSet, now: Instant) -> Option<ChangeClass> {
        let next = params.clamped();
        let class = self.params.change_class(&next)?;
        self.params = next;
        // The window restarts on every edit, sized for the combined change.
        let combined = self
            .pending
            .as_ref()
            .map_or(class, |pending| pending.class.max(class));
        let due = now + self.config.debounce(combined);
        self.schedule(class, due);
        Some(class)
    }

    fn schedule(&mut self, class: ChangeClass, due: Instant) {
        self.generation += 1;
        if class == ChangeClass::Heavy {
            self.base = None;
            self.executor.cancel_token().cancel_before(self.generation);
        }
        let class = self
            .pending
            .as_ref()
            .map_or(class, |pending| pending.class.max(class));
        self.pending = Some(Pending { class, due });
        self.held = None;
        self.failure = None;
        debug!(generation = self.generation, %class, "change scheduled");
    }

    /// Hold dispatch while the user edits the output by hand.
    pub fn begin_manual_edit(&mut self) {
        self.editing = true;
        debug!("manual edit started");
    }

    /// Close a manual edit. Work held during the edit becomes eligible on
    /// the next poll.
    ///
    /// `Some` replaces the displayed output and discards any result that
    /// finished during the edit. `None` keeps the output, or applies the
    /// held result if there is one, reported as [`Update::Applied`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DimensionMismatch`] if `edited` is not the
    /// size of the source; the edit stays open.
    pub fn commit_manual_edit(
        &mut self,
        edited: Option<RgbaImage>,
    ) -> Result<Option<Update>, PipelineError> {
        let update = match edited {
            Some(raster) => {
                let expected = self.source.dimensions();
                let actual = raster.dimensions();
                if expected != actual {
                    return Err(PipelineError::DimensionMismatch { expected, actual });
                }
                if let Some(held) = self.held.take() {
                    debug!(generation = held.generation, "held output replaced by manual edit");
                }
                let used_chroma = self.output.as_ref().and_then(|o| o.used_chroma);
                self.output = Some(Displayed {
                    raster,
                    used_chroma,
                });
                None
            }
            None => self.release_held(),
        };
        self.editing = false;
        debug!("manual edit committed");
        Ok(update)
    }

    /// Close a manual edit without touching the output. A result held
    /// during the edit is applied.
    pub fn cancel_manual_edit(&mut self) -> Option<Update> {
        self.editing = false;
        debug!("manual edit cancelled");
        self.release_held()
    }

    fn release_held(&mut self) -> Option<Update> {
        let held = self.held.take()?;
        if held.generation != self.generation {
            return None;
        }
        info!(generation = held.generation, class = %held.class, "held output applied");
        self.output = Some(held.output);
        self.diagnostics = Some(held.diagnostics);
        Some(Update::Applied {
            generation: held.generation,
            class: held.class,
        })
    }

    /// Drain finished responses and dispatch due work.
    pub fn poll(&mut self, now: Instant) -> Vec<Update> {
        let mut updates = Vec::new();
        loop {
            match self.executor.try_recv() {
                Ok(Some(response)) => updates.push(self.accept(response)),
                Ok(None) => break,
                Err(error) => {
                    let class = self
                        .in_flight
                        .take()
                        .map_or(ChangeClass::Heavy, |job| job.class);
                    warn!(error = %error, "worker lost");
                    self.failure = Some((class, error.clone()));
                    updates.push(Update::Failed {
                        generation: self.generation,
                        error,
                    });
                    break;
                }
            }
        }
        if let Some(update) = self.dispatch_due(now) {
            updates.push(update);
        }
        updates
    }

    fn accept(&mut self, response: JobResponse) -> Update {
        let JobResponse {
            generation,
            class,
            outcome,
        } = response;
        if self
            .in_flight
            .as_ref()
            .is_some_and(|job| job.generation == generation)
        {
            self.in_flight = None;
        }
        let current = generation == self.generation;

        match outcome {
            Ok(output) => {
                let base_adopted = output.base.is_some_and(|base| self.adopt_base(base));
                if current && self.editing {
                    debug!(generation, %class, "output held during manual edit");
                    self.held = Some(Held {
                        generation,
                        class,
                        output: Displayed {
                            raster: output.raster,
                            used_chroma: Some(output.used_chroma),
                        },
                        diagnostics: output.diagnostics,
                    });
                    Update::Held { generation, class }
                } else if current {
                    info!(generation, %class, "output updated");
                    self.output = Some(Displayed {
                        raster: output.raster,
                        used_chroma: Some(output.used_chroma),
                    });
                    self.diagnostics = Some(output.diagnostics);
                    Update::Applied { generation, class }
                } else {
                    debug!(generation, latest = self.generation, base_adopted, "stale output dropped");
                    Update::Superseded {
                        generation,
                        class,
                        base_adopted,
                    }
                }
            }
            Err(error) if current && error != WorkerError::Pipeline(PipelineError::Cancelled) => {
                warn!(generation, %class, error = %error, "job failed");
                self.failure = Some((class, error.clone()));
                Update::Failed { generation, error }
            }
            Err(error) => {
                debug!(generation, error = %error, "stale job ended");
                Update::Superseded {
                    generation,
                    class,
                    base_adopted: false,
                }
            }
        }
    }

    fn adopt_base(&mut self, base: CachedBase) -> bool {
        if self.base.is_some() {
            return false;
        }
        let expected = heavy_fingerprint(self.source_digest, &self.params);
        if base.fingerprint() != expected || base.dimensions() != self.source.dimensions() {
            return false;
        }
        self.base = Some(base);
        true
    }

    fn dispatch_due(&mut self, now: Instant) -> Option<Update> {
        if self.editing || self.in_flight.is_some() || self.failure.is_some() {
            return None;
        }
        if now < self.pending.as_ref()?.due {
            return None;
        }
        let pending = self.pending.take()?;
        let params = self.params.clone();
        let kind = match (pending.class, &self.base) {
            (ChangeClass::Light, Some(base)) => JobKind::Light {
                base: base.clone(),
                params,
            },
            _ => JobKind::Heavy {
                source: self.source.clone(),
                params,
            },
        };
        let class = kind.class();
        let generation = self.generation;
        match self.executor.submit(Job { generation, kind }) {
            Ok(()) => {
                info!(generation, %class, "job dispatched");
                self.in_flight = Some(InFlight { class, generation });
                None
            }
            Err(error) => {
                warn!(generation, %class, error = %error, "dispatch failed");
                self.failure = Some((class, error.clone()));
                Some(Update::Failed { generation, error })
            }
        }
    }

    /// Re-queue the failed request, restarting the executor first if it
    /// died. Does nothing when there is no failure.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Spawn`] if the executor cannot be
    /// restarted; the failure stays recorded.
    pub fn retry(&mut self, now: Instant) -> Result<(), WorkerError> {
        let Some((class, error)) = self.failure.take() else {
            return Ok(());
        };
        if error.needs_restart() {
            if let Err(restart_error) = self.executor.restart() {
                self.failure = Some((class, restart_error.clone()));
                return Err(restart_error);
            }
            // In-flight work died with the old worker.
            self.in_flight = None;
        }
        info!(%class, "retrying");
        self.schedule(class, now);
        Ok(())
    }

    /// Discard the output and any pending or in-flight work, showing the
    /// source again. The cached base is kept.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.executor.cancel_token().cancel_before(self.generation);
        self.pending = None;
        self.output = None;
        self.diagnostics = None;
        self.held = None;
        self.failure = None;
        self.editing = false;
        debug!(generation = self.generation, "reset");
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> OrchestratorState {
        if let Some((_, error)) = &self.failure {
            return OrchestratorState::Failed(error.clone());
        }
        if self.editing {
            return OrchestratorState::Suspended;
        }
        match (&self.in_flight, &self.pending) {
            (Some(job), _) if job.class == ChangeClass::Heavy => OrchestratorState::HeavyRunning,
            (Some(_), _) => OrchestratorState::LightRunning,
            (None, Some(pending)) => OrchestratorState::Debouncing(pending.class),
            (None, None) => OrchestratorState::Idle,
        }
    }

    /// What to display right now.
    #[must_use]
    pub fn result(&self) -> PipelineResult<'_> {
        PipelineResult {
            raster: self.output.as_ref().map_or(&self.source, |o| &o.raster),
            used_chroma: self.output.as_ref().and_then(|o| o.used_chroma),
            tuning_dirty: self.pending.is_some()
                || self.in_flight.is_some()
                || self.held.is_some()
                || self.failure.is_some(),
        }
    }

    /// When the next pending change becomes due, if dispatch is possible
    /// at all.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.editing || self.in_flight.is_some() || self.failure.is_some() {
            return None;
        }
        self.pending.as_ref().map(|p| p.due)
    }

    /// The clamped parameters of the latest request.
    #[must_use]
    pub const fn params(&self) -> &ParameterSet {
        &self.params
    }

    /// The source image.
    #[must_use]
    pub const fn source(&self) -> &RgbaImage {
        &self.source
    }

    /// The cached keyed base, if it is valid for the current request.
    #[must_use]
    pub const fn cached_base(&self) -> Option<&CachedBase> {
        self.base.as_ref()
    }

    /// Diagnostics of the displayed output.
    #[must_use]
    pub const fn diagnostics(&self) -> Option<&PipelineDiagnostics> {
        self.diagnostics.as_ref()
    }

    /// Latest request generation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// The scheduler configuration.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The executor.
    #[must_use]
    pub const fn executor(&self) -> &E {
        &self.executor
    }

    /// The executor, mutably.
    pub const fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use chromacut_pipeline::{ChromaMode, ChromaPreset};
    use image::Rgba;

    use super::*;
    use crate::cancel::CancelToken;
    use crate::job;

    /// Runs jobs only when told to.
    #[derive(Default)]
    struct ManualExecutor {
        queue: VecDeque<Job>,
        done: VecDeque<JobResponse>,
        submitted: Vec<(u64, ChangeClass)>,
        cancel: CancelToken,
        dead: bool,
        restarts: u32,
    }

    impl ManualExecutor {
        fn run_next(&mut self) {
            let job = self.queue.pop_front().unwrap();
            self.done.push_back(job::execute(job, &self.cancel));
        }

        fn fail_next(&mut self, error: WorkerError) {
            let job = self.queue.pop_front().unwrap();
            self.done.push_back(JobResponse {
                generation: job.generation,
                class: job.kind.class(),
                outcome: Err(error),
            });
        }
    }

    impl Executor for ManualExecutor {
        fn submit(&mut self, job: Job) -> Result<(), WorkerError> {
            if self.dead {
                return Err(WorkerError::Disconnected);
            }
            self.submitted.push((job.generation, job.kind.class()));
            self.queue.push_back(job);
            Ok(())
        }

        fn try_recv(&mut self) -> Result<Option<JobResponse>, WorkerError> {
            Ok(self.done.pop_front())
        }

        fn cancel_token(&self) -> &CancelToken {
            &self.cancel
        }

        fn restart(&mut self) -> Result<(), WorkerError> {
            self.dead = false;
            self.restarts += 1;
            self.queue.clear();
            Ok(())
        }
    }

    fn scene() -> RgbaImage {
        RgbaImage::from_fn(32, 32, |x, y| {
            if (8..24).contains(&x) && (8..24).contains(&y) {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([255, 0, 255, 255])
            }
        })
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn light_edit(radius: u32) -> ParameterSet {
        ParameterSet {
            feather_radius: radius,
            ..ParameterSet::default()
        }
    }

    /// An orchestrator whose initial heavy run has completed.
    fn settled(t0: Instant) -> Orchestrator<ManualExecutor> {
        let mut orch = Orchestrator::new(
            ManualExecutor::default(),
            SchedulerConfig::default(),
            scene(),
            &ParameterSet::default(),
            t0,
        )
        .unwrap();
        assert!(orch.poll(t0).is_empty());
        orch.executor_mut().run_next();
        let updates = orch.poll(t0);
        assert_eq!(
            updates,
            vec![Update::Applied {
                generation: 1,
                class: ChangeClass::Heavy
            }]
        );
        orch
    }

    #[test]
    fn initial_load_runs_heavy_immediately() {
        let t0 = Instant::now();
        let mut orch = Orchestrator::new(
            ManualExecutor::default(),
            SchedulerConfig::default(),
            scene(),
            &ParameterSet::default(),
            t0,
        )
        .unwrap();
        assert_eq!(orch.state(), OrchestratorState::Debouncing(ChangeClass::Heavy));
        assert!(orch.result().used_chroma.is_none());

        orch.poll(t0);
        assert_eq!(orch.state(), OrchestratorState::HeavyRunning);
        assert!(orch.result().tuning_dirty);

        orch.executor_mut().run_next();
        orch.poll(t0);
        assert_eq!(orch.state(), OrchestratorState::Idle);
        let result = orch.result();
        assert!(!result.tuning_dirty);
        assert_eq!(result.used_chroma, Some(ChromaColor::MAGENTA));
        assert_eq!(result.raster.get_pixel(0, 0)[3], 0);
        assert_eq!(result.raster.get_pixel(16, 16)[3], 255);
        assert!(orch.cached_base().is_some());
        assert!(orch.diagnostics().is_some());
    }

    #[test]
    fn zero_area_source_is_rejected() {
        let result = Orchestrator::new(
            ManualExecutor::default(),
            SchedulerConfig::default(),
            RgbaImage::new(0, 4),
            &ParameterSet::default(),
            Instant::now(),
        );
        assert!(matches!(result, Err(PipelineError::InvalidGeometry { .. })));
    }

    #[test]
    fn light_change_waits_for_light_debounce() {
        let t0 = Instant::now();
        let mut orch = settled(t0);
        assert_eq!(orch.set_params(&light_edit(2), t0), Some(ChangeClass::Light));
        assert_eq!(orch.state(), OrchestratorState::Debouncing(ChangeClass::Light));
        assert_eq!(orch.next_deadline(), Some(t0 + ms(400)));

        orch.poll(t0 + ms(399));
        assert_eq!(orch.executor().submitted.len(), 1);

        orch.poll(t0 + ms(400));
        assert_eq!(orch.executor().submitted[1], (2, ChangeClass::Light));
        assert_eq!(orch.state(), OrchestratorState::LightRunning);
    }

    #[test]
    fn heavy_change_drops_base_and_waits_longer() {
        let t0 = Instant::now();
        let mut orch = settled(t0);
        let params = ParameterSet {
            tolerance: 80.0,
            ..ParameterSet::default()
        };
        assert_eq!(orch.set_params(&params, t0), Some(ChangeClass::Heavy));
        assert!(orch.cached_base().is_none());

        orch.poll(t0 + ms(799));
        assert_eq!(orch.executor().submitted.len(), 1);
        orch.poll(t0 + ms(800));
        assert_eq!(orch.executor().submitted[1], (2, ChangeClass::Heavy));
    }

    #[test]
    fn heavy_absorbs_a_pending_light_change() {
        let t0 = Instant::now();
        let mut orch = settled(t0);
        orch.set_params(&light_edit(2), t0);
        let heavy = ParameterSet {
            chroma: ChromaMode::Named(ChromaPreset::Magenta),
            ..light_edit(2)
        };
        orch.set_params(&heavy, t0 + ms(100));
        let light = ParameterSet {
            feather_radius: 3,
            ..heavy
        };
        assert_eq!(orch.set_params(&light, t0 + ms(200)), Some(ChangeClass::Light));
        assert_eq!(orch.state(), OrchestratorState::Debouncing(ChangeClass::Heavy));
        assert_eq!(orch.next_deadline(), Some(t0 + ms(1000)));
        orch.poll(t0 + ms(999));
        assert_eq!(orch.executor().submitted.len(), 1);
        orch.poll(t0 + ms(1000));
        assert_eq!(orch.executor().submitted[1], (4, ChangeClass::Heavy));
    }

    #[test]
    fn unchanged_params_schedule_nothing() {
        let t0 = Instant::now();
        let mut orch = settled(t0);
        let same = ParameterSet {
            tolerance: ParameterSet::DEFAULT_TOLERANCE,
            ..ParameterSet::default()
        };
        assert_eq!(orch.set_params(&same, t0), None);
        assert_eq!(orch.generation(), 1);
        assert_eq!(orch.state(), OrchestratorState::Idle);
    }

    #[test]
    fn out_of_range_params_are_clamped() {
        let t0 = Instant::now();
        let mut orch = settled(t0);
        let wild = ParameterSet {
            feather_radius: 10_000,
            ..ParameterSet::default()
        };
        assert_eq!(orch.set_params(&wild, t0), Some(ChangeClass::Light));
        assert_eq!(orch.params().feather_radius, ParameterSet::MAX_FEATHER_RADIUS);
    }

    #[test]
    fn stale_result_is_discarded() {
        let t0 = Instant::now();
        let mut orch = settled(t0);
        let initial = orch.result().raster.clone();

        orch.set_params(&light_edit(2), t0);
        orch.poll(t0 + ms(400));
        orch.set_params(&light_edit(6), t0 + ms(500));

        orch.executor_mut().run_next();
        let updates = orch.poll(t0 + ms(600));
        assert_eq!(
            updates,
            vec![Update::Superseded {
                generation: 2,
                class: ChangeClass::Light,
                base_adopted: false
            }]
        );
        assert_eq!(orch.result().raster, &initial);
        assert!(orch.result().tuning_dirty);

        orch.poll(t0 + ms(900));
        assert_eq!(orch.executor().submitted[2], (3, ChangeClass::Light));
        orch.executor_mut().run_next();
        let updates = orch.poll(t0 + ms(950));
        assert_eq!(
            updates,
            vec![Update::Applied {
                generation: 3,
                class: ChangeClass::Light
            }]
        );

        let expected = chromacut_pipeline::process(&scene(), &light_edit(6)).unwrap();
        assert_eq!(orch.result().raster, &expected.raster);
    }

    #[test]
    fn light_edit_during_heavy_run_reuses_its_base() {
        let t0 = Instant::now();
        let mut orch = Orchestrator::new(
            ManualExecutor::default(),
            SchedulerConfig::default(),
            scene(),
            &ParameterSet::default(),
            t0,
        )
        .unwrap();
        orch.poll(t0);
        orch.set_params(&light_edit(2), t0);
        assert_eq!(orch.state(), OrchestratorState::HeavyRunning);

        orch.executor_mut().run_next();
        let updates = orch.poll(t0 + ms(400));
        assert_eq!(
            updates,
            vec![Update::Superseded {
                generation: 1,
                class: ChangeClass::Heavy,
                base_adopted: true
            }]
        );
        assert!(orch.cached_base().is_some());
        assert_eq!(orch.executor().submitted[1], (2, ChangeClass::Light));
    }

    #[test]
    fn light_change_without_base_upgrades_to_heavy() {
        let t0 = Instant::now();
        let mut orch = Orchestrator::new(
            ManualExecutor::default(),
            SchedulerConfig::default(),
            scene(),
            &ParameterSet::default(),
            t0,
        )
        .unwrap();
        orch.poll(t0);
        orch.executor_mut()
            .fail_next(WorkerError::Panicked("keying failed".into()));
        orch.poll(t0);
        assert!(orch.cached_base().is_none());

        assert_eq!(orch.set_params(&light_edit(2), t0), Some(ChangeClass::Light));
        orch.poll(t0 + ms(400));
        assert_eq!(orch.executor().submitted[1], (2, ChangeClass::Heavy));
        assert_eq!(orch.state(), OrchestratorState::HeavyRunning);
    }

    #[test]
    fn heavy_change_cancels_in_flight_heavy_job() {
        let t0 = Instant::now();
        let mut orch = Orchestrator::new(
            ManualExecutor::default(),
            SchedulerConfig::default(),
            scene(),
            &ParameterSet::default(),
            t0,
        )
        .unwrap();
        orch.poll(t0);
        // Tolerance change cancels the in-flight heavy job.
        orch.set_params(
            &ParameterSet {
                tolerance: 60.0,
                ..ParameterSet::default()
            },
            t0,
        );
        orch.executor_mut().run_next();
        let updates = orch.poll(t0 + ms(100));
        assert_eq!(
            updates,
            vec![Update::Superseded {
                generation: 1,
                class: ChangeClass::Heavy,
                base_adopted: false
            }]
        );
        orch.poll(t0 + ms(800));
        assert_eq!(orch.executor().submitted[1], (2, ChangeClass::Heavy));
    }

    #[test]
    fn heavy_change_cancels_in_flight_light_job() {
        let t0 = Instant::now();
        let mut orch = settled(t0);
        orch.set_params(&light_edit(2), t0);
        orch.poll(t0 + ms(400));
        orch.set_params(
            &ParameterSet {
                tolerance: 90.0,
                ..light_edit(2)
            },
            t0 + ms(450),
        );
        assert!(orch.executor().cancel.is_stale(2));

        orch.executor_mut().run_next();
        let updates = orch.poll(t0 + ms(500));
        assert!(matches!(
            updates.as_slice(),
            [Update::Superseded { generation: 2, .. }]
        ));
        orch.poll(t0 + ms(1250));
        assert_eq!(orch.executor().submitted[2], (3, ChangeClass::Heavy));
    }

    #[test]
    fn manual_edit_suspends_dispatch() {
        let t0 = Instant::now();
        let mut orch = settled(t0);
        orch.begin_manual_edit();
        orch.set_params(&light_edit(2), t0);
        assert_eq!(orch.state(), OrchestratorState::Suspended);
        assert_eq!(orch.next_deadline(), None);
        orch.poll(t0 + ms(5000));
        assert_eq!(orch.executor().submitted.len(), 1);

        let edited = RgbaImage::from_pixel(32, 32, Rgba([1, 2, 3, 4]));
        orch.commit_manual_edit(Some(edited.clone())).unwrap();
        assert_eq!(orch.result().raster, &edited);
        assert_eq!(orch.result().used_chroma, Some(ChromaColor::MAGENTA));

        orch.poll(t0 + ms(5001));
        assert_eq!(orch.executor().submitted[1], (2, ChangeClass::Light));
    }

    #[test]
    fn result_finishing_during_edit_is_held_until_commit() {
        let t0 = Instant::now();
        let mut orch = settled(t0);
        let initial = orch.result().raster.clone();
        orch.set_params(&light_edit(2), t0);
        orch.poll(t0 + ms(400));

        orch.begin_manual_edit();
        orch.executor_mut().run_next();
        let updates = orch.poll(t0 + ms(450));
        assert_eq!(
            updates,
            vec![Update::Held {
                generation: 2,
                class: ChangeClass::Light
            }]
        );
        assert_eq!(orch.result().raster, &initial);
        assert!(orch.result().tuning_dirty);
        assert_eq!(orch.state(), OrchestratorState::Suspended);

        let update = orch.commit_manual_edit(None).unwrap();
        assert_eq!(
            update,
            Some(Update::Applied {
                generation: 2,
                class: ChangeClass::Light
            })
        );
        let expected = chromacut_pipeline::process(&scene(), &light_edit(2)).unwrap();
        assert_eq!(orch.result().raster, &expected.raster);
        assert!(!orch.result().tuning_dirty);
        assert_eq!(orch.state(), OrchestratorState::Idle);
    }

    #[test]
    fn committed_edit_replaces_held_result() {
        let t0 = Instant::now();
        let mut orch = settled(t0);
        orch.set_params(&light_edit(2), t0);
        orch.poll(t0 + ms(400));
        orch.begin_manual_edit();
        orch.executor_mut().run_next();
        orch.poll(t0 + ms(450));

        let edited = RgbaImage::from_pixel(32, 32, Rgba([9, 9, 9, 255]));
        assert_eq!(orch.commit_manual_edit(Some(edited.clone())).unwrap(), None);
        assert_eq!(orch.result().raster, &edited);
        assert!(!orch.result().tuning_dirty);
    }

    #[test]
    fn held_result_is_dropped_by_a_newer_edit() {
        let t0 = Instant::now();
        let mut orch = settled(t0);
        let initial = orch.result().raster.clone();
        orch.set_params(&light_edit(2), t0);
        orch.poll(t0 + ms(400));
        orch.begin_manual_edit();
        orch.executor_mut().run_next();
        orch.poll(t0 + ms(450));
        orch.set_params(&light_edit(5), t0 + ms(500));

        assert_eq!(orch.cancel_manual_edit(), None);
        assert_eq!(orch.result().raster, &initial);
        orch.poll(t0 + ms(900));
        assert_eq!(orch.executor().submitted[2], (3, ChangeClass::Light));
    }

    #[test]
    fn manual_edit_rejects_wrong_size() {
        let t0 = Instant::now();
        let mut orch = settled(t0);
        orch.begin_manual_edit();
        let err = orch
            .commit_manual_edit(Some(RgbaImage::new(3, 3)))
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::DimensionMismatch {
                expected: (32, 32),
                actual: (3, 3)
            }
        );
        assert_eq!(orch.state(), OrchestratorState::Suspended);
        orch.cancel_manual_edit();
        assert_eq!(orch.state(), OrchestratorState::Idle);
    }

    #[test]
    fn failure_keeps_output_until_retry() {
        let t0 = Instant::now();
        let mut orch = settled(t0);
        let initial = orch.result().raster.clone();

        orch.set_params(&light_edit(2), t0);
        orch.poll(t0 + ms(400));
        orch.executor_mut()
            .fail_next(WorkerError::Panicked("boom".into()));
        let updates = orch.poll(t0 + ms(450));
        assert_eq!(
            updates,
            vec![Update::Failed {
                generation: 2,
                error: WorkerError::Panicked("boom".into())
            }]
        );
        assert_eq!(
            orch.state(),
            OrchestratorState::Failed(WorkerError::Panicked("boom".into()))
        );
        assert_eq!(orch.result().raster, &initial);
        assert!(orch.result().tuning_dirty);

        orch.retry(t0 + ms(500)).unwrap();
        assert_eq!(orch.executor().restarts, 0);
        orch.poll(t0 + ms(500));
        assert_eq!(orch.executor().submitted[2], (3, ChangeClass::Light));
    }

    #[test]
    fn dead_worker_is_restarted_on_retry() {
        let t0 = Instant::now();
        let mut orch = settled(t0);
        orch.executor_mut().dead = true;
        orch.set_params(&light_edit(2), t0);
        let updates = orch.poll(t0 + ms(400));
        assert_eq!(
            updates,
            vec![Update::Failed {
                generation: 2,
                error: WorkerError::Disconnected
            }]
        );

        orch.retry(t0 + ms(450)).unwrap();
        assert_eq!(orch.executor().restarts, 1);
        orch.poll(t0 + ms(450));
        assert_eq!(orch.executor().submitted[1], (3, ChangeClass::Light));
    }

    #[test]
    fn reset_shows_source_and_drops_pending_work() {
        let t0 = Instant::now();
        let mut orch = settled(t0);
        orch.set_params(&light_edit(2), t0);
        orch.reset();
        assert_eq!(orch.state(), OrchestratorState::Idle);
        let result = orch.result();
        assert_eq!(result.raster, &scene());
        assert!(result.used_chroma.is_none());
        assert!(orch.cached_base().is_some());
        orch.poll(t0 + ms(1000));
        assert_eq!(orch.executor().submitted.len(), 1);
    }

    #[test]
    fn new_source_is_keyed_immediately() {
        let t0 = Instant::now();
        let mut orch = settled(t0);
        let green = RgbaImage::from_pixel(10, 10, Rgba([0, 255, 0, 255]));
        orch.set_source(green, t0 + ms(10)).unwrap();
        assert!(orch.cached_base().is_none());
        orch.poll(t0 + ms(10));
        assert_eq!(orch.executor().submitted[1], (2, ChangeClass::Heavy));
        orch.executor_mut().run_next();
        orch.poll(t0 + ms(20));
        assert_eq!(
            orch.result().used_chroma,
            Some(ChromaColor::new(0, 255, 0))
        );
    }
}
