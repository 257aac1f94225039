use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::WorkerError;
use crate::cancel::CancelToken;
use crate::job::{self, Job, JobResponse};

/// Somewhere jobs run.
///
/// Implementations must answer every submitted job exactly once, in
/// submission order, unless the executor itself dies.
pub trait Executor {
    /// Queue `job`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Disconnected`] if the executor is gone.
    fn submit(&mut self, job: Job) -> Result<(), WorkerError>;

    /// Take the next finished response without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Disconnected`] once the executor has died
    /// and every buffered response has been taken.
    fn try_recv(&mut self) -> Result<Option<JobResponse>, WorkerError>;

    /// The token jobs poll for cancellation.
    fn cancel_token(&self) -> &CancelToken;

    /// Tear down and replace the underlying worker.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Spawn`] if a fresh worker cannot be started.
    fn restart(&mut self) -> Result<(), WorkerError>;
}

/// Runs jobs one at a time on a dedicated thread.
///
/// Panics inside a job are caught and reported as
/// [`WorkerError::Panicked`]; the thread keeps serving. Dropping the
/// executor cancels queued work and joins the thread.
pub struct ThreadExecutor {
    jobs: Option<Sender<Job>>,
    responses: Receiver<JobResponse>,
    handle: Option<JoinHandle<()>>,
    cancel: CancelToken,
}

impl ThreadExecutor {
    /// Start a worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Spawn`] if the OS refuses the thread.
    pub fn spawn() -> Result<Self, WorkerError> {
        let cancel = CancelToken::new();
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (response_tx, response_rx) = mpsc::channel();
        let token = cancel.clone();
        let handle = thread::Builder::new()
            .name("chromacut-worker".into())
            .spawn(move || worker_loop(&job_rx, &response_tx, &token))
            .map_err(|e| WorkerError::Spawn(e.to_string()))?;
        debug!("worker thread spawned");
        Ok(Self {
            jobs: Some(job_tx),
            responses: response_rx,
            handle: Some(handle),
            cancel,
        })
    }

    /// Block up to `timeout` for the next response.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Disconnected`] if the worker thread is gone.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<JobResponse>, WorkerError> {
        match self.responses.recv_timeout(timeout) {
            Ok(response) => Ok(Some(response)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(WorkerError::Disconnected),
        }
    }
}

impl Executor for ThreadExecutor {
    fn submit(&mut self, job: Job) -> Result<(), WorkerError> {
        let jobs = self.jobs.as_ref().ok_or(WorkerError::Disconnected)?;
        jobs.send(job).map_err(|_| WorkerError::Disconnected)
    }

    fn try_recv(&mut self) -> Result<Option<JobResponse>, WorkerError> {
        match self.responses.try_recv() {
            Ok(response) => Ok(Some(response)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(WorkerError::Disconnected),
        }
    }

    fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn restart(&mut self) -> Result<(), WorkerError> {
        let fresh = Self::spawn()?;
        // Dropping the old executor cancels and joins its thread.
        drop(std::mem::replace(self, fresh));
        debug!("worker restarted");
        Ok(())
    }
}

impl Drop for ThreadExecutor {
    fn drop(&mut self) {
        self.cancel.cancel_before(u64::MAX);
        self.jobs.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("worker thread exited with a panic");
        }
    }
}

fn worker_loop(jobs: &Receiver<Job>, responses: &Sender<JobResponse>, cancel: &CancelToken) {
    for job in jobs {
        let generation = job.generation;
        let class = job.kind.class();
        let response = panic::catch_unwind(AssertUnwindSafe(|| job::execute(job, cancel)))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!(generation, %class, %message, "job panicked");
                JobResponse {
                    generation,
                    class,
                    outcome: Err(WorkerError::Panicked(message)),
                }
            });
        if responses.send(response).is_err() {
            break;
        }
    }
    debug!("worker thread stopping");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}
