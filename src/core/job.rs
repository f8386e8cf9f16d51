//! Cancellable background jobs with throttled progress reporting

use crate::types::{PlanError, PlanResult};
use anyhow::Context;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Shared flag a caller sets to stop a running job
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Notifications a job sends to its caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    /// Completion percentage, 0..=100
    Progress(u8),
    /// Whether caller-side controls may be used again
    Enabled(bool),
}

/// Receives job events on the worker thread
pub type EventSink = Box<dyn Fn(JobEvent) + Send>;

/// Cancellation and progress handle threaded through a planning run
pub struct JobControl {
    token: CancellationToken,
    sink: Option<EventSink>,
    last_progress: Cell<u8>,
}

impl JobControl {
    pub fn new(token: CancellationToken, sink: Option<EventSink>) -> Self {
        Self {
            token,
            sink,
            last_progress: Cell::new(0),
        }
    }

    /// Control with a private token and no listener
    pub fn detached() -> Self {
        Self::new(CancellationToken::new(), None)
    }

    /// Forward events into an mpsc channel
    pub fn with_channel(token: CancellationToken, sender: Sender<JobEvent>) -> Self {
        Self::new(
            token,
            Some(Box::new(move |event| {
                // A dropped receiver only means nobody is listening any more
                let _ = sender.send(event);
            })),
        )
    }

    /// Invoke `callback` synchronously for every event
    pub fn with_callback<F>(token: CancellationToken, callback: F) -> Self
    where
        F: Fn(JobEvent) + Send + 'static,
    {
        Self::new(token, Some(Box::new(callback)))
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Fail with `Cancelled` once the caller asked to stop
    pub fn checkpoint(&self) -> PlanResult<()> {
        if self.token.is_cancelled() {
            log::info!("Cancellation requested, stopping job");
            return Err(PlanError::Cancelled);
        }
        Ok(())
    }

    pub fn emit(&self, event: JobEvent) {
        if let Some(sink) = &self.sink {
            sink(event);
        }
    }

    /// Report progress; values never go backwards except through `reset`
    pub fn report(&self, percent: u8) {
        let percent = percent.min(100);
        if percent > self.last_progress.get() {
            self.last_progress.set(percent);
            self.emit(JobEvent::Progress(percent));
        }
    }

    /// Zero the progress bar and re-enable the caller
    pub fn reset(&self) {
        self.last_progress.set(0);
        self.emit(JobEvent::Progress(0));
        self.emit(JobEvent::Enabled(true));
    }

    /// Progress tracker mapping `total` work units onto `start..=end` percent
    pub fn stage(&self, start: u8, end: u8, total: usize) -> StageProgress<'_> {
        StageProgress {
            control: self,
            start,
            end: end.max(start),
            total,
            step: (total / 1000).max(1),
            done: Cell::new(0),
        }
    }
}

/// Throttled progress over one stage of a job
pub struct StageProgress<'a> {
    control: &'a JobControl,
    start: u8,
    end: u8,
    total: usize,
    step: usize,
    done: Cell<usize>,
}

impl StageProgress<'_> {
    /// Record one finished unit of work
    pub fn tick(&self) {
        let done = self.done.get() + 1;
        self.done.set(done);
        if done % self.step == 0 || done == self.total {
            let fraction = if self.total == 0 {
                1.0
            } else {
                (done as f64 / self.total as f64).min(1.0)
            };
            let span = (self.end - self.start) as f64;
            self.control.report(self.start + (fraction * span) as u8);
        }
    }

    pub fn finish(&self) {
        self.control.report(self.end);
    }
}

/// Run `work` to completion under `control`, translating the outcome for the caller
///
/// Cancellation yields `Ok(None)`. Errors reset progress and carry `context`.
pub fn run_job<T, F>(name: &'static str, control: &JobControl, work: F) -> anyhow::Result<Option<T>>
where
    F: FnOnce(&JobControl) -> PlanResult<T>,
{
    control.emit(JobEvent::Enabled(false));
    match work(control) {
        Ok(value) => {
            control.report(100);
            control.emit(JobEvent::Enabled(true));
            log::info!("{} job finished", name);
            Ok(Some(value))
        }
        Err(PlanError::Cancelled) => {
            control.reset();
            log::info!("{} job cancelled", name);
            Ok(None)
        }
        Err(e) => {
            control.reset();
            log::error!("{} job failed: {}", name, e);
            Err(e).with_context(|| format!("{} job failed", name))
        }
    }
}

/// Handle to a job running on its own thread
pub struct JobHandle<T> {
    token: CancellationToken,
    thread: JoinHandle<anyhow::Result<Option<T>>>,
}

impl<T> JobHandle<T> {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the job; `Ok(None)` means it was cancelled
    pub fn join(self) -> anyhow::Result<Option<T>> {
        match self.thread.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("planning worker thread panicked")),
        }
    }
}

/// Clears a busy flag when the owning job ends, however it ends
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Allows one running job per kind
#[derive(Debug, Default, Clone)]
pub struct JobSlot {
    kind: &'static str,
    busy: Arc<AtomicBool>,
}

impl JobSlot {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Start `work` on a worker thread unless a job of this kind is running
    pub fn spawn<T, F>(
        &self,
        token: CancellationToken,
        sink: Option<EventSink>,
        work: F,
    ) -> PlanResult<JobHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&JobControl) -> PlanResult<T> + Send + 'static,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PlanError::JobInProgress(self.kind));
        }

        let guard = BusyGuard(self.busy.clone());
        let kind = self.kind;
        let worker_token = token.clone();
        let thread = std::thread::Builder::new()
            .name(format!("photoplan-{}", kind))
            .spawn(move || {
                let _guard = guard;
                let control = JobControl::new(worker_token, sink);
                run_job(kind, &control, work)
            })?;

        Ok(JobHandle { token, thread })
    }
}
