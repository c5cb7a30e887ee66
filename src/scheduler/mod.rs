pub use virtual_clock::VirtualScheduler;
pub use workers::WorkerPool;

mod virtual_clock;
mod workers;

use crate::utils::CancelToken;
use std::time::Duration;

/// A unit of work registered with a deadline.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    Real,
    Virtual,
}

/// Handle to a pending task. Cancelling it makes the task a no-op when its
/// deadline is reached; the deadline itself never moves.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    cancel: CancelToken,
}

impl TaskHandle {
    pub(crate) fn new(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    #[inline]
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Execution context for delayed and concurrent work.
///
/// Two interchangeable implementations share this interface: the process-wide
/// [`WorkerPool`] (wall-clock delays, parallel workers) and the per-run
/// [`VirtualScheduler`] (logical delays, single-threaded, advanced explicitly
/// by a test driver). For the same flow both produce identical value
/// sequences and terminal outcomes; only elapsed wall time and thread
/// distribution differ.
pub trait Scheduler: Send + Sync + 'static {
    /// Register `job` to run once `delay` has elapsed. Zero-delay jobs still
    /// go through the scheduler so the caller never executes them inline.
    fn schedule_after(&self, delay: Duration, job: Job) -> TaskHandle;

    /// Elapsed time since this scheduler's epoch (pool start, or logical
    /// zero for a virtual clock).
    fn now(&self) -> Duration;

    fn mode(&self) -> SchedulerMode;
}
