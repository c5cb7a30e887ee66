use super::{Job, Scheduler, SchedulerMode, TaskHandle};
use crate::utils::CancelToken;
use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;

/// Pending task keyed by deadline; ties break on registration order (FIFO).
struct PendingTask {
    deadline: Duration,
    seq: u64,
    cancel: CancelToken,
    job: Option<Job>,
}

impl PartialEq for PendingTask {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for PendingTask {}

impl PartialOrd for PendingTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

struct ClockState {
    now: Duration,
    seq: u64,
    pending: BinaryHeap<Reverse<PendingTask>>,
}

/// Virtual-time scheduler: a logical clock starting at zero plus an ordered
/// set of pending deadlines.
///
/// The clock never advances on its own. A test driver calls
/// [`VirtualScheduler::advance_by`], which synchronously executes every task
/// whose deadline falls inside the window, in non-decreasing deadline order,
/// on the calling thread. One instance belongs to one verification run;
/// instances are never shared across runs.
pub struct VirtualScheduler {
    state: Mutex<ClockState>,
}

impl VirtualScheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClockState {
                now: Duration::ZERO,
                seq: 0,
                pending: BinaryHeap::new(),
            }),
        }
    }

    /// Advance the logical clock by `delta`, executing due tasks in deadline
    /// order. A task may schedule further tasks; those run too when their
    /// deadlines fall inside the same window.
    pub fn advance_by(&self, delta: Duration) {
        let target = {
            let state = self.state.lock();
            state.now + delta
        };

        loop {
            // Pop one due task under the lock, run it outside so it can
            // schedule more work without deadlocking.
            let due = {
                let mut state = self.state.lock();
                match state.pending.peek() {
                    Some(Reverse(t)) if t.deadline <= target => {
                        let Reverse(mut task) = state.pending.pop().unwrap_or_else(|| {
                            unreachable!("peeked entry vanished under lock")
                        });
                        state.now = task.deadline;
                        task.job.take().map(|job| (task.cancel.clone(), job))
                    }
                    _ => {
                        state.now = target;
                        return;
                    }
                }
            };

            if let Some((cancel, job)) = due
                && !cancel.is_cancelled()
            {
                job();
            }
        }
    }

    /// Execute everything already due at the current logical time.
    #[inline]
    pub fn run_ready(&self) {
        self.advance_by(Duration::ZERO);
    }

    /// Deadline of the earliest live pending task, if any.
    pub fn next_deadline(&self) -> Option<Duration> {
        let state = self.state.lock();
        state
            .pending
            .iter()
            .filter(|Reverse(t)| !t.cancel.is_cancelled())
            .map(|Reverse(t)| t.deadline)
            .min()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }
}

impl Default for VirtualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for VirtualScheduler {
    fn schedule_after(&self, delay: Duration, job: Job) -> TaskHandle {
        let cancel = CancelToken::root();
        let mut state = self.state.lock();
        state.seq += 1;
        let seq = state.seq;
        let deadline = state.now + delay;
        state.pending.push(Reverse(PendingTask {
            deadline,
            seq,
            cancel: cancel.clone(),
            job: Some(job),
        }));
        TaskHandle::new(cancel)
    }

    fn now(&self) -> Duration {
        self.state.lock().now
    }

    fn mode(&self) -> SchedulerMode {
        SchedulerMode::Virtual
    }
}
