use super::{Job, Scheduler, SchedulerMode, TaskHandle};
use crate::config::EngineConfig;
use crate::utils::{CancelToken, HealthFlag};
use anyhow::{Context, Result, bail};
use crossbeam::channel as cbchan;
use parking_lot::{Condvar, Mutex};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const WORKER_POLL: Duration = Duration::from_millis(20);
const TIMER_MAX_PARK: Duration = Duration::from_millis(50);

static GLOBAL: OnceLock<Arc<WorkerPool>> = OnceLock::new();

struct TimedJob {
    deadline: Instant,
    seq: u64,
    cancel: CancelToken,
    job: Option<Job>,
}

impl PartialEq for TimedJob {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimedJob {}

impl PartialOrd for TimedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

struct TimerState {
    heap: BinaryHeap<Reverse<TimedJob>>,
    seq: u64,
    closed: bool,
}

struct PoolShared {
    task_tx: cbchan::Sender<Job>,
    timer: Mutex<TimerState>,
    timer_wake: Condvar,
}

/// Real-time scheduler: a shared pool of worker threads plus one timer
/// thread servicing a deadline-ordered heap.
///
/// Zero-delay jobs go straight to the worker queue; delayed jobs sit in the
/// heap until their wall-clock deadline, then move to the queue. The pool is
/// process-wide state shared across concurrently running flows; no flow ever
/// owns it. [`WorkerPool::shutdown`] cancels outstanding pending tasks and
/// joins every thread.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancelToken,
    health: HealthFlag,
    started: Instant,
    cfg: EngineConfig,
}

impl WorkerPool {
    /// Spawn a pool from the given config.
    pub fn spawn(cfg: EngineConfig) -> Result<Arc<Self>> {
        let threads = match cfg.worker_threads {
            Some(0) => bail!("worker_threads must be greater than zero"),
            Some(n) => n,
            None => thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
        };

        let (task_tx, task_rx) = match cfg.task_queue_capacity {
            Some(cap) => cbchan::bounded::<Job>(cap),
            None => cbchan::unbounded::<Job>(),
        };

        let shared = Arc::new(PoolShared {
            task_tx,
            timer: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                seq: 0,
                closed: false,
            }),
            timer_wake: Condvar::new(),
        });

        let cancel = CancelToken::root();
        let health = HealthFlag::new(false);
        let mut handles = Vec::with_capacity(threads + 1);

        for i in 0..threads {
            let rx = task_rx.clone();
            let token = cancel.clone();
            let handle = thread::Builder::new()
                .name(format!("flowrt-worker-{i}"))
                .spawn(move || worker_loop(rx, token))
                .with_context(|| format!("failed to spawn worker thread {i}"))?;
            handles.push(handle);
        }

        {
            let shared = shared.clone();
            let token = cancel.clone();
            let handle = thread::Builder::new()
                .name("flowrt-timer".to_string())
                .spawn(move || timer_loop(shared, token))
                .context("failed to spawn timer thread")?;
            handles.push(handle);
        }

        tracing::info!("[WorkerPool] started with {} workers", threads);
        health.up();

        Ok(Arc::new(Self {
            shared,
            handles: Mutex::new(handles),
            cancel,
            health,
            started: Instant::now(),
            cfg,
        }))
    }

    /// Install the process-wide pool with an explicit config. Fails if the
    /// global pool already exists.
    pub fn init_global(cfg: EngineConfig) -> Result<Arc<Self>> {
        let pool = Self::spawn(cfg)?;
        GLOBAL
            .set(pool.clone())
            .map_err(|_| anyhow::anyhow!("global worker pool already initialized"))?;
        Ok(pool)
    }

    /// The process-wide pool, spawned on first use with default config.
    pub fn global() -> Arc<Self> {
        GLOBAL
            .get_or_init(|| {
                Self::spawn(EngineConfig::default()).unwrap_or_else(|e| {
                    tracing::error!("[WorkerPool] global pool init failed: {e}");
                    panic!("[WorkerPool] global pool init failed: {e}");
                })
            })
            .clone()
    }

    pub fn is_healthy(&self) -> bool {
        self.health.get()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    fn push_timed(&self, deadline: Instant, job: Job, cancel: &CancelToken) {
        let mut timer = self.shared.timer.lock();
        if timer.closed {
            tracing::warn!("[WorkerPool] task dropped: pool is shut down");
            return;
        }
        timer.seq += 1;
        let seq = timer.seq;
        timer.heap.push(Reverse(TimedJob {
            deadline,
            seq,
            cancel: cancel.clone(),
            job: Some(job),
        }));
        drop(timer);
        self.shared.timer_wake.notify_one();
    }

    /// Cancel outstanding pending tasks, stop accepting new ones, and join
    /// all threads. Jobs already picked up by a worker finish first.
    pub fn shutdown(&self) {
        tracing::info!("[WorkerPool] shutdown requested");
        self.health.down();
        self.cancel.cancel();
        {
            let mut timer = self.shared.timer.lock();
            timer.closed = true;
            timer.heap.clear();
        }
        self.shared.timer_wake.notify_all();

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Scheduler for WorkerPool {
    fn schedule_after(&self, delay: Duration, job: Job) -> TaskHandle {
        // Child of the pool root: shutdown releases every pending task.
        let cancel = self.cancel.child();
        let token = cancel.clone();
        let guarded: Job = Box::new(move || {
            if !token.is_cancelled() {
                job();
            }
        });

        if delay.is_zero() {
            match self.shared.task_tx.try_send(guarded) {
                Ok(()) => {}
                // Full bounded queue: park at an immediate deadline instead.
                // The timer thread feeds the queue as workers free slots, so
                // a worker scheduling follow-up work never blocks itself.
                Err(cbchan::TrySendError::Full(job)) => {
                    self.push_timed(Instant::now(), job, &cancel);
                }
                Err(cbchan::TrySendError::Disconnected(_)) => {
                    tracing::warn!("[WorkerPool] task dropped: pool is shut down");
                }
            }
        } else {
            self.push_timed(Instant::now() + delay, guarded, &cancel);
        }

        TaskHandle::new(cancel)
    }

    fn now(&self) -> Duration {
        self.started.elapsed()
    }

    fn mode(&self) -> SchedulerMode {
        SchedulerMode::Real
    }
}

fn worker_loop(rx: cbchan::Receiver<Job>, cancel: CancelToken) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match rx.recv_timeout(WORKER_POLL) {
            Ok(job) => {
                // Work is opaque; a panicking unit must not take the worker down.
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!("[WorkerPool] unit of work panicked");
                }
            }
            Err(cbchan::RecvTimeoutError::Timeout) => continue,
            Err(cbchan::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn timer_loop(shared: Arc<PoolShared>, cancel: CancelToken) {
    loop {
        let mut due: Vec<Job> = Vec::new();
        let park;
        {
            let mut timer = shared.timer.lock();
            if timer.closed || cancel.is_cancelled() {
                break;
            }

            let now = Instant::now();
            while let Some(Reverse(t)) = timer.heap.peek() {
                if t.deadline > now {
                    break;
                }
                if let Some(Reverse(mut task)) = timer.heap.pop()
                    && !task.cancel.is_cancelled()
                    && let Some(job) = task.job.take()
                {
                    due.push(job);
                }
            }

            park = timer
                .heap
                .peek()
                .map(|Reverse(t)| t.deadline.saturating_duration_since(now))
                .unwrap_or(TIMER_MAX_PARK)
                .min(TIMER_MAX_PARK);

            if due.is_empty() {
                shared.timer_wake.wait_for(&mut timer, park);
                continue;
            }
        }

        // Dispatch outside the lock. Only the timer thread ever waits on a
        // full queue; workers and schedule_after callers never do, so the
        // queue always drains.
        for job in due {
            if shared.task_tx.send(job).is_err() {
                return;
            }
        }
    }
}
