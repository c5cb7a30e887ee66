use super::{FlowSource, MapWork, StageOp, StepWork};
use crate::error::{WorkError, protocol_violation};
use crate::scheduler::Scheduler;
use crate::signal::{Demand, Signal, SignalKind, Subscriber};
use crate::utils::CancelToken;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;
use uuid::fmt::Simple;

/// Demand sentinel for "unbounded".
const UNBOUNDED: u64 = u64::MAX;

/// Unique identifier of one subscription run (for log correlation).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct RunId {
    raw: Simple,
}

impl RunId {
    fn new() -> Self {
        Self {
            raw: Uuid::new_v4().simple(),
        }
    }

    #[inline]
    pub fn raw(&self) -> Simple {
        self.raw
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Interpreter state for one stage slot, in lockstep with the stage list.
/// Gates use `open` + `queue` (parked values), sequential stages use `busy`
/// + `queue`, fan-out stages use `active` + `queue`.
struct StageSlot<T> {
    open: bool,
    busy: bool,
    active: usize,
    queue: VecDeque<T>,
}

enum Terminal {
    Completed,
    Errored(WorkError),
}

struct RunInner<T> {
    subscribed_sent: bool,
    cancelled: bool,
    terminal: Option<Terminal>,
    terminal_sent: bool,
    demand: u64,
    /// Values that passed the whole chain, awaiting demand.
    ready: VecDeque<T>,
    /// Values alive anywhere in the pipeline, including `ready`.
    live: usize,
    source_done: bool,
    stage_state: Vec<StageSlot<T>>,
    draining: bool,
}

impl<T> RunInner<T> {
    #[inline]
    fn terminated(&self) -> bool {
        self.terminal.is_some() || self.terminal_sent
    }
}

/// One live subscription: the stage interpreter plus the serialized
/// delivery loop. All mutable state sits behind `inner`; signal delivery
/// happens with `inner` released so a subscriber may re-enter
/// `request`/`cancel` from `on_signal`.
struct Run<T> {
    id: RunId,
    stages: Vec<StageOp<T>>,
    subscriber: Mutex<Box<dyn Subscriber<T>>>,
    inner: Mutex<RunInner<T>>,
    /// Halts scheduled work for this run: tripped on consumer cancel and,
    /// best-effort, when the run errors.
    cancel: CancelToken,
    scheduler: Arc<dyn Scheduler>,
    epoch: Duration,
    terminal_delivered: AtomicBool,
}

impl<T: Clone + Send + 'static> Run<T> {
    /// Push a value into the chain at `idx`, walking pass-through stages in
    /// place and parking or scheduling where a stage demands it.
    fn feed(run: &Arc<Self>, inner: &mut RunInner<T>, v: T, idx: usize) {
        let mut v = v;
        let mut idx = idx;
        loop {
            if inner.cancelled || inner.terminated() {
                return;
            }
            if idx == run.stages.len() {
                inner.ready.push_back(v);
                return;
            }
            match &run.stages[idx] {
                StageOp::DelayFirst(_) => {
                    let slot = &mut inner.stage_state[idx];
                    if slot.open {
                        idx += 1;
                        continue;
                    }
                    slot.queue.push_back(v);
                    return;
                }
                StageOp::Then(work) => {
                    let work = work.clone();
                    Self::enqueue_seq(run, inner, idx, v, work, false);
                    return;
                }
                StageOp::ThenReturn(work) => {
                    let work = work.clone();
                    Self::enqueue_seq(run, inner, idx, v, work, true);
                    return;
                }
                StageOp::FanOut { work, limit } => {
                    let work = work.clone();
                    let limit = *limit;
                    let slot = &mut inner.stage_state[idx];
                    if limit.is_none_or(|l| slot.active < l) {
                        slot.active += 1;
                        Self::launch_fan(run, idx, v, work);
                    } else {
                        slot.queue.push_back(v);
                    }
                    return;
                }
            }
        }
    }

    fn enqueue_seq(
        run: &Arc<Self>,
        inner: &mut RunInner<T>,
        idx: usize,
        v: T,
        work: StepWork<T>,
        emit: bool,
    ) {
        let slot = &mut inner.stage_state[idx];
        if slot.busy {
            slot.queue.push_back(v);
            return;
        }
        slot.busy = true;
        Self::launch_step(run, idx, v, work, emit);
    }

    /// Run one sequential dependent work on the scheduler. On completion the
    /// value is re-emitted (`then_return`) or discarded (`then`), and the
    /// next queued value for this stage is launched.
    fn launch_step(run: &Arc<Self>, idx: usize, v: T, work: StepWork<T>, emit: bool) {
        let r = run.clone();
        run.scheduler.schedule_after(
            Duration::ZERO,
            Box::new(move || {
                if r.cancel.is_cancelled() {
                    return;
                }
                let out = (work)(&v);
                let mut inner = r.inner.lock();
                if inner.cancelled || inner.terminated() {
                    return;
                }
                match out {
                    Err(e) => Self::fail(&r, &mut inner, e),
                    Ok(()) => {
                        if emit {
                            Self::feed(&r, &mut inner, v, idx + 1);
                        } else {
                            inner.live -= 1;
                        }
                        let next = {
                            let slot = &mut inner.stage_state[idx];
                            match slot.queue.pop_front() {
                                Some(n) => Some(n),
                                None => {
                                    slot.busy = false;
                                    None
                                }
                            }
                        };
                        if let Some(n) = next {
                            Self::launch_step(&r, idx, n, work, emit);
                        }
                        Self::check_complete(&mut inner);
                    }
                }
                drop(inner);
                Self::drain(&r);
            }),
        );
    }

    /// Run one fan-out element on the scheduler. Elements are independent;
    /// the result re-enters the chain as soon as the work completes, so
    /// downstream order follows completion order.
    fn launch_fan(run: &Arc<Self>, idx: usize, v: T, work: MapWork<T>) {
        let r = run.clone();
        run.scheduler.schedule_after(
            Duration::ZERO,
            Box::new(move || {
                if r.cancel.is_cancelled() {
                    return;
                }
                let out = (work)(v);
                let mut inner = r.inner.lock();
                if inner.cancelled || inner.terminated() {
                    return;
                }
                match out {
                    Err(e) => Self::fail(&r, &mut inner, e),
                    Ok(res) => {
                        Self::feed(&r, &mut inner, res, idx + 1);
                        let next = {
                            let slot = &mut inner.stage_state[idx];
                            match slot.queue.pop_front() {
                                Some(n) => Some(n),
                                None => {
                                    slot.active -= 1;
                                    None
                                }
                            }
                        };
                        if let Some(n) = next {
                            Self::launch_fan(&r, idx, n, work);
                        }
                        Self::check_complete(&mut inner);
                    }
                }
                drop(inner);
                Self::drain(&r);
            }),
        );
    }

    fn open_gate(run: &Arc<Self>, idx: usize) {
        let mut inner = run.inner.lock();
        if inner.cancelled || inner.terminated() {
            return;
        }
        let parked = {
            let slot = &mut inner.stage_state[idx];
            slot.open = true;
            std::mem::take(&mut slot.queue)
        };
        for v in parked {
            Self::feed(run, &mut inner, v, idx + 1);
        }
        Self::check_complete(&mut inner);
        drop(inner);
        Self::drain(run);
    }

    /// First error wins: later failures and queued values are dropped, and
    /// in-flight sibling tasks are told to stand down best-effort.
    fn fail(run: &Arc<Self>, inner: &mut RunInner<T>, err: WorkError) {
        if inner.cancelled || inner.terminated() {
            return;
        }
        tracing::debug!("[Flow] run {} errored: {err}", run.id);
        inner.terminal = Some(Terminal::Errored(err));
        inner.ready.clear();
        for slot in &mut inner.stage_state {
            slot.queue.clear();
        }
        run.cancel.cancel();
    }

    /// Completion requires: source exhausted, nothing alive in the chain,
    /// and every delay gate opened (so an empty flow still honors its
    /// delay before `Completed`).
    fn check_complete(inner: &mut RunInner<T>) {
        if inner.terminated() || inner.cancelled || !inner.source_done || inner.live != 0 {
            return;
        }
        if inner.stage_state.iter().any(|s| !s.open) {
            return;
        }
        inner.terminal = Some(Terminal::Completed);
    }

    /// Serialized delivery loop. Whoever flips `draining` delivers every
    /// signal that becomes available, with `inner` released around each
    /// `on_signal` call; concurrent callers return immediately.
    fn drain(run: &Arc<Self>) {
        let mut inner = run.inner.lock();
        if inner.draining {
            return;
        }
        inner.draining = true;
        loop {
            match Self::next_signal(&mut inner) {
                Some(kind) => {
                    drop(inner);
                    Self::deliver(run, kind);
                    inner = run.inner.lock();
                }
                None => {
                    inner.draining = false;
                    return;
                }
            }
        }
    }

    fn next_signal(inner: &mut RunInner<T>) -> Option<SignalKind<T>> {
        if !inner.subscribed_sent {
            inner.subscribed_sent = true;
            return Some(SignalKind::Subscribed);
        }
        if inner.cancelled {
            return None;
        }
        if inner.demand > 0
            && let Some(v) = inner.ready.pop_front()
        {
            if inner.demand != UNBOUNDED {
                inner.demand -= 1;
            }
            inner.live -= 1;
            Self::check_complete(inner);
            return Some(SignalKind::Next(v));
        }
        if !inner.terminal_sent
            && let Some(t) = inner.terminal.take()
        {
            inner.terminal_sent = true;
            return Some(match t {
                Terminal::Completed => SignalKind::Completed,
                Terminal::Errored(e) => SignalKind::Errored(e),
            });
        }
        None
    }

    fn deliver(run: &Arc<Self>, kind: SignalKind<T>) {
        if kind.is_terminal() && run.terminal_delivered.swap(true, Ordering::AcqRel) {
            protocol_violation("terminal signal delivered twice");
        }
        let at = run.scheduler.now().saturating_sub(run.epoch);
        run.subscriber.lock().on_signal(Signal { kind, at });
    }
}

/// Start one run: deliver `Subscribed`, arm delay gates, feed the source.
pub(crate) fn start<T: Clone + Send + 'static>(
    source: FlowSource<T>,
    stages: Vec<StageOp<T>>,
    subscriber: Box<dyn Subscriber<T>>,
    scheduler: Arc<dyn Scheduler>,
) -> SubscriptionHandle<T> {
    let stage_state = stages
        .iter()
        .map(|op| StageSlot {
            open: !matches!(op, StageOp::DelayFirst(_)),
            busy: false,
            active: 0,
            queue: VecDeque::new(),
        })
        .collect();

    let epoch = scheduler.now();
    let run = Arc::new(Run {
        id: RunId::new(),
        stages,
        subscriber: Mutex::new(subscriber),
        inner: Mutex::new(RunInner {
            subscribed_sent: false,
            cancelled: false,
            terminal: None,
            terminal_sent: false,
            demand: 0,
            ready: VecDeque::new(),
            live: 0,
            source_done: false,
            stage_state,
            draining: false,
        }),
        cancel: CancelToken::root(),
        scheduler,
        epoch,
        terminal_delivered: AtomicBool::new(false),
    });

    tracing::debug!("[Flow] run {} subscribed", run.id);

    // `Subscribed` goes out before any value or scheduled side effect.
    Run::drain(&run);

    for (idx, op) in run.stages.iter().enumerate() {
        if let StageOp::DelayFirst(d) = op {
            let r = run.clone();
            run.scheduler
                .schedule_after(*d, Box::new(move || Run::open_gate(&r, idx)));
        }
    }

    match source {
        FlowSource::Emit(values) => {
            let mut inner = run.inner.lock();
            for v in values.iter().cloned() {
                inner.live += 1;
                Run::feed(&run, &mut inner, v, 0);
            }
            inner.source_done = true;
            Run::check_complete(&mut inner);
            drop(inner);
            Run::drain(&run);
        }
        FlowSource::Work(work) => {
            let r = run.clone();
            run.scheduler.schedule_after(
                Duration::ZERO,
                Box::new(move || {
                    if r.cancel.is_cancelled() {
                        return;
                    }
                    let out = (work)();
                    let mut inner = r.inner.lock();
                    if !(inner.cancelled || inner.terminated()) {
                        match out {
                            Ok(Some(v)) => {
                                inner.live += 1;
                                Run::feed(&r, &mut inner, v, 0);
                            }
                            Ok(None) => {}
                            Err(e) => Run::fail(&r, &mut inner, e),
                        }
                    }
                    inner.source_done = true;
                    Run::check_complete(&mut inner);
                    drop(inner);
                    Run::drain(&r);
                }),
            );
        }
    }

    SubscriptionHandle { run }
}

/// Consumer-side handle to one run.
///
/// Dropping the handle does not cancel the run; cancellation is explicit.
pub struct SubscriptionHandle<T> {
    run: Arc<Run<T>>,
}

impl<T: Clone + Send + 'static> SubscriptionHandle<T> {
    #[inline]
    pub fn id(&self) -> RunId {
        self.run.id
    }

    /// Add demand: the number of further `Next` signals the consumer is
    /// ready to accept. Counts accumulate; `Unbounded` is sticky.
    pub fn request(&self, demand: Demand) {
        let mut inner = self.run.inner.lock();
        if inner.cancelled || inner.terminal_sent {
            return;
        }
        inner.demand = match demand {
            Demand::Unbounded => UNBOUNDED,
            Demand::Count(n) => {
                if inner.demand == UNBOUNDED {
                    UNBOUNDED
                } else {
                    inner.demand.saturating_add(n)
                }
            }
        };
        drop(inner);
        Run::drain(&self.run);
    }

    /// Stop the run: no further signals are delivered, even if pending
    /// tasks later complete. Racing an in-flight terminal resolves
    /// first-wins, so exactly one of the two is ever observable.
    pub fn cancel(&self) {
        self.run.cancel.cancel();
        let mut inner = self.run.inner.lock();
        if inner.terminal_sent || inner.cancelled {
            return;
        }
        inner.cancelled = true;
        inner.ready.clear();
        for slot in &mut inner.stage_state {
            slot.queue.clear();
        }
        tracing::debug!("[Flow] run {} cancelled by consumer", self.run.id);
    }

    pub fn is_cancelled(&self) -> bool {
        self.run.inner.lock().cancelled
    }

    /// Whether a terminal signal has been delivered.
    pub fn is_terminated(&self) -> bool {
        self.run.inner.lock().terminal_sent
    }
}

impl<T> fmt::Debug for SubscriptionHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.run.id)
            .finish()
    }
}
