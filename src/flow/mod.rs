pub use run::{RunId, SubscriptionHandle};

mod run;

use crate::config::EngineConfig;
use crate::error::WorkError;
use crate::scheduler::{Scheduler, WorkerPool};
use crate::signal::Subscriber;
use std::sync::Arc;
use std::time::Duration;

/// Opaque unit of work producing at most one value.
/// `Ok(Some(v))` emits `v` then completes; `Ok(None)` completes empty.
pub type SourceWork<T> = Arc<dyn Fn() -> Result<Option<T>, WorkError> + Send + Sync>;

/// Dependent unit of work the chain waits on before moving past a value.
pub type StepWork<T> = Arc<dyn Fn(&T) -> Result<(), WorkError> + Send + Sync>;

/// Per-element unit of work applied concurrently by `fan_out`.
pub type MapWork<T> = Arc<dyn Fn(T) -> Result<T, WorkError> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum FlowSource<T> {
    /// Ordered values replayed synchronously on every subscribe.
    Emit(Arc<[T]>),
    /// At-most-one result; the work runs once per subscription.
    Work(SourceWork<T>),
}

/// One stage descriptor in the operator chain. The chain is plain data; the
/// per-subscription executor in [`run`] interprets it.
#[derive(Clone)]
pub(crate) enum StageOp<T> {
    /// Gate everything behind one pending task of the given duration.
    DelayFirst(Duration),
    /// Sequential dependent work; the value is discarded afterwards.
    Then(StepWork<T>),
    /// Sequential dependent work; the original value is re-emitted.
    ThenReturn(StepWork<T>),
    /// Concurrent per-element work; `limit` bounds in-flight elements,
    /// `None` means unbounded.
    FanOut { work: MapWork<T>, limit: Option<usize> },
}

/// A cold asynchronous computation of zero, one, or many values.
///
/// Constructing a `Flow` performs no work. Every [`Flow::subscribe`] starts
/// an independent run with its own subscription state and pending tasks;
/// re-subscribing replays the same logical sequence. The scheduler is passed
/// in at subscription time and never assumed.
#[derive(Clone)]
pub struct Flow<T> {
    source: FlowSource<T>,
    stages: Vec<StageOp<T>>,
}

impl<T: Clone + Send + 'static> Flow<T> {
    /// A flow that replays the given values in order, then completes.
    pub fn emit(values: impl IntoIterator<Item = T>) -> Self {
        Self {
            source: FlowSource::Emit(values.into_iter().collect::<Vec<_>>().into()),
            stages: Vec::new(),
        }
    }

    /// A flow around an opaque unit of work, executed exactly once per
    /// subscription on the scheduler. The engine only cares that the work
    /// returns a value, returns nothing, or fails.
    pub fn from_work<F>(work: F) -> Self
    where
        F: Fn() -> Result<Option<T>, WorkError> + Send + Sync + 'static,
    {
        Self {
            source: FlowSource::Work(Arc::new(work)),
            stages: Vec::new(),
        }
    }

    /// Hold back every signal except `Subscribed` until `delay` has elapsed;
    /// everything then passes through unchanged and in order.
    pub fn delay_first(mut self, delay: Duration) -> Self {
        self.stages.push(StageOp::DelayFirst(delay));
        self
    }

    /// For each value, schedule `work` and wait for it before moving on;
    /// the value itself is discarded, so the resulting flow emits no `Next`,
    /// only the terminal. A failing `work` errors the chain and no further
    /// values are processed.
    pub fn then<F>(mut self, work: F) -> Self
    where
        F: Fn(&T) -> Result<(), WorkError> + Send + Sync + 'static,
    {
        self.stages.push(StageOp::Then(Arc::new(work)));
        self
    }

    /// Like [`Flow::then`], but re-emits the original value once the
    /// dependent work completes. Sequential: one dependent work in flight at
    /// a time, source order preserved.
    pub fn then_return<F>(mut self, work: F) -> Self
    where
        F: Fn(&T) -> Result<(), WorkError> + Send + Sync + 'static,
    {
        self.stages.push(StageOp::ThenReturn(Arc::new(work)));
        self
    }

    /// For each value, independently schedule `work`; results are re-emitted
    /// as they complete, so order is not guaranteed but the multiset of
    /// values is preserved. `limit` bounds how many elements may be in
    /// flight at once; `None` (the default of the engine) is unbounded, and
    /// a bound of zero is treated as one so the stage always makes progress.
    /// The first failing element errors the whole flow and cancels in-flight
    /// siblings best-effort.
    pub fn fan_out<F>(mut self, work: F, limit: Option<usize>) -> Self
    where
        F: Fn(T) -> Result<T, WorkError> + Send + Sync + 'static,
    {
        self.stages.push(StageOp::FanOut {
            work: Arc::new(work),
            limit: limit.map(|l| l.max(1)),
        });
        self
    }

    /// [`Flow::fan_out`] with the concurrency bound taken from
    /// [`EngineConfig::fan_out_limit`].
    pub fn fan_out_default<F>(self, cfg: &EngineConfig, work: F) -> Self
    where
        F: Fn(T) -> Result<T, WorkError> + Send + Sync + 'static,
    {
        self.fan_out(work, cfg.fan_out_limit)
    }

    /// Start an independent run of this flow against `scheduler`.
    ///
    /// `Subscribed` is delivered before this returns. Values flow only as
    /// demand is requested on the returned handle.
    pub fn subscribe<S>(&self, subscriber: S, scheduler: Arc<dyn Scheduler>) -> SubscriptionHandle<T>
    where
        S: Subscriber<T>,
    {
        run::start(self.source.clone(), self.stages.clone(), Box::new(subscriber), scheduler)
    }

    /// [`Flow::subscribe`] against the process-wide worker pool.
    pub fn subscribe_default<S>(&self, subscriber: S) -> SubscriptionHandle<T>
    where
        S: Subscriber<T>,
    {
        self.subscribe(subscriber, WorkerPool::global())
    }
}
