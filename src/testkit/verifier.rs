use super::Recorder;
use crate::error::{RecvError, WorkError};
use crate::flow::Flow;
use crate::io::base::BaseRx;
use crate::io::mpmc::MpmcReceiver;
use crate::scheduler::{Scheduler, VirtualScheduler, WorkerPool};
use crate::signal::{Demand, Signal, SignalKind};
use crate::utils::CancelToken;
use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// One scripted expectation.
enum Expect<T> {
    Subscription,
    NoSignalFor(Duration),
    NextCount(usize),
    NextMatches(Box<dyn Fn(&T) -> bool + Send>),
    Error(Option<Box<dyn Fn(&WorkError) -> bool + Send>>),
    Complete,
}

impl<T> Expect<T> {
    fn expected(&self) -> String {
        match self {
            Expect::Subscription => "Subscribed".into(),
            Expect::NoSignalFor(d) => format!("silence for {d:?}"),
            Expect::NextCount(n) => format!("{n} Next signals"),
            Expect::NextMatches(_) => "Next matching predicate".into(),
            Expect::Error(None) => "Errored".into(),
            Expect::Error(Some(_)) => "Errored matching predicate".into(),
            Expect::Complete => "Completed".into(),
        }
    }
}

/// Why a verification script failed, pointing at the zero-based step.
#[derive(Debug, PartialEq, Eq)]
pub enum VerifyError {
    /// A signal arrived but was not the expected one.
    Mismatch {
        step: usize,
        expected: String,
        actual: String,
    },
    /// A signal arrived inside a window that demanded silence.
    EarlyDeadline {
        step: usize,
        deadline: Duration,
        window: Duration,
    },
    /// No signal arrived and nothing was pending that could produce one.
    Timeout {
        step: usize,
        expected: String,
        waited: Duration,
    },
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyError::Mismatch {
                step,
                expected,
                actual,
            } => write!(f, "step {step}: expected {expected}, got {actual}"),
            VerifyError::EarlyDeadline {
                step,
                deadline,
                window,
            } => write!(
                f,
                "step {step}: signal at {deadline:?} inside a silence window of {window:?}"
            ),
            VerifyError::Timeout {
                step,
                expected,
                waited,
            } => write!(
                f,
                "step {step}: no signal after {waited:?}, expected {expected}"
            ),
        }
    }
}

impl Error for VerifyError {}

/// Scripted, single-assertion check of one subscription run.
///
/// The script is a list of expectations consumed in order. Under virtual
/// time the verifier owns the clock and advances it itself: a silence window
/// advances by exactly that duration, and a signal expectation jumps the
/// clock from deadline to deadline until the signal appears, so a run over
/// hours of logical delay verifies in microseconds. Under real time the
/// verifier blocks on the recorder channel with a per-step timeout.
pub struct FlowVerifier<T> {
    flow: Flow<T>,
    scheduler: Arc<dyn Scheduler>,
    clock: Option<Arc<VirtualScheduler>>,
    steps: Vec<Expect<T>>,
    demand: Demand,
    step_timeout: Duration,
}

impl<T: Clone + Send + 'static> FlowVerifier<T> {
    /// Verify against a fresh virtual clock. The factory receives the clock
    /// so the flow under test can share it for its own scheduling.
    pub fn with_virtual_time<F>(factory: F) -> Self
    where
        F: FnOnce(&Arc<VirtualScheduler>) -> Flow<T>,
    {
        let clock = Arc::new(VirtualScheduler::new());
        let flow = factory(&clock);
        Self {
            flow,
            scheduler: clock.clone(),
            clock: Some(clock),
            steps: Vec::new(),
            demand: Demand::Unbounded,
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    /// Verify against the process-wide worker pool, with the step timeout
    /// taken from [`EngineConfig::step_timeout_ms`] when set.
    ///
    /// [`EngineConfig::step_timeout_ms`]: crate::config::EngineConfig::step_timeout_ms
    pub fn with_real_time(flow: Flow<T>) -> Self {
        let pool = WorkerPool::global();
        let step_timeout = pool
            .config()
            .step_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_STEP_TIMEOUT);
        Self {
            flow,
            scheduler: pool,
            clock: None,
            steps: Vec::new(),
            demand: Demand::Unbounded,
            step_timeout,
        }
    }

    /// Initial demand requested right after subscribing. Defaults to
    /// unbounded.
    pub fn request(mut self, demand: Demand) -> Self {
        self.demand = demand;
        self
    }

    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn expect_subscription(mut self) -> Self {
        self.steps.push(Expect::Subscription);
        self
    }

    /// Expect no signal at all for the given duration. Under virtual time
    /// this advances the clock by exactly `window`; a signal stamped
    /// strictly inside the window fails the script.
    pub fn expect_no_signal_for(mut self, window: Duration) -> Self {
        self.steps.push(Expect::NoSignalFor(window));
        self
    }

    pub fn expect_next_count(mut self, n: usize) -> Self {
        self.steps.push(Expect::NextCount(n));
        self
    }

    pub fn expect_next<F>(mut self, pred: F) -> Self
    where
        F: Fn(&T) -> bool + Send + 'static,
    {
        self.steps.push(Expect::NextMatches(Box::new(pred)));
        self
    }

    pub fn expect_error(mut self) -> Self {
        self.steps.push(Expect::Error(None));
        self
    }

    pub fn expect_error_matches<F>(mut self, pred: F) -> Self
    where
        F: Fn(&WorkError) -> bool + Send + 'static,
    {
        self.steps.push(Expect::Error(Some(Box::new(pred))));
        self
    }

    pub fn expect_complete(mut self) -> Self {
        self.steps.push(Expect::Complete);
        self
    }

    /// Subscribe, request the initial demand, and run the script. The run
    /// is cancelled if any step fails.
    pub fn verify(self) -> Result<(), VerifyError> {
        let (recorder, rx) = Recorder::channel();
        let handle = self.flow.subscribe(recorder, self.scheduler.clone());
        handle.request(self.demand);

        let res = match &self.clock {
            Some(clock) => Self::drive_virtual(clock, rx, self.steps),
            None => Self::drive_real(rx, self.steps, self.step_timeout),
        };
        if res.is_err() {
            handle.cancel();
        }
        res
    }

    fn drive_virtual(
        clock: &Arc<VirtualScheduler>,
        mut rx: MpmcReceiver<Signal<T>>,
        steps: Vec<Expect<T>>,
    ) -> Result<(), VerifyError> {
        // Fresh clock, subscribed at logical zero: `Signal::at` and
        // `clock.now()` share the same timeline.
        clock.run_ready();
        let mut pending: VecDeque<Signal<T>> = rx.drain_max().into();

        for (step, exp) in steps.into_iter().enumerate() {
            match exp {
                Expect::NoSignalFor(window) => {
                    if let Some(sig) = pending.front() {
                        return Err(VerifyError::Mismatch {
                            step,
                            expected: format!("silence for {window:?}"),
                            actual: describe(sig),
                        });
                    }
                    let boundary = clock.now() + window;
                    clock.advance_by(window);
                    pending.extend(rx.drain_max());
                    if let Some(sig) = pending.front()
                        && sig.at < boundary
                    {
                        return Err(VerifyError::EarlyDeadline {
                            step,
                            deadline: sig.at,
                            window,
                        });
                    }
                }
                Expect::NextCount(n) => {
                    for _ in 0..n {
                        let sig = Self::pop_virtual(clock, &mut rx, &mut pending, step, "Next")?;
                        if !matches!(sig.kind, SignalKind::Next(_)) {
                            return Err(VerifyError::Mismatch {
                                step,
                                expected: "Next".into(),
                                actual: describe(&sig),
                            });
                        }
                    }
                }
                exp => {
                    let expected = exp.expected();
                    let sig = Self::pop_virtual(clock, &mut rx, &mut pending, step, &expected)?;
                    Self::check_signal(step, &expected, &exp, sig)?;
                }
            }
        }
        Ok(())
    }

    /// Next recorded signal under virtual time, advancing the clock from
    /// deadline to deadline until one appears.
    fn pop_virtual(
        clock: &Arc<VirtualScheduler>,
        rx: &mut MpmcReceiver<Signal<T>>,
        pending: &mut VecDeque<Signal<T>>,
        step: usize,
        expected: &str,
    ) -> Result<Signal<T>, VerifyError> {
        let start = clock.now();
        loop {
            pending.extend(rx.drain_max());
            if let Some(sig) = pending.pop_front() {
                return Ok(sig);
            }
            clock.run_ready();
            pending.extend(rx.drain_max());
            if let Some(sig) = pending.pop_front() {
                return Ok(sig);
            }
            match clock.next_deadline() {
                Some(deadline) => clock.advance_by(deadline.saturating_sub(clock.now())),
                None => {
                    return Err(VerifyError::Timeout {
                        step,
                        expected: expected.to_string(),
                        waited: clock.now().saturating_sub(start),
                    });
                }
            }
        }
    }

    fn drive_real(
        mut rx: MpmcReceiver<Signal<T>>,
        steps: Vec<Expect<T>>,
        step_timeout: Duration,
    ) -> Result<(), VerifyError> {
        let cancel = CancelToken::root();
        for (step, exp) in steps.into_iter().enumerate() {
            match exp {
                Expect::NoSignalFor(window) => match rx.recv(&cancel, Some(window)) {
                    Err(RecvError::Timeout) | Err(RecvError::Disconnected) => {}
                    Err(RecvError::Cancelled) => unreachable!("root token is never cancelled"),
                    Ok(sig) => {
                        return Err(VerifyError::EarlyDeadline {
                            step,
                            deadline: sig.at,
                            window,
                        });
                    }
                },
                Expect::NextCount(n) => {
                    for _ in 0..n {
                        let sig = Self::pop_real(&mut rx, &cancel, step_timeout, step, "Next")?;
                        if !matches!(sig.kind, SignalKind::Next(_)) {
                            return Err(VerifyError::Mismatch {
                                step,
                                expected: "Next".into(),
                                actual: describe(&sig),
                            });
                        }
                    }
                }
                exp => {
                    let expected = exp.expected();
                    let sig = Self::pop_real(&mut rx, &cancel, step_timeout, step, &expected)?;
                    Self::check_signal(step, &expected, &exp, sig)?;
                }
            }
        }
        Ok(())
    }

    fn pop_real(
        rx: &mut MpmcReceiver<Signal<T>>,
        cancel: &CancelToken,
        step_timeout: Duration,
        step: usize,
        expected: &str,
    ) -> Result<Signal<T>, VerifyError> {
        match rx.recv(cancel, Some(step_timeout)) {
            Ok(sig) => Ok(sig),
            Err(RecvError::Timeout) => Err(VerifyError::Timeout {
                step,
                expected: expected.to_string(),
                waited: step_timeout,
            }),
            Err(e) => Err(VerifyError::Mismatch {
                step,
                expected: expected.to_string(),
                actual: format!("transport error: {e}"),
            }),
        }
    }

    fn check_signal(
        step: usize,
        expected: &str,
        exp: &Expect<T>,
        sig: Signal<T>,
    ) -> Result<(), VerifyError> {
        let ok = match (exp, &sig.kind) {
            (Expect::Subscription, SignalKind::Subscribed) => true,
            (Expect::NextMatches(pred), SignalKind::Next(v)) => pred(v),
            (Expect::Error(None), SignalKind::Errored(_)) => true,
            (Expect::Error(Some(pred)), SignalKind::Errored(e)) => pred(e),
            (Expect::Complete, SignalKind::Completed) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(VerifyError::Mismatch {
                step,
                expected: expected.to_string(),
                actual: describe(&sig),
            })
        }
    }
}

fn describe<T>(sig: &Signal<T>) -> String {
    match &sig.kind {
        SignalKind::Errored(e) => format!("Errored({e}) at {:?}", sig.at),
        k => format!("{} at {:?}", k.label(), sig.at),
    }
}
