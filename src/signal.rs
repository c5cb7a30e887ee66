use crate::error::WorkError;
use std::time::Duration;

/// One protocol-level event delivered from a producer to a consumer.
///
/// A subscription sees exactly one `Subscribed`, zero or more `Next`
/// strictly after it, and at most one terminal (`Completed` or `Errored`)
/// after which nothing else is delivered.
#[derive(Debug)]
pub enum SignalKind<T> {
    Subscribed,
    Next(T),
    Completed,
    Errored(WorkError),
}

impl<T> SignalKind<T> {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SignalKind::Completed | SignalKind::Errored(_))
    }

    /// Short name for logs and verification diffs.
    pub fn label(&self) -> &'static str {
        match self {
            SignalKind::Subscribed => "Subscribed",
            SignalKind::Next(_) => "Next",
            SignalKind::Completed => "Completed",
            SignalKind::Errored(_) => "Errored",
        }
    }
}

/// A signal plus the elapsed scheduler time since the subscription was
/// established. Under a virtual scheduler `at` is logical time; under the
/// worker pool it is wall-clock elapsed.
#[derive(Debug)]
pub struct Signal<T> {
    pub kind: SignalKind<T>,
    pub at: Duration,
}

/// Consumer side of the signal protocol.
///
/// Delivery is serialized per subscription: calls never overlap and arrive
/// in producer order, regardless of how many scheduler workers are involved.
/// Calling [`SubscriptionHandle::request`] or `cancel` from inside
/// `on_signal` is allowed.
///
/// [`SubscriptionHandle::request`]: crate::flow::SubscriptionHandle::request
pub trait Subscriber<T>: Send + 'static {
    fn on_signal(&mut self, signal: Signal<T>);
}

impl<T, F> Subscriber<T> for F
where
    F: FnMut(Signal<T>) + Send + 'static,
{
    fn on_signal(&mut self, signal: Signal<T>) {
        self(signal)
    }
}

/// Number of `Next` signals the consumer declares itself ready to receive.
/// The producer never delivers beyond outstanding demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demand {
    Count(u64),
    Unbounded,
}
