use std::error::Error;
use std::fmt;

const ERR_MSG_QUEUE_FULL: &str = "signal queue is full";
const ERR_MSG_TRANSPORT_CLOSED: &str = "signal transport is closed";
const ERR_MSG_TIMEOUT: &str = "operation timed out";
const ERR_MSG_DISCONNECTED: &str = "transport disconnected";
const ERR_MSG_CANCELLED: &str = "operation cancelled";

/// Failure raised by an opaque unit of work.
///
/// The engine never inspects what the work computes; it only carries the
/// cause into the `Errored` terminal signal of the owning subscription.
#[derive(Debug)]
pub enum WorkError {
    /// The work reported a failure with a message.
    Failed(String),
    /// The work observed cancellation and gave up.
    Cancelled,
    /// Anything else the work surfaced.
    Unknown(anyhow::Error),
}

impl WorkError {
    /// Shorthand for a message-only failure.
    pub fn msg(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

impl fmt::Display for WorkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(s) => write!(f, "work failed: {s}"),
            Self::Cancelled => write!(f, "{ERR_MSG_CANCELLED}"),
            Self::Unknown(err) => write!(f, "work failed: {err}"),
        }
    }
}

impl Error for WorkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Unknown(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for WorkError {
    fn from(err: anyhow::Error) -> Self {
        WorkError::Unknown(err)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SendFailReason {
    Timeout,
    Cancelled,
    Full,
    Closed,
}

impl fmt::Display for SendFailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendFailReason::Timeout => write!(f, "{ERR_MSG_TIMEOUT}"),
            SendFailReason::Cancelled => write!(f, "{ERR_MSG_CANCELLED}"),
            SendFailReason::Full => write!(f, "{ERR_MSG_QUEUE_FULL}"),
            SendFailReason::Closed => write!(f, "{ERR_MSG_TRANSPORT_CLOSED}"),
        }
    }
}

/// Send failure carrying the value back to the caller when possible.
#[derive(Debug)]
pub struct SendError<E> {
    pub value: Option<E>,
    pub reason: SendFailReason,
}

impl<E> SendError<E> {
    pub fn full(value: Option<E>) -> Self {
        Self {
            value,
            reason: SendFailReason::Full,
        }
    }

    pub fn closed(value: Option<E>) -> Self {
        Self {
            value,
            reason: SendFailReason::Closed,
        }
    }

    pub fn cancelled(value: Option<E>) -> Self {
        Self {
            value,
            reason: SendFailReason::Cancelled,
        }
    }

    pub fn timeout(value: Option<E>) -> Self {
        Self {
            value,
            reason: SendFailReason::Timeout,
        }
    }
}

impl<E> fmt::Display for SendError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl<E: fmt::Debug> Error for SendError<E> {}

#[derive(Debug)]
pub enum TryRecvError {
    Empty,
    Disconnected,
}

#[derive(Debug)]
pub enum RecvError {
    Timeout,
    Disconnected,
    Cancelled,
}

impl Error for RecvError {}

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecvError::Timeout => write!(f, "{ERR_MSG_TIMEOUT}"),
            RecvError::Disconnected => write!(f, "{ERR_MSG_DISCONNECTED}"),
            RecvError::Cancelled => write!(f, "{ERR_MSG_CANCELLED}"),
        }
    }
}

/// Aborts the process on an engine-internal protocol violation.
///
/// Reaching this means the engine attempted to emit a signal after a
/// terminal one, or delivered past outstanding demand. That is a bug in
/// the engine, not a data condition, so it is not recoverable.
pub(crate) fn protocol_violation(msg: &str) -> ! {
    tracing::error!("[Flow] protocol violation: {msg}");
    panic!("flowrt protocol violation: {msg}");
}
