use crate::error::{RecvError, SendError, TryRecvError};
use crate::utils::CancelToken;
use std::time::Duration;

/// Base trait for sending typed events (TX half of a transport).
pub trait BaseTx: Send + 'static {
    /// Event type carried by this transport.
    type EventType: Send + 'static;

    /// Non-blocking send. Returns `Err` if the channel is full or closed.
    fn try_send(&mut self, a: Self::EventType) -> Result<(), SendError<Self::EventType>>;

    /// Cooperative send with optional timeout and cancellation.
    fn send(
        &mut self,
        a: Self::EventType,
        cancel: &CancelToken,
        timeout: Option<Duration>,
    ) -> Result<(), SendError<Self::EventType>>;
}

/// Base trait for receiving typed events (RX half of a transport).
pub trait BaseRx: Send + 'static {
    /// Event type carried by this transport.
    type EventType: Send + 'static;

    /// Non-blocking receive.
    fn try_recv(&mut self) -> Result<Self::EventType, TryRecvError>;

    /// Cooperative receive with optional timeout and cancellation.
    fn recv(
        &mut self,
        cancel: &CancelToken,
        timeout: Option<Duration>,
    ) -> Result<Self::EventType, RecvError>;

    /// Drain up to `max` already-available events.
    fn drain(&mut self, max: usize) -> Vec<Self::EventType> {
        let mut out = Vec::new();
        while out.len() < max {
            match self.try_recv() {
                Ok(a) => out.push(a),
                Err(_) => break,
            }
        }
        out
    }

    /// Drain all currently available events.
    fn drain_max(&mut self) -> Vec<Self::EventType> {
        self.drain(usize::MAX)
    }
}
