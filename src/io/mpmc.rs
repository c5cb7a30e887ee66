use crate::error::{RecvError, SendError, TryRecvError};
use crate::io::base::{BaseRx, BaseTx};
use crate::utils::CancelToken;
use crossbeam::channel as cbchan;
use std::time::{Duration, Instant};

/// How often a blocked send/recv re-checks its cancel token.
const CANCEL_POLL: Duration = Duration::from_millis(20);

pub struct MpmcChannel;

impl MpmcChannel {
    #[inline]
    pub fn bounded<T: Send + 'static>(capacity: usize) -> (MpmcSender<T>, MpmcReceiver<T>) {
        let (tx, rx) = cbchan::bounded::<T>(capacity);
        (MpmcSender { tx }, MpmcReceiver { rx })
    }

    #[inline]
    pub fn unbounded<T: Send + 'static>() -> (MpmcSender<T>, MpmcReceiver<T>) {
        let (tx, rx) = cbchan::unbounded::<T>();
        (MpmcSender { tx }, MpmcReceiver { rx })
    }
}

#[derive(Clone)]
pub struct MpmcSender<E> {
    tx: cbchan::Sender<E>,
}

impl<E: Send + 'static> BaseTx for MpmcSender<E> {
    type EventType = E;

    #[inline]
    fn try_send(&mut self, a: E) -> Result<(), SendError<E>> {
        match self.tx.try_send(a) {
            Ok(()) => Ok(()),
            Err(cbchan::TrySendError::Full(v)) => Err(SendError::full(Some(v))),
            Err(cbchan::TrySendError::Disconnected(v)) => Err(SendError::closed(Some(v))),
        }
    }

    fn send(
        &mut self,
        mut a: E,
        cancel: &CancelToken,
        timeout: Option<Duration>,
    ) -> Result<(), SendError<E>> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if cancel.is_cancelled() {
                return Err(SendError::cancelled(Some(a)));
            }
            let slice = match deadline {
                Some(d) => {
                    let left = d.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(SendError::timeout(Some(a)));
                    }
                    left.min(CANCEL_POLL)
                }
                None => CANCEL_POLL,
            };

            match self.tx.send_timeout(a, slice) {
                Ok(()) => return Ok(()),
                Err(cbchan::SendTimeoutError::Timeout(v)) => a = v,
                Err(cbchan::SendTimeoutError::Disconnected(v)) => {
                    return Err(SendError::closed(Some(v)));
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct MpmcReceiver<E> {
    rx: cbchan::Receiver<E>,
}

impl<E: Send + 'static> BaseRx for MpmcReceiver<E> {
    type EventType = E;

    #[inline]
    fn try_recv(&mut self) -> Result<E, TryRecvError> {
        match self.rx.try_recv() {
            Ok(v) => Ok(v),
            Err(cbchan::TryRecvError::Empty) => Err(TryRecvError::Empty),
            Err(cbchan::TryRecvError::Disconnected) => Err(TryRecvError::Disconnected),
        }
    }

    fn recv(&mut self, cancel: &CancelToken, timeout: Option<Duration>) -> Result<E, RecvError> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if cancel.is_cancelled() {
                return Err(RecvError::Cancelled);
            }
            let slice = match deadline {
                Some(d) => {
                    let left = d.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(RecvError::Timeout);
                    }
                    left.min(CANCEL_POLL)
                }
                None => CANCEL_POLL,
            };

            match self.rx.recv_timeout(slice) {
                Ok(v) => return Ok(v),
                Err(cbchan::RecvTimeoutError::Timeout) => continue,
                Err(cbchan::RecvTimeoutError::Disconnected) => {
                    return Err(RecvError::Disconnected);
                }
            }
        }
    }
}
