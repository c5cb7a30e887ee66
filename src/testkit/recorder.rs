use crate::io::base::BaseTx;
use crate::io::mpmc::{MpmcChannel, MpmcReceiver, MpmcSender};
use crate::signal::{Signal, Subscriber};

/// Subscriber that forwards every signal into an mpmc channel, so a test
/// driver can observe the exact delivery sequence from outside the run.
pub struct Recorder<T> {
    tx: MpmcSender<Signal<T>>,
}

impl<T: Send + 'static> Recorder<T> {
    pub fn channel() -> (Self, MpmcReceiver<Signal<T>>) {
        let (tx, rx) = MpmcChannel::unbounded();
        (Self { tx }, rx)
    }
}

impl<T: Send + 'static> Subscriber<T> for Recorder<T> {
    fn on_signal(&mut self, signal: Signal<T>) {
        // The driver dropping its receiver just means it stopped watching.
        let _ = self.tx.try_send(signal);
    }
}
