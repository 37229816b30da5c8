//! One-way, last-value-wins transport out of the real-time domain

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;

/// What happened to a published value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued without displacing anything
    Queued,
    /// Queued after the oldest pending value was dropped
    Superseded,
}

/// Create a publisher/subscriber pair holding at most `capacity` pending values.
pub fn channel<T>(capacity: usize) -> (FeaturePublisher<T>, FeatureSubscriber<T>) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        FeaturePublisher {
            tx,
            evict: rx.clone(),
            published: 0,
            superseded: 0,
        },
        FeatureSubscriber { rx },
    )
}

/// Producer half. Never blocks and never retries: when the consumer falls
/// behind, the oldest pending value is dropped in favour of the newest.
pub struct FeaturePublisher<T> {
    tx: Sender<T>,
    /// Receiver clone used only to drop the oldest pending value
    evict: Receiver<T>,
    published: u64,
    superseded: u64,
}

impl<T> FeaturePublisher<T> {
    pub fn publish(&mut self, value: T) -> Delivery {
        self.published += 1;
        match self.tx.try_send(value) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(value)) => {
                let _ = self.evict.try_recv();
                self.superseded += 1;
                // The consumer may have drained the queue meanwhile; either
                // way one slot is free unless another producer raced us.
                let _ = self.tx.try_send(value);
                Delivery::Superseded
            }
            // Unreachable while `evict` is alive
            Err(TrySendError::Disconnected(_)) => Delivery::Superseded,
        }
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    /// Values dropped because the consumer did not keep up.
    pub fn superseded(&self) -> u64 {
        self.superseded
    }
}

/// Consumer half
pub struct FeatureSubscriber<T> {
    rx: Receiver<T>,
}

impl<T> FeatureSubscriber<T> {
    /// Oldest pending value, if any.
    pub fn try_next(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Newest pending value, discarding older ones.
    pub fn latest(&self) -> Option<T> {
        self.rx.try_iter().last()
    }

    /// Wait up to `timeout` for the next value.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Some(value),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}
