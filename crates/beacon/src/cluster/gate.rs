//! One-shot gate used to race a deadline against an event.
//!
//! The first `signal` wins and its value is what every waiter observes.
//! A `wait` that starts after the gate opened returns immediately.

use std::time::Duration;
use tokio::sync::watch;

/// How a `wait` ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome<T> {
    /// The gate was opened with this value
    Signalled(T),
    /// The deadline elapsed first
    TimedOut,
}

/// One-shot "wait until signalled" gate carrying the first signalled value
#[derive(Debug)]
pub struct Gate<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone> Gate<T> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Open the gate. Returns false if it was already open; the first value is kept.
    pub fn signal(&self, value: T) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            true
        })
    }

    #[cfg(test)]
    pub fn is_signalled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Block until the gate opens or `deadline` elapses
    pub async fn wait(&self, deadline: Duration) -> GateOutcome<T> {
        let mut rx = self.tx.subscribe();
        match tokio::time::timeout(deadline, rx.wait_for(Option::is_some)).await {
            Ok(Ok(value)) => match (*value).clone() {
                Some(value) => GateOutcome::Signalled(value),
                None => GateOutcome::TimedOut,
            },
            // Sender lives in `self`, so the channel cannot close while we wait
            Ok(Err(_)) | Err(_) => GateOutcome::TimedOut,
        }
    }
}

impl<T: Clone> Default for Gate<T> {
    fn default() -> Self {
        Self::new()
    }
}
