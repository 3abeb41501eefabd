//! # Session Timers
//!
//! Retry timers are tokio tasks that post a [`TimerEvent`] back into the event
//! loop when they fire. Dropping the [`TimerHandle`] aborts the task, so a
//! session disarms a timer by clearing the field that holds it. A fire that
//! was already queued when the handle dropped is filtered by the manager,
//! which re-checks the session and its epoch before acting.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::events::ManagerEvent;
use crate::types::ParticipantId;

/// Which timer fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Re-send the outstanding offer
    OfferRetry,
    /// Re-offer after a transport failure
    FailureRetry,
}

/// A timer fire, addressed to one session incarnation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEvent {
    /// Session owner
    pub peer_id: ParticipantId,
    /// Session epoch when armed
    pub epoch: u64,
    /// Which timer
    pub kind: TimerKind,
}

/// Armed timer; aborted on drop
#[derive(Debug)]
pub struct TimerHandle {
    task: AbortHandle,
}

impl TimerHandle {
    /// Disarm now
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawns timers that report into the event loop
#[derive(Debug, Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<ManagerEvent>,
}

impl Scheduler {
    /// Create a scheduler posting into `tx`
    pub fn new(tx: mpsc::UnboundedSender<ManagerEvent>) -> Self {
        Self { tx }
    }

    /// Fire once after `delay`
    pub fn once(&self, delay: Duration, event: TimerEvent) -> TimerHandle {
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(ManagerEvent::Timer(event));
        });
        TimerHandle {
            task: task.abort_handle(),
        }
    }

    /// Fire every `period`, first after one full period
    pub fn every(&self, period: Duration, event: TimerEvent) -> TimerHandle {
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                interval.tick().await;
                if tx.send(ManagerEvent::Timer(event.clone())).is_err() {
                    break;
                }
            }
        });
        TimerHandle {
            task: task.abort_handle(),
        }
    }
}
