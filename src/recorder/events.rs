//! Logger notifications
//!
//! One ordered stream from the logger to a single listener. Sends never
//! block. Status changes are always delivered; level updates are shed when
//! the listener already has a backlog of them, since a meter only needs the
//! latest reading.

use super::state::{LevelSample, LoggerStatus, StopReason};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

/// Undelivered level updates allowed before new ones are dropped
pub const MAX_PENDING_LEVELS: usize = 8;

/// Events emitted by the logger
#[derive(Debug, Clone, PartialEq)]
pub enum LoggerEvent {
    /// Status changed; fired exactly once per transition
    StatusChanged {
        status: LoggerStatus,
        /// Set when the logger stopped
        reason: Option<StopReason>,
    },
    /// Latest peak levels
    Level(LevelSample),
    /// A new segment file was opened
    SegmentStarted(PathBuf),
    /// A segment file was finalized
    SegmentFinished(PathBuf),
}

/// Create a connected sender/receiver pair
pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending_levels = Arc::new(AtomicUsize::new(0));
    (
        EventSender {
            tx,
            pending_levels: pending_levels.clone(),
        },
        EventReceiver { rx, pending_levels },
    )
}

/// Sending half, shared between the control path and the writer thread
#[derive(Clone)]
pub struct EventSender {
    tx: UnboundedSender<LoggerEvent>,
    pending_levels: Arc<AtomicUsize>,
}

impl EventSender {
    /// Send a status, segment or level event
    pub fn send(&self, event: LoggerEvent) {
        if let LoggerEvent::Level(level) = event {
            self.send_level(level);
            return;
        }
        if self.tx.send(event).is_err() {
            tracing::debug!("Event listener has gone away");
        }
    }

    /// Send a level update unless the listener is already behind.
    /// Returns whether the update was queued.
    pub fn send_level(&self, level: LevelSample) -> bool {
        if self.pending_levels.load(Ordering::Acquire) >= MAX_PENDING_LEVELS {
            return false;
        }
        self.pending_levels.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(LoggerEvent::Level(level)).is_err() {
            self.pending_levels.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }
}

/// Receiving half, owned by the single listener
pub struct EventReceiver {
    rx: UnboundedReceiver<LoggerEvent>,
    pending_levels: Arc<AtomicUsize>,
}

impl EventReceiver {
    fn delivered(&self, event: LoggerEvent) -> LoggerEvent {
        if matches!(event, LoggerEvent::Level(_)) {
            self.pending_levels.fetch_sub(1, Ordering::AcqRel);
        }
        event
    }

    /// Take the next event without waiting
    pub fn try_recv(&mut self) -> Option<LoggerEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(self.delivered(event)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait for the next event; `None` once the logger is gone
    pub async fn recv(&mut self) -> Option<LoggerEvent> {
        let event = self.rx.recv().await?;
        Some(self.delivered(event))
    }

    /// Take every event queued so far
    pub fn drain(&mut self) -> Vec<LoggerEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(v: f32) -> LevelSample {
        LevelSample { left: v, right: v }
    }

    #[test]
    fn test_events_arrive_in_order() {
        let (tx, mut rx) = event_channel();
        tx.send(LoggerEvent::StatusChanged {
            status: LoggerStatus::Logging,
            reason: None,
        });
        tx.send(LoggerEvent::Level(level(0.5)));
        tx.send(LoggerEvent::StatusChanged {
            status: LoggerStatus::NotLogging,
            reason: Some(StopReason::UserRequested),
        });

        let events = rx.drain();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[1], LoggerEvent::Level(_)));
        assert!(matches!(
            events[2],
            LoggerEvent::StatusChanged {
                status: LoggerStatus::NotLogging,
                ..
            }
        ));
    }

    #[test]
    fn test_levels_are_shed_when_listener_is_behind() {
        let (tx, mut rx) = event_channel();
        for i in 0..(MAX_PENDING_LEVELS + 5) {
            tx.send_level(level(i as f32 / 100.0));
        }
        // Status changes are never shed
        tx.send(LoggerEvent::StatusChanged {
            status: LoggerStatus::NotLogging,
            reason: None,
        });

        let events = rx.drain();
        let levels = events
            .iter()
            .filter(|e| matches!(e, LoggerEvent::Level(_)))
            .count();
        assert_eq!(levels, MAX_PENDING_LEVELS);
        assert!(matches!(events.last(), Some(LoggerEvent::StatusChanged { .. })));

        // Draining frees the budget again
        assert!(tx.send_level(level(1.0)));
    }

    #[test]
    fn test_send_after_listener_dropped_is_harmless() {
        let (tx, rx) = event_channel();
        drop(rx);
        assert!(!tx.send_level(level(0.1)));
        tx.send(LoggerEvent::SegmentStarted(PathBuf::from("a.mp3")));
    }

    #[tokio::test]
    async fn test_async_recv() {
        let (tx, mut rx) = event_channel();
        tx.send(LoggerEvent::SegmentFinished(PathBuf::from("b.wav")));
        assert_eq!(
            rx.recv().await,
            Some(LoggerEvent::SegmentFinished(PathBuf::from("b.wav")))
        );
    }
}
