//! Tracker notifications and their fan-out to subscribers

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::constants::SUBSCRIBER_CHANNEL_CAPACITY;
use crate::core::types::ScreenPosition;

/// Notifications published by the tracker
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    PositionUpdated(ScreenPosition),
    WatchingStateChanged(bool),
    StatusMessage(String),
    ErrorOccurred(String),
    /// The active map changed to this key
    MapChanged(String),
}

/// Fan-out of tracker events to any number of subscribers.
///
/// Events are delivered on the emitting thread. A subscriber that stops
/// draining its channel loses events rather than stalling the tracker;
/// dropped receivers are pruned on the next emit.
#[derive(Default)]
pub struct Notifier {
    subscribers: Mutex<Vec<Sender<TrackerEvent>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<TrackerEvent> {
        let (tx, rx) = bounded(SUBSCRIBER_CHANNEL_CAPACITY);
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn emit(&self, event: TrackerEvent) {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("[EVENTS] Subscriber channel full, dropping event");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        if subscribers.len() < before {
            debug!(
                pruned = before - subscribers.len(),
                remaining = subscribers.len(),
                "[EVENTS] Dropped subscribers removed"
            );
        }
    }
}
