//! Bounded event queue that never blocks its producer
//!
//! Watchers push events from their background thread; the consumer drains
//! them at its own pace. When the queue is full the oldest unconsumed event
//! is dropped to make room.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

pub struct EventQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> EventQueue<T> {
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx }
    }

    /// A consumer handle; every clone competes for the same events
    pub fn receiver(&self) -> Receiver<T> {
        self.rx.clone()
    }

    /// Push an event, evicting the oldest ones while the queue is full.
    /// Returns how many events were evicted.
    pub fn push(&self, event: T) -> usize {
        let mut evicted = 0;
        let mut event = event;
        loop {
            match self.tx.try_send(event) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(returned)) => {
                    if self.rx.try_recv().is_ok() {
                        evicted += 1;
                    }
                    event = returned;
                }
                // Both ends live in `self`
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }

    /// Push an event, then report any evictions with a follow-up event built
    /// by `overflow`. Returns the total number of evicted events.
    pub fn push_reporting(&self, event: T, overflow: impl Fn(usize) -> T) -> usize {
        let evicted = self.push(event);
        if evicted == 0 {
            return 0;
        }
        evicted + self.push(overflow(evicted))
    }

    /// Discard every queued event, returning how many were dropped
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Clone for EventQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_capacity() {
        let queue = EventQueue::bounded(3);
        assert_eq!(queue.push(1), 0);
        assert_eq!(queue.push(2), 0);
        assert_eq!(queue.len(), 2);

        let rx = queue.receiver();
        assert_eq!(rx.try_recv(), Ok(1));
        assert_eq!(rx.try_recv(), Ok(2));
    }

    #[test]
    fn test_push_evicts_oldest_when_full() {
        let queue = EventQueue::bounded(2);
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.push(3), 1);

        let received: Vec<_> = queue.receiver().try_iter().collect();
        assert_eq!(received, vec![2, 3]);
    }

    #[test]
    fn test_push_reporting_appends_overflow_event() {
        let queue = EventQueue::bounded(3);
        for i in 0..3 {
            queue.push(i);
        }
        let evicted = queue.push_reporting(10, |n| -(n as i32));
        assert_eq!(evicted, 2);

        // One eviction makes room for 10, another for the report
        let received: Vec<_> = queue.receiver().try_iter().collect();
        assert_eq!(received, vec![2, 10, -1]);
    }

    #[test]
    fn test_drain_discards_everything() {
        let queue = EventQueue::bounded(4);
        queue.push("a");
        queue.push("b");
        assert_eq!(queue.drain(), 2);
        assert!(queue.is_empty());
    }
}
