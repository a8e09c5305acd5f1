use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::{ChromaError, Result};

/// What to do when a producer publishes into a full store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued item to make room.
    #[default]
    DropOldest,
    /// Discard the item being published.
    RejectNewest,
}

/// Outcome of a [`EventStore::publish`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Published {
    Queued,
    /// Queued after evicting the oldest item.
    DroppedOldest,
    /// The store was full and the item was discarded.
    Rejected,
}

/// Bounded multi-producer mailbox drained in batches by a single consumer.
///
/// Producers never wait: a full store sheds an item according to its
/// [`OverflowPolicy`] and counts the loss. The store keeps both ends of the
/// channel, so the oldest item can be evicted from the producer side.
#[derive(Debug)]
pub struct EventStore<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    capacity: usize,
    overflow: OverflowPolicy,
    dropped: AtomicU64,
}

impl<T> EventStore<T> {
    /// Creates a store holding at most `capacity` items (minimum one).
    pub fn new(capacity: usize, overflow: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
            overflow,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items lost to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Appends an item without blocking and wakes a blocked consumer.
    pub fn publish(&self, mut item: T) -> Result<Published> {
        let mut outcome = Published::Queued;
        loop {
            match self.sender.try_send(item) {
                Ok(()) => return Ok(outcome),
                Err(TrySendError::Full(back)) => match self.overflow {
                    OverflowPolicy::RejectNewest => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        return Ok(Published::Rejected);
                    }
                    OverflowPolicy::DropOldest => {
                        // Another thread may have freed the slot first.
                        if self.receiver.try_recv().is_ok() {
                            self.dropped.fetch_add(1, Ordering::Relaxed);
                            outcome = Published::DroppedOldest;
                        }
                        item = back;
                    }
                },
                Err(TrySendError::Disconnected(_)) => {
                    return Err(ChromaError::Disconnected("event store"))
                }
            }
        }
    }

    /// Takes every item queued when the call starts. With `blocking`, waits
    /// until at least one item is available.
    pub fn drain(&self, blocking: bool) -> Result<Vec<T>> {
        let mut batch = Vec::new();
        if blocking {
            let first = self
                .receiver
                .recv()
                .map_err(|_| ChromaError::Disconnected("event store"))?;
            batch.push(first);
        }
        let pending = self.receiver.len();
        batch.extend(self.receiver.try_iter().take(pending));
        Ok(batch)
    }

    /// Takes up to `max` of the oldest items without blocking. The remainder
    /// stays queued in arrival order.
    pub fn drain_at_most(&self, max: usize) -> Result<Vec<T>> {
        let count = max.min(self.receiver.len());
        Ok(self.receiver.try_iter().take(count).collect())
    }

    /// Non-blocking drain followed by a stable sort on `key`.
    pub fn drain_sorted_by<K, F>(&self, key: F) -> Result<Vec<T>>
    where
        K: Ord,
        F: FnMut(&T) -> K,
    {
        let mut batch = self.drain(false)?;
        batch.sort_by_key(key);
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::*;

    #[test]
    fn concurrent_publish_is_drained_exactly_once() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 250;
        let store = EventStore::new(PRODUCERS * PER_PRODUCER, OverflowPolicy::RejectNewest);

        thread::scope(|scope| {
            for producer in 0..PRODUCERS {
                let store = &store;
                scope.spawn(move || {
                    for n in 0..PER_PRODUCER {
                        store.publish((producer, n)).unwrap();
                    }
                });
            }
        });

        let mut seen = store.drain(false).unwrap();
        seen.extend(store.drain(false).unwrap());
        assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
        assert_eq!(store.dropped(), 0);
    }

    #[test]
    fn per_producer_order_survives_draining() {
        let store = EventStore::new(64, OverflowPolicy::DropOldest);
        thread::scope(|scope| {
            for producer in 0..2 {
                let store = &store;
                scope.spawn(move || {
                    for n in 0..16 {
                        store.publish((producer, n)).unwrap();
                    }
                });
            }
        });
        let batch = store.drain(false).unwrap();
        for producer in 0..2 {
            let order: Vec<_> = batch
                .iter()
                .filter(|(p, _)| *p == producer)
                .map(|(_, n)| *n)
                .collect();
            assert_eq!(order, (0..16).collect::<Vec<_>>());
        }
    }

    #[test]
    fn empty_non_blocking_drain_returns_immediately() {
        let store: EventStore<u8> = EventStore::new(4, OverflowPolicy::DropOldest);
        assert!(store.drain(false).unwrap().is_empty());
    }

    #[test]
    fn overflow_drops_oldest() {
        let store = EventStore::new(3, OverflowPolicy::DropOldest);
        for n in 0..5 {
            store.publish(n).unwrap();
        }
        assert_eq!(store.drain(false).unwrap(), vec![2, 3, 4]);
        assert_eq!(store.dropped(), 2);
    }

    #[test]
    fn drop_oldest_under_contention_stays_full() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 250;
        let store = EventStore::new(8, OverflowPolicy::DropOldest);

        thread::scope(|scope| {
            for producer in 0..PRODUCERS {
                let store = &store;
                scope.spawn(move || {
                    for n in 0..PER_PRODUCER {
                        store.publish((producer, n)).unwrap();
                    }
                });
            }
        });

        assert_eq!(store.len(), 8);
        assert_eq!(store.dropped(), (PRODUCERS * PER_PRODUCER - 8) as u64);
        assert_eq!(store.drain(false).unwrap().len(), 8);
        assert!(store.is_empty());
    }

    #[test]
    fn overflow_rejects_newest() {
        let store = EventStore::new(2, OverflowPolicy::RejectNewest);
        assert_eq!(store.publish(1).unwrap(), Published::Queued);
        assert_eq!(store.publish(2).unwrap(), Published::Queued);
        assert_eq!(store.publish(3).unwrap(), Published::Rejected);
        assert_eq!(store.drain(false).unwrap(), vec![1, 2]);
        assert_eq!(store.dropped(), 1);
    }

    #[test]
    fn sorted_drain_is_stable() {
        let store = EventStore::new(16, OverflowPolicy::DropOldest);
        for item in [(1, 'a'), (0, 'b'), (1, 'c'), (0, 'd'), (1, 'e')] {
            store.publish(item).unwrap();
        }
        let sorted = store.drain_sorted_by(|(priority, _)| *priority).unwrap();
        assert_eq!(sorted, vec![(0, 'b'), (0, 'd'), (1, 'a'), (1, 'c'), (1, 'e')]);
    }

    #[test]
    fn bounded_drain_leaves_remainder_queued() {
        let store = EventStore::new(8, OverflowPolicy::DropOldest);
        for n in 0..5 {
            store.publish(n).unwrap();
        }
        assert_eq!(store.drain_at_most(3).unwrap(), vec![0, 1, 2]);
        assert_eq!(store.drain_at_most(3).unwrap(), vec![3, 4]);
    }

    #[test]
    fn blocking_drain_wakes_on_publish() {
        let store = Arc::new(EventStore::new(4, OverflowPolicy::DropOldest));
        let producer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                store.publish(7_u32).unwrap();
            })
        };
        assert_eq!(store.drain(true).unwrap(), vec![7]);
        producer.join().unwrap();
    }
}
