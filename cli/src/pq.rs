//! A queue of callbacks ordered by the time they fall due.
use std::cmp::Ordering;
use std::fmt::{self, Debug, Formatter};
use std::hash::Hash;
use std::time::Duration;

use keyed_priority_queue::KeyedPriorityQueue;

/// When an item falls due.  Items due at the same time come out in
/// the order they were scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Due {
    at: Duration,
    seq: u64,
}

/// Reverses the ordering of `T`, so that the max-heap underneath
/// [`KeyedPriorityQueue`] hands out the earliest item first.
#[derive(Debug)]
struct Earliest<T> {
    inner: T,
}

impl<T> From<T> for Earliest<T> {
    fn from(inner: T) -> Earliest<T> {
        Earliest { inner }
    }
}

impl<T: Ord> PartialOrd for Earliest<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Eq> Eq for Earliest<T> {}

impl<T: Eq> PartialEq for Earliest<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<T: Ord> Ord for Earliest<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.inner.cmp(&self.inner)
    }
}

#[test]
fn test_reverse_order() {
    assert_eq!(Earliest::from(1), Earliest::from(1));
    assert_ne!(Earliest::from(1), Earliest::from(0));
    assert!(Earliest::from(1) < Earliest::from(0));
    assert!(Earliest::from(1) <= Earliest::from(0));
}

/// Holds at most one due time per key.  Scheduling a key which is
/// already queued replaces its due time.
pub struct DueQueue<K: Hash + Eq> {
    items: KeyedPriorityQueue<K, Earliest<Due>>,
    scheduled: u64,
}

impl<K: Hash + Eq> DueQueue<K> {
    pub fn new() -> DueQueue<K> {
        DueQueue {
            items: KeyedPriorityQueue::new(),
            scheduled: 0,
        }
    }

    /// Queues `key` to fall due at `at`.  Returns the due time it
    /// replaced, if it was already queued.
    pub fn schedule(&mut self, key: K, at: Duration) -> Option<Duration> {
        self.scheduled += 1;
        let due = Due {
            at,
            seq: self.scheduled,
        };
        self.items
            .push(key, Earliest::from(due))
            .map(|previous| previous.inner.at)
    }

    /// The earliest due time in the queue.
    pub fn next_due(&self) -> Option<Duration> {
        self.items.peek().map(|(_, due)| due.inner.at)
    }

    pub fn pop(&mut self) -> Option<(K, Duration)> {
        self.items.pop().map(|(key, due)| (key, due.inner.at))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<K: Hash + Eq> Default for DueQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Debug> Debug for DueQueue<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DueQueue")
            .field("items", &self.items)
            .field("scheduled", &self.scheduled)
            .finish()
    }
}

#[test]
fn test_empty() {
    let mut q: DueQueue<usize> = DueQueue::default();
    assert!(q.is_empty());
    assert_eq!(0, q.len());
    assert_eq!(q.next_due(), None);
    assert_eq!(q.pop(), None);
}

#[test]
fn test_earliest_first() {
    let ms = Duration::from_millis;
    let mut q: DueQueue<&str> = DueQueue::new();
    assert_eq!(q.schedule("frame", ms(16)), None);
    assert_eq!(q.schedule("tick", ms(3)), None);
    assert_eq!(q.next_due(), Some(ms(3)));
    assert_eq!(q.pop(), Some(("tick", ms(3))));
    assert_eq!(q.pop(), Some(("frame", ms(16))));
    assert!(q.is_empty());
}

#[test]
fn test_ties_keep_scheduling_order() {
    let ms = Duration::from_millis;
    let mut q: DueQueue<&str> = DueQueue::new();
    q.schedule("b", ms(5));
    q.schedule("a", ms(5));
    assert_eq!(q.pop(), Some(("b", ms(5))));
    assert_eq!(q.pop(), Some(("a", ms(5))));
}

#[test]
fn test_rescheduling_replaces() {
    let ms = Duration::from_millis;
    let mut q: DueQueue<&str> = DueQueue::new();
    assert_eq!(q.schedule("tick", ms(20)), None);
    assert_eq!(q.schedule("tick", ms(1)), Some(ms(20)));
    assert_eq!(q.len(), 1);
    assert_eq!(q.pop(), Some(("tick", ms(1))));
}
