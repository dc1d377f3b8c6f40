//! A priority-ordered, optionally bounded blocking queue.
//!
//! Generalizes `Data_Structures/PBQueue.c`: a doubly linked list behind
//! a mutex, with two condition variables (`not_full`, `not_empty`)
//! instead of a single one so producers blocked on capacity don't wake
//! spuriously on every dequeue. The original's three insertion
//! fast-paths — empty list, new lowest priority (append at head), new
//! highest-or-equal priority (append at tail) — are kept verbatim;
//! only an insertion into the interior of the list needs the O(n) walk.
//! Ties break FIFO: an item inserted with a priority equal to an
//! existing run goes after every item already at that priority, which
//! is what makes the head/tail fast paths correct shortcuts rather
//! than approximations.

use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Returned by [`PriorityBlockingQueue::enqueue`]/`dequeue` in place of
/// the original's null-pointer sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The wait deadline elapsed before the operation could complete.
    Timeout,
    /// The queue has been shut down; no further waits will ever
    /// succeed.
    ShutDown,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Timeout => write!(f, "queue operation timed out"),
            QueueError::ShutDown => write!(f, "queue has been shut down"),
        }
    }
}

impl Error for QueueError {}

struct Entry<T> {
    priority: i64,
    value: T,
}

struct Inner<T> {
    items: VecDeque<Entry<T>>,
    shutting_down: bool,
}

/// A blocking queue ordered by an explicit `i64` priority (higher
/// values dequeue first), with an optional maximum size. `max_size ==
/// None` gives the original's unbounded `DS_PBQueue_create(0, ...)`
/// behavior; `Some(n)` gives its bounded one.
pub struct PriorityBlockingQueue<T> {
    inner: Mutex<Inner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    max_size: Option<usize>,
}

impl<T> PriorityBlockingQueue<T> {
    pub fn new(max_size: Option<usize>) -> Self {
        PriorityBlockingQueue {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                shutting_down: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            max_size,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn bounded(max_size: usize) -> Self {
        Self::new(Some(max_size))
    }

    /// Inserts `value` at its priority-ordered position, blocking while
    /// the queue is at capacity. `timeout` of `None` waits forever.
    pub fn enqueue(
        &self,
        value: T,
        priority: i64,
        timeout: Option<Duration>,
    ) -> Result<(), QueueError> {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut guard = self.inner.lock().unwrap();
        loop {
            if guard.shutting_down {
                return Err(QueueError::ShutDown);
            }
            let at_capacity = self.max_size.map_or(false, |max| guard.items.len() >= max);
            if !at_capacity {
                break;
            }
            guard = match deadline {
                None => self.not_full.wait(guard).unwrap(),
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        return Err(QueueError::Timeout);
                    }
                    let (g, result) = self.not_full.wait_timeout(guard, dl - now).unwrap();
                    if result.timed_out() && self.max_size.map_or(false, |max| g.items.len() >= max)
                    {
                        return Err(QueueError::Timeout);
                    }
                    g
                }
            };
        }
        insert_ordered(&mut guard.items, Entry { priority, value });
        self.not_empty.notify_one();
        Ok(())
    }

    /// Removes and returns the highest-priority item, blocking while
    /// the queue is empty. Returns [`QueueError::ShutDown`] once the
    /// queue has been shut down and drained.
    pub fn dequeue(&self, timeout: Option<Duration>) -> Result<T, QueueError> {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut guard = self.inner.lock().unwrap();
        loop {
            if let Some(entry) = guard.items.pop_front() {
                self.not_full.notify_one();
                return Ok(entry.value);
            }
            if guard.shutting_down {
                return Err(QueueError::ShutDown);
            }
            guard = match deadline {
                None => self.not_empty.wait(guard).unwrap(),
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        return Err(QueueError::Timeout);
                    }
                    let (g, result) = self.not_empty.wait_timeout(guard, dl - now).unwrap();
                    if result.timed_out() && g.items.is_empty() && !g.shutting_down {
                        return Err(QueueError::Timeout);
                    }
                    g
                }
            };
        }
    }

    /// Discards every queued item without shutting the queue down.
    pub fn clear(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.items.clear();
        self.not_full.notify_all();
    }

    /// Marks the queue as shut down and wakes every blocked waiter.
    /// Already-queued items remain available to `dequeue` until
    /// drained; only then does `dequeue` start returning
    /// [`QueueError::ShutDown`].
    pub fn shutdown(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.shutting_down = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().unwrap().shutting_down
    }
}

/// `Add_As_Head`/`Add_As_Tail`/`Add_Item` from the original, collapsed
/// into one function: empty list and new-lowest-priority both append
/// at the back (the lowest priority belongs at the end of a
/// highest-first queue), new-highest-or-equal-priority prepends at the
/// front, and anything else walks forward to its insertion point.
fn insert_ordered<T>(items: &mut VecDeque<Entry<T>>, entry: Entry<T>) {
    if items.is_empty() || entry.priority <= items.back().unwrap().priority {
        items.push_back(entry);
        return;
    }
    if entry.priority > items.front().unwrap().priority {
        items.push_front(entry);
        return;
    }
    let pos = items
        .iter()
        .position(|e| e.priority < entry.priority)
        .unwrap_or(items.len());
    items.insert(pos, entry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn dequeue_returns_highest_priority_first() {
        let q = PriorityBlockingQueue::unbounded();
        q.enqueue("low", 1, None).unwrap();
        q.enqueue("high", 10, None).unwrap();
        q.enqueue("mid", 5, None).unwrap();
        assert_eq!(q.dequeue(None).unwrap(), "high");
        assert_eq!(q.dequeue(None).unwrap(), "mid");
        assert_eq!(q.dequeue(None).unwrap(), "low");
    }

    #[test]
    fn equal_priority_items_are_fifo() {
        let q = PriorityBlockingQueue::unbounded();
        q.enqueue(1, 5, None).unwrap();
        q.enqueue(2, 5, None).unwrap();
        q.enqueue(3, 5, None).unwrap();
        assert_eq!(q.dequeue(None).unwrap(), 1);
        assert_eq!(q.dequeue(None).unwrap(), 2);
        assert_eq!(q.dequeue(None).unwrap(), 3);
    }

    #[test]
    fn bounded_queue_enqueue_times_out_when_full() {
        let q = PriorityBlockingQueue::bounded(1);
        q.enqueue(1, 0, None).unwrap();
        let err = q
            .enqueue(2, 0, Some(Duration::from_millis(20)))
            .unwrap_err();
        assert_eq!(err, QueueError::Timeout);
    }

    #[test]
    fn dequeue_times_out_on_empty_queue() {
        let q: PriorityBlockingQueue<i32> = PriorityBlockingQueue::unbounded();
        assert_eq!(
            q.dequeue(Some(Duration::from_millis(20))).unwrap_err(),
            QueueError::Timeout
        );
    }

    #[test]
    fn shutdown_wakes_blocked_dequeue_with_shutdown_error() {
        let q = Arc::new(PriorityBlockingQueue::<i32>::unbounded());
        let waiter = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.dequeue(None))
        };
        thread::sleep(Duration::from_millis(30));
        q.shutdown();
        assert_eq!(waiter.join().unwrap().unwrap_err(), QueueError::ShutDown);
    }

    #[test]
    fn shutdown_still_drains_queued_items_before_reporting_shutdown() {
        let q = PriorityBlockingQueue::unbounded();
        q.enqueue(1, 0, None).unwrap();
        q.shutdown();
        assert_eq!(q.dequeue(None).unwrap(), 1);
        assert_eq!(q.dequeue(None).unwrap_err(), QueueError::ShutDown);
    }

    #[test]
    fn enqueue_after_shutdown_is_rejected() {
        let q = PriorityBlockingQueue::unbounded();
        q.shutdown();
        assert_eq!(q.enqueue(1, 0, None).unwrap_err(), QueueError::ShutDown);
    }
}
