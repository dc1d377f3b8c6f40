//! The unit of work queued onto a [`super::ThreadPool`], and the
//! handle a submitter gets back for it.
//!
//! `Task` itself is *not* generic over a return type — a single
//! `PriorityBlockingQueue<Task>` has to hold work items of differing
//! result types side by side, so the type erasure happens here: `submit`
//! builds a `Box<dyn FnOnce() + Send>` that closes over the caller's
//! callback and, if a result was requested, writes into a type-specific
//! [`ResultSlot<R>`] before returning. This mirrors how the original's
//! `void *(*callback)(void *)` erased its return type through a
//! `void *`; the Rust version erases it through a closure instead of a
//! pointer cast.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::event::{Event, EventOptions, WaitOutcome};
use crate::log::nop_logger;

/// Priority of a queued task. `Ord` is derived in declaration order, so
/// `Highest > Lowest` falls directly out of `#[derive(Ord)]` — "higher
/// priority precedes lower" in the queue is then just `Ord::cmp` cast
/// to the priority queue's `i64` comparator.
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Lowest = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    Highest = 4,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// Options accepted by [`super::ThreadPool::submit`], replacing the
/// original's `LOWEST_PRIORITY`/.../`NO_RESULT` bitmask with a plain
/// record: unknown flags simply can't be expressed any more.
#[derive(Debug, Clone, Copy)]
pub struct SubmitOptions {
    pub priority: Priority,
    pub want_result: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        SubmitOptions {
            priority: Priority::Medium,
            want_result: true,
        }
    }
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn want_result(mut self, want_result: bool) -> Self {
        self.want_result = want_result;
        self
    }
}

pub(crate) struct Task {
    pub(crate) priority: Priority,
    pub(crate) run: Box<dyn FnOnce() + Send + 'static>,
}

/// `{event, return-value}` from `spec.md`'s Result data model. Owned by
/// the caller, independent of the pool's own lifetime: a submitter may
/// hold and wait on this long after the pool that produced it has been
/// destroyed.
pub(crate) struct ResultSlot<R> {

    event: Event,
    value: Mutex<Option<R>>,
}

impl<R> ResultSlot<R> {
    fn new() -> Self {
        ResultSlot {
            event: Event::create(nop_logger(), EventOptions::new()),
            value: Mutex::new(None),
        }
    }

    /// Stores the callback's return value and signals the event.
    /// Called from inside the worker thread after the task body runs.
    pub(crate) fn fulfill(&self, value: R) {
        *self.value.lock().unwrap() = Some(value);
        self.event.signal();
    }
}

/// A caller-owned handle to a task's eventual result. Signaled exactly
/// once, after the task's callback returns.
pub struct PoolResult<R> {
    slot: Arc<ResultSlot<R>>,
}

impl<R> PoolResult<R> {
    pub(crate) fn new() -> Self {
        PoolResult {
            slot: Arc::new(ResultSlot::new()),
        }
    }

    pub(crate) fn slot(&self) -> Arc<ResultSlot<R>> {
        Arc::clone(&self.slot)
    }

    /// Blocks until the result is available or `timeout` elapses,
    /// without consuming it. A pool that was destroyed before running
    /// this task never signals the event, so `wait` can legitimately
    /// block forever if the caller passes `None` against a dropped
    /// task — matching the original's "in-flight callbacks are not
    /// interrupted, but a task that never ran never signals" behavior.
    pub fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        self.slot.event.wait(timeout)
    }

    /// Takes the value out if it has arrived. Returns `None` both
    /// before the result is ready and after a previous `take` already
    /// consumed it.
    pub fn take(&self) -> Option<R> {
        self.slot.value.lock().unwrap().take()
    }

    /// Waits for the result, then takes it.
    pub fn get(&self, timeout: Option<Duration>) -> Option<R> {
        if self.wait(timeout).is_signaled() {
            self.take()
        } else {
            None
        }
    }
}

impl<R> Clone for PoolResult<R> {
    fn clone(&self) -> Self {
        PoolResult {
            slot: Arc::clone(&self.slot),
        }
    }
}

/// What `submit` hands back: a real result handle, or a plain
/// acknowledgement when the caller asked for
/// `SubmitOptions::want_result(false)` — the "success sentinel if
/// `NO_RESULT`" from `spec.md` §4.6, spelled as an enum instead of a
/// null result pointer.
pub enum Submission<R> {
    Result(PoolResult<R>),
    Fired,
}
