//! A manual/auto-reset synchronization primitive.
//!
//! Every other component in this crate is built on top of `Event`: the
//! thread pool's pause/resume and finished-draining signals, the
//! per-task result slot, and the event loop's `finished` latch are all
//! plain `Event`s. The design is a direct generalization of
//! `Thread_Utils/TU_Events.c` from the original sources, with the
//! bitmask `flags` parameter replaced by an `EventOptions` value (see
//! the crate's top-level docs for why) and the process-wide logger
//! replaced by an explicit handle.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::log::{core_log, Level, Logger};

/// Construction-time options for an [`Event`]. Each field corresponds
/// to one bit of the original `TU_EVENT_*` flag mask.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventOptions {
    /// Start already signaled.
    pub signaled_by_default: bool,
    /// Clear the flag as soon as any single waiter observes it.
    pub auto_reset: bool,
    /// Clear the flag only when the waiter that observes it is the
    /// last one still waiting. Mutually sensible with `auto_reset`
    /// unset; if both are set, `auto_reset_on_last` takes precedence
    /// (matches `auto_reset_handler` in the original, which checks
    /// `AUTO_RESET_ON_LAST` first).
    pub auto_reset_on_last: bool,
    /// Promote a `wait` timeout into a broadcast signal instead of
    /// returning `TimedOut`.
    pub signal_on_timeout: bool,
    /// A debug label, surfaced through `Debug` and log lines. Purely
    /// diagnostic.
    pub name: Option<&'static str>,
}

impl EventOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signaled_by_default(mut self, value: bool) -> Self {
        self.signaled_by_default = value;
        self
    }

    pub fn auto_reset(mut self, value: bool) -> Self {
        self.auto_reset = value;
        self
    }

    pub fn auto_reset_on_last(mut self, value: bool) -> Self {
        self.auto_reset_on_last = value;
        self
    }

    pub fn signal_on_timeout(mut self, value: bool) -> Self {
        self.signal_on_timeout = value;
        self
    }

    pub fn name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }
}

/// The outcome of a [`Event::wait`] call. A timeout is a normal value,
/// never an error (see `CoreError`'s docs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
}

impl WaitOutcome {
    pub fn is_signaled(self) -> bool {
        matches!(self, WaitOutcome::Signaled)
    }
}

pub struct Event {
    signaled: Mutex<bool>,
    condvar: Condvar,
    waiters: AtomicUsize,
    options: EventOptions,
    logger: Arc<dyn Logger>,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.options.name)
            .field("waiters", &self.waiters.load(Ordering::Relaxed))
            .finish()
    }
}

impl Event {
    /// Creates an event. Construction cannot fail: unlike the C
    /// original, `Mutex`/`Condvar` allocation never fails on any
    /// platform Rust targets, so there is no `resource exhaustion`
    /// path here (recorded in DESIGN.md as a dropped failure mode, not
    /// a dropped feature).
    pub fn create(logger: Arc<dyn Logger>, options: EventOptions) -> Event {
        core_log!(
            logger,
            Level::Verbose,
            "event",
            "created event {:?}",
            options.name
        );
        Event {
            signaled: Mutex::new(options.signaled_by_default),
            condvar: Condvar::new(),
            waiters: AtomicUsize::new(0),
            options,
            logger,
        }
    }

    pub fn name(&self) -> Option<&'static str> {
        self.options.name
    }

    /// Clears the signaled state. Idempotent; never blocks.
    pub fn reset(&self) {
        let mut guard = self.signaled.lock().unwrap();
        if *guard {
            *guard = false;
            core_log!(
                self.logger,
                Level::Verbose,
                "event",
                "{:?}: reset",
                self.options.name
            );
        }
    }

    /// Sets the signaled state and wakes every waiter. A no-op if
    /// already signaled.
    ///
    /// Returns `true` if this call performed the transition from
    /// unsignaled to signaled, `false` if the event was already
    /// signaled.
    pub fn signal(&self) -> bool {
        let mut guard = self.signaled.lock().unwrap();
        if *guard {
            return false;
        }
        *guard = true;
        self.condvar.notify_all();
        core_log!(
            self.logger,
            Level::Verbose,
            "event",
            "{:?}: signaled",
            self.options.name
        );
        true
    }

    /// Blocks until signaled or `timeout` elapses. `None` means wait
    /// indefinitely (the Rust analogue of the original's
    /// `timeout_ms < 0`).
    pub fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        self.waiters.fetch_add(1, Ordering::AcqRel);
        let mut guard = self.signaled.lock().unwrap();
        if *guard {
            self.apply_auto_reset(&mut guard);
            drop(guard);
            self.waiters.fetch_sub(1, Ordering::AcqRel);
            return WaitOutcome::Signaled;
        }

        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            guard = match deadline {
                None => self.condvar.wait(guard).unwrap(),
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        return self.finish_timeout(guard);
                    }
                    let (guard, result) = self.condvar.wait_timeout(guard, dl - now).unwrap();
                    if *guard {
                        guard
                    } else if result.timed_out() {
                        return self.finish_timeout(guard);
                    } else {
                        guard
                    }
                }
            };
            if *guard {
                self.apply_auto_reset(&mut guard);
                drop(guard);
                self.waiters.fetch_sub(1, Ordering::AcqRel);
                return WaitOutcome::Signaled;
            }
        }
    }

    fn finish_timeout(&self, mut guard: MutexGuard<'_, bool>) -> WaitOutcome {
        if self.options.signal_on_timeout {
            *guard = true;
            self.condvar.notify_all();
            drop(guard);
            self.waiters.fetch_sub(1, Ordering::AcqRel);
            core_log!(
                self.logger,
                Level::Verbose,
                "event",
                "{:?}: timed out, promoting to signal",
                self.options.name
            );
            WaitOutcome::Signaled
        } else {
            drop(guard);
            self.waiters.fetch_sub(1, Ordering::AcqRel);
            WaitOutcome::TimedOut
        }
    }

    fn apply_auto_reset(&self, guard: &mut MutexGuard<'_, bool>) {
        if self.options.auto_reset_on_last {
            if self.waiters.load(Ordering::Acquire) == 1 {
                **guard = false;
            }
        } else if self.options.auto_reset {
            **guard = false;
        }
    }

    /// Explicit destroy: signals every waiter and spin-waits until all
    /// of them have observed it and left, then consumes the event.
    /// Equivalent to letting the `Event` drop, spelled out for callers
    /// that want the synchronous guarantee without relying on scope
    /// exit.
    pub fn close(self) {
        drop(self)
    }

    fn teardown(&self) {
        self.signal();
        while self.waiters.load(Ordering::Acquire) > 0 {
            std::thread::yield_now();
        }
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::nop_logger;
    use std::sync::Arc as StdArc;
    use std::thread;
    use std::time::Duration;

    fn event(options: EventOptions) -> Event {
        Event::create(nop_logger(), options)
    }

    #[test]
    fn signal_then_wait_returns_immediately() {
        let e = event(EventOptions::new());
        e.signal();
        assert_eq!(e.wait(Some(Duration::from_millis(10))), WaitOutcome::Signaled);
    }

    #[test]
    fn manual_reset_stays_signaled_until_reset() {
        let e = event(EventOptions::new());
        e.signal();
        assert!(e.wait(Some(Duration::from_millis(1))).is_signaled());
        assert!(e.wait(Some(Duration::from_millis(1))).is_signaled());
        e.reset();
        assert_eq!(
            e.wait(Some(Duration::from_millis(20))),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn reset_is_idempotent() {
        let e = event(EventOptions::new());
        e.reset();
        e.reset();
        assert_eq!(
            e.wait(Some(Duration::from_millis(5))),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn signal_is_idempotent() {
        let e = event(EventOptions::new());
        assert!(e.signal());
        assert!(!e.signal());
    }

    #[test]
    fn auto_reset_on_last_releases_every_waiter_once() {
        let e = StdArc::new(event(
            EventOptions::new().auto_reset_on_last(true),
        ));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let e = StdArc::clone(&e);
                thread::spawn(move || e.wait(None).is_signaled())
            })
            .collect();
        // Give every thread a chance to register as a waiter.
        thread::sleep(Duration::from_millis(50));
        e.signal();
        for h in handles {
            assert!(h.join().unwrap());
        }
        // Event was cleared exactly once, by the last waiter out.
        assert_eq!(e.wait(Some(Duration::from_millis(20))), WaitOutcome::TimedOut);
    }

    #[test]
    fn signal_on_timeout_promotes_timeout_into_signal() {
        let e = event(EventOptions::new().signal_on_timeout(true));
        assert_eq!(
            e.wait(Some(Duration::from_millis(10))),
            WaitOutcome::Signaled
        );
        // Subsequent waits see it still signaled (manual reset default).
        assert_eq!(e.wait(Some(Duration::from_millis(1))), WaitOutcome::Signaled);
    }

    #[test]
    fn destroy_wakes_blocked_waiters() {
        let e = StdArc::new(event(EventOptions::new()));
        let waiter = {
            let e = StdArc::clone(&e);
            thread::spawn(move || e.wait(None).is_signaled())
        };
        thread::sleep(Duration::from_millis(30));
        e.signal();
        assert!(waiter.join().unwrap());
    }
}
