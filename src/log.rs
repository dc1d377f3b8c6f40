//! A pluggable logging handle.
//!
//! The original C sources built their logger once via a
//! `__attribute__((constructor))` hook and reached it through a
//! process-wide global (`static MU_Logger_t *logger`). That pattern
//! doesn't survive translation to a library: a crate must never assume
//! it owns the process. Every component in this crate instead accepts
//! an explicit `Arc<dyn Logger>` at construction time, matching how
//! `rayon_core::registry::Registry` threads its own `Logger` handle
//! through `log(|| Event::...)` calls rather than reaching for a
//! global.

use std::fmt;
use std::sync::Arc;

/// Severity, ordered low to high. Mirrors the `MU_TRACE`..`MU_ASSERT`
/// ladder of the original `MU_Logger_t`, minus the `ASSERT` level
/// (which aborted the process — callers here return a `CoreError`
/// instead).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Verbose,
    Info,
    Error,
}

/// Log sink accepted by every `*::create` in this crate.
pub trait Logger: Send + Sync {
    /// Whether a message at `level` should be formatted at all. Lets a
    /// disabled logger skip the cost of building the `fmt::Arguments`.
    fn enabled(&self, level: Level) -> bool;

    fn log(&self, level: Level, target: &str, args: fmt::Arguments<'_>);
}

/// Discards everything. The default for `*Builder::default()` and the
/// logger every unit test should reach for.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopLogger;

impl Logger for NopLogger {
    fn enabled(&self, _level: Level) -> bool {
        false
    }

    fn log(&self, _level: Level, _target: &str, _args: fmt::Arguments<'_>) {}
}

/// Writes formatted lines to stderr. Useful for examples and
/// debugging; not installed by default.
#[derive(Debug, Clone, Copy)]
pub struct StderrLogger {
    pub min_level: Level,
}

impl Default for StderrLogger {
    fn default() -> Self {
        StderrLogger {
            min_level: Level::Info,
        }
    }
}

impl Logger for StderrLogger {
    fn enabled(&self, level: Level) -> bool {
        level >= self.min_level
    }

    fn log(&self, level: Level, target: &str, args: fmt::Arguments<'_>) {
        eprintln!("[{:?}] {}: {}", level, target, args);
    }
}

/// Returns a shared no-op logger without allocating a new `Arc` each
/// call.
pub fn nop_logger() -> Arc<dyn Logger> {
    thread_local_singleton()
}

fn thread_local_singleton() -> Arc<dyn Logger> {
    // A fresh Arc per call is cheap (NopLogger is a ZST) and avoids the
    // synchronization a process-wide `OnceCell` would need for what is
    // just a fallback default.
    Arc::new(NopLogger)
}

/// Logs through `$logger` at `$level`, building the message lazily so
/// that a disabled logger never pays for formatting.
macro_rules! core_log {
    ($logger:expr, $level:expr, $target:expr, $($arg:tt)+) => {{
        let logger = &$logger;
        let level = $level;
        if logger.enabled(level) {
            logger.log(level, $target, format_args!($($arg)+));
        }
    }};
}

pub(crate) use core_log;
