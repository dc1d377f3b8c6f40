//! The per-thread body spawned by [`super::ThreadPoolBuilder::build`].
//!
//! Grounded on `Thread_Pool.c`'s `Get_Tasks`: dequeue, wait out a pause
//! if one is in effect, run the callback, update the shared counters,
//! signal `finished` if the pool just went idle. The original's first
//! step ("wait until pool initialization completes") has no Rust
//! counterpart here: a worker closure only starts running after the
//! `Arc<ThreadPool>` it closes over is fully constructed, so there is
//! no window where a thread could observe a half-built pool the way a
//! C thread could race a still-running constructor.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::log::{core_log, Level};
use crate::unwind::halt_unwinding;

use super::{PoolState, ThreadPool};

pub(super) fn worker_loop(pool: Arc<ThreadPool>, index: usize) {
    if let Some(handler) = &pool.start_handler {
        let handler = Arc::clone(handler);
        if let Err(payload) = halt_unwinding(move || handler(index)) {
            pool.handle_panic(payload);
        }
    }
    core_log!(pool.logger, Level::Verbose, "pool", "worker {} started", index);

    loop {
        let task = match pool.queue.dequeue(None) {
            Ok(task) => task,
            Err(_) => break,
        };

        let pause_hint = *pool.pause_hint.lock().unwrap();
        pool.resume.wait(pause_hint);
        if pool.state.load(Ordering::Acquire) == PoolState::Paused as u8 {
            pool.state.store(PoolState::Running as u8, Ordering::Release);
        }
        if !pool.keep_alive.load(Ordering::Acquire) {
            break;
        }

        pool.active_threads.fetch_add(1, Ordering::AcqRel);
        if let Err(payload) = halt_unwinding(task.run) {
            core_log!(
                pool.logger,
                Level::Error,
                "pool",
                "worker {} panicked running a {:?}-priority task",
                index,
                task.priority
            );
            pool.handle_panic(payload);
        }
        let remaining = pool.active_threads.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 && pool.queue.size() == 0 {
            pool.finished.signal();
        }
    }

    pool.thread_count.fetch_sub(1, Ordering::AcqRel);
    core_log!(pool.logger, Level::Verbose, "pool", "worker {} exiting", index);
    if let Some(handler) = &pool.exit_handler {
        let handler = Arc::clone(handler);
        if let Err(payload) = halt_unwinding(move || handler(index)) {
            pool.handle_panic(payload);
        }
    }
}
