//! Configuration for a [`super::ThreadPool`], generalizing the
//! `ThreadPoolBuilder<S, C>` shape visible in the teacher's
//! `rayon-core/src/registry.rs` (there parameterized over a spawn
//! handler and a custom thread-start/exit pair; here flattened into
//! plain optional handlers since this crate has no need for a second
//! spawn backend).

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::{CoreError, CoreResult};
use crate::event::{Event, EventOptions};
use crate::log::{nop_logger, Logger};
use crate::pbqueue::PriorityBlockingQueue;

use super::worker::worker_loop;
use super::{PoolState, ThreadPool};

type PanicHandler = Arc<dyn Fn(Box<dyn Any + Send>) + Send + Sync>;
type ThreadHandler = Arc<dyn Fn(usize) + Send + Sync>;

pub struct ThreadPoolBuilder {
    num_threads: usize,
    thread_name: Option<Box<dyn Fn(usize) -> String + Send + Sync>>,
    stack_size: Option<usize>,
    panic_handler: Option<PanicHandler>,
    start_handler: Option<ThreadHandler>,
    exit_handler: Option<ThreadHandler>,
    logger: Arc<dyn Logger>,
    default_pause: Option<Duration>,
}

impl Default for ThreadPoolBuilder {
    fn default() -> Self {
        ThreadPoolBuilder {
            num_threads: num_cpus::get(),
            thread_name: None,
            stack_size: None,
            panic_handler: None,
            start_handler: None,
            exit_handler: None,
            logger: nop_logger(),
            default_pause: None,
        }
    }
}

impl ThreadPoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn thread_name<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) -> String + Send + Sync + 'static,
    {
        self.thread_name = Some(Box::new(f));
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn panic_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(Box<dyn Any + Send>) + Send + Sync + 'static,
    {
        self.panic_handler = Some(Arc::new(f));
        self
    }

    pub fn start_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.start_handler = Some(Arc::new(f));
        self
    }

    pub fn exit_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.exit_handler = Some(Arc::new(f));
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn default_pause(mut self, pause: Option<Duration>) -> Self {
        self.default_pause = pause;
        self
    }

    /// Starts `num_threads` workers. If any thread fails to spawn, the
    /// queue is shut down, every thread started so far is joined, and
    /// the error is returned — no half-started pool is ever handed
    /// back to the caller.
    pub fn build(self) -> CoreResult<Arc<ThreadPool>> {
        if self.num_threads == 0 {
            return Err(CoreError::InvalidArgument(
                "thread pool must have at least one worker thread",
            ));
        }

        let pool = Arc::new(ThreadPool {
            queue: Arc::new(PriorityBlockingQueue::unbounded()),
            workers: Mutex::new(Vec::new()),
            thread_count: AtomicUsize::new(0),
            active_threads: AtomicUsize::new(0),
            keep_alive: AtomicBool::new(true),
            resume: Arc::new(Event::create(
                self.logger.clone(),
                EventOptions::new()
                    .signaled_by_default(true)
                    .signal_on_timeout(true)
                    .name("pool-resume"),
            )),
            // `spec.md` §4.6: "active_threads == 0 ∧ queue.size == 0 ⇒
            // finished is signaled". A freshly built pool is already
            // idle by that definition, so `finished` must start
            // signaled rather than waiting for a first task to
            // complete — otherwise `wait`/`destroy` on a pool that
            // never ran a task would block forever.
            finished: Arc::new(Event::create(
                self.logger.clone(),
                EventOptions::new()
                    .signaled_by_default(true)
                    .name("pool-finished"),
            )),
            pause_hint: Mutex::new(self.default_pause),
            state: AtomicU8::new(PoolState::Initializing as u8),
            logger: self.logger.clone(),
            panic_handler: self.panic_handler.clone(),
            start_handler: self.start_handler.clone(),
            exit_handler: self.exit_handler.clone(),
        });

        let mut handles = Vec::with_capacity(self.num_threads);
        for index in 0..self.num_threads {
            let pool_clone = Arc::clone(&pool);
            let mut builder = thread::Builder::new();
            if let Some(name_fn) = &self.thread_name {
                builder = builder.name(name_fn(index));
            }
            if let Some(size) = self.stack_size {
                builder = builder.stack_size(size);
            }
            match builder.spawn(move || worker_loop(pool_clone, index)) {
                Ok(handle) => {
                    handles.push(handle);
                    pool.thread_count.fetch_add(1, Ordering::AcqRel);
                }
                Err(spawn_err) => {
                    pool.queue.shutdown();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(CoreError::ResourceExhausted(format!(
                        "failed to spawn worker thread {}: {}",
                        index, spawn_err
                    )));
                }
            }
        }

        *pool.workers.lock().unwrap() = handles;
        pool.state.store(PoolState::Running as u8, Ordering::Release);
        Ok(pool)
    }
}
