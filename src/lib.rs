//! A small single-process concurrency runtime: an `Event` primitive,
//! scope-bound lock handles, hazard-pointer reclamation, a couple of
//! lock-free containers built on it, a priority blocking queue, a
//! worker thread pool, and a cooperative event loop.
//!
//! The modules build on each other in one direction only — `event` has
//! no dependents among the other primitives, `hazard` depends on
//! nothing but `event`/`log`/`error`, `lockfree` depends on `hazard`,
//! `pbqueue` depends on nothing below it, and `pool`/`event_loop` sit
//! on top of `event` and `pbqueue`. Pick the layer you need; nothing
//! here requires pulling in the whole crate.
//!
//! ```
//! use concur_core::pool::{ThreadPool, SubmitOptions, Submission};
//!
//! let pool = ThreadPool::builder().num_threads(4).build().unwrap();
//! match pool.submit(|| 2 + 2, SubmitOptions::new()).unwrap() {
//!     Submission::Result(result) => assert_eq!(result.get(None), Some(4)),
//!     Submission::Fired => unreachable!(),
//! }
//! pool.destroy();
//! ```

pub mod error;
pub mod event;
pub mod event_loop;
pub mod hazard;
pub mod lockfree;
pub mod log;
pub mod pbqueue;
pub mod pool;
pub mod scoped_lock;

mod unwind;

pub use error::{CoreError, CoreResult};
pub use event::{Event, EventOptions, WaitOutcome};
pub use event_loop::{EventLoop, EventLoopBuilder, EventSource};
pub use hazard::HazardDomain;
pub use lockfree::{MSQueue, TreiberStack};
pub use log::{Level, Logger, NopLogger, StderrLogger};
pub use pbqueue::{PriorityBlockingQueue, QueueError};
pub use pool::{PoolResult, PoolState, Priority, SubmitOptions, Submission, ThreadPool, ThreadPoolBuilder};
pub use scoped_lock::{LockHandle, SharedMutex, SharedRwLock, SpinLock};
