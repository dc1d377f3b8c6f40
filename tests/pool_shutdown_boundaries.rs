//! Boundary behaviors: a blocked dequeue must unblock when the queue
//! backing the pool is destroyed, and `submit` after `destroy` must
//! fail rather than silently queuing.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use concur_core::error::CoreError;
use concur_core::pbqueue::{PriorityBlockingQueue, QueueError};
use concur_core::pool::{SubmitOptions, ThreadPool};

#[test]
fn dequeue_blocked_on_empty_queue_unblocks_when_shut_down() {
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
fn submit_after_destroy_fails() {
    let pool = ThreadPool::builder().num_threads(2).build().unwrap();
    pool.destroy();
    let err = pool
        .submit(|| (), SubmitOptions::new().want_result(false))
        .unwrap_err();
    assert_eq!(err, CoreError::ShuttingDown);
}
