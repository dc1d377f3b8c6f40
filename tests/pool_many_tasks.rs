//! Scenario 1 from the thread pool's testable properties: a fixed
//! worker count draining a large batch of same-priority tasks must
//! invoke every callback exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use concur_core::pool::{SubmitOptions, Submission, ThreadPool};

#[test]
fn four_workers_ten_thousand_tasks_increment_counter_exactly_once_each() {
    let pool = ThreadPool::builder().num_threads(4).build().unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..10_000 {
        let counter = Arc::clone(&counter);
        let submission = pool
            .submit(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                SubmitOptions::new().want_result(false),
            )
            .unwrap();
        assert!(matches!(submission, Submission::Fired));
    }

    assert_eq!(
        pool.wait_for_idle(Some(Duration::from_secs(30))).is_signaled(),
        true
    );
    assert_eq!(counter.load(Ordering::SeqCst), 10_000);
    pool.destroy();
}
