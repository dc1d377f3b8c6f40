//! Scenario 2: a highest-priority task submitted while a backlog of
//! lowest-priority tasks is running should be picked up as soon as the
//! currently-executing lowest-priority tasks finish, not after the
//! rest of the backlog.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use concur_core::pool::{Priority, SubmitOptions, Submission, ThreadPool};

#[test]
fn highest_priority_task_runs_before_rest_of_lowest_priority_backlog() {
    let pool = ThreadPool::builder().num_threads(2).build().unwrap();

    for _ in 0..100 {
        pool.submit(
            || std::thread::sleep(Duration::from_millis(10)),
            SubmitOptions::new()
                .priority(Priority::Lowest)
                .want_result(false),
        )
        .unwrap();
    }

    let t_start = Instant::now();
    let t_hp = Arc::new(Mutex::new(None));
    let t_hp_clone = Arc::clone(&t_hp);
    let submission = pool
        .submit(
            move || {
                *t_hp_clone.lock().unwrap() = Some(Instant::now());
            },
            SubmitOptions::new().priority(Priority::Highest),
        )
        .unwrap();
    let result = match submission {
        Submission::Result(r) => r,
        Submission::Fired => panic!("expected a result handle"),
    };

    assert!(result.wait(Some(Duration::from_secs(5))).is_signaled());
    let elapsed = t_hp.lock().unwrap().unwrap().duration_since(t_start);
    // Both workers are already mid-flight on a 10ms lowest-priority
    // task when the highest-priority one is submitted; it can only be
    // preempted by those two already-running tasks finishing.
    assert!(
        elapsed < Duration::from_millis(40),
        "highest-priority task took {:?} to run, expected under ~20ms plus scheduling slack",
        elapsed
    );

    pool.destroy();
}
