//! Scenario 5: a manual-reset event with several infinite-timeout
//! waiters must wake every one of them on a single `signal`, and after
//! `reset` a fresh `wait` must time out rather than see stale state.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use concur_core::event::{Event, EventOptions, WaitOutcome};
use concur_core::log::NopLogger;

#[test]
fn manual_reset_event_wakes_all_four_waiters_then_resets() {
    let event = Arc::new(Event::create(Arc::new(NopLogger), EventOptions::new()));

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let event = Arc::clone(&event);
            thread::spawn(move || event.wait(None).is_signaled())
        })
        .collect();

    // Let every waiter register before signaling.
    thread::sleep(Duration::from_millis(50));
    event.signal();

    for waiter in waiters {
        assert!(waiter.join().unwrap());
    }

    event.reset();
    assert_eq!(
        event.wait(Some(Duration::from_millis(50))),
        WaitOutcome::TimedOut
    );
}
