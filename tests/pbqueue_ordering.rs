//! Scenarios 3 and 4 from the priority blocking queue's testable
//! properties: unbounded ordering by descending priority, and a
//! bounded queue's enqueue timing out while full.

use std::time::Duration;

use concur_core::pbqueue::{PriorityBlockingQueue, QueueError};

#[test]
fn unbounded_queue_drains_in_descending_priority_order() {
    let q = PriorityBlockingQueue::unbounded();
    q.enqueue(3, 1, None).unwrap();
    q.enqueue(1, 3, None).unwrap();
    q.enqueue(2, 2, None).unwrap();

    assert_eq!(q.dequeue(None).unwrap(), 1);
    assert_eq!(q.dequeue(None).unwrap(), 2);
    assert_eq!(q.dequeue(None).unwrap(), 3);
}

#[test]
fn bounded_queue_max_size_one_second_enqueue_times_out() {
    let q = PriorityBlockingQueue::bounded(1);
    q.enqueue("a", 0, None).unwrap();

    let err = q
        .enqueue("b", 0, Some(Duration::from_millis(100)))
        .unwrap_err();
    assert_eq!(err, QueueError::Timeout);
}
