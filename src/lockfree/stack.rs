//! A Treiber stack reclaimed through hazard pointers.
//!
//! Grounded on `Data_Structures/DS_Stack.c` for the shape (a singly
//! linked LIFO updated via `head`) and on `spec.md` §4.4 for the exact
//! push/pop protocol: protect `head`, re-read it to confirm nothing
//! changed between the load and the protection becoming visible, then
//! CAS. ABA is defeated purely by the hazard-pointer substrate (no
//! per-node tag is needed here, unlike the queue — see
//! [`super::queue::MSQueue`]).

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crate::hazard::HazardDomain;
use crate::log::Logger;

struct Node<T> {
    value: UnsafeCell<Option<T>>,
    next: AtomicPtr<Node<T>>,
}

unsafe impl<T: Send> Send for Node<T> {}
unsafe impl<T: Send> Sync for Node<T> {}

pub struct TreiberStack<T> {
    head: AtomicPtr<Node<T>>,
    domain: Arc<HazardDomain<Node<T>>>,
}

unsafe impl<T: Send> Send for TreiberStack<T> {}
unsafe impl<T: Send> Sync for TreiberStack<T> {}

impl<T: Send + 'static> TreiberStack<T> {
    /// Creates a stack with its own hazard-pointer domain (one slot
    /// per thread is all push/pop ever need).
    pub fn create(logger: Arc<dyn Logger>) -> Self {
        TreiberStack {
            head: AtomicPtr::new(ptr::null_mut()),
            domain: HazardDomain::new(logger, crate::hazard::DEFAULT_MAX_THREADS, 1),
        }
    }

    pub fn push(&self, value: T) {
        let backoff = crossbeam_utils::Backoff::new();
        let node = Box::into_raw(Box::new(Node {
            value: UnsafeCell::new(Some(value)),
            next: AtomicPtr::new(ptr::null_mut()),
        }));
        loop {
            let head = self.head.load(Ordering::Acquire);
            self.domain
                .acquire(0, head)
                .expect("stack hazard domain must provide one slot");
            if self.head.load(Ordering::Acquire) != head {
                backoff.spin();
                continue;
            }
            unsafe {
                (*node).next.store(head, Ordering::Relaxed);
            }
            if self
                .head
                .compare_exchange(head, node, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.domain.release(head, false);
                return;
            }
            backoff.spin();
        }
    }

    pub fn pop(&self) -> Option<T> {
        let backoff = crossbeam_utils::Backoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire);
            if head.is_null() {
                return None;
            }
            self.domain
                .acquire(0, head)
                .expect("stack hazard domain must provide one slot");
            if self.head.load(Ordering::Acquire) != head {
                backoff.spin();
                continue;
            }
            let next = unsafe { (*head).next.load(Ordering::Acquire) };
            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let value = unsafe { (&mut *(*head).value.get()).take() };
                self.domain.release(head, true);
                return value;
            }
            backoff.spin();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}

impl<T> Drop for TreiberStack<T> {
    fn drop(&mut self) {
        let mut cur = *self.head.get_mut();
        while !cur.is_null() {
            let node = unsafe { Box::from_raw(cur) };
            cur = node.next.load(Ordering::Relaxed);
        }
    }
}
