//! A Michael-Scott queue reclaimed through hazard pointers.
//!
//! Generalizes the shape of a classic MS-queue (sentinel head node,
//! `tail` that may lag one step behind) onto the hazard-pointer
//! substrate in [`crate::hazard`]. Per `spec.md` §4.4, every link in
//! this structure — `head`, `tail`, and each node's `next` — carries a
//! 16-bit tag alongside its pointer, bumped on every successful update
//! and compared alongside the pointer by every CAS, so that a pointer
//! recycled through the allocator after reclamation cannot be mistaken
//! for the value a stalled thread last observed. Hazard pointers alone
//! already defeat ABA by preventing reclamation while observed; the tag
//! is the belt to that suspenders, matching the stricter guarantee the
//! original queue's counted pointers gave.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::hazard::HazardDomain;
use crate::log::Logger;

const TAG_BITS: u32 = 16;
const TAG_SHIFT: u32 = 64 - TAG_BITS;
const PTR_MASK: u64 = (1u64 << TAG_SHIFT) - 1;

fn pack<T>(ptr: *mut T, tag: u16) -> u64 {
    (ptr as u64 & PTR_MASK) | ((tag as u64) << TAG_SHIFT)
}

fn unpack<T>(word: u64) -> (*mut T, u16) {
    let ptr = (word & PTR_MASK) as *mut T;
    let tag = (word >> TAG_SHIFT) as u16;
    (ptr, tag)
}

/// A pointer-plus-generation-tag updated with a single CAS on the
/// packed 64-bit word. Userspace pointers on every platform this crate
/// targets fit comfortably in the low 48 bits, leaving the high 16
/// free for the tag.
struct Link<T> {
    word: AtomicU64,
}

impl<T> Link<T> {
    fn new(ptr: *mut T, tag: u16) -> Self {
        Link {
            word: AtomicU64::new(pack(ptr, tag)),
        }
    }

    fn load(&self, order: Ordering) -> (*mut T, u16) {
        unpack(self.word.load(order))
    }

    fn compare_exchange(
        &self,
        current: (*mut T, u16),
        new_ptr: *mut T,
        new_tag: u16,
        success: Ordering,
        failure: Ordering,
    ) -> Result<(), (*mut T, u16)> {
        let current_word = pack(current.0, current.1);
        let new_word = pack(new_ptr, new_tag);
        self.word
            .compare_exchange(current_word, new_word, success, failure)
            .map(|_| ())
            .map_err(|w| unpack(w))
    }
}

struct Node<T> {
    value: UnsafeCell<Option<T>>,
    next: Link<Node<T>>,
}

unsafe impl<T: Send> Send for Node<T> {}
unsafe impl<T: Send> Sync for Node<T> {}

/// A FIFO queue. Requires at least two hazard-pointer slots per
/// thread: `dequeue` must protect both the sentinel it is retiring and
/// the node it is about to promote to sentinel at the same time.
pub struct MSQueue<T> {
    head: Link<Node<T>>,
    tail: Link<Node<T>>,
    domain: Arc<HazardDomain<Node<T>>>,
}

unsafe impl<T: Send> Send for MSQueue<T> {}
unsafe impl<T: Send> Sync for MSQueue<T> {}

impl<T: Send + 'static> MSQueue<T> {
    pub fn create(logger: Arc<dyn Logger>) -> Self {
        let domain = HazardDomain::new(logger, crate::hazard::DEFAULT_MAX_THREADS, 2);
        let sentinel = Box::into_raw(Box::new(Node {
            value: UnsafeCell::new(None),
            next: Link::new(ptr::null_mut(), 0),
        }));
        MSQueue {
            head: Link::new(sentinel, 0),
            tail: Link::new(sentinel, 0),
            domain,
        }
    }

    pub fn enqueue(&self, value: T) {
        let backoff = crossbeam_utils::Backoff::new();
        let new_node = Box::into_raw(Box::new(Node {
            value: UnsafeCell::new(Some(value)),
            next: Link::new(ptr::null_mut(), 0),
        }));
        loop {
            let (tail_ptr, tail_tag) = self.tail.load(Ordering::Acquire);
            self.domain
                .acquire(0, tail_ptr)
                .expect("queue hazard domain must provide at least one slot");
            if self.tail.load(Ordering::Acquire) != (tail_ptr, tail_tag) {
                backoff.spin();
                continue;
            }
            let tail_node = unsafe { &*tail_ptr };
            let (next_ptr, next_tag) = tail_node.next.load(Ordering::Acquire);
            if self.tail.load(Ordering::Acquire) != (tail_ptr, tail_tag) {
                backoff.spin();
                continue;
            }
            if !next_ptr.is_null() {
                // Tail is lagging behind the real last node; help it along.
                let _ = self.tail.compare_exchange(
                    (tail_ptr, tail_tag),
                    next_ptr,
                    tail_tag.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                backoff.spin();
                continue;
            }
            if tail_node
                .next
                .compare_exchange(
                    (next_ptr, next_tag),
                    new_node,
                    next_tag.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                let _ = self.tail.compare_exchange(
                    (tail_ptr, tail_tag),
                    new_node,
                    tail_tag.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                self.domain.release(tail_ptr, false);
                return;
            }
            backoff.spin();
        }
    }

    pub fn dequeue(&self) -> Option<T> {
        let backoff = crossbeam_utils::Backoff::new();
        loop {
            let (head_ptr, head_tag) = self.head.load(Ordering::Acquire);
            self.domain
                .acquire(0, head_ptr)
                .expect("queue hazard domain must provide at least two slots");
            if self.head.load(Ordering::Acquire) != (head_ptr, head_tag) {
                backoff.spin();
                continue;
            }
            let (tail_ptr, tail_tag) = self.tail.load(Ordering::Acquire);
            let head_node = unsafe { &*head_ptr };
            let (next_ptr, next_tag) = head_node.next.load(Ordering::Acquire);
            self.domain
                .acquire(1, next_ptr)
                .expect("queue hazard domain must provide at least two slots");
            if self.head.load(Ordering::Acquire) != (head_ptr, head_tag) {
                backoff.spin();
                continue;
            }
            if next_ptr.is_null() {
                self.domain.release(head_ptr, false);
                self.domain.acquire(1, ptr::null_mut()).ok();
                return None;
            }
            if head_ptr == tail_ptr {
                let _ = self.tail.compare_exchange(
                    (tail_ptr, tail_tag),
                    next_ptr,
                    tail_tag.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                backoff.spin();
                continue;
            }
            if self
                .head
                .compare_exchange(
                    (head_ptr, head_tag),
                    next_ptr,
                    head_tag.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                let value = unsafe { (&mut *(*next_ptr).value.get()).take() };
                self.domain.release(head_ptr, true);
                self.domain.release(next_ptr, false);
                return value;
            }
            backoff.spin();
        }
    }

    pub fn is_empty(&self) -> bool {
        let (head_ptr, _) = self.head.load(Ordering::Acquire);
        let head_node = unsafe { &*head_ptr };
        head_node.next.load(Ordering::Acquire).0.is_null()
    }
}

impl<T> Drop for MSQueue<T> {
    fn drop(&mut self) {
        let (mut cur, _) = unpack::<Node<T>>(*self.head.word.get_mut());
        while !cur.is_null() {
            let node = unsafe { Box::from_raw(cur) };
            cur = node.next.load(Ordering::Relaxed).0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::nop_logger;
    use std::sync::Arc as StdArc;
    use std::thread;

    #[test]
    fn enqueue_then_dequeue_on_empty_queue_yields_value() {
        let q = MSQueue::create(nop_logger());
        q.enqueue(1);
        assert_eq!(q.dequeue(), Some(1));
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn dequeue_on_empty_queue_is_none() {
        let q: MSQueue<i32> = MSQueue::create(nop_logger());
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn fifo_order_is_preserved_single_threaded() {
        let q = MSQueue::create(nop_logger());
        for i in 0..5 {
            q.enqueue(i);
        }
        let mut out = Vec::new();
        while let Some(v) = q.dequeue() {
            out.push(v);
        }
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn concurrent_enqueue_dequeue_preserves_total_count() {
        let q = StdArc::new(MSQueue::create(nop_logger()));
        let producers: Vec<_> = (0..4)
            .map(|t| {
                let q = StdArc::clone(&q);
                thread::spawn(move || {
                    for i in 0..2000 {
                        q.enqueue(t * 2000 + i);
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        let mut count = 0;
        while q.dequeue().is_some() {
            count += 1;
        }
        assert_eq!(count, 4 * 2000);
    }
}
