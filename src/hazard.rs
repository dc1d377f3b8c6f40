//! Hazard-pointer based manual memory reclamation.
//!
//! Generalizes `Memory_Management_Utils`/`Misc_Utils`'s
//! `MMU_Hazard_Pointers.c`: a process-wide, append-only list of
//! per-thread records, each with `K` "owned" protection slots and a
//! private retired list. A pointer in `owned[i]` tells every other
//! thread "do not reclaim this address while I hold it here"; a scan
//! partitions a thread's retired list against the union of every
//! record's `owned` slots and hands whatever isn't protected to the
//! registered destructor.
//!
//! The REDESIGN FLAGS in the spec ask for two things the C original
//! didn't have: an explicit runtime object bracketing thread-local
//! record lifetime (here, [`HazardDomain<T>`], reference-counted via
//! `Arc`) instead of a `__attribute__((destructor))` hook, and
//! parametric payload types instead of `void*`. Both are applied
//! below: a domain is generic over the reclaimed type `T`, and
//! deregistration happens automatically when a participating thread
//! exits (see `ON_THREAD_EXIT`), not at process exit.
//!
//! # Lifetime caveat
//!
//! A thread that acquires a record from a domain holds a clone of that
//! domain's `Arc` in thread-local storage until the thread exits (so a
//! domain can only be fully dropped, and its memory reclaimed, once
//! every thread that ever touched it has exited) — this mirrors the
//! original's single long-lived, process-scoped hazard table and is
//! the expected usage pattern here too: create one domain per
//! lock-free container and let it live for the container's lifetime.

use std::cell::{RefCell, UnsafeCell};
use std::collections::{HashMap, HashSet};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::{CoreError, CoreResult};
use crate::log::{core_log, Level, Logger};

pub const DEFAULT_MAX_THREADS: usize = 4;
pub const DEFAULT_POINTERS_PER_THREAD: usize = 4;

struct HazardRecord<T> {
    in_use: AtomicBool,
    id: usize,
    owned: Box<[AtomicPtr<T>]>,
    retired: UnsafeCell<Vec<*mut T>>,
    next: AtomicPtr<HazardRecord<T>>,
}

// Safety: `retired` is only ever read or mutated by whichever thread
// currently holds the record (in_use == true and the thread owns the
// corresponding entry in `DOMAIN_RECORDS`), or by a `help_scan` caller
// that has first CAS-claimed `in_use` itself. There is never more than
// one such accessor at a time.
unsafe impl<T> Sync for HazardRecord<T> {}
unsafe impl<T> Send for HazardRecord<T> {}

thread_local! {
    /// Maps a domain's address to the raw record pointer this thread
    /// owns within that domain. Keyed by address rather than being a
    /// generic thread-local (which `thread_local!` cannot express)
    /// because a single thread may participate in several distinct
    /// `HazardDomain<T>` instances, possibly of different `T`.
    static DOMAIN_RECORDS: RefCell<HashMap<usize, *mut u8>> = RefCell::new(HashMap::new());

    /// Closures run when this thread exits, one per (domain, record)
    /// pair this thread ever claimed. Each closure flips the record's
    /// `in_use` back to `false` so `help_scan` can reclaim it, and
    /// drops the `Arc` clone that was keeping the domain alive.
    /// Wrapped in `ExitHooks` so the closures actually fire: a bare
    /// `RefCell<Vec<Box<dyn FnOnce()>>>`'s destructor only drops the
    /// boxed closures, it never calls them.
    static ON_THREAD_EXIT: ExitHooks = ExitHooks(RefCell::new(Vec::new()));
}

struct ExitHooks(RefCell<Vec<Box<dyn FnOnce()>>>);

impl Drop for ExitHooks {
    fn drop(&mut self) {
        for hook in self.0.borrow_mut().drain(..) {
            hook();
        }
    }
}

pub struct HazardDomain<T> {
    head: AtomicPtr<HazardRecord<T>>,
    next_id: AtomicUsize,
    max_threads: usize,
    pointers_per_thread: usize,
    destructor: Mutex<Box<dyn Fn(*mut T) + Send + Sync>>,
    logger: Arc<dyn Logger>,
    self_weak: Weak<HazardDomain<T>>,
}

impl<T> HazardDomain<T> {
    /// Creates a domain whose default destructor is `Box::from_raw`
    /// (the Rust analogue of "default is the system deallocator").
    pub fn new(logger: Arc<dyn Logger>, max_threads: usize, pointers_per_thread: usize) -> Arc<Self>
    where
        T: Send + 'static,
    {
        Arc::new_cyclic(|weak| HazardDomain {
            head: AtomicPtr::new(ptr::null_mut()),
            next_id: AtomicUsize::new(0),
            max_threads,
            pointers_per_thread,
            destructor: Mutex::new(Box::new(|p: *mut T| unsafe {
                drop(Box::from_raw(p));
            })),
            logger,
            self_weak: weak.clone(),
        })
    }

    pub fn with_defaults(logger: Arc<dyn Logger>) -> Arc<Self>
    where
        T: Send + 'static,
    {
        Self::new(logger, DEFAULT_MAX_THREADS, DEFAULT_POINTERS_PER_THREAD)
    }

    fn domain_key(&self) -> usize {
        self as *const Self as usize
    }

    fn threshold(&self) -> usize {
        self.max_threads * self.pointers_per_thread
    }

    /// Stores `ptr` in this thread's `owned[index]`, publishing the
    /// protection with release semantics.
    pub fn acquire(&self, index: usize, ptr_val: *mut T) -> CoreResult<()> {
        if index >= self.pointers_per_thread {
            return Err(CoreError::ContractViolation(
                "hazard pointer index exceeds pointers-per-thread",
            ));
        }
        self.with_record(|rec| {
            rec.owned[index].store(ptr_val, Ordering::Release);
        });
        Ok(())
    }

    /// Clears whichever slot(s) hold `ptr`. If `retire` is set, queues
    /// `ptr` for eventual reclamation once no record protects it.
    pub fn release(&self, ptr_val: *mut T, retire: bool) {
        self.with_record(|rec| {
            for slot in rec.owned.iter() {
                let _ = slot.compare_exchange(
                    ptr_val,
                    ptr::null_mut(),
                    Ordering::Release,
                    Ordering::Relaxed,
                );
            }
            if retire && !ptr_val.is_null() {
                self.retire_one(rec, ptr_val);
            }
        });
    }

    /// Clears every slot this thread owns, optionally retiring each
    /// non-null pointer found.
    pub fn release_all(&self, retire: bool) {
        self.with_record(|rec| {
            let owned: Vec<*mut T> = rec
                .owned
                .iter()
                .map(|slot| slot.swap(ptr::null_mut(), Ordering::AcqRel))
                .collect();
            if retire {
                for p in owned {
                    if !p.is_null() {
                        self.retire_one(rec, p);
                    }
                }
            }
        });
    }

    /// Installs the function used to free pointers that scan
    /// determines are safe to reclaim. The default is equivalent to
    /// `Box::from_raw` followed by drop.
    pub fn register_destructor<F>(&self, f: F)
    where
        F: Fn(*mut T) + Send + Sync + 'static,
    {
        *self.destructor.lock().unwrap() = Box::new(f);
    }

    fn retire_one(&self, rec: &HazardRecord<T>, ptr_val: *mut T) {
        let retired = unsafe { &mut *rec.retired.get() };
        retired.push(ptr_val);
        core_log!(
            self.logger,
            Level::Trace,
            "hazard",
            "record #{} retired a pointer, list size {}",
            rec.id,
            retired.len()
        );
        if retired.len() >= self.threshold() {
            self.scan(rec);
            self.help_scan(rec);
        }
    }

    /// Builds the union of every record's `owned` slots (reading with
    /// acquire semantics) and frees whichever of this record's retired
    /// pointers are absent from that set.
    fn scan(&self, rec: &HazardRecord<T>) {
        let mut protected: HashSet<*mut T> = HashSet::new();
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            let other = unsafe { &*cur };
            for slot in other.owned.iter() {
                let p = slot.load(Ordering::Acquire);
                if !p.is_null() {
                    protected.insert(p);
                }
            }
            cur = other.next.load(Ordering::Acquire);
        }

        let retired = unsafe { &mut *rec.retired.get() };
        let destructor = self.destructor.lock().unwrap();
        let mut still_retired = Vec::with_capacity(retired.len());
        let mut reclaimed = 0usize;
        for p in retired.drain(..) {
            if protected.contains(&p) {
                still_retired.push(p);
            } else {
                (destructor)(p);
                reclaimed += 1;
            }
        }
        *retired = still_retired;
        core_log!(
            self.logger,
            Level::Trace,
            "hazard",
            "record #{} scan reclaimed {} pointers, {} remain retired",
            rec.id,
            reclaimed,
            retired.len()
        );
    }

    /// Walks every record, claiming (via CAS) any that are currently
    /// unused, stealing its retired list into `rec`'s, and re-scanning
    /// as needed. Ensures retirements made by a thread that has since
    /// exited are eventually reclaimed.
    fn help_scan(&self, rec: &HazardRecord<T>) {
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            let other = unsafe { &*cur };
            if !ptr::eq(other, rec)
                && other
                    .in_use
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                let other_retired = unsafe { &mut *other.retired.get() };
                if !other_retired.is_empty() {
                    let mine = unsafe { &mut *rec.retired.get() };
                    mine.append(other_retired);
                    if mine.len() >= self.threshold() {
                        self.scan(rec);
                    }
                }
                other.in_use.store(false, Ordering::Release);
            }
            cur = other.next.load(Ordering::Acquire);
        }
    }

    fn with_record<R>(&self, f: impl FnOnce(&HazardRecord<T>) -> R) -> R {
        let raw = DOMAIN_RECORDS.with(|map| {
            let existing = map.borrow().get(&self.domain_key()).copied();
            if let Some(p) = existing {
                return p as *mut HazardRecord<T>;
            }
            let rec = self.acquire_or_create_record();
            map.borrow_mut().insert(self.domain_key(), rec as *mut u8);
            rec
        });
        let record = unsafe { &*raw };
        f(record)
    }

    fn acquire_or_create_record(&self) -> *mut HazardRecord<T> {
        let backoff = crossbeam_utils::Backoff::new();
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            let rec = unsafe { &*cur };
            if rec
                .in_use
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.register_exit_hook(cur);
                core_log!(
                    self.logger,
                    Level::Trace,
                    "hazard",
                    "reclaimed existing record #{}",
                    rec.id
                );
                return cur;
            }
            cur = rec.next.load(Ordering::Acquire);
            backoff.spin();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let owned: Vec<AtomicPtr<T>> = (0..self.pointers_per_thread)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();
        let new_rec = Box::into_raw(Box::new(HazardRecord {
            in_use: AtomicBool::new(true),
            id,
            owned: owned.into_boxed_slice(),
            retired: UnsafeCell::new(Vec::new()),
            next: AtomicPtr::new(ptr::null_mut()),
        }));

        loop {
            let old_head = self.head.load(Ordering::Acquire);
            unsafe {
                (*new_rec).next.store(old_head, Ordering::Relaxed);
            }
            if self
                .head
                .compare_exchange(old_head, new_rec, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
            backoff.spin();
        }
        core_log!(
            self.logger,
            Level::Trace,
            "hazard",
            "created new record #{}",
            id
        );
        self.register_exit_hook(new_rec);
        new_rec
    }

    fn register_exit_hook(&self, rec_ptr: *mut HazardRecord<T>) {
        let domain = self
            .self_weak
            .upgrade()
            .expect("hazard domain dropped while a thread was still acquiring a record");
        let addr = rec_ptr as usize;
        ON_THREAD_EXIT.with(|hooks| {
            hooks.0.borrow_mut().push(Box::new(move || {
                let rec = unsafe { &*(addr as *mut HazardRecord<T>) };
                rec.in_use.store(false, Ordering::Release);
                drop(domain);
            }));
        });
    }
}

impl<T> Drop for HazardDomain<T> {
    fn drop(&mut self) {
        // By the time the last `Arc<HazardDomain<T>>` is dropped, no
        // live thread can still hold a record (each holder keeps a
        // clone alive via its thread-exit hook), so walking and
        // freeing every record plus reclaiming any still-retired
        // pointers is safe.
        let destructor = self.destructor.lock().unwrap();
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            let rec = unsafe { Box::from_raw(cur) };
            let retired = unsafe { &mut *rec.retired.get() };
            for p in retired.drain(..) {
                (destructor)(p);
            }
            cur = rec.next.load(Ordering::Acquire);
        }
    }
}
