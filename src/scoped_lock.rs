//! Scope-bound lock handles.
//!
//! `Misc_Utils/MU_Scoped_Lock.c` (and the later `threading/scoped_lock.c`
//! rewrite) built a handle with `acquire0`/`acquire1`/`release`/`dispose`
//! function pointers and a GCC/Clang cleanup attribute to call `release`
//! when the handle variable left scope. Rust doesn't need the cleanup
//! attribute trick: a guard's `Drop` impl *is* the release, so "exactly
//! one release per acquire along every control-flow path" is enforced
//! by the borrow checker rather than by a runtime contract.
//!
//! Three backing primitives are supported, matching `spec.md` §4.2:
//! a plain mutex, a spinlock, and a reader/writer lock. Only the rwlock
//! supports a "secondary" (read) acquire; asking a mutex or spinlock
//! for one is a contract violation.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::CoreError;

/// A plain mutual-exclusion lock, acquired via [`SharedMutex::acquire_primary`].
pub struct SharedMutex<T> {
    inner: Mutex<T>,
}

impl<T> SharedMutex<T> {
    pub fn new(value: T) -> Self {
        SharedMutex {
            inner: Mutex::new(value),
        }
    }

    /// Acquires the lock, returning a guard that releases on drop.
    pub fn acquire_primary(&self) -> LockHandle<'_, T> {
        LockHandle::Exclusive(self.inner.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// A mutex has no secondary acquire mode.
    pub fn acquire_secondary(&self) -> Result<LockHandle<'_, T>, CoreError> {
        Err(CoreError::ContractViolation(
            "a plain mutex has no secondary (read) acquire mode",
        ))
    }
}

/// A busy-wait spinlock, intended for very short critical sections
/// (e.g. hazard-pointer record claiming) where parking a thread would
/// cost more than a few spin iterations.
pub struct SpinLock<T> {
    locked: std::sync::atomic::AtomicBool,
    value: std::cell::UnsafeCell<T>,
}

// Safety: access to `value` is only ever granted through `SpinGuard`,
// which is only constructed after `locked` has been claimed via CAS.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub fn new(value: T) -> Self {
        SpinLock {
            locked: std::sync::atomic::AtomicBool::new(false),
            value: std::cell::UnsafeCell::new(value),
        }
    }

    pub fn acquire_primary(&self) -> SpinGuard<'_, T> {
        let backoff = crossbeam_utils::Backoff::new();
        while self
            .locked
            .compare_exchange_weak(
                false,
                true,
                std::sync::atomic::Ordering::Acquire,
                std::sync::atomic::Ordering::Relaxed,
            )
            .is_err()
        {
            backoff.snooze();
        }
        SpinGuard { lock: self }
    }

    pub fn acquire_secondary(&self) -> Result<SpinGuard<'_, T>, CoreError> {
        Err(CoreError::ContractViolation(
            "a spinlock has no secondary (read) acquire mode",
        ))
    }
}

pub struct SpinGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<'a, T> std::ops::Deref for SpinGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<'a, T> std::ops::DerefMut for SpinGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<'a, T> Drop for SpinGuard<'a, T> {
    fn drop(&mut self) {
        self.lock
            .locked
            .store(false, std::sync::atomic::Ordering::Release);
    }
}

/// A reader/writer lock. `acquire_primary` takes the write side,
/// `acquire_secondary` the read side, matching `spec.md`'s "read, for
/// rwlock only" wording for the secondary mode.
pub struct SharedRwLock<T> {
    inner: RwLock<T>,
}

impl<T> SharedRwLock<T> {
    pub fn new(value: T) -> Self {
        SharedRwLock {
            inner: RwLock::new(value),
        }
    }

    pub fn acquire_primary(&self) -> LockHandle<'_, T> {
        LockHandle::Write(self.inner.write().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn acquire_secondary(&self) -> Result<LockHandle<'_, T>, CoreError> {
        Ok(LockHandle::Read(
            self.inner.read().unwrap_or_else(|e| e.into_inner()),
        ))
    }
}

/// A uniform guard over the mutex/rwlock acquire modes. Dropping it
/// (including via `dispose`, an explicit alias for `drop`) releases
/// the underlying lock; there is no way to forget to release one,
/// short of `mem::forget`, which is exactly the guarantee `spec.md`
/// §4.2 asks for.
pub enum LockHandle<'a, T> {
    Exclusive(MutexGuard<'a, T>),
    Read(RwLockReadGuard<'a, T>),
    Write(RwLockWriteGuard<'a, T>),
}

impl<'a, T> LockHandle<'a, T> {
    /// Releases the lock early. Equivalent to `drop(handle)`; kept as
    /// a named method for parity with the original API surface.
    pub fn dispose(self) {
        drop(self)
    }
}

impl<'a, T> std::ops::Deref for LockHandle<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        match self {
            LockHandle::Exclusive(g) => g,
            LockHandle::Read(g) => g,
            LockHandle::Write(g) => g,
        }
    }
}

impl<'a, T> std::ops::DerefMut for LockHandle<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        match self {
            LockHandle::Exclusive(g) => &mut *g,
            LockHandle::Read(_) => unreachable!("read guards are never handed out as DerefMut"),
            LockHandle::Write(g) => &mut *g,
        }
    }
}
