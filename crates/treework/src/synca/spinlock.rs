use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// [`Waiter`] provides the backoff used while spinning on a contended
/// lock: relax the CPU on most rounds and yield the thread once in a
/// while so other threads can make progress.
pub struct Waiter {
    rounds: u32,
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Waiter {
    #[must_use]
    pub fn new() -> Self {
        Self { rounds: 0 }
    }

    pub fn relax(&mut self) {
        self.rounds = self.rounds.wrapping_add(1);
        if self.rounds % 1000 == 0 {
            // no progress for a while, let others run
            std::thread::yield_now();
        } else {
            std::hint::spin_loop();
        }
    }
}

/// A test-and-set spinlock protecting a value of type `T`.
///
/// The critical sections guarded by this lock are short (a handful of
/// pointer moves on a ring buffer or task pool), which is why spinning
/// is preferred over parking the thread.
pub struct SpinLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, spinning until it is available.
    pub fn lock(&self) -> SpinGuard<'_, T> {
        let mut waiter = Waiter::new();
        loop {
            match self.try_lock() {
                Some(guard) => return guard,
                None => waiter.relax(),
            }
        }
    }

    /// Attempts to acquire the lock without spinning, returning `None`
    /// when another thread currently holds it.
    pub fn try_lock(&self) -> Option<SpinGuard<'_, T>> {
        if self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinGuard { lock: self })
        } else {
            None
        }
    }
}

pub struct SpinGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // guard existence proves exclusive access
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod test_spinlock {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn guards_exclusive_access() {
        let lock = Arc::new(SpinLock::new(0u64));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = lock.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    *lock.lock() += 1;
                }
            }));
        }
        for handle in handles {
            handle.join().expect("worker thread should not panic");
        }

        assert_eq!(*lock.lock(), 4000);
    }

    #[test]
    fn try_lock_refuses_while_held() {
        let lock = SpinLock::new(());
        let guard = lock.try_lock();
        assert!(guard.is_some());
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }
}
