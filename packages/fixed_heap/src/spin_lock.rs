use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};

/// A raw mutual-exclusion primitive that busy-waits until it can claim an atomic flag.
///
/// The lock does not guard any data and has no notion of ownership: any thread may call
/// [`unlock()`][Self::unlock], and a thread that calls [`lock()`][Self::lock] twice without
/// unlocking in between will spin forever. Use [`ReentrantLock`][crate::ReentrantLock] if the
/// same thread may need to acquire the lock more than once.
///
/// There is no fairness guarantee and no timeout. Under heavy contention an unlucky thread
/// may be starved indefinitely.
///
/// # Examples
///
/// ```
/// use fixed_heap::SpinLock;
///
/// let lock = SpinLock::new();
///
/// lock.lock();
/// assert!(lock.is_locked());
/// assert!(!lock.try_lock());
/// lock.unlock();
///
/// {
///     let _guard = lock.lock_guard();
///     assert!(lock.is_locked());
/// }
///
/// assert!(!lock.is_locked());
/// ```
#[derive(Debug, Default)]
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    /// Creates a new lock in the unlocked state.
    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Spins until the lock is acquired by the calling thread.
    #[inline]
    pub fn lock(&self) {
        while !self.try_lock() {
            // Wait on a plain load so contending threads do not hammer the cache line
            // with failed compare-and-swap attempts.
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
    }

    /// Attempts to acquire the lock without spinning.
    ///
    /// Returns `true` if the lock was acquired by this call.
    #[must_use]
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Releases the lock.
    ///
    /// This does not check who holds the lock. Calling it when the lock is not held is allowed
    /// and leaves the lock unlocked.
    #[inline]
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Whether the lock is currently held by any thread.
    ///
    /// The answer may be stale by the time the caller inspects it.
    #[must_use]
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Acquires the lock and returns a guard that releases it when dropped.
    #[must_use]
    #[inline]
    pub fn lock_guard(&self) -> SpinLockGuard<'_> {
        self.lock();
        SpinLockGuard { lock: self }
    }
}

/// Releases a [`SpinLock`] when dropped.
///
/// Returned by [`SpinLock::lock_guard()`].
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SpinLockGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::UnsafeCell;
    use std::sync::Arc;
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(SpinLock: Send, Sync);

    #[test]
    fn starts_unlocked() {
        let lock = SpinLock::new();
        assert!(!lock.is_locked());
    }

    #[test]
    fn lock_unlock_toggles_state() {
        let lock = SpinLock::new();

        lock.lock();
        assert!(lock.is_locked());

        lock.unlock();
        assert!(!lock.is_locked());
    }

    #[test]
    fn try_lock_fails_when_held() {
        let lock = SpinLock::new();

        // compare_exchange_weak may fail spuriously, so retry until the first claim succeeds.
        while !lock.try_lock() {}

        assert!(!lock.try_lock());

        lock.unlock();
        while !lock.try_lock() {}
        lock.unlock();
    }

    #[test]
    fn guard_releases_on_drop() {
        let lock = SpinLock::new();

        {
            let _guard = lock.lock_guard();
            assert!(lock.is_locked());
        }

        assert!(!lock.is_locked());
    }

    #[test]
    fn unlock_when_not_held_is_harmless() {
        let lock = SpinLock::new();
        lock.unlock();
        assert!(!lock.is_locked());

        lock.lock();
        lock.unlock();
        assert!(!lock.is_locked());
    }

    struct Counter {
        lock: SpinLock,
        value: UnsafeCell<usize>,
    }

    // SAFETY: `value` is only accessed while `lock` is held.
    unsafe impl Sync for Counter {}

    #[test]
    fn provides_mutual_exclusion() {
        const THREADS: usize = 8;
        const ITERATIONS: usize = 1000;

        testing::with_watchdog(|| {
            let counter = Arc::new(Counter {
                lock: SpinLock::new(),
                value: UnsafeCell::new(0),
            });

            let handles = (0..THREADS)
                .map(|_| {
                    let counter = Arc::clone(&counter);
                    thread::spawn(move || {
                        for _ in 0..ITERATIONS {
                            let _guard = counter.lock.lock_guard();

                            // SAFETY: We hold the lock, so nobody else touches the value.
                            unsafe {
                                *counter.value.get() += 1;
                            }
                        }
                    })
                })
                .collect::<Vec<_>>();

            for handle in handles {
                handle.join().unwrap();
            }

            let _guard = counter.lock.lock_guard();

            // SAFETY: We hold the lock and all writers have exited.
            let value = unsafe { *counter.value.get() };
            assert_eq!(value, THREADS * ITERATIONS);
        });
    }
}
