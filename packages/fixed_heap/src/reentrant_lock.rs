use std::marker::PhantomData;
use std::num::NonZero;
use std::sync::atomic::{AtomicUsize, Ordering};

use new_zealand::nz;

use crate::SpinLock;

/// Owner value that no thread token can ever have.
const NO_OWNER: usize = 0;

const FIRST_THREAD_TOKEN: NonZero<usize> = nz!(1);

static NEXT_THREAD_TOKEN: AtomicUsize = AtomicUsize::new(FIRST_THREAD_TOKEN.get());

thread_local! {
    static THREAD_TOKEN: NonZero<usize> = allocate_thread_token();
}

fn allocate_thread_token() -> NonZero<usize> {
    // Relaxed is sufficient: we only need every thread to observe a distinct value.
    let token = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);

    NonZero::new(token).expect("thread token counter overflowed - more than usize::MAX threads")
}

/// Identifies the calling thread for the purpose of lock ownership.
///
/// Tokens are unique for the lifetime of the process and never zero.
fn current_thread_token() -> usize {
    THREAD_TOKEN.with(|token| token.get())
}

/// A mutual-exclusion lock that the holding thread may acquire again without blocking itself.
///
/// Built on top of [`SpinLock`]. The lock remembers which thread holds it and how many times
/// that thread has acquired it. The underlying spin lock is only released once every
/// [`lock()`][Self::lock] has been matched by an [`unlock()`][Self::unlock].
///
/// Calling [`unlock()`][Self::unlock] from a thread that does not hold the lock does nothing.
///
/// # Examples
///
/// ```
/// use fixed_heap::ReentrantLock;
///
/// let lock = ReentrantLock::new();
///
/// lock.lock();
/// lock.lock();
/// assert_eq!(lock.depth(), 2);
///
/// lock.unlock();
/// assert!(lock.is_held_by_current_thread());
///
/// lock.unlock();
/// assert!(!lock.is_held_by_current_thread());
/// ```
#[derive(Debug, Default)]
pub struct ReentrantLock {
    inner: SpinLock,

    /// Token of the thread that holds `inner`, or `NO_OWNER`.
    ///
    /// Only the owning thread ever stores its own token here, so a thread comparing against
    /// its own token can never get a false positive even from a stale read.
    owner: AtomicUsize,

    /// Number of unmatched `lock()` calls made by the owner. Only touched by the owner.
    depth: AtomicUsize,
}

impl ReentrantLock {
    /// Creates a new lock that nobody holds.
    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self {
            inner: SpinLock::new(),
            owner: AtomicUsize::new(NO_OWNER),
            depth: AtomicUsize::new(0),
        }
    }

    /// Acquires the lock, spinning while another thread holds it.
    ///
    /// If the calling thread already holds the lock, this only increments the depth.
    ///
    /// # Panics
    ///
    /// Panics if the depth would overflow `usize`.
    #[inline]
    pub fn lock(&self) {
        let me = current_thread_token();

        if self.owner.load(Ordering::Relaxed) == me {
            self.increment_depth();
            return;
        }

        self.inner.lock();
        self.take_ownership(me);
    }

    /// Attempts to acquire the lock without spinning.
    ///
    /// Returns `true` if the calling thread now holds the lock (either newly or again).
    ///
    /// # Panics
    ///
    /// Panics if the depth would overflow `usize`.
    #[must_use]
    #[inline]
    pub fn try_lock(&self) -> bool {
        let me = current_thread_token();

        if self.owner.load(Ordering::Relaxed) == me {
            self.increment_depth();
            return true;
        }

        if !self.inner.try_lock() {
            return false;
        }

        self.take_ownership(me);
        true
    }

    /// Releases one level of the lock held by the calling thread.
    ///
    /// When the last level is released, the lock becomes available to other threads.
    /// Does nothing if the calling thread does not hold the lock.
    #[inline]
    pub fn unlock(&self) {
        if self.owner.load(Ordering::Relaxed) != current_thread_token() {
            return;
        }

        let depth = self
            .depth
            .load(Ordering::Relaxed)
            .checked_sub(1)
            .expect("the owner of a reentrant lock always has a depth of at least 1");

        self.depth.store(depth, Ordering::Relaxed);

        if depth == 0 {
            self.owner.store(NO_OWNER, Ordering::Relaxed);
            self.inner.unlock();
        }
    }

    /// Whether the calling thread currently holds the lock.
    #[must_use]
    #[inline]
    pub fn is_held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == current_thread_token()
    }

    /// How many unmatched times the calling thread has acquired the lock.
    ///
    /// Returns zero if the calling thread does not hold the lock.
    #[must_use]
    #[inline]
    pub fn depth(&self) -> usize {
        if self.is_held_by_current_thread() {
            self.depth.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    /// Acquires the lock and returns a guard that releases one level of it when dropped.
    ///
    /// # Panics
    ///
    /// Panics if the depth would overflow `usize`.
    #[must_use]
    #[inline]
    pub fn lock_guard(&self) -> ReentrantLockGuard<'_> {
        self.lock();

        ReentrantLockGuard {
            lock: self,
            _single_threaded: PhantomData,
        }
    }

    fn take_ownership(&self, me: usize) {
        // The spin lock's Acquire ordering makes these writes visible to the next owner
        // through its own Acquire, after our Release in `unlock()`.
        self.owner.store(me, Ordering::Relaxed);
        self.depth.store(1, Ordering::Relaxed);
    }

    fn increment_depth(&self) {
        let depth = self
            .depth
            .load(Ordering::Relaxed)
            .checked_add(1)
            .expect("reentrant lock depth overflowed usize");

        self.depth.store(depth, Ordering::Relaxed);
    }
}

/// Releases one level of a [`ReentrantLock`] when dropped.
///
/// Returned by [`ReentrantLock::lock_guard()`]. The guard is neither `Send` nor `Sync` because
/// the lock must be released by the thread that acquired it.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ReentrantLockGuard<'a> {
    lock: &'a ReentrantLock,

    // The guard must be dropped on the thread that created it, otherwise `unlock()` would be a
    // no-op and the lock would stay held forever.
    _single_threaded: PhantomData<*const ()>,
}

impl Drop for ReentrantLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
