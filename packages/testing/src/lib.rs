#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for tests, benchmarks and examples in this workspace.

use std::sync::{Barrier, mpsc};
use std::thread;
use std::time::Duration;

/// Runs a test with a timeout, so a deadlocked or livelocked lock fails the test instead of
/// hanging the test run forever.
///
/// The timeout is 10 seconds under normal conditions and 60 seconds under Miri, where
/// thread synchronization is significantly slower.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog is disabled
/// and the test function is executed directly. This allows mutation testing to detect
/// mutations that cause a hang.
///
/// # Panics
///
/// Panics if the test exceeds the timeout (when not in mutation testing mode). Panics from
/// the test function itself are propagated unchanged.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// let sum = with_watchdog(|| 2 + 2);
/// assert_eq!(sum, 4);
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // If this fails, the receiver has already timed out and nobody cares about the result.
        drop(tx.send(result));
    });

    let timeout = if cfg!(miri) {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(10)
    };

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_handle.join().expect("test thread should not panic after sending its result");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("test exceeded the {timeout:?} watchdog timeout - probable deadlock");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_handle.join() {
            Ok(()) => panic!("test thread exited without producing a result"),
            Err(payload) => std::panic::resume_unwind(payload),
        },
    }
}

/// Runs `f` on `thread_count` threads at once and waits for all of them to finish.
///
/// Each invocation receives the index of its thread (`0..thread_count`). All threads are
/// released from a barrier at the same time to maximize contention on whatever `f` touches.
///
/// # Panics
///
/// Panics if any of the threads panics.
///
/// # Example
///
/// ```rust
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use testing::run_on_threads;
///
/// let counter = AtomicUsize::new(0);
///
/// run_on_threads(4, |_| {
///     counter.fetch_add(1, Ordering::Relaxed);
/// });
///
/// assert_eq!(counter.load(Ordering::Relaxed), 4);
/// ```
pub fn run_on_threads<F>(thread_count: usize, f: F)
where
    F: Fn(usize) + Sync,
{
    let barrier = Barrier::new(thread_count);

    thread::scope(|scope| {
        for index in 0..thread_count {
            let barrier = &barrier;
            let f = &f;

            scope.spawn(move || {
                barrier.wait();
                f(index);
            });
        }
    });
}
