use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Process-wide mutual-exclusion lock serializing every mutating store
/// operation. Acquisition waits at most the configured bound; on timeout the
/// caller gets `None` and must surface a retryable busy error without
/// touching the store.
pub struct StoreLock {
    held: Mutex<bool>,
    freed: Condvar,
}

pub struct StoreGuard<'a> {
    lock: &'a StoreLock,
}

impl StoreLock {
    pub fn new() -> Self {
        StoreLock {
            held: Mutex::new(false),
            freed: Condvar::new(),
        }
    }

    pub fn acquire(&self, wait: Duration) -> Option<StoreGuard<'_>> {
        let deadline = Instant::now() + wait;
        let mut held = match self.held.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        while *held {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, timeout) = match self.freed.wait_timeout(held, deadline - now) {
                Ok(v) => v,
                Err(poisoned) => {
                    let inner = poisoned.into_inner();
                    (inner.0, inner.1)
                }
            };
            held = guard;
            if timeout.timed_out() && *held {
                return None;
            }
        }
        *held = true;
        Some(StoreGuard { lock: self })
    }
}

impl Drop for StoreGuard<'_> {
    fn drop(&mut self) {
        let mut held = match self.lock.held.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *held = false;
        self.lock.freed.notify_one();
    }
}
