use std::{
    thread,
    time::{Duration, Instant},
};

use rand::Rng;
use thiserror::Error;
use tracing::{trace, warn};

use crate::{
    keys,
    store::{SharedStore, StoreError},
};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out waiting for the lock on {key}")]
    Timeout { key: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// ```
/// use boxes_queue::LockOptions;
/// use std::time::Duration;
///
/// let defaults = LockOptions::default();
///
/// assert_eq!(defaults.ttl, Duration::from_secs(5));
/// assert_eq!(defaults.retry_interval, Duration::from_millis(200));
/// assert_eq!(defaults.timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// A holder that dies keeps the lock at most this long
    pub ttl: Duration,
    pub retry_interval: Duration,
    /// Give up acquiring after this long
    pub timeout: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5),
            retry_interval: Duration::from_millis(200),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Mutual exclusion on a store key across every process sharing the store
#[derive(Debug, Clone)]
pub struct DistributedLock {
    store: SharedStore,
    options: LockOptions,
}

/// Holds a lock until it is released or dropped
#[derive(Debug)]
pub struct LockGuard {
    store: SharedStore,
    key: String,
    token: String,
    released: bool,
}

pub(crate) fn unique_token() -> String {
    format!(
        "{}-{:016x}",
        std::process::id(),
        rand::thread_rng().gen::<u64>()
    )
}

impl DistributedLock {
    pub fn new(store: SharedStore, options: LockOptions) -> Self {
        Self { store, options }
    }

    /// Block until we hold the lock on `key`, or fail once the timeout passes
    pub fn acquire(&self, key: &str) -> Result<LockGuard, LockError> {
        let lock_key = keys::lock(key);
        let token = unique_token();
        let started = Instant::now();

        loop {
            if self.store.set_nx_ex(&lock_key, &token, self.options.ttl)? {
                trace!(key = %lock_key, "Acquired lock");

                return Ok(LockGuard {
                    store: self.store.clone(),
                    key: lock_key,
                    token,
                    released: false,
                });
            }

            if started.elapsed() >= self.options.timeout {
                return Err(LockError::Timeout { key: lock_key });
            }

            thread::sleep(self.options.retry_interval);
        }
    }

    /// Run `f` while holding the lock on `key`
    pub fn with_lock<T, E>(&self, key: &str, f: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<LockError>,
    {
        let guard = self.acquire(key)?;
        let result = f();
        guard.release().map_err(LockError::from)?;

        result
    }
}

impl LockGuard {
    /// Release the lock. Returns false if it had already expired and been taken by someone else
    pub fn release(mut self) -> Result<bool, StoreError> {
        self.released = true;
        self.store.del_if_eq(&self.key, &self.token)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        if let Err(error) = self.store.del_if_eq(&self.key, &self.token) {
            warn!(key = %self.key, %error, "Could not release lock, it will expire");
        }
    }
}
