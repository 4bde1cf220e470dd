use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::{
    keys,
    messages::now_millis,
    store::{SharedStore, StoreError},
};

/// One of the task lists workers compete over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub index: usize,
    pub owner_key: String,
    pub list_key: String,
}

impl Partition {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            owner_key: keys::partition_owner(index),
            list_key: keys::partition_tasks(index),
        }
    }
}

/// The first `count` partitions
pub fn partitions(count: usize) -> Vec<Partition> {
    (0..count).map(Partition::new).collect()
}

/// ```
/// use boxes_queue::LeaseOptions;
/// use std::time::Duration;
///
/// let defaults = LeaseOptions::default();
///
/// assert_eq!(defaults.partitions, 8);
/// assert_eq!(defaults.lease_ttl, Duration::from_secs(10));
/// assert_eq!(defaults.scan_interval, Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseOptions {
    pub partitions: usize,
    /// An owner that stops renewing loses the partition after this long
    pub lease_ttl: Duration,
    /// How long to wait before scanning again when every partition is busy or empty
    pub scan_interval: Duration,
}

impl Default for LeaseOptions {
    fn default() -> Self {
        Self {
            partitions: 8,
            lease_ttl: Duration::from_secs(10),
            scan_interval: Duration::from_secs(1),
        }
    }
}

/// Proof that we own a partition, valid until it expires or is released
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub partition: Partition,
    pub token: String,
}

/// Hands out exclusive, expiring ownership of partitions to one worker
#[derive(Debug)]
pub struct LeaseManager {
    store: SharedStore,
    options: LeaseOptions,
    partitions: Vec<Partition>,
    worker: String,
    cursor: usize,
}

impl LeaseManager {
    pub fn new(store: SharedStore, options: LeaseOptions, worker: impl Into<String>) -> Self {
        Self {
            store,
            partitions: partitions(options.partitions.max(1)),
            options,
            worker: worker.into(),
            cursor: 0,
        }
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Scan every partition once, starting after the last one we took, and claim the first one
    /// that is unowned and has work waiting
    ///
    /// The final claim is a single set-if-absent, so two workers racing for the same partition
    /// can never both win it.
    pub fn try_acquire(&mut self) -> Result<Option<Lease>, StoreError> {
        let count = self.partitions.len();

        for offset in 0..count {
            let index = (self.cursor + offset) % count;
            let partition = &self.partitions[index];

            if self.store.exists(&partition.owner_key)? {
                continue;
            }

            if self.store.llen(&partition.list_key)? == 0 {
                continue;
            }

            let token = format!("{}:{}", now_millis(), self.worker);

            if self
                .store
                .set_nx_ex(&partition.owner_key, &token, self.options.lease_ttl)?
            {
                info!(partition = partition.index, worker = %self.worker, "Acquired partition");

                let lease = Lease {
                    partition: partition.clone(),
                    token,
                };
                self.cursor = (index + 1) % count;

                return Ok(Some(lease));
            }

            debug!(partition = partition.index, "Lost the race for a partition");
        }

        Ok(None)
    }

    /// Keep scanning until we get a partition, or `shutdown` is raised
    pub fn acquire_free_partition(&mut self, shutdown: &AtomicBool) -> Option<Lease> {
        while !shutdown.load(Ordering::Relaxed) {
            match self.try_acquire() {
                Ok(Some(lease)) => return Some(lease),
                Ok(None) => {}
                Err(error) => warn!(%error, "Could not scan partitions"),
            }

            thread::sleep(self.options.scan_interval);
        }

        None
    }

    /// Push the lease expiry back. Returns false once someone else owns the partition
    pub fn renew(&self, lease: &Lease) -> Result<bool, StoreError> {
        self.store.expire_if_eq(
            &lease.partition.owner_key,
            &lease.token,
            self.options.lease_ttl,
        )
    }

    /// Give the partition back, unless it has already passed to someone else
    pub fn release(&self, lease: Lease) -> Result<bool, StoreError> {
        let released = self
            .store
            .del_if_eq(&lease.partition.owner_key, &lease.token)?;

        debug!(partition = lease.partition.index, released, "Released partition");

        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use crate::store::{CoordinationStore, MemoryStore};

    use super::*;

    fn options(partitions: usize) -> LeaseOptions {
        LeaseOptions {
            partitions,
            lease_ttl: Duration::from_secs(10),
            scan_interval: Duration::from_millis(5),
        }
    }

    fn queue(store: &SharedStore, index: usize) {
        store
            .lpush(&keys::partition_tasks(index), &["task".to_owned()])
            .unwrap();
    }

    /// Holds every caller of `exists` until two have arrived, so both racers see the partition
    /// free before either of them claims it
    #[derive(Debug)]
    struct RacingStore {
        inner: MemoryStore,
        barrier: Barrier,
    }

    impl CoordinationStore for RacingStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key)
        }

        fn exists(&self, key: &str) -> Result<bool, StoreError> {
            let exists = self.inner.exists(key);
            self.barrier.wait();
            exists
        }

        fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
            self.inner.set_ex(key, value, ttl)
        }

        fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
            self.inner.set_nx_ex(key, value, ttl)
        }

        fn del(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.del(key)
        }

        fn del_if_eq(&self, key: &str, value: &str) -> Result<bool, StoreError> {
            self.inner.del_if_eq(key, value)
        }

        fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
            self.inner.expire(key, ttl)
        }

        fn expire_if_eq(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
            self.inner.expire_if_eq(key, value, ttl)
        }

        fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
            self.inner.ttl(key)
        }

        fn lpush(&self, key: &str, values: &[String]) -> Result<usize, StoreError> {
            self.inner.lpush(key, values)
        }

        fn rpop(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.rpop(key)
        }

        fn llen(&self, key: &str) -> Result<usize, StoreError> {
            self.inner.llen(key)
        }

        fn sadd(&self, key: &str, members: &[String]) -> Result<usize, StoreError> {
            self.inner.sadd(key, members)
        }

        fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
            self.inner.smembers(key)
        }
    }

    #[test]
    fn test_only_one_racer_wins() {
        let store: SharedStore = Arc::new(RacingStore {
            inner: MemoryStore::new(),
            barrier: Barrier::new(2),
        });
        queue(&store, 0);

        let handles: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|worker| {
                let mut manager = LeaseManager::new(store.clone(), options(1), worker);
                thread::spawn(move || manager.try_acquire().unwrap())
            })
            .collect();

        let leases: Vec<Option<Lease>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(leases.iter().filter(|lease| lease.is_some()).count(), 1);
    }

    #[test]
    fn test_skips_empty_and_owned_partitions() {
        let store = MemoryStore::shared();
        let mut first = LeaseManager::new(store.clone(), options(3), "first");
        let mut second = LeaseManager::new(store.clone(), options(3), "second");

        assert_eq!(first.try_acquire().unwrap(), None);

        queue(&store, 1);
        queue(&store, 2);

        let lease = first.try_acquire().unwrap().unwrap();
        assert_eq!(lease.partition.index, 1);
        assert!(lease.token.ends_with(":first"));

        let other = second.try_acquire().unwrap().unwrap();
        assert_eq!(other.partition.index, 2);

        assert_eq!(second.try_acquire().unwrap(), None);
    }

    #[test]
    fn test_renew_and_release() {
        let store = MemoryStore::shared();
        let mut manager = LeaseManager::new(store.clone(), options(1), "worker");
        queue(&store, 0);

        let lease = manager.try_acquire().unwrap().unwrap();
        assert!(manager.renew(&lease).unwrap());
        assert!(store.ttl(&lease.partition.owner_key).unwrap().is_some());

        assert!(manager.release(lease.clone()).unwrap());
        assert!(!store.exists(&lease.partition.owner_key).unwrap());
        assert!(!manager.renew(&lease).unwrap());
    }

    #[test]
    fn test_expired_lease_passes_to_another_worker() {
        let store = MemoryStore::shared();
        let short = LeaseOptions {
            lease_ttl: Duration::from_millis(10),
            ..options(1)
        };
        let mut stalled = LeaseManager::new(store.clone(), short, "stalled");
        let mut fresh = LeaseManager::new(store.clone(), options(1), "fresh");
        queue(&store, 0);

        let old = stalled.try_acquire().unwrap().unwrap();
        thread::sleep(Duration::from_millis(20));

        let new = fresh.try_acquire().unwrap().unwrap();
        assert_eq!(new.partition, old.partition);

        assert!(!stalled.renew(&old).unwrap());
        assert!(store.ttl(&new.partition.owner_key).unwrap().unwrap() > Duration::from_secs(1));
        assert!(!stalled.release(old).unwrap());
        assert!(fresh.renew(&new).unwrap());
    }

    #[test]
    fn test_zero_partitions_still_scans_the_first_list() {
        let store = MemoryStore::shared();
        let mut manager = LeaseManager::new(store.clone(), options(0), "worker");
        queue(&store, 0);

        assert_eq!(manager.partitions().len(), 1);
        assert_eq!(manager.try_acquire().unwrap().unwrap().partition.index, 0);
    }

    #[test]
    fn test_acquire_free_partition_stops_on_shutdown() {
        let store = MemoryStore::shared();
        let mut manager = LeaseManager::new(store, options(2), "worker");
        let shutdown = AtomicBool::new(true);

        assert_eq!(manager.acquire_free_partition(&shutdown), None);
    }
}
