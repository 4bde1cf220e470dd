use std::{io, time::Duration};

use itertools::Itertools;
use tracing::{debug, instrument};

use crate::{
    lock::{DistributedLock, LockError, LockOptions},
    messages::MovingInformationMessage,
    partition::{self, Partition},
    pusher::{BatchPusher, PusherOptions},
    retry::RetryPolicy,
    store::{SharedStore, StoreError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    pub pusher: PusherOptions,
    pub lock: LockOptions,
    pub retry: RetryPolicy,
    /// How long an untouched task list survives
    pub list_ttl: Duration,
    /// Extra lifetime granted for every task waiting in a list
    pub list_ttl_per_task: Duration,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            pusher: Default::default(),
            lock: Default::default(),
            retry: Default::default(),
            list_ttl: Duration::from_secs(30 * 60),
            list_ttl_per_task: Duration::from_secs(1),
        }
    }
}

impl PublishOptions {
    /// Expiry for a task list holding `len` tasks
    pub fn list_ttl_for(&self, len: usize) -> Duration {
        let len = u32::try_from(len).unwrap_or(u32::MAX);

        self.list_ttl
            .saturating_add(self.list_ttl_per_task.saturating_mul(len))
    }
}

/// Spreads assessment tasks over the partition lists, always feeding the shortest backlog
///
/// Each partition gets its own [BatchPusher], so tasks reach the store in batches, each written
/// under the list's [DistributedLock].
#[derive(Debug)]
pub struct TaskPublisher {
    store: SharedStore,
    partitions: Vec<Partition>,
    pushers: Vec<BatchPusher<String>>,
}

/// Assign `count` tasks to partitions one at a time, each to whichever currently has the fewest
/// tasks. Ties go to the lowest index. `backlogs` is updated as tasks are placed
pub fn route(backlogs: &mut [usize], count: usize) -> Vec<usize> {
    let mut placement = Vec::with_capacity(count);

    for _ in 0..count {
        let Some(index) = backlogs.iter().position_min() else {
            break;
        };

        backlogs[index] += 1;
        placement.push(index);
    }

    placement
}

fn push_batch(
    store: &SharedStore,
    lock: &DistributedLock,
    list_key: &str,
    batch: &[String],
    options: &PublishOptions,
) -> Result<usize, LockError> {
    let guard = lock.acquire(list_key)?;

    let len = store.lpush(list_key, batch)?;
    store.expire(list_key, options.list_ttl_for(len))?;

    guard.release()?;

    Ok(len)
}

impl TaskPublisher {
    pub fn spawn(store: SharedStore, partitions: usize, options: PublishOptions) -> io::Result<Self> {
        let partitions = partition::partitions(partitions.max(1));
        let lock = DistributedLock::new(store.clone(), options.lock);

        let pushers = partitions
            .iter()
            .map(|partition| {
                let store = store.clone();
                let lock = lock.clone();
                let list_key = partition.list_key.clone();

                BatchPusher::spawn_logging(
                    format!("publish-{}", partition.index),
                    options.pusher,
                    move |batch: Vec<String>| {
                        let len = options.retry.run("publish tasks", || {
                            push_batch(&store, &lock, &list_key, &batch, &options)
                        })?;

                        debug!(list = %list_key, pushed = batch.len(), len, "Published tasks");

                        Ok::<_, LockError>(())
                    },
                )
            })
            .collect::<io::Result<Vec<_>>>()?;

        Ok(Self {
            store,
            partitions,
            pushers,
        })
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Tasks waiting in each partition, counting the ones still buffered in memory
    pub fn backlogs(&self) -> Result<Vec<usize>, StoreError> {
        self.partitions
            .iter()
            .zip(&self.pushers)
            .map(|(partition, pusher)| Ok(self.store.llen(&partition.list_key)? + pusher.pending()))
            .collect()
    }

    /// Queue `tasks` for the workers. Returns how many were queued
    #[instrument(level = "debug", skip_all, fields(tasks = tasks.len()))]
    pub fn publish(&self, tasks: &[MovingInformationMessage]) -> Result<usize, StoreError> {
        let encoded: Vec<String> = tasks
            .iter()
            .map(MovingInformationMessage::encode)
            .collect::<Result<_, _>>()?;

        let mut backlogs = self.backlogs()?;
        let placement = route(&mut backlogs, encoded.len());

        for (task, index) in encoded.into_iter().zip(placement) {
            self.pushers[index].push(task);
        }

        Ok(tasks.len())
    }

    /// Tasks accepted but not yet written to the store
    pub fn pending(&self) -> usize {
        self.pushers.iter().map(BatchPusher::pending).sum()
    }

    /// Flush every buffered task and stop the pushers
    pub fn shutdown(self) {
        for pusher in self.pushers {
            pusher.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use boxes_minimax::{better_edges, Board};

    use crate::{
        keys,
        messages::GameUid,
        store::{CoordinationStore, MemoryStore},
    };

    use super::*;

    fn tasks(count: usize) -> Vec<MovingInformationMessage> {
        let board = Board::new(3).unwrap();

        better_edges(&board)
            .into_iter()
            .take(count)
            .map(|edge| MovingInformationMessage::new(GameUid::new("g"), 0, board.clone(), edge))
            .collect()
    }

    fn quick() -> PublishOptions {
        PublishOptions {
            pusher: PusherOptions {
                flush_interval: Duration::from_millis(10),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_route_prefers_the_shortest_backlog() {
        let mut backlogs = [3, 0, 1];

        assert_eq!(route(&mut backlogs, 4), vec![1, 1, 2, 1]);
        assert_eq!(backlogs, [3, 3, 2]);
    }

    #[test]
    fn test_route_spreads_evenly() {
        let mut backlogs = [0; 4];

        let placement = route(&mut backlogs, 10);

        assert_eq!(placement.len(), 10);
        assert_eq!(backlogs.iter().max().unwrap() - backlogs.iter().min().unwrap(), 1);
        assert!(route(&mut Vec::new(), 3).is_empty());
    }

    #[test]
    fn test_published_tasks_reach_the_lists() {
        let store = MemoryStore::shared();
        store
            .lpush(
                &keys::partition_tasks(0),
                &["a".to_owned(), "b".to_owned(), "c".to_owned()],
            )
            .unwrap();

        // Nothing flushes before shutdown, so the backlog is exact
        let options = PublishOptions {
            pusher: PusherOptions {
                flush_interval: Duration::from_secs(60),
            },
            ..quick()
        };
        let publisher = TaskPublisher::spawn(store.clone(), 2, options).unwrap();
        assert_eq!(publisher.publish(&tasks(3)).unwrap(), 3);
        assert_eq!(publisher.backlogs().unwrap(), vec![3, 3]);
        publisher.shutdown();

        assert_eq!(store.llen(&keys::partition_tasks(0)).unwrap(), 3);
        assert_eq!(store.llen(&keys::partition_tasks(1)).unwrap(), 3);
        assert!(store.ttl(&keys::partition_tasks(1)).unwrap().is_some());

        let first = store.rpop(&keys::partition_tasks(1)).unwrap().unwrap();
        assert_eq!(
            MovingInformationMessage::decode(&first).unwrap().edge,
            tasks(1)[0].edge
        );
    }

    #[test]
    fn test_list_ttl_grows_with_the_backlog() {
        let options = PublishOptions::default();

        assert_eq!(options.list_ttl_for(0), options.list_ttl);
        assert_eq!(
            options.list_ttl_for(10),
            options.list_ttl + Duration::from_secs(10)
        );
    }
}
