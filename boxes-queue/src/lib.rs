#![deny(missing_debug_implementations)]

//! Distributes move assessments over a pool of workers that coordinate through a shared store.
//!
//! The server publishes one [MovingInformationMessage] per candidate edge. [TaskPublisher] batches
//! them into partitioned FIFO lists, always feeding the shortest one. [Worker]s lease a partition
//! at a time through [LeaseManager], assess what they pop and record the score in the
//! [SampleBook], which the server reads back when asked for the best edge.

pub mod audit;
pub mod keys;
mod lock;
pub use lock::{DistributedLock, LockError, LockGuard, LockOptions};
mod messages;
pub use messages::{
    now_millis, AssessMessageKey, AssessMessageValue, GameUid, MovingInformationMessage, Step,
};
mod partition;
pub use partition::{partitions, Lease, LeaseManager, LeaseOptions, Partition};
pub mod protocol;
mod publish;
pub use publish::{route, PublishOptions, TaskPublisher};
mod pusher;
pub use pusher::{BatchPusher, PusherOptions};
mod retry;
pub use retry::RetryPolicy;
mod samples;
pub use samples::{SampleBook, SampleOptions};
mod store;
pub use store::{CoordinationStore, MemoryStore, SharedStore, StoreError};
mod worker;
pub use worker::{TaskOutcome, Worker, WorkerOptions, WorkerPool};
