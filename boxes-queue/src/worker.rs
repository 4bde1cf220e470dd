use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use boxes_minimax::{assess::Assessor, Move};
use tracing::{debug, error, info, info_span, warn};

use crate::{
    lock::LockError,
    messages::{AssessMessageValue, MovingInformationMessage},
    partition::{Lease, LeaseManager, LeaseOptions, Partition},
    retry::RetryPolicy,
    samples::SampleBook,
    store::SharedStore,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerOptions {
    pub lease: LeaseOptions,
    pub retry: RetryPolicy,
}

/// What a worker did with one task
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TaskOutcome {
    Assessed(f64),
    /// The edge already has a sample for this step
    Duplicate,
    /// The game has moved on, or is no longer known
    Stale,
    /// The edge is off the task's board or already claimed on it
    Rejected,
}

/// Drains partitions one lease at a time, assessing each task it pops
#[derive(Debug)]
pub struct Worker {
    id: String,
    store: SharedStore,
    leases: LeaseManager,
    samples: SampleBook,
    assessor: Arc<Assessor>,
    retry: RetryPolicy,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        store: SharedStore,
        options: WorkerOptions,
        samples: SampleBook,
        assessor: Arc<Assessor>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let id = id.into();

        Self {
            leases: LeaseManager::new(store.clone(), options.lease, id.clone()),
            id,
            store,
            samples,
            assessor,
            retry: options.retry,
            shutdown,
        }
    }

    /// Work until shutdown is raised
    pub fn run(mut self) {
        let span = info_span!("worker", id = %self.id);
        let _enter = span.enter();

        info!("Worker started");

        while let Some(lease) = self.leases.acquire_free_partition(&self.shutdown) {
            self.drain(lease);
        }

        info!("Worker stopped");
    }

    fn drain(&self, lease: Lease) {
        let list_key = &lease.partition.list_key;

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match self.leases.renew(&lease) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(partition = lease.partition.index, "Lost the lease");
                    return;
                }
                Err(error) => {
                    warn!(%error, "Could not renew the lease");
                    thread::sleep(self.retry.base_delay);
                    continue;
                }
            }

            let raw = match self.store.rpop(list_key) {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(error) => {
                    warn!(%error, "Could not pop a task");
                    thread::sleep(self.retry.base_delay);
                    continue;
                }
            };

            self.handle(&lease.partition, raw);
        }

        if let Err(error) = self.leases.release(lease) {
            warn!(%error, "Could not release the lease, it will expire");
        }
    }

    fn handle(&self, partition: &Partition, raw: String) {
        let task = match MovingInformationMessage::decode(&raw) {
            Ok(task) => task,
            Err(error) => {
                warn!(%error, "Dropping an unreadable task");
                return;
            }
        };

        match self.process(&task) {
            Ok(outcome) => {
                debug!(game = %task.game_uid, step = task.step, edge = %task.edge, ?outcome, "Handled task")
            }
            Err(error) => {
                warn!(%error, game = %task.game_uid, "Could not record the assessment, requeueing");
                self.requeue(partition, raw);
            }
        }
    }

    /// Assess one task and record the sample, unless it is a duplicate, stale or unplayable
    pub fn process(&self, task: &MovingInformationMessage) -> Result<TaskOutcome, LockError> {
        let key = task.key();

        if !task.edge.is_on_board(task.board.size()) || task.board.contains(task.edge) {
            warn!(
                game = %task.game_uid,
                step = task.step,
                edge = %task.edge,
                size = task.board.size(),
                "Dropping a task whose edge can't be played"
            );
            return Ok(TaskOutcome::Rejected);
        }

        if self.samples.is_assessed(&key, task.edge)? {
            return Ok(TaskOutcome::Duplicate);
        }

        if self.samples.current_step(&task.game_uid)? != Some(task.step) {
            return Ok(TaskOutcome::Stale);
        }

        let score = self.assessor.assess(Move::new(&task.board, task.edge));

        self.samples.record(
            &key,
            AssessMessageValue {
                edge: task.edge,
                score,
            },
        )?;

        Ok(TaskOutcome::Assessed(score))
    }

    fn requeue(&self, partition: &Partition, raw: String) {
        let task = [raw];
        let result = self.retry.run("requeue task", || {
            self.store.lpush(&partition.list_key, &task)
        });

        if let Err(error) = result {
            error!(%error, partition = partition.index, "Gave up requeueing a task");
        }
    }
}

/// A set of [Worker]s on their own threads, sharing one shutdown flag
#[derive(Debug)]
pub struct WorkerPool {
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        count: usize,
        store: SharedStore,
        options: WorkerOptions,
        samples: SampleBook,
        assessor: Arc<Assessor>,
    ) -> io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));

        let handles = (0..count)
            .map(|i| {
                let id = format!("worker-{}-{i}", std::process::id());
                let worker = Worker::new(
                    id.clone(),
                    store.clone(),
                    options,
                    samples.clone(),
                    assessor.clone(),
                    shutdown.clone(),
                );

                thread::Builder::new().name(id).spawn(move || worker.run())
            })
            .collect::<io::Result<Vec<_>>>()?;

        Ok(Self { shutdown, handles })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Ask every worker to stop and wait for them. A worker finishes its current task first
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Relaxed);

        for handle in self.handles {
            if handle.join().is_err() {
                error!("A worker thread panicked");
            }
        }
    }
}
