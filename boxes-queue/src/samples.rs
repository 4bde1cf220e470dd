use std::time::Duration;

use boxes_minimax::Edge;
use tracing::warn;

use crate::{
    keys,
    lock::{DistributedLock, LockError},
    messages::{AssessMessageKey, AssessMessageValue, GameUid, Step},
    store::{SharedStore, StoreError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleOptions {
    /// How long the current step of a game is remembered after it was last submitted
    pub step_ttl: Duration,
    /// How long samples and assessed markers outlive their last write
    pub sample_ttl: Duration,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            step_ttl: Duration::from_secs(30 * 60),
            sample_ttl: Duration::from_secs(30 * 60),
        }
    }
}

/// Where workers record what they assessed, and where the server reads it back
#[derive(Debug, Clone)]
pub struct SampleBook {
    store: SharedStore,
    lock: DistributedLock,
    options: SampleOptions,
}

impl SampleBook {
    pub fn new(store: SharedStore, lock: DistributedLock, options: SampleOptions) -> Self {
        Self {
            store,
            lock,
            options,
        }
    }

    /// Remember `step` as the one the game is waiting on. Tasks for any other step are stale
    pub fn record_step(&self, game: &GameUid, step: Step) -> Result<(), StoreError> {
        self.store
            .set_ex(&keys::game_step(game), &step.to_string(), self.options.step_ttl)
    }

    pub fn current_step(&self, game: &GameUid) -> Result<Option<Step>, StoreError> {
        let Some(raw) = self.store.get(&keys::game_step(game))? else {
            return Ok(None);
        };

        match raw.parse() {
            Ok(step) => Ok(Some(step)),
            Err(error) => {
                warn!(game = %game, raw = %raw, %error, "Ignoring an unreadable step");
                Ok(None)
            }
        }
    }

    pub fn is_assessed(&self, key: &AssessMessageKey, edge: Edge) -> Result<bool, StoreError> {
        self.store.exists(&keys::assessed(key, edge))
    }

    /// Add a sample to its step and mark the edge as assessed
    pub fn record(&self, key: &AssessMessageKey, value: AssessMessageValue) -> Result<(), LockError> {
        let samples_key = keys::samples(key);
        let encoded = value.encode()?;

        self.lock.with_lock(&samples_key, || {
            self.store.sadd(&samples_key, &[encoded])?;
            self.store.expire(&samples_key, self.options.sample_ttl)?;
            self.store
                .set_ex(&keys::assessed(key, value.edge), "1", self.options.sample_ttl)?;

            Ok(())
        })
    }

    /// Every readable sample recorded for a step
    pub fn samples(&self, key: &AssessMessageKey) -> Result<Vec<AssessMessageValue>, StoreError> {
        let members = self.store.smembers(&keys::samples(key))?;

        Ok(members
            .iter()
            .filter_map(|raw| match AssessMessageValue::decode(raw) {
                Ok(value) => Some(value),
                Err(error) => {
                    warn!(raw = %raw, %error, "Skipping an unreadable sample");
                    None
                }
            })
            .collect())
    }
}
