use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    fmt::Debug,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),
    #[error("key {key} holds a different kind of value")]
    WrongType { key: String },
    #[error("could not encode or decode a stored value")]
    Codec(#[from] serde_json::Error),
}

/// The shared key-value store every worker and server coordinates through
///
/// Each method is a single atomic operation on one key. Anything that needs several operations
/// on the same key to appear atomic wraps them in a [DistributedLock](crate::DistributedLock).
pub trait CoordinationStore: Send + Sync + Debug {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Set `key` to `value`, expiring after `ttl`
    fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Set `key` to `value` only if it is absent. Returns whether we wrote it
    fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// Delete `key` only while it still holds `value`
    fn del_if_eq(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    /// Reset the expiry of an existing key. Returns false when the key is absent
    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Reset the expiry of `key` only while it still holds `value`
    fn expire_if_eq(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Time left before `key` expires, `None` when it is absent or never expires
    fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Push each value onto the head of the list in order. Returns the new length
    fn lpush(&self, key: &str, values: &[String]) -> Result<usize, StoreError>;

    /// Pop from the tail of the list, so `lpush` + `rpop` is FIFO
    fn rpop(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn llen(&self, key: &str) -> Result<usize, StoreError>;

    /// Add members to a set. Returns how many were not already present
    fn sadd(&self, key: &str, members: &[String]) -> Result<usize, StoreError>;

    /// All members of a set in ascending order
    fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;
}

pub type SharedStore = Arc<dyn CoordinationStore>;

#[derive(Debug)]
enum Value {
    Text(String),
    List(VecDeque<String>),
    Set(BTreeSet<String>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// The keyspace plus an index of pending expiries, oldest first
///
/// The index may hold stale deadlines for keys whose expiry was since reset or removed; those are
/// skipped when they come due.
#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
    expiries: BTreeSet<(Instant, String)>,
}

impl Keyspace {
    /// Drop every key whose deadline has passed
    fn purge(&mut self, now: Instant) {
        while let Some((at, _)) = self.expiries.first() {
            if *at > now {
                break;
            }

            let Some((_, key)) = self.expiries.pop_first() else {
                break;
            };

            if self.entries.get(&key).map_or(false, |entry| entry.is_expired(now)) {
                self.entries.remove(&key);
            }
        }
    }

    fn insert(&mut self, key: &str, value: Value, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);

        if let Some(at) = expires_at {
            self.expiries.insert((at, key.to_owned()));
        }

        self.entries.insert(key.to_owned(), Entry { value, expires_at });
    }

    fn set_expiry(&mut self, key: &str, ttl: Duration) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };

        let at = Instant::now() + ttl;
        entry.expires_at = Some(at);
        self.expiries.insert((at, key.to_owned()));

        true
    }

    fn text(&self, key: &str) -> Result<Option<&str>, StoreError> {
        match self.entries.get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Text(text)) => Ok(Some(text)),
            Some(_) => Err(wrong_type(key)),
        }
    }
}

/// A [CoordinationStore] kept in process memory
///
/// Every operation first drops the keys whose expiry has passed, so expired keys never pile up.
#[derive(Debug, Default)]
pub struct MemoryStore {
    keyspace: Mutex<Keyspace>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStore {
        Arc::new(Self::new())
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.with_live(|keyspace| keyspace.entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_live<R>(&self, f: impl FnOnce(&mut Keyspace) -> R) -> R {
        let mut keyspace = self.keyspace.lock();
        keyspace.purge(Instant::now());

        f(&mut keyspace)
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_owned(),
    }
}

impl CoordinationStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_live(|keyspace| Ok(keyspace.text(key)?.map(str::to_owned)))
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.with_live(|keyspace| Ok(keyspace.entries.contains_key(key)))
    }

    fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.with_live(|keyspace| {
            keyspace.insert(key, Value::Text(value.to_owned()), Some(ttl));
            Ok(())
        })
    }

    fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.with_live(|keyspace| {
            if keyspace.entries.contains_key(key) {
                return Ok(false);
            }

            keyspace.insert(key, Value::Text(value.to_owned()), Some(ttl));
            Ok(true)
        })
    }

    fn del(&self, key: &str) -> Result<bool, StoreError> {
        self.with_live(|keyspace| Ok(keyspace.entries.remove(key).is_some()))
    }

    fn del_if_eq(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        self.with_live(|keyspace| {
            if keyspace.text(key).ok().flatten() != Some(value) {
                return Ok(false);
            }

            keyspace.entries.remove(key);
            Ok(true)
        })
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.with_live(|keyspace| Ok(keyspace.set_expiry(key, ttl)))
    }

    fn expire_if_eq(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.with_live(|keyspace| {
            if keyspace.text(key).ok().flatten() != Some(value) {
                return Ok(false);
            }

            Ok(keyspace.set_expiry(key, ttl))
        })
    }

    fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.with_live(|keyspace| {
            Ok(keyspace
                .entries
                .get(key)
                .and_then(|entry| entry.expires_at)
                .map(|at| at.saturating_duration_since(Instant::now())))
        })
    }

    fn lpush(&self, key: &str, values: &[String]) -> Result<usize, StoreError> {
        self.with_live(|keyspace| {
            if !keyspace.entries.contains_key(key) {
                keyspace.insert(key, Value::List(VecDeque::new()), None);
            }

            match keyspace.entries.get_mut(key).map(|e| &mut e.value) {
                Some(Value::List(list)) => {
                    for value in values {
                        list.push_front(value.clone());
                    }
                    Ok(list.len())
                }
                _ => Err(wrong_type(key)),
            }
        })
    }

    fn rpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_live(|keyspace| {
            let (popped, emptied) = match keyspace.entries.get_mut(key).map(|e| &mut e.value) {
                None => return Ok(None),
                Some(Value::List(list)) => (list.pop_back(), list.is_empty()),
                Some(_) => return Err(wrong_type(key)),
            };

            if emptied {
                keyspace.entries.remove(key);
            }

            Ok(popped)
        })
    }

    fn llen(&self, key: &str) -> Result<usize, StoreError> {
        self.with_live(|keyspace| match keyspace.entries.get(key).map(|e| &e.value) {
            None => Ok(0),
            Some(Value::List(list)) => Ok(list.len()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    fn sadd(&self, key: &str, members: &[String]) -> Result<usize, StoreError> {
        self.with_live(|keyspace| {
            if !keyspace.entries.contains_key(key) {
                keyspace.insert(key, Value::Set(BTreeSet::new()), None);
            }

            match keyspace.entries.get_mut(key).map(|e| &mut e.value) {
                Some(Value::Set(set)) => Ok(members
                    .iter()
                    .filter(|member| set.insert((*member).clone()))
                    .count()),
                _ => Err(wrong_type(key)),
            }
        })
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.with_live(|keyspace| match keyspace.entries.get(key).map(|e| &e.value) {
            None => Ok(vec![]),
            Some(Value::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        })
    }
}
