//! A history of every game the server has seen, one record per event.

use std::{
    collections::VecDeque,
    fmt::Debug,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use boxes_minimax::{Edge, Player};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messages::{GameUid, Step};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditRecord {
    GameStart {
        game_uid: GameUid,
        timestamp: u64,
        board_size: u16,
        /// Which of the two players are computer controlled
        ai: [bool; 2],
    },
    Move {
        game_uid: GameUid,
        timestamp: u64,
        step: Step,
        edge: Edge,
        next_turn: Player,
        scores: [u32; 2],
    },
    GameEnd {
        game_uid: GameUid,
        timestamp: u64,
        scores: [u32; 2],
    },
}

impl AuditRecord {
    pub fn game_uid(&self) -> &GameUid {
        match self {
            AuditRecord::GameStart { game_uid, .. }
            | AuditRecord::Move { game_uid, .. }
            | AuditRecord::GameEnd { game_uid, .. } => game_uid,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("could not write audit record")]
    Io(#[from] io::Error),
    #[error("could not encode audit record")]
    Json(#[from] serde_json::Error),
}

pub trait AuditSink: Send + Sync + Debug {
    fn insert(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Keeps the most recent records in memory, dropping the oldest once `capacity` is reached
#[derive(Debug)]
pub struct MemoryAudit {
    capacity: usize,
    records: Mutex<VecDeque<AuditRecord>>,
}

impl MemoryAudit {
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::new()),
        }
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().iter().cloned().collect()
    }
}

impl Default for MemoryAudit {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl AuditSink for MemoryAudit {
    fn insert(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut records = self.records.lock();

        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record.clone());

        Ok(())
    }
}

/// Appends records as JSON lines to one file per game under a directory
#[derive(Debug)]
pub struct JsonlAudit {
    dir: PathBuf,
    write: Mutex<()>,
}

impl JsonlAudit {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            write: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file holding a game's records. Anything but ASCII letters, digits, `-` and `_` in the
    /// uid becomes `_` so a uid can't point outside the directory
    pub fn path_for(&self, game: &GameUid) -> PathBuf {
        let name: String = game
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        self.dir.join(format!("{name}.jsonl"))
    }
}

impl AuditSink for JsonlAudit {
    fn insert(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _write = self.write.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(record.game_uid()))?;
        file.write_all(&line)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(uid: &str) -> AuditRecord {
        AuditRecord::GameStart {
            game_uid: GameUid::new(uid),
            timestamp: 1,
            board_size: 3,
            ai: [false, true],
        }
    }

    #[test]
    fn test_memory_audit_keeps_the_latest_records() {
        let audit = MemoryAudit::new(2);

        for uid in ["a", "b", "c"] {
            audit.insert(&start(uid)).unwrap();
        }

        assert_eq!(audit.records(), vec![start("b"), start("c")]);
    }

    #[test]
    fn test_record_format() {
        let value = serde_json::to_value(start("g")).unwrap();

        assert_eq!(value["kind"], "game_start");
        assert_eq!(value["game_uid"], "g");
        assert_eq!(value["ai"], serde_json::json!([false, true]));
    }

    #[test]
    fn test_jsonl_appends_per_game() {
        let dir = std::env::temp_dir().join(format!("boxes-audit-{}", GameUid::random()));
        let audit = JsonlAudit::new(&dir).unwrap();
        let moved = AuditRecord::Move {
            game_uid: GameUid::new("g"),
            timestamp: 2,
            step: 0,
            edge: Edge::vertical(0, 0),
            next_turn: Player::Two,
            scores: [0, 0],
        };

        audit.insert(&start("g")).unwrap();
        audit.insert(&moved).unwrap();
        audit.insert(&start("other")).unwrap();

        let lines: Vec<AuditRecord> = fs::read_to_string(audit.path_for(&GameUid::new("g")))
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines, vec![start("g"), moved]);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_uids_stay_inside_the_directory() {
        let dir = std::env::temp_dir().join(format!("boxes-audit-{}", GameUid::random()));
        let audit = JsonlAudit::new(&dir).unwrap();

        let path = audit.path_for(&GameUid::new("../../etc/passwd"));

        assert_eq!(path.parent(), Some(audit.dir()));
        assert_eq!(path.file_name().unwrap(), "______etc_passwd.jsonl");

        fs::remove_dir_all(dir).unwrap();
    }
}
