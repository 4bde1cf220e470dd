use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use boxes_minimax::{Board, Edge};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// Index of a game step: the number of edges claimed before the move being searched for
pub type Step = u32;

/// Opaque identifier of one game
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameUid(String);

impl GameUid {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    /// A fresh 128-bit identifier in hex
    pub fn random() -> Self {
        Self(format!("{:032x}", rand::thread_rng().gen::<u128>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one game step, which is what samples are collected for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessMessageKey {
    pub game_uid: GameUid,
    pub step: Step,
}

/// One assessed candidate: the edge and its score from the mover's point of view
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssessMessageValue {
    pub edge: Edge,
    pub score: f64,
}

impl AssessMessageValue {
    pub fn encode(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// A task asking a worker to assess `edge` on `board`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovingInformationMessage {
    /// When the task was created, in milliseconds since the epoch
    pub timestamp: u64,
    pub game_uid: GameUid,
    pub step: Step,
    pub board: Board,
    pub edge: Edge,
}

impl MovingInformationMessage {
    pub fn new(game_uid: GameUid, step: Step, board: Board, edge: Edge) -> Self {
        Self {
            timestamp: now_millis(),
            game_uid,
            step,
            board,
            edge,
        }
    }

    pub fn key(&self) -> AssessMessageKey {
        AssessMessageKey {
            game_uid: self.game_uid.clone(),
            step: self.step,
        }
    }

    pub fn encode(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Milliseconds since the epoch, or zero if the clock is before it
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
