//! Names of every key the pipeline keeps in the coordination store

use boxes_minimax::Edge;

use crate::messages::{AssessMessageKey, GameUid};

/// Holds the token of the worker currently leasing partition `index`
pub fn partition_owner(index: usize) -> String {
    format!("partition:{index}:owner")
}

/// The FIFO list of pending tasks for partition `index`
pub fn partition_tasks(index: usize) -> String {
    format!("partition:{index}:tasks")
}

/// The step the server last saw for a game
pub fn game_step(game: &GameUid) -> String {
    format!("game:{game}:step")
}

/// The set of samples collected for one game step
pub fn samples(key: &AssessMessageKey) -> String {
    format!("game:{}:step:{}:samples", key.game_uid, key.step)
}

/// Present once `edge` has been assessed for a game step
pub fn assessed(key: &AssessMessageKey, edge: Edge) -> String {
    format!(
        "game:{}:step:{}:assessed:{}",
        key.game_uid,
        key.step,
        edge.key()
    )
}

pub fn lock(key: &str) -> String {
    format!("lock:{key}")
}
