//! Request and response bodies of the assessment server's JSON API.
//!
//! ```
//! use boxes_queue::protocol::InquireBestEdge;
//!
//! let body = r#"{"gameUid":"g","step":0,"boardSize":2,"edges":[],"stepCount":0,"waitingTime":3}"#;
//! let inquiry: InquireBestEdge = serde_json::from_str(body).unwrap();
//!
//! assert_eq!(inquiry.waiting_time, 3);
//! ```

use boxes_minimax::{Board, BoardError, Edge, GameState, Player};
use serde::{Deserialize, Serialize};

use crate::messages::{now_millis, GameUid, Step};

/// Reports a game's current state, after every move and at game end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitGameState {
    pub game_uid: GameUid,
    pub timestamp: u64,
    pub board_size: u16,
    /// Edges claimed so far, which is also the step the game is at
    pub step_count: Step,
    pub edges: Vec<Edge>,
    #[serde(rename = "AI1")]
    pub ai1: bool,
    #[serde(rename = "AI2")]
    pub ai2: bool,
    pub now_turn: Player,
    pub scores: [u32; 2],
    pub game_over: bool,
    /// The edge that produced this state, absent at the start of a game
    #[serde(default)]
    pub move_edge: Option<Edge>,
}

impl SubmitGameState {
    pub fn from_game(
        game_uid: GameUid,
        game: &GameState,
        ai: [bool; 2],
        move_edge: Option<Edge>,
    ) -> Self {
        let board = game.board();

        Self {
            game_uid,
            timestamp: now_millis(),
            board_size: board.size().into(),
            step_count: board.step() as Step,
            edges: board.edges().iter().copied().collect(),
            ai1: ai[0],
            ai2: ai[1],
            now_turn: game.turn(),
            scores: game.scores(),
            game_over: game.is_over(),
            move_edge,
        }
    }

    pub fn ai(&self) -> [bool; 2] {
        [self.ai1, self.ai2]
    }

    /// Whether the player to move is computer controlled
    pub fn ai_to_move(&self) -> bool {
        self.ai()[self.now_turn.index()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    /// How many samples the server will try to collect for this step
    pub total_expected_samples: usize,
}

/// Asks for the best edge found so far for one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InquireBestEdge {
    pub game_uid: GameUid,
    pub step: Step,
    pub board_size: u16,
    pub edges: Vec<Edge>,
    pub step_count: Step,
    /// How many times the client has asked about this step before
    pub waiting_time: u32,
}

impl InquireBestEdge {
    pub fn for_board(game_uid: GameUid, board: &Board, waiting_time: u32) -> Self {
        let step = board.step() as Step;

        Self {
            game_uid,
            step,
            board_size: board.size().into(),
            edges: board.edges().iter().copied().collect(),
            step_count: step,
            waiting_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InquireResponse {
    pub best_edge_so_far: Option<Edge>,
    /// Distinct edges sampled so far for this step
    pub sample_count: usize,
}

/// Rebuild the board described by a request
pub fn board_from_request(board_size: u16, edges: &[Edge]) -> Result<Board, BoardError> {
    let size = u8::try_from(board_size).map_err(|_| BoardError::InvalidSize(u8::MAX))?;

    Board::from_edges(size, edges.iter().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_wire_names() {
        let mut game = GameState::new(2).unwrap();
        game.play(Edge::vertical(0, 0)).unwrap();

        let submit =
            SubmitGameState::from_game(GameUid::new("g"), &game, [false, true], Some(Edge::vertical(0, 0)));
        let value = serde_json::to_value(&submit).unwrap();

        assert_eq!(value["gameUid"], "g");
        assert_eq!(value["stepCount"], 1);
        assert_eq!(value["AI1"], false);
        assert_eq!(value["AI2"], true);
        assert_eq!(value["nowTurn"], "two");
        assert_eq!(value["gameOver"], false);
        assert!(submit.ai_to_move());
    }

    #[test]
    fn test_move_edge_is_optional() {
        let body = r#"{
            "gameUid": "g", "timestamp": 0, "boardSize": 2, "stepCount": 0, "edges": [],
            "AI1": true, "AI2": false, "nowTurn": "one", "scores": [0, 0], "gameOver": false
        }"#;

        let submit: SubmitGameState = serde_json::from_str(body).unwrap();

        assert_eq!(submit.move_edge, None);
        assert!(submit.ai_to_move());
    }

    #[test]
    fn test_board_from_request() {
        let board = board_from_request(2, &[Edge::vertical(0, 0)]).unwrap();
        assert_eq!(board.step(), 1);

        assert!(board_from_request(300, &[]).is_err());
        assert!(board_from_request(1, &[Edge::vertical(5, 5)]).is_err());
    }
}
