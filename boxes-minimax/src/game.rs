//! Tracks one whole game: the board, whose turn it is and how many boxes each player owns.

use serde::{Deserialize, Serialize};

use crate::board::{Board, BoardError, Edge, Player};

/// The state of a game between two players
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    board: Board,
    turn: Player,
    scores: [u32; 2],
}

/// What happened when an edge was played
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveOutcome {
    /// Who claimed the edge
    pub player: Player,
    #[allow(missing_docs)]
    pub edge: Edge,
    /// How many boxes the edge completed
    pub boxes: u8,
    /// Who moves next
    pub next_turn: Player,
}

impl GameState {
    /// A fresh game on an empty board, [Player::One] to move
    pub fn new(size: u8) -> Result<Self, BoardError> {
        Ok(Self {
            board: Board::new(size)?,
            turn: Player::One,
            scores: [0, 0],
        })
    }

    /// Resume a game from a board and the bookkeeping that goes with it
    pub fn resume(board: Board, turn: Player, scores: [u32; 2]) -> Self {
        Self {
            board,
            turn,
            scores,
        }
    }

    #[allow(missing_docs)]
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Whose turn it is
    pub fn turn(&self) -> Player {
        self.turn
    }

    /// Boxes owned by [Player::One] and [Player::Two], in that order
    pub fn scores(&self) -> [u32; 2] {
        self.scores
    }

    /// Number of edges claimed so far
    pub fn step(&self) -> usize {
        self.board.step()
    }

    #[allow(missing_docs)]
    pub fn is_over(&self) -> bool {
        self.board.is_full()
    }

    /// The player with more boxes once the game is over, `None` while it is running or on a tie
    pub fn winner(&self) -> Option<Player> {
        if !self.is_over() {
            return None;
        }

        let [one, two] = self.scores;
        match one.cmp(&two) {
            std::cmp::Ordering::Greater => Some(Player::One),
            std::cmp::Ordering::Less => Some(Player::Two),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// The player to move claims `edge`
    ///
    /// Fails without changing anything if the edge is already claimed or off the board
    pub fn play(&mut self, edge: Edge) -> Result<MoveOutcome, BoardError> {
        let next_board = self.board.claim(edge)?;
        let boxes = self.board.score_of(edge);
        let player = self.turn;

        self.board = next_board;
        self.scores[player.index()] += u32::from(boxes);
        self.turn = player.after(boxes);

        Ok(MoveOutcome {
            player,
            edge,
            boxes,
            next_turn: self.turn,
        })
    }
}
