//! A one-ply filter that shrinks the set of legal moves down to the ones worth searching.
//!
//! The policy, in priority order:
//!
//! 1. If any edge completes two boxes, take exactly those edges
//! 2. Otherwise, if any edge completes one box, take those
//! 3. Otherwise drop every edge that would hand the opponent a box on their next turn. If that
//!    drops everything we are forced to sacrifice, so all the zero scoring edges come back
//!
//! ```rust
//! use boxes_minimax::{better_edges, Board, Edge};
//!
//! // Three sides of the bottom-left box are already claimed
//! let board = Board::from_edges(
//!     2,
//!     [Edge::horizontal(0, 0), Edge::vertical(0, 0), Edge::vertical(1, 0)],
//! )
//! .unwrap();
//!
//! assert_eq!(better_edges(&board), vec![Edge::horizontal(0, 1)]);
//! ```

use crate::board::{Board, Edge};

/// The free edges of a board grouped by how many boxes they complete
///
/// Index `n` holds the edges that complete `n` boxes, each group in ascending key order
pub fn edges_by_score(board: &Board) -> [Vec<Edge>; 3] {
    let mut by_score: [Vec<Edge>; 3] = Default::default();

    for edge in board.free_edges() {
        let score = board.score_of(edge) as usize;
        by_score[score].push(edge);
    }

    by_score
}

/// Whether claiming a zero scoring `edge` leaves a box with three sides claimed, which the
/// opponent could then complete
///
/// Only the boxes next to `edge` change when it is appended, so those are the only ones we look
/// at.
pub fn gives_away_box(board: &Board, edge: Edge) -> bool {
    edge.adjacent_boxes(board.size())
        .any(|cell| board.edges_in_box(cell) + 1 == 3)
}

/// The candidate moves for `board`, see the [module docs](self) for the policy
///
/// Returns an empty set only when the board is full
pub fn better_edges(board: &Board) -> Vec<Edge> {
    let [zero, one, two] = edges_by_score(board);

    if !two.is_empty() {
        return two;
    }

    if !one.is_empty() {
        return one;
    }

    let safe: Vec<Edge> = zero
        .iter()
        .copied()
        .filter(|edge| !gives_away_box(board, *edge))
        .collect();

    if safe.is_empty() {
        zero
    } else {
        safe
    }
}
