#![deny(missing_debug_implementations, missing_docs)]
//! This crate holds the game logic for dots-and-boxes and the search we use to pick moves.
//!
//! - [board] has the persistent [Board] value and the [Dot], [Edge] and [BoxCell] keys it is
//!   built from
//! - [better_edges](mod@better_edges) is a one-ply filter that narrows the legal moves down to a
//!   few good candidates
//! - [assess] runs the budgeted alpha-beta search over a single candidate
//! - [game] tracks a whole game: whose turn it is and who owns which boxes

pub mod assess;
pub mod better_edges;
pub mod board;
pub mod game;

pub use better_edges::better_edges;
pub use board::{Board, BoardError, BoxCell, Dot, Edge, Geometry, Move, Player};
pub use game::{GameState, MoveOutcome};
