//! Budgeted minimax with alpha-beta pruning over dots-and-boxes moves.
//!
//! An assessment starts from one candidate [Move](crate::Move) and searches the replies that
//! [better_edges](crate::better_edges()) allows. Every move is worth the boxes it completes,
//! signed by who made it and divided by how deep in the line it happened, so boxes taken sooner
//! count for more. Completing a box keeps the turn, anything else passes it.
//!
//! The search is bounded by a node budget instead of a depth: each node splits its remaining
//! budget evenly between its children. Near the root, where the budget is still large, children
//! are searched concurrently on a [rayon] pool and joined before their scores are combined. Deeper
//! down it falls back to a sequential search so small subtrees don't oversubscribe the cores.
//!
//! ```rust
//! use boxes_minimax::{assess::{Assessor, SearchOptions}, Board, Edge, Move};
//!
//! // Two sides of a single box are claimed, claiming a third hands the box to the opponent
//! let board = Board::from_edges(1, [Edge::horizontal(0, 0), Edge::vertical(0, 0)]).unwrap();
//!
//! let assessor = Assessor::new(SearchOptions::default());
//! let score = assessor.assess(Move::new(&board, Edge::vertical(1, 0)));
//!
//! assert_eq!(score, -0.5);
//! ```

mod options;
pub use options::SearchOptions;

mod eval;
pub use eval::Assessor;
