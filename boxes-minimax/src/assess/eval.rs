use std::sync::Arc;

use derivative::Derivative;
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info_span, warn};

use crate::{
    better_edges::better_edges,
    board::{Board, Edge, Move, Player},
};

use super::SearchOptions;

#[derive(Derivative, Clone)]
#[derivative(Debug)]
/// Runs the budgeted alpha-beta search over a [Move]
///
/// It also outputs traces using the [tracing] crate.
pub struct Assessor {
    options: SearchOptions,
    #[derivative(Debug = "ignore")]
    pool: Option<Arc<ThreadPool>>,
}

/// The alpha-beta window handed down to a child
#[derive(Debug, Clone, Copy)]
struct Window {
    alpha: f64,
    beta: f64,
}

impl Window {
    const OPEN: Window = Window {
        alpha: f64::NEG_INFINITY,
        beta: f64::INFINITY,
    };
}

/// How the children of one node get evaluated. Picked once per node from its remaining budget
#[derive(Clone, Copy)]
enum Fanout<'pool> {
    Parallel(&'pool ThreadPool),
    Sequential,
}

impl Assessor {
    /// Construct a new `Assessor` with its own search thread pool
    ///
    /// If the pool can't be started the assessor still works, it just never fans out
    pub fn new(options: SearchOptions) -> Self {
        let pool = ThreadPoolBuilder::new()
            .thread_name(|i| format!("assess-{i}"))
            .build();

        let pool = match pool {
            Ok(pool) => Some(Arc::new(pool)),
            Err(error) => {
                warn!(%error, "Could not start the search thread pool, searching sequentially");
                None
            }
        };

        Self { options, pool }
    }

    /// Construct an `Assessor` that never searches children concurrently
    pub fn sequential(options: SearchOptions) -> Self {
        Self {
            options,
            pool: None,
        }
    }

    #[allow(missing_docs)]
    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    /// Score `mv` from the point of view of the player making it
    ///
    /// Positive means the move works out well for the mover. The player making `mv` is treated as
    /// [Player::One], the maximizing player.
    pub fn assess(&self, mv: Move) -> f64 {
        info_span!(
            "assess",
            edge = %mv.edge,
            step = mv.board.step(),
            budget = self.options.budget,
        )
        .in_scope(|| {
            let score = self.evaluate(
                mv.board,
                mv.edge,
                Player::One,
                1,
                self.options.budget,
                Window::OPEN,
            );

            debug!(score, "finished assessment");

            score
        })
    }

    /// Assess every candidate on `board`, best first
    ///
    /// Ties keep ascending edge order so the result is stable between runs
    pub fn assess_candidates(&self, board: &Board, candidates: &[Edge]) -> Vec<(Edge, f64)> {
        let assess_one = |edge: &Edge| (*edge, self.assess(Move::new(board, *edge)));

        let mut scored: Vec<(Edge, f64)> = match &self.pool {
            Some(pool) => pool.install(|| candidates.par_iter().map(assess_one).collect()),
            None => candidates.iter().map(assess_one).collect(),
        };

        scored.sort_by(|(a_edge, a), (b_edge, b)| b.total_cmp(a).then(a_edge.cmp(b_edge)));

        scored
    }

    fn fanout(&self, remaining: u64) -> Fanout<'_> {
        match &self.pool {
            Some(pool) if self.options.allows_parallel(remaining) => Fanout::Parallel(pool),
            _ => Fanout::Sequential,
        }
    }

    /// `mover` claims `edge` on `board` at `depth`. Returns the value of that move plus the value
    /// of the best line that follows it, from [Player::One]'s point of view
    fn evaluate(
        &self,
        board: &Board,
        edge: Edge,
        mover: Player,
        depth: u32,
        budget: u64,
        window: Window,
    ) -> f64 {
        let move_score = board.score_of(edge);
        let value = self.options.weigh(move_score, mover, depth);

        if budget <= 1 {
            return value;
        }

        let next_board = board.append(edge);
        let candidates = better_edges(&next_board);

        if candidates.is_empty() {
            return value;
        }

        let child_budget = budget / candidates.len() as u64;

        value
            + self.best_reply(
                &next_board,
                &candidates,
                mover.after(move_score),
                depth + 1,
                child_budget,
                window,
                self.fanout(budget),
            )
    }

    /// The best value `player` can reach by claiming one of `candidates`
    ///
    /// Both fan-out modes go through the same combine loop. A parallel fan-out evaluates every
    /// child up front with the window as it was on entry, a sequential one evaluates lazily with
    /// the window narrowed by the siblings before it.
    #[allow(clippy::too_many_arguments)]
    fn best_reply(
        &self,
        board: &Board,
        candidates: &[Edge],
        player: Player,
        depth: u32,
        child_budget: u64,
        mut window: Window,
        fanout: Fanout,
    ) -> f64 {
        let eager: Option<Vec<f64>> = match fanout {
            Fanout::Parallel(pool) => Some(pool.install(|| {
                candidates
                    .par_iter()
                    .map(|edge| self.evaluate(board, *edge, player, depth, child_budget, window))
                    .collect()
            })),
            Fanout::Sequential => None,
        };

        let mut best = match player {
            Player::One => f64::NEG_INFINITY,
            Player::Two => f64::INFINITY,
        };

        for (i, edge) in candidates.iter().enumerate() {
            let value = match &eager {
                Some(values) => values[i],
                None => self.evaluate(board, *edge, player, depth, child_budget, window),
            };

            match player {
                Player::One => {
                    best = best.max(value);
                    window.alpha = window.alpha.max(best);
                }
                Player::Two => {
                    best = best.min(value);
                    window.beta = window.beta.min(best);
                }
            }

            if window.beta - window.alpha < -self.options.prune_slack {
                break;
            }
        }

        best
    }
}
