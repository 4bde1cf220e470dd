use crate::board::Player;

#[derive(Debug, Clone, Copy, PartialEq)]
/// Optional properties that can be defined for an [Assessor](super::Assessor)
///
/// The defaults (as implemented by [Default]) are as follows:
/// ```
/// use boxes_minimax::assess::SearchOptions;
///
/// let defaults: SearchOptions = Default::default();
///
/// assert_eq!(defaults.budget, 20_000);
/// assert_eq!(defaults.parallel_fraction, 0.25);
/// assert!(defaults.depth_discount);
/// assert_eq!(defaults.prune_slack, 1.0);
/// ```
pub struct SearchOptions {
    /// The total number of nodes one assessment may visit
    ///
    /// Each node splits what is left of its budget evenly between its children, and a node with
    /// a budget of one or less is a leaf. This caps the work done rather than the depth reached.
    pub budget: u64,
    /// Children are searched concurrently while a node's remaining budget is above this fraction
    /// of [SearchOptions::budget], and sequentially below it
    pub parallel_fraction: f64,
    /// Divide each move's score by its depth so that boxes taken sooner count for more
    pub depth_discount: bool,
    /// How far alpha may exceed beta before the remaining siblings are pruned
    pub prune_slack: f64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            budget: 20_000,
            parallel_fraction: 0.25,
            depth_discount: true,
            prune_slack: 1.0,
        }
    }
}

impl SearchOptions {
    /// The value of `mover` completing `move_score` boxes at `depth` (the root move is depth 1),
    /// from the point of view of [Player::One]
    pub fn weigh(&self, move_score: u8, mover: Player, depth: u32) -> f64 {
        let signed = f64::from(move_score) * mover.sign();

        if self.depth_discount {
            signed / f64::from(depth.max(1))
        } else {
            signed
        }
    }

    /// Whether a node with `remaining` budget should search its children concurrently
    pub fn allows_parallel(&self, remaining: u64) -> bool {
        remaining as f64 > self.budget as f64 * self.parallel_fraction
    }
}
