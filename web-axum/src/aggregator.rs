use std::{collections::BTreeMap, sync::Arc, time::Duration};

use boxes_minimax::{better_edges, Board, BoardError, Edge};
use boxes_queue::{
    audit::{AuditRecord, AuditSink},
    protocol::{
        board_from_request, InquireBestEdge, InquireResponse, SubmitGameState, SubmitResponse,
    },
    AssessMessageKey, AssessMessageValue, GameUid, MovingInformationMessage, SampleBook,
    SampleOptions, Step, StoreError, TaskPublisher,
};
use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum AssessError {
    #[error("board size {size} is larger than the maximum of {max}")]
    BoardTooLarge { size: u16, max: u8 },
    #[error("invalid board: {0}")]
    InvalidBoard(#[from] BoardError),
    #[error("coordination store failed: {0}")]
    Store(#[from] StoreError),
}

/// Optional properties that can be defined for an [Aggregator]
///
/// The defaults (as implemented by [Default]) are as follows:
/// ```
/// use web_axum::AggregatorOptions;
/// use std::time::Duration;
///
/// let defaults = AggregatorOptions::default();
///
/// assert_eq!(defaults.max_board_size, 10);
/// assert_eq!(defaults.step_ttl, Duration::from_secs(30 * 60));
/// assert_eq!(defaults.sample_ttl, Duration::from_secs(30 * 60));
/// assert_eq!(defaults.resubmit_every, 10);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorOptions {
    /// Larger boards are rejected
    pub max_board_size: u8,
    pub step_ttl: Duration,
    pub sample_ttl: Duration,
    /// Every this many polls for a step, candidates without a sample are published again
    pub resubmit_every: u32,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            max_board_size: 10,
            step_ttl: Duration::from_secs(30 * 60),
            sample_ttl: Duration::from_secs(30 * 60),
            resubmit_every: 10,
        }
    }
}

impl AggregatorOptions {
    /// The [SampleOptions] workers and server must agree on
    pub fn sample_options(&self) -> SampleOptions {
        SampleOptions {
            step_ttl: self.step_ttl,
            sample_ttl: self.sample_ttl,
        }
    }
}

/// Collapse samples to one score per edge, keeping the highest, in ascending edge order
pub fn best_scores(samples: &[AssessMessageValue]) -> BTreeMap<Edge, f64> {
    let mut scores = BTreeMap::new();

    for sample in samples {
        scores
            .entry(sample.edge)
            .and_modify(|score: &mut f64| *score = score.max(sample.score))
            .or_insert(sample.score);
    }

    scores
}

/// The sampled edge with the highest score, the lowest edge winning ties
///
/// `None` until the samples discriminate, that is while there are none or they all share one
/// score.
pub fn best_sampled_edge(scores: &BTreeMap<Edge, f64>) -> Option<Edge> {
    let mut best: Option<(Edge, f64)> = None;
    let mut lowest = f64::INFINITY;

    for (edge, score) in scores {
        lowest = lowest.min(*score);

        if best.map_or(true, |(_, best_score)| *score > best_score) {
            best = Some((*edge, *score));
        }
    }

    best.filter(|(_, best_score)| *best_score > lowest)
        .map(|(edge, _)| edge)
}

/// The server side of the assessment protocol
#[derive(Debug)]
pub struct Aggregator {
    samples: SampleBook,
    publisher: TaskPublisher,
    audit: Arc<dyn AuditSink>,
    options: AggregatorOptions,
}

impl Aggregator {
    pub fn new(
        samples: SampleBook,
        publisher: TaskPublisher,
        audit: Arc<dyn AuditSink>,
        options: AggregatorOptions,
    ) -> Self {
        Self {
            samples,
            publisher,
            audit,
            options,
        }
    }

    pub fn options(&self) -> &AggregatorOptions {
        &self.options
    }

    fn board(&self, board_size: u16, edges: &[Edge]) -> Result<Board, AssessError> {
        if board_size > u16::from(self.options.max_board_size) {
            return Err(AssessError::BoardTooLarge {
                size: board_size,
                max: self.options.max_board_size,
            });
        }

        Ok(board_from_request(board_size, edges)?)
    }

    fn audit(&self, request: &SubmitGameState) {
        let mut records = vec![];

        if request.step_count == 0 {
            records.push(AuditRecord::GameStart {
                game_uid: request.game_uid.clone(),
                timestamp: request.timestamp,
                board_size: request.board_size,
                ai: request.ai(),
            });
        }

        if let Some(edge) = request.move_edge {
            records.push(AuditRecord::Move {
                game_uid: request.game_uid.clone(),
                timestamp: request.timestamp,
                step: request.step_count,
                edge,
                next_turn: request.now_turn,
                scores: request.scores,
            });
        }

        if request.game_over {
            records.push(AuditRecord::GameEnd {
                game_uid: request.game_uid.clone(),
                timestamp: request.timestamp,
                scores: request.scores,
            });
        }

        for record in &records {
            if let Err(error) = self.audit.insert(record) {
                warn!(%error, "Could not write audit record");
            }
        }
    }

    fn publish(
        &self,
        game_uid: &GameUid,
        step: Step,
        board: &Board,
        edges: impl IntoIterator<Item = Edge>,
    ) -> Result<usize, StoreError> {
        let tasks: Vec<MovingInformationMessage> = edges
            .into_iter()
            .map(|edge| MovingInformationMessage::new(game_uid.clone(), step, board.clone(), edge))
            .collect();

        self.publisher.publish(&tasks)
    }

    /// Record a game's new state, and start assessing its candidate moves if a computer player
    /// is to move. Returns how many samples to expect
    #[instrument(
        level = "info",
        skip_all,
        fields(game_uid = %request.game_uid, step = request.step_count)
    )]
    pub fn submit(&self, request: &SubmitGameState) -> Result<SubmitResponse, AssessError> {
        let board = self.board(request.board_size, &request.edges)?;

        self.audit(request);
        self.samples
            .record_step(&request.game_uid, request.step_count)?;

        if request.game_over || !request.ai_to_move() {
            debug!("Nothing to assess");
            return Ok(SubmitResponse {
                total_expected_samples: 0,
            });
        }

        let candidates = better_edges(&board);
        let total_expected_samples =
            self.publish(&request.game_uid, request.step_count, &board, candidates)?;

        info!(total_expected_samples, "Published assessment tasks");

        Ok(SubmitResponse {
            total_expected_samples,
        })
    }

    /// The best edge found so far for a step, falling back to a random candidate while the
    /// samples can't tell the candidates apart
    #[instrument(
        level = "debug",
        skip_all,
        fields(game_uid = %request.game_uid, step = request.step, waiting_time = request.waiting_time)
    )]
    pub fn inquire(&self, request: &InquireBestEdge) -> Result<InquireResponse, AssessError> {
        let board = self.board(request.board_size, &request.edges)?;
        let key = AssessMessageKey {
            game_uid: request.game_uid.clone(),
            step: request.step,
        };

        let scores = best_scores(&self.samples.samples(&key)?);

        if self.is_resubmit_round(request.waiting_time) {
            self.resubmit_missing(&key, &board, &scores)?;
        }

        let best_edge_so_far = best_sampled_edge(&scores)
            .or_else(|| better_edges(&board).choose(&mut rand::thread_rng()).copied());

        Ok(InquireResponse {
            best_edge_so_far,
            sample_count: scores.len(),
        })
    }

    fn is_resubmit_round(&self, waiting_time: u32) -> bool {
        self.options.resubmit_every > 0
            && waiting_time > 0
            && waiting_time % self.options.resubmit_every == 0
    }

    fn resubmit_missing(
        &self,
        key: &AssessMessageKey,
        board: &Board,
        scores: &BTreeMap<Edge, f64>,
    ) -> Result<(), StoreError> {
        if self.samples.current_step(&key.game_uid)? != Some(key.step) {
            return Ok(());
        }

        let missing: Vec<Edge> = better_edges(board)
            .into_iter()
            .filter(|edge| !scores.contains_key(edge))
            .collect();

        if !missing.is_empty() {
            let count = self.publish(&key.game_uid, key.step, board, missing)?;
            info!(count, "Published missing assessment tasks again");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use boxes_minimax::{assess::Assessor, assess::SearchOptions, GameState, Player};
    use boxes_queue::{
        audit::MemoryAudit, keys, CoordinationStore, DistributedLock, LeaseOptions, LockOptions,
        MemoryStore, PublishOptions, PusherOptions, RetryPolicy, SharedStore, WorkerOptions,
        WorkerPool,
    };
    use rand::seq::SliceRandom;

    use super::*;

    struct Harness {
        store: SharedStore,
        audit: Arc<MemoryAudit>,
        samples: SampleBook,
        aggregator: Aggregator,
    }

    fn harness(flush_interval: Duration) -> Harness {
        let store = MemoryStore::shared();
        let options = AggregatorOptions::default();
        let samples = SampleBook::new(
            store.clone(),
            DistributedLock::new(store.clone(), LockOptions::default()),
            options.sample_options(),
        );
        let publisher = TaskPublisher::spawn(
            store.clone(),
            2,
            PublishOptions {
                pusher: PusherOptions { flush_interval },
                ..Default::default()
            },
        )
        .unwrap();
        let audit = Arc::new(MemoryAudit::default());

        Harness {
            store,
            audit: audit.clone(),
            samples: samples.clone(),
            aggregator: Aggregator::new(samples, publisher, audit, options),
        }
    }

    fn submit(
        uid: &str,
        game: &GameState,
        ai: [bool; 2],
        move_edge: Option<Edge>,
    ) -> SubmitGameState {
        SubmitGameState::from_game(GameUid::new(uid), game, ai, move_edge)
    }

    fn sample(edge: Edge, score: f64) -> AssessMessageValue {
        AssessMessageValue { edge, score }
    }

    #[test]
    fn test_best_sampled_edge_is_order_independent() {
        let mut samples = vec![
            sample(Edge::vertical(0, 0), 0.5),
            sample(Edge::vertical(1, 0), 1.5),
            sample(Edge::horizontal(0, 0), 1.5),
            sample(Edge::vertical(0, 0), 2.0),
            sample(Edge::horizontal(1, 1), -1.0),
        ];
        let expected = best_sampled_edge(&best_scores(&samples));
        assert_eq!(expected, Some(Edge::vertical(0, 0)));

        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            samples.shuffle(&mut rng);
            assert_eq!(best_sampled_edge(&best_scores(&samples)), expected);
        }
    }

    #[test]
    fn test_ties_go_to_the_lowest_edge() {
        let samples = [
            sample(Edge::vertical(1, 0), 1.0),
            sample(Edge::horizontal(0, 0), 1.0),
            sample(Edge::horizontal(1, 1), 0.0),
        ];

        assert!(Edge::horizontal(0, 0) < Edge::vertical(1, 0));
        assert_eq!(
            best_sampled_edge(&best_scores(&samples)),
            Some(Edge::horizontal(0, 0))
        );
    }

    #[test]
    fn test_no_discrimination_means_no_sampled_edge() {
        assert_eq!(best_sampled_edge(&best_scores(&[])), None);
        assert_eq!(
            best_sampled_edge(&best_scores(&[
                sample(Edge::vertical(0, 0), 1.0),
                sample(Edge::vertical(1, 0), 1.0),
            ])),
            None
        );
    }

    #[test]
    fn test_submit_publishes_one_task_per_candidate() {
        let harness = harness(Duration::from_secs(60));
        let game = GameState::new(2).unwrap();

        let response = harness
            .aggregator
            .submit(&submit("g", &game, [true, false], None))
            .unwrap();

        assert_eq!(response.total_expected_samples, better_edges(game.board()).len());
        assert!(response.total_expected_samples > 0);
        assert_eq!(
            harness.samples.current_step(&GameUid::new("g")).unwrap(),
            Some(0)
        );
        assert!(matches!(
            harness.audit.records().as_slice(),
            [AuditRecord::GameStart { .. }]
        ));
    }

    #[test]
    fn test_submit_skips_human_turns_and_finished_games() {
        let harness = harness(Duration::from_secs(60));
        let mut game = GameState::new(1).unwrap();

        let human = harness
            .aggregator
            .submit(&submit("g", &game, [false, true], None))
            .unwrap();
        assert_eq!(human.total_expected_samples, 0);

        let mut last = None;
        while !game.is_over() {
            let edge = better_edges(game.board())[0];
            game.play(edge).unwrap();
            last = Some(edge);
        }

        let over = harness
            .aggregator
            .submit(&submit("g", &game, [true, true], last))
            .unwrap();
        assert_eq!(over.total_expected_samples, 0);

        let records = harness.audit.records();
        assert!(matches!(records.last(), Some(AuditRecord::GameEnd { .. })));
        assert!(matches!(
            &records[records.len() - 2],
            AuditRecord::Move { step: 4, .. }
        ));
    }

    #[test]
    fn test_oversized_boards_are_rejected() {
        let harness = harness(Duration::from_secs(60));
        let mut request = submit("g", &GameState::new(2).unwrap(), [true, true], None);
        request.board_size = 11;

        assert!(matches!(
            harness.aggregator.submit(&request),
            Err(AssessError::BoardTooLarge { size: 11, max: 10 })
        ));

        let inquiry = InquireBestEdge {
            board_size: 300,
            ..InquireBestEdge::for_board(GameUid::new("g"), &Board::new(2).unwrap(), 0)
        };
        assert!(matches!(
            harness.aggregator.inquire(&inquiry),
            Err(AssessError::BoardTooLarge { .. })
        ));
    }

    #[test]
    fn test_all_equal_samples_fall_back_to_a_candidate() {
        let harness = harness(Duration::from_secs(60));
        let board = Board::from_edges(2, [Edge::horizontal(0, 0), Edge::vertical(0, 0)]).unwrap();
        let key = AssessMessageKey {
            game_uid: GameUid::new("g"),
            step: 2,
        };
        let candidates = better_edges(&board);

        for edge in &candidates {
            harness.samples.record(&key, sample(*edge, 0.0)).unwrap();
        }

        for _ in 0..10 {
            let response = harness
                .aggregator
                .inquire(&InquireBestEdge::for_board(key.game_uid.clone(), &board, 1))
                .unwrap();

            assert_eq!(response.sample_count, candidates.len());
            assert!(candidates.contains(&response.best_edge_so_far.unwrap()));
        }
    }

    #[test]
    fn test_missing_candidates_are_published_again() {
        let harness = harness(Duration::from_secs(60));
        let board = Board::new(2).unwrap();
        let game_uid = GameUid::new("g");
        let key = AssessMessageKey {
            game_uid: game_uid.clone(),
            step: 0,
        };
        let candidates = better_edges(&board);
        harness.samples.record_step(&game_uid, 0).unwrap();
        harness.samples.record(&key, sample(candidates[0], 1.0)).unwrap();

        let inquire = |waiting_time| {
            harness
                .aggregator
                .inquire(&InquireBestEdge::for_board(game_uid.clone(), &board, waiting_time))
                .unwrap()
        };

        inquire(3);
        assert_eq!(harness.aggregator.publisher.pending(), 0);

        inquire(10);
        assert_eq!(harness.aggregator.publisher.pending(), candidates.len() - 1);

        let backlog: usize = (0..2)
            .map(|i| harness.store.llen(&keys::partition_tasks(i)).unwrap())
            .sum();
        assert_eq!(backlog, 0, "nothing flushed yet");
    }

    #[test]
    fn test_samples_arrive_from_workers() {
        let harness = harness(Duration::from_millis(10));
        let worker_options = WorkerOptions {
            lease: LeaseOptions {
                partitions: 2,
                scan_interval: Duration::from_millis(10),
                ..Default::default()
            },
            retry: RetryPolicy::default(),
        };
        let assessor = Arc::new(Assessor::new(SearchOptions {
            budget: 1_000,
            ..Default::default()
        }));
        let workers = WorkerPool::spawn(
            2,
            harness.store.clone(),
            worker_options,
            harness.samples.clone(),
            assessor,
        )
        .unwrap();

        let game = GameState::new(2).unwrap();
        assert_eq!(game.turn(), Player::One);
        let total = harness
            .aggregator
            .submit(&submit("e2e", &game, [true, false], None))
            .unwrap()
            .total_expected_samples;
        assert!(total > 0);

        let mut last_count = 0;
        let mut waiting_time = 0;
        loop {
            let response = harness
                .aggregator
                .inquire(&InquireBestEdge::for_board(
                    GameUid::new("e2e"),
                    game.board(),
                    waiting_time,
                ))
                .unwrap();

            assert!(response.sample_count >= last_count);
            assert!(response.best_edge_so_far.is_some());
            last_count = response.sample_count;

            if last_count == total {
                break;
            }

            assert!(waiting_time < 2_000, "samples stopped arriving");
            waiting_time += 1;
            thread::sleep(Duration::from_millis(10));
        }

        workers.shutdown();
    }
}
