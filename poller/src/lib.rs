//! Client side of the assessment protocol: submit a game state, then poll for the best edge until
//! every expected sample is in, the deadline passes or the caller cancels.

use std::{future::Future, time::Duration};

use boxes_minimax::{better_edges, Board, Edge, GameState};
use boxes_queue::{
    protocol::{InquireBestEdge, InquireResponse, SubmitGameState, SubmitResponse},
    GameUid,
};
use rand::seq::SliceRandom;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {status}: {body}")]
    Status { status: u16, body: String },
}

/// The two calls a client makes against the assessment server
#[allow(async_fn_in_trait)]
pub trait AssessmentService {
    async fn submit(&self, request: &SubmitGameState) -> Result<SubmitResponse, ServiceError>;

    async fn inquire(&self, request: &InquireBestEdge) -> Result<InquireResponse, ServiceError>;
}

/// [AssessmentService] over the server's JSON API
#[derive(Debug, Clone)]
pub struct HttpService {
    client: reqwest::Client,
    base: String,
}

impl HttpService {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_owned(),
        }
    }

    async fn post<Req, Res>(&self, path: &str, body: &Req) -> Result<Res, ServiceError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}/{path}", self.base))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.json().await?)
    }
}

impl AssessmentService for HttpService {
    async fn submit(&self, request: &SubmitGameState) -> Result<SubmitResponse, ServiceError> {
        self.post("submit", request).await
    }

    async fn inquire(&self, request: &InquireBestEdge) -> Result<InquireResponse, ServiceError> {
        self.post("inquire", request).await
    }
}

/// ```
/// use poller::PollerOptions;
/// use std::time::Duration;
///
/// let defaults = PollerOptions::default();
///
/// assert_eq!(defaults.interval, Duration::from_secs(1));
/// assert_eq!(defaults.deadline, Duration::from_secs(30 * 60));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerOptions {
    /// Time between inquiries
    pub interval: Duration,
    /// Give up waiting for samples after this long
    pub deadline: Duration,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            deadline: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionSource {
    /// The server's answer
    Server,
    /// Picked locally from the candidate filter
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Suggestion {
    pub edge: Edge,
    pub source: SuggestionSource,
    /// Distinct edges the server had sampled when we stopped
    pub samples: usize,
    pub expected: usize,
}

/// Reported after every answered inquiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub waiting_time: u32,
    pub samples: usize,
    pub expected: usize,
    pub best_edge_so_far: Option<Edge>,
}

/// A random candidate from the local filter, `None` only on a full board
pub fn fallback_edge(board: &Board) -> Option<Edge> {
    better_edges(board).choose(&mut rand::thread_rng()).copied()
}

#[derive(Debug)]
pub struct Poller<S> {
    service: S,
    options: PollerOptions,
}

impl<S: AssessmentService> Poller<S> {
    /// Intervals shorter than a millisecond are raised to one
    pub fn new(service: S, mut options: PollerOptions) -> Self {
        options.interval = options.interval.max(Duration::from_millis(1));

        Self { service, options }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Submit `game` and wait for the server to settle on the best edge for the player to move
    ///
    /// Never fails: errors from the server, the deadline and `cancel` all end in whatever the
    /// server last suggested, or a local fallback. Returns `None` only when the board is full.
    #[instrument(skip_all, fields(game_uid = %game_uid, step = game.step()))]
    pub async fn best_move(
        &self,
        game_uid: &GameUid,
        game: &GameState,
        ai: [bool; 2],
        move_edge: Option<Edge>,
        cancel: impl Future<Output = ()>,
        mut progress: impl FnMut(&Progress),
    ) -> Option<Suggestion> {
        let board = game.board();
        let submit = SubmitGameState::from_game(game_uid.clone(), game, ai, move_edge);

        let expected = match self.service.submit(&submit).await {
            Ok(response) => response.total_expected_samples,
            Err(error) => {
                warn!(%error, "Could not submit the game state");
                0
            }
        };

        let mut latest: Option<InquireResponse> = None;

        if expected > 0 {
            tokio::select! {
                _ = self.poll(game_uid, board, expected, &mut latest, &mut progress) => {
                    debug!("Every expected sample is in");
                }
                _ = tokio::time::sleep(self.options.deadline) => {
                    info!("Deadline passed while waiting for samples");
                }
                _ = cancel => {
                    info!("Cancelled while waiting for samples");
                }
            }
        }

        let samples = latest.map_or(0, |response| response.sample_count);
        let served = latest
            .and_then(|response| response.best_edge_so_far)
            .filter(|edge| board.free_edges().contains(edge));

        match served {
            Some(edge) => Some(Suggestion {
                edge,
                source: SuggestionSource::Server,
                samples,
                expected,
            }),
            None => fallback_edge(board).map(|edge| Suggestion {
                edge,
                source: SuggestionSource::Fallback,
                samples,
                expected,
            }),
        }
    }

    async fn poll(
        &self,
        game_uid: &GameUid,
        board: &Board,
        expected: usize,
        latest: &mut Option<InquireResponse>,
        progress: &mut impl FnMut(&Progress),
    ) {
        let mut interval = tokio::time::interval(self.options.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        for waiting_time in 0.. {
            interval.tick().await;

            let inquiry = InquireBestEdge::for_board(game_uid.clone(), board, waiting_time);

            match self.service.inquire(&inquiry).await {
                Ok(response) => {
                    progress(&Progress {
                        waiting_time,
                        samples: response.sample_count,
                        expected,
                        best_edge_so_far: response.best_edge_so_far,
                    });

                    *latest = Some(response);

                    if response.sample_count >= expected {
                        return;
                    }
                }
                Err(error) => warn!(%error, waiting_time, "Inquiry failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        future,
        sync::{
            atomic::{AtomicU32, Ordering},
            Mutex,
        },
    };

    use itertools::Itertools;

    use super::*;

    /// Answers inquiries from a script of sample counts, repeating the last one forever
    #[derive(Debug)]
    struct Scripted {
        expected: Result<usize, ()>,
        counts: Mutex<VecDeque<usize>>,
        best: Option<Edge>,
        inquiries: AtomicU32,
    }

    impl Scripted {
        fn new(expected: usize, counts: &[usize], best: Option<Edge>) -> Self {
            Self {
                expected: Ok(expected),
                counts: Mutex::new(counts.iter().copied().collect()),
                best,
                inquiries: AtomicU32::new(0),
            }
        }
    }

    impl AssessmentService for Scripted {
        async fn submit(&self, request: &SubmitGameState) -> Result<SubmitResponse, ServiceError> {
            assert!(!request.game_over);

            match self.expected {
                Ok(total_expected_samples) => Ok(SubmitResponse {
                    total_expected_samples,
                }),
                Err(()) => Err(ServiceError::Status {
                    status: 503,
                    body: "store down".to_owned(),
                }),
            }
        }

        async fn inquire(&self, request: &InquireBestEdge) -> Result<InquireResponse, ServiceError> {
            let call = self.inquiries.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.waiting_time, call);

            let mut counts = self.counts.lock().unwrap();
            let sample_count = if counts.len() > 1 {
                counts.pop_front().unwrap_or_default()
            } else {
                counts.front().copied().unwrap_or_default()
            };

            Ok(InquireResponse {
                best_edge_so_far: self.best,
                sample_count,
            })
        }
    }

    fn quick() -> PollerOptions {
        PollerOptions {
            interval: Duration::from_millis(100),
            deadline: Duration::from_secs(5),
        }
    }

    fn game() -> GameState {
        GameState::new(2).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_once_every_sample_is_in() {
        let best = Edge::vertical(1, 0);
        let poller = Poller::new(Scripted::new(5, &[0, 1, 1, 3, 5], Some(best)), quick());
        let mut seen = vec![];

        let suggestion = poller
            .best_move(
                &GameUid::new("g"),
                &game(),
                [true, false],
                None,
                future::pending(),
                |progress| seen.push(progress.samples),
            )
            .await
            .unwrap();

        assert_eq!(suggestion.edge, best);
        assert_eq!(suggestion.source, SuggestionSource::Server);
        assert_eq!(suggestion.samples, 5);
        assert_eq!(seen, vec![0, 1, 1, 3, 5]);
        assert!(seen.iter().tuple_windows().all(|(a, b)| a <= b));
        assert_eq!(poller.service().inquiries.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_still_polls() {
        let best = Edge::horizontal(0, 0);
        let poller = Poller::new(
            Scripted::new(1, &[1], Some(best)),
            PollerOptions {
                interval: Duration::ZERO,
                ..quick()
            },
        );

        let suggestion = poller
            .best_move(
                &GameUid::new("g"),
                &game(),
                [true, true],
                None,
                future::pending(),
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(poller.options.interval, Duration::from_millis(1));
        assert_eq!(suggestion.edge, best);
        assert_eq!(suggestion.source, SuggestionSource::Server);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_falls_back_to_a_candidate() {
        let poller = Poller::new(Scripted::new(5, &[2], None), quick());
        let game = game();

        let suggestion = poller
            .best_move(&GameUid::new("g"), &game, [true, false], None, future::pending(), |_| {})
            .await
            .unwrap();

        assert_eq!(suggestion.source, SuggestionSource::Fallback);
        assert_eq!(suggestion.samples, 2);
        assert!(better_edges(game.board()).contains(&suggestion.edge));

        let inquiries = poller.service().inquiries.load(Ordering::SeqCst);
        assert!((40..=51).contains(&inquiries), "{inquiries}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_keeps_the_latest_answer() {
        let best = Edge::horizontal(0, 2);
        let poller = Poller::new(Scripted::new(5, &[1], Some(best)), quick());

        let suggestion = poller
            .best_move(
                &GameUid::new("g"),
                &game(),
                [true, false],
                None,
                tokio::time::sleep(Duration::from_millis(250)),
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(suggestion.edge, best);
        assert_eq!(suggestion.source, SuggestionSource::Server);
        assert_eq!(poller.service().inquiries.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_submit_falls_back_without_polling() {
        let service = Scripted {
            expected: Err(()),
            ..Scripted::new(0, &[0], None)
        };
        let poller = Poller::new(service, quick());

        let suggestion = poller
            .best_move(&GameUid::new("g"), &game(), [true, false], None, future::pending(), |_| {})
            .await
            .unwrap();

        assert_eq!(suggestion.source, SuggestionSource::Fallback);
        assert_eq!(poller.service().inquiries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_answers_off_the_board_are_ignored() {
        let poller = Poller::new(Scripted::new(1, &[1], Some(Edge::vertical(7, 7))), quick());

        let suggestion = poller
            .best_move(&GameUid::new("g"), &game(), [true, false], None, future::pending(), |_| {})
            .await
            .unwrap();

        assert_eq!(suggestion.source, SuggestionSource::Fallback);
    }
}
