use std::time::Duration;

use boxes_minimax::{
    assess::{Assessor, SearchOptions},
    better_edges, Edge, GameState, Player,
};
use boxes_queue::{protocol::SubmitGameState, GameUid};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use itertools::Itertools;
use poller::{AssessmentService, HttpService, Poller, PollerOptions, Progress, Suggestion};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Asks an assessment server for the best move in a dots and boxes game
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the assessment server
    #[clap(long, env = "BOXES_SERVER", default_value = "http://127.0.0.1:3000")]
    server: String,

    /// Milliseconds between polls
    #[clap(
        long,
        default_value_t = 1_000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    interval_ms: u64,

    /// Seconds to wait for samples before falling back to a local pick
    #[clap(long, default_value_t = 30 * 60)]
    deadline_secs: u64,

    /// Log as JSON
    #[clap(long, env = "JSON_LOGS")]
    log_json: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct Suggest {
    /// Boxes per side
    #[clap(short, long, value_parser)]
    size: u8,

    /// An edge already claimed, as `x1,y1-x2,y2`, in the order they were played
    #[clap(short, long = "edge", value_parser)]
    edges: Vec<Edge>,

    /// Rank the candidates with a local search instead of asking the server
    #[clap(long)]
    local: bool,

    /// Node budget of each local assessment
    #[clap(long, default_value_t = 20_000)]
    budget: u64,
}

#[derive(clap::Args, Debug)]
struct SelfPlay {
    /// Boxes per side
    #[clap(short, long, value_parser, default_value_t = 3)]
    size: u8,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Suggest the next edge for a position
    Suggest(Suggest),
    /// Play a whole game with both sides asking the server for moves
    SelfPlay(SelfPlay),
}

fn install_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .flatten_event(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

/// Resolves on ctrl-c, or never if we can't listen for it
async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn report(progress: &Progress) {
    info!(
        samples = progress.samples,
        expected = progress.expected,
        best = ?progress.best_edge_so_far,
        "Waiting for samples"
    );
}

fn replay(size: u8, edges: &[Edge]) -> Result<GameState> {
    let mut game = GameState::new(size)?;

    for edge in edges {
        game.play(*edge)?;
    }

    Ok(game)
}

fn print_suggestion(suggestion: &Suggestion) {
    println!(
        "{} ({:?}, {}/{} samples)",
        suggestion.edge, suggestion.source, suggestion.samples, suggestion.expected
    );
}

async fn suggest(poller: &Poller<HttpService>, args: Suggest) -> Result<()> {
    let game = replay(args.size, &args.edges)?;
    println!("{}", game.board());

    if game.is_over() {
        return Err(eyre!("the board is full"));
    }

    if args.local {
        let assessor = Assessor::new(SearchOptions {
            budget: args.budget,
            ..Default::default()
        });
        let board = game.board();

        for (edge, score) in assessor.assess_candidates(board, &better_edges(board)) {
            println!("{edge}\t{score:.3}");
        }

        return Ok(());
    }

    let suggestion = poller
        .best_move(
            &GameUid::random(),
            &game,
            [true, true],
            args.edges.last().copied(),
            ctrl_c(),
            report,
        )
        .await
        .ok_or_else(|| eyre!("no free edge left"))?;

    print_suggestion(&suggestion);

    Ok(())
}

async fn self_play(poller: &Poller<HttpService>, args: SelfPlay) -> Result<()> {
    let game_uid = GameUid::random();
    let mut game = GameState::new(args.size)?;
    let mut last = None;

    info!(%game_uid, size = args.size, "Starting self-play");

    while !game.is_over() {
        let mover = game.turn();
        let Some(suggestion) = poller
            .best_move(&game_uid, &game, [true, true], last, ctrl_c(), report)
            .await
        else {
            break;
        };

        let outcome = game.play(suggestion.edge)?;
        last = Some(outcome.edge);

        print!("{mover:?} plays ");
        print_suggestion(&suggestion);
        println!("{}", game.board());
    }

    let last_state = SubmitGameState::from_game(game_uid, &game, [true, true], last);
    poller.service().submit(&last_state).await?;

    let [one, two] = game.scores();
    let result = match game.winner() {
        Some(Player::One) => "player one wins",
        Some(Player::Two) => "player two wins",
        None => "a tie",
    };
    println!(
        "Final score {} ({result}), moves: {}",
        [one, two].iter().join(" - "),
        game.step()
    );

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    install_tracing(args.log_json);

    let poller = Poller::new(
        HttpService::new(args.server),
        PollerOptions {
            interval: Duration::from_millis(args.interval_ms),
            deadline: Duration::from_secs(args.deadline_secs),
        },
    );

    match args.command {
        Commands::Suggest(s) => suggest(&poller, s).await?,
        Commands::SelfPlay(s) => self_play(&poller, s).await?,
    }

    Ok(())
}
