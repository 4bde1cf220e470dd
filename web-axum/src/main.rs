use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use boxes_minimax::assess::{Assessor, SearchOptions};
use boxes_queue::{
    audit::{AuditSink, JsonlAudit, MemoryAudit},
    DistributedLock, LeaseOptions, LockOptions, MemoryStore, PublishOptions, SampleBook,
    TaskPublisher, WorkerOptions, WorkerPool,
};
use clap::Parser;
use color_eyre::Result;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use web_axum::{router, Aggregator, AggregatorOptions};

/// Serves best-move assessments for dots and boxes games
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Config {
    /// Address to listen on
    #[clap(long, env = "BOXES_LISTEN", default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Number of task partitions
    #[clap(
        long,
        env = "BOXES_PARTITIONS",
        default_value_t = 8,
        value_parser = clap::value_parser!(u16).range(1..),
    )]
    partitions: u16,

    /// Number of in-process workers draining the partitions
    #[clap(
        long,
        env = "BOXES_WORKERS",
        default_value_t = 4,
        value_parser = clap::value_parser!(u16).range(1..),
    )]
    workers: u16,

    /// Directory for per-game JSONL audit logs. Audit records are kept in memory when unset
    #[clap(long, env = "BOXES_AUDIT_LOG")]
    audit_log: Option<PathBuf>,

    /// How many of the latest audit records to keep when they are kept in memory
    #[clap(
        long,
        env = "BOXES_AUDIT_CAPACITY",
        default_value_t = 10_000,
        value_parser = clap::value_parser!(u64).range(1..),
    )]
    audit_capacity: u64,

    /// Node budget of one move assessment
    #[clap(long, env = "BOXES_SEARCH_BUDGET", default_value_t = 20_000)]
    search_budget: u64,

    /// Log as JSON
    #[clap(long, env = "JSON_LOGS")]
    log_json: bool,
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

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "Could not listen for ctrl-c, running until killed");
        std::future::pending::<()>().await;
    }

    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let config = Config::parse();
    install_tracing(config.log_json);

    let store = MemoryStore::shared();
    let options = AggregatorOptions::default();
    let samples = SampleBook::new(
        store.clone(),
        DistributedLock::new(store.clone(), LockOptions::default()),
        options.sample_options(),
    );

    let assessor = Arc::new(Assessor::new(SearchOptions {
        budget: config.search_budget,
        ..Default::default()
    }));
    let partitions = usize::from(config.partitions);
    let workers = WorkerPool::spawn(
        usize::from(config.workers),
        store.clone(),
        WorkerOptions {
            lease: LeaseOptions {
                partitions,
                ..Default::default()
            },
            ..Default::default()
        },
        samples.clone(),
        assessor,
    )?;

    let publisher = TaskPublisher::spawn(store, partitions, PublishOptions::default())?;
    let audit: Arc<dyn AuditSink> = match &config.audit_log {
        Some(dir) => Arc::new(JsonlAudit::new(dir)?),
        None => Arc::new(MemoryAudit::new(
            usize::try_from(config.audit_capacity).unwrap_or(usize::MAX),
        )),
    };
    let aggregator = Arc::new(Aggregator::new(samples, publisher, audit, options));

    let app = router(aggregator).layer(TraceLayer::new_for_http());

    info!(
        addr = %config.listen,
        workers = workers.len(),
        partitions,
        "Listening"
    );
    axum::Server::try_bind(&config.listen)?
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tokio::task::spawn_blocking(move || workers.shutdown()).await?;

    Ok(())
}
