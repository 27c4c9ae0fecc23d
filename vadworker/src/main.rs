use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::metrics::WorkerMetrics;
use crate::worker::WorkerContext;

mod config;
mod db;
mod decode;
mod dialogue;
mod metrics;
mod model;
mod vad;
mod worker;

#[derive(Parser)]
#[command(version)]
struct Args {
    /// Set config file path
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let cfg = Config::parse(args.config);
    utils::set_log(format!(
        "tilltalk_vadworker={},sqlx=warn",
        cfg.log.level
    ));
    warn!("set log level : {}", cfg.log.level);
    debug!("config : {:?}", cfg);
    info!(
        poll_interval_sec = cfg.worker.poll_interval_sec,
        batch_size = cfg.worker.batch_size,
        vad_aggressiveness = cfg.vad.aggressiveness,
        vad_frame_ms = cfg.vad.frame_ms,
        silence_gap_sec = cfg.dialogue.silence_gap_sec,
        max_dialogue_sec = cfg.dialogue.max_dialogue_sec,
        stuck_timeout_sec = cfg.worker.stuck_timeout_sec,
        "starting VAD worker"
    );

    let connect_options = PgConnectOptions::from_str(&cfg.database.url)
        .expect("invalid database url")
        .options([("statement_timeout", "30000")]);
    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect_lazy_with(connect_options);

    if !db::wait_for_db(&pool).await {
        error!("could not connect to database after 30 attempts");
        std::process::exit(1);
    }
    info!("database connection established");

    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    let ctx = WorkerContext {
        config: Arc::new(cfg),
        pool,
        metrics: Arc::new(WorkerMetrics::new()),
        cpu_slots: Arc::new(Semaphore::new(cores)),
    };

    let shutdown = CancellationToken::new();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        let str = signal::wait_for_stop_signal().await;
        info!("received {}, initiating graceful shutdown", str);
        signal_token.cancel();
    });

    let recovery = tokio::spawn(worker::recovery_loop(ctx.clone(), shutdown.clone()));
    let metrics = tokio::spawn(worker::metrics_loop(ctx.clone(), shutdown.clone()));

    worker::processing_loop(ctx.clone(), shutdown.clone()).await;
    shutdown.cancel();

    let _ = tokio::join!(recovery, metrics);
    ctx.metrics.log_and_reset();
    info!("worker shutdown complete");
}
