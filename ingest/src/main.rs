use std::future::Future;
use std::str::FromStr;

use clap::Parser;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::route::AppState;

mod config;
mod db;
mod error;
mod migration;
mod model;
mod result;
mod route;
mod sweep;

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
        "tilltalk_ingest={},tower_http={},sqlx=warn",
        cfg.log.level, cfg.log.level
    ));
    warn!("set log level : {}", cfg.log.level);
    debug!("config : {:?}", cfg);

    let listener = TcpListener::bind(cfg.http.listen).await.unwrap();
    info!("Server listening on {}", listener.local_addr().unwrap());

    server_up(cfg, listener, shutdown_signal()).await;
    info!("Server shutdown");
}

pub async fn server_up<F>(cfg: Config, listener: TcpListener, signal: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let connect_options = PgConnectOptions::from_str(&cfg.database.url)
        .expect("invalid database url")
        .options([("statement_timeout", "30000")]);
    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect_with(connect_options)
        .await
        .map_err(|e| anyhow::anyhow!(format!("PostgreSQL error : {}", e)))
        .unwrap();

    migration::run(&pool).await.expect("migration failed");

    let app_state = AppState {
        config: cfg.clone(),
        pool,
    };
    let app = route::route(app_state.clone());

    tokio::spawn(sweep::run(app_state));

    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
        .unwrap_or_else(|e| error!("Application error: {e}"));
}

async fn shutdown_signal() {
    let str = signal::wait_for_stop_signal().await;
    debug!("Received signal: {}", str);
}
