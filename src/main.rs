mod api;
mod chain;
mod config;
mod directory;
mod error;
mod funding;
mod raffle;
mod retry;
mod scheduler;
mod state;
mod supervisor;
mod types;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::chain::RpcChain;
use crate::config::{Config, TX_POLL_INTERVAL_SECS};
use crate::directory::{IndexerClient, MarketDirectory};
use crate::error::Result;
use crate::funding::SubscriptionFunder;
use crate::raffle::RaffleOrchestrator;
use crate::scheduler::{spawn_funding_loop, spawn_raffle_loop};
use crate::state::FundedSubscriptionStore;
use crate::supervisor::{now_secs, TransactionSupervisor};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Collaborators ---
    let chain = Arc::new(RpcChain::connect(&cfg).await?);
    let directory: Arc<dyn MarketDirectory> = Arc::new(IndexerClient::new(&cfg)?);
    info!(
        signer = %chain.signer_address(),
        indexer = %cfg.subgraph_url,
        "Keeper starting with signer {} against {}",
        chain.signer_address(),
        cfg.subgraph_url,
    );

    // --- Shared state ---
    let latency = Arc::new(LatencyStats::new());
    let health = Arc::new(HealthState::new(now_secs()));
    let supervisor = Arc::new(TransactionSupervisor::new(chain.clone(), latency.clone()));
    let store = Arc::new(FundedSubscriptionStore::load(&cfg.funded_subscriptions_path));

    let raffles = Arc::new(RaffleOrchestrator::new(
        chain.clone(),
        chain.clone(),
        directory.clone(),
        supervisor.clone(),
    ));
    let funder = Arc::new(SubscriptionFunder::new(
        &cfg,
        chain.clone(),
        chain.clone(),
        directory,
        supervisor.clone(),
        store,
    ));

    // --- Timers ---
    info!(
        raffle_every_secs = cfg.raffle_interval.as_secs(),
        funding_every_secs = cfg.funding_interval.as_secs(),
        "Scheduling raffle checks every {}s and funding checks every {}s",
        cfg.raffle_interval.as_secs(),
        cfg.funding_interval.as_secs(),
    );
    let raffle_schedule = spawn_raffle_loop(raffles, health.clone(), cfg.raffle_interval);
    spawn_funding_loop(funder.clone(), health.clone(), cfg.funding_interval);
    tokio::spawn(
        supervisor
            .clone()
            .run_poll_loop(Duration::from_secs(TX_POLL_INTERVAL_SECS)),
    );

    // --- Status API ---
    let app = router(ApiState { health, supervisor, funder, latency });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Status API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    raffle_schedule.shutdown().await;
    info!("Keeper stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
