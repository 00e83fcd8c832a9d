#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;

use crate::{
    agent::{AgentScheduler, AgentService},
    config::Config,
    server::{AppState, build_router},
    wallet::{AgentWallet, HttpWalletExecutor},
};

pub mod agent;
pub mod catalog;
pub mod config;
pub mod favorites;
mod jsonfile;
pub mod purchases;
pub mod server;
pub mod types;
pub mod wallet;

pub fn build_state(config: Config) -> AppState {
    let favorites = favorites::json_file(config.data_dir.join("favorites.json"));
    let purchases = purchases::json_file(config.data_dir.join("purchases.json"));
    let store = agent::store::json_file(
        config.data_dir.join("agent_settings.json"),
        config.data_dir.join("agent_history.json"),
    );
    let executor = Arc::new(HttpWalletExecutor::new(
        config.wallet_executor_base_url.clone(),
        config.wallet_executor_auth_token.clone(),
        config.wallet_executor_timeout_ms,
    ));
    let wallet = Arc::new(AgentWallet::new(
        executor,
        config.agent_network.clone(),
        Some(config.data_dir.join("agent_wallet.json")),
    ));
    let agent = Arc::new(AgentService::new(
        catalog::file(config.catalog_path.clone()),
        favorites.clone(),
        purchases.clone(),
        store,
        wallet,
        config.receiver_address.clone(),
    ));
    AppState {
        config: Arc::new(config),
        favorites,
        purchases,
        agent,
        started_at: Instant::now(),
    }
}

pub fn build_app(config: Config) -> axum::Router {
    build_router(build_state(config))
}

pub async fn serve(config: Config) -> Result<()> {
    let bind_addr = config.bind_addr;
    let service_name = config.service_name.clone();
    let tick_interval = Duration::from_secs(config.agent_tick_interval_seconds);

    let state = build_state(config);
    let scheduler = AgentScheduler::new(state.agent.clone(), tick_interval);
    tokio::spawn(scheduler.run_forever());

    let listener = TcpListener::bind(bind_addr).await?;
    info!(
        service = %service_name,
        %bind_addr,
        "cryptoon service listening"
    );
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
