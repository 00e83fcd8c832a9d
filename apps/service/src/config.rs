use std::{
    env,
    net::{AddrParseError, SocketAddr},
    path::PathBuf,
};

use thiserror::Error;

/// Receiving wallet the platform publishes for chapter payments. Overridable
/// via `CRYPTOON_RECEIVER_ADDRESS` for staging environments.
const DEFAULT_RECEIVER_ADDRESS: &str = "0x6f21c2155bf93b49348a422a604310f8ccd6ec74";

#[derive(Clone, Debug)]
pub struct Config {
    pub service_name: String,
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub catalog_path: PathBuf,
    pub receiver_address: String,
    pub agent_network: String,
    pub agent_tick_interval_seconds: u64,
    pub wallet_executor_base_url: Option<String>,
    pub wallet_executor_auth_token: Option<String>,
    pub wallet_executor_timeout_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid CRYPTOON_BIND_ADDR: {0}")]
    BindAddrParse(#[from] AddrParseError),
    #[error("invalid AGENT_TICK_INTERVAL_SECONDS: {0}")]
    InvalidAgentTickIntervalSeconds(String),
    #[error("invalid WALLET_EXECUTOR_TIMEOUT_MS: {0}")]
    InvalidWalletExecutorTimeoutMs(String),
    #[error("invalid CRYPTOON_RECEIVER_ADDRESS: must not be empty")]
    EmptyReceiverAddress,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = env::var("CRYPTOON_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3001".to_string())
            .parse()?;
        let service_name =
            env::var("CRYPTOON_SERVICE_NAME").unwrap_or_else(|_| "cryptoon-service".to_string());
        let data_dir = PathBuf::from(env::var("CRYPTOON_DATA_DIR").unwrap_or_else(|_| "data".to_string()));
        let catalog_path = env::var("CRYPTOON_CATALOG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("db.json"));
        let receiver_address = env::var("CRYPTOON_RECEIVER_ADDRESS")
            .unwrap_or_else(|_| DEFAULT_RECEIVER_ADDRESS.to_string())
            .trim()
            .to_string();
        if receiver_address.is_empty() {
            return Err(ConfigError::EmptyReceiverAddress);
        }
        let agent_network =
            env::var("AGENT_NETWORK").unwrap_or_else(|_| "base-sepolia".to_string());
        let agent_tick_interval_seconds = env::var("AGENT_TICK_INTERVAL_SECONDS")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .map_err(|error| ConfigError::InvalidAgentTickIntervalSeconds(error.to_string()))?
            .max(5);
        let wallet_executor_base_url = non_empty_env("WALLET_EXECUTOR_BASE_URL");
        let wallet_executor_auth_token = non_empty_env("WALLET_EXECUTOR_AUTH_TOKEN");
        let wallet_executor_timeout_ms = env::var("WALLET_EXECUTOR_TIMEOUT_MS")
            .unwrap_or_else(|_| "12000".to_string())
            .parse::<u64>()
            .map_err(|error| ConfigError::InvalidWalletExecutorTimeoutMs(error.to_string()))?
            .clamp(250, 120_000);

        Ok(Self {
            service_name,
            bind_addr,
            data_dir,
            catalog_path,
            receiver_address,
            agent_network,
            agent_tick_interval_seconds,
            wallet_executor_base_url,
            wallet_executor_auth_token,
            wallet_executor_timeout_ms,
        })
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
