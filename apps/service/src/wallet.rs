//! Payment executor collaborator: the custodial wallet the agent spends from.
//!
//! The service never signs transactions itself. `WalletExecutor` is the
//! contract with the custodial wallet-executor sidecar (account creation,
//! USDC balance lookup, on-chain transfer); `HttpWalletExecutor` is the
//! production binding, a bearer-authenticated HTTP client with a bounded
//! per-request timeout. Any executor failure is surfaced to the caller and
//! never retried within the same tick.
//!
//! `AgentWallet` owns the singleton custodial identity: created once, then
//! persisted to `agent_wallet.json` so process restarts reuse the same
//! address instead of minting a new one (and stranding its funding).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletAccount {
    pub address: String,
    pub network: String,
}

#[derive(Debug, thiserror::Error)]
pub enum WalletExecutorError {
    #[error("wallet executor not configured")]
    NotConfigured,
    #[error("wallet executor transport error: {0}")]
    Transport(String),
    #[error("wallet executor rejected request: {0}")]
    Provider(String),
    #[error("wallet executor returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait WalletExecutor: Send + Sync {
    /// Whether credentials for the executor are present. Ticks are skipped
    /// entirely while this is false.
    fn configured(&self) -> bool;

    async fn create_account(&self, network: &str) -> Result<WalletAccount, WalletExecutorError>;

    /// Live USDC balance for the custodial address, in micro-USDC.
    async fn balance(
        &self,
        address: &str,
        network: &str,
    ) -> Result<u64, WalletExecutorError>;

    /// Executes an on-chain USDC transfer and returns the transaction hash.
    async fn transfer(
        &self,
        from: &str,
        to: &str,
        network: &str,
        amount_microusdc: u64,
    ) -> Result<String, WalletExecutorError>;
}

pub struct HttpWalletExecutor {
    base_url: Option<String>,
    auth_token: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpWalletExecutor {
    pub fn new(
        base_url: Option<String>,
        auth_token: Option<String>,
        timeout_ms: u64,
    ) -> Self {
        Self {
            base_url: base_url
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
            auth_token: auth_token
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
            timeout: Duration::from_millis(timeout_ms.clamp(250, 120_000)),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<(String, &str), WalletExecutorError> {
        let base_url = self.base_url.as_deref().ok_or(WalletExecutorError::NotConfigured)?;
        let token = self.auth_token.as_deref().ok_or(WalletExecutorError::NotConfigured)?;
        Ok((format!("{base_url}{path}"), token))
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, WalletExecutorError> {
        let (url, token) = self.endpoint(path)?;
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .header("authorization", format!("Bearer {token}"))
            .json(body)
            .send()
            .await
            .map_err(|error| WalletExecutorError::Transport(error.to_string()))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|error| WalletExecutorError::Transport(error.to_string()))?;
        if !status.is_success() {
            let message = extract_error_message(&raw)
                .unwrap_or_else(|| format!("http {}", status.as_u16()));
            return Err(WalletExecutorError::Provider(message));
        }
        serde_json::from_str(&raw)
            .map_err(|error| WalletExecutorError::InvalidResponse(error.to_string()))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAccountResponse {
    address: String,
    #[serde(default)]
    network: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceResponse {
    micro_usdc: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferResponse {
    tx_hash: String,
}

#[async_trait]
impl WalletExecutor for HttpWalletExecutor {
    fn configured(&self) -> bool {
        self.base_url.is_some() && self.auth_token.is_some()
    }

    async fn create_account(&self, network: &str) -> Result<WalletAccount, WalletExecutorError> {
        let response: CreateAccountResponse = self
            .post_json("/wallets/create", &serde_json::json!({ "network": network }))
            .await?;
        Ok(WalletAccount {
            address: response.address,
            network: response.network.unwrap_or_else(|| network.to_string()),
        })
    }

    async fn balance(
        &self,
        address: &str,
        network: &str,
    ) -> Result<u64, WalletExecutorError> {
        let response: BalanceResponse = self
            .post_json(
                "/wallets/balance",
                &serde_json::json!({ "address": address, "network": network }),
            )
            .await?;
        Ok(response.micro_usdc)
    }

    async fn transfer(
        &self,
        from: &str,
        to: &str,
        network: &str,
        amount_microusdc: u64,
    ) -> Result<String, WalletExecutorError> {
        let response: TransferResponse = self
            .post_json(
                "/wallets/transfer",
                &serde_json::json!({
                    "from": from,
                    "to": to,
                    "network": network,
                    "amountMicroUsdc": amount_microusdc,
                }),
            )
            .await?;
        Ok(response.tx_hash)
    }
}

fn extract_error_message(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value
        .get("message")
        .or_else(|| value.get("error"))
        .and_then(|message| message.as_str())
        .map(str::to_string)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalletRecord {
    address: String,
    network: String,
    created_at: DateTime<Utc>,
}

/// The process-lifetime custodial wallet the agent spends from.
pub struct AgentWallet {
    executor: Arc<dyn WalletExecutor>,
    network: String,
    /// Where the custodial identity is persisted across restarts. `None`
    /// keeps the identity process-local (test harnesses only).
    record_path: Option<PathBuf>,
    account: RwLock<Option<WalletAccount>>,
}

impl AgentWallet {
    pub fn new(
        executor: Arc<dyn WalletExecutor>,
        network: String,
        record_path: Option<PathBuf>,
    ) -> Self {
        Self {
            executor,
            network,
            record_path,
            account: RwLock::new(None),
        }
    }

    pub fn executor_configured(&self) -> bool {
        self.executor.configured()
    }

    pub async fn account(&self) -> Option<WalletAccount> {
        self.account.read().await.clone()
    }

    /// Loads the persisted custodial identity, or asks the executor to mint
    /// one and persists it. Idempotent; later calls return the cached account.
    pub async fn ensure_initialized(&self) -> Result<WalletAccount, WalletExecutorError> {
        if let Some(account) = self.account.read().await.clone() {
            return Ok(account);
        }
        let mut slot = self.account.write().await;
        if let Some(account) = slot.clone() {
            return Ok(account);
        }

        if let Some(record) = self.load_record() {
            let account = WalletAccount {
                address: record.address,
                network: record.network,
            };
            info!(address = %account.address, "agent wallet restored");
            *slot = Some(account.clone());
            return Ok(account);
        }

        let account = self.executor.create_account(&self.network).await?;
        self.persist_record(&account);
        info!(
            address = %account.address,
            network = %account.network,
            "agent wallet created; fund it with USDC to enable auto-purchases"
        );
        *slot = Some(account.clone());
        Ok(account)
    }

    pub async fn balance(&self) -> Result<u64, WalletExecutorError> {
        let account = self.ensure_initialized().await?;
        self.executor
            .balance(&account.address, &account.network)
            .await
    }

    pub async fn transfer(
        &self,
        to: &str,
        amount_microusdc: u64,
    ) -> Result<String, WalletExecutorError> {
        let account = self.ensure_initialized().await?;
        self.executor
            .transfer(&account.address, to, &account.network, amount_microusdc)
            .await
    }

    fn load_record(&self) -> Option<WalletRecord> {
        let path = self.record_path.as_ref()?;
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
            Err(error) => {
                warn!(path = %path.display(), %error, "agent wallet record unreadable");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(error) => {
                warn!(path = %path.display(), %error, "agent wallet record corrupt");
                None
            }
        }
    }

    // Losing this record strands any funding sent to the old address, so a
    // write failure is loud even though it cannot fail the tick.
    fn persist_record(&self, account: &WalletAccount) {
        let Some(path) = self.record_path.as_ref() else {
            return;
        };
        let record = WalletRecord {
            address: account.address.clone(),
            network: account.network.clone(),
            created_at: Utc::now(),
        };
        let result = (|| -> Result<(), String> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|error| format!("{}: {error}", parent.display()))?;
            }
            let raw = serde_json::to_string_pretty(&record).map_err(|error| error.to_string())?;
            std::fs::write(path, raw).map_err(|error| format!("{}: {error}", path.display()))
        })();
        if let Err(error) = result {
            warn!(%error, "failed to persist agent wallet record");
        }
    }
}
