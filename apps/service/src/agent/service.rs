//! The agent's decision core: affordability evaluation, the per-tick
//! check-and-purchase cycle, and the settings/history query surface.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::agent::store::{AgentStore, AgentStoreError};
use crate::agent::types::{AgentHistoryRow, AgentSettingsRow};
use crate::catalog::{CatalogSeries, CatalogSource};
use crate::favorites::FavoriteStore;
use crate::purchases::{NewPurchase, PurchaseStore};
use crate::types::normalize_address;
use crate::wallet::AgentWallet;

pub const REASON_INSUFFICIENT_AGENT_BALANCE: &str =
    "agent wallet has insufficient USDC balance";
pub const REASON_MONTHLY_LIMIT_EXCEEDED: &str = "monthly limit exceeded";

/// Outcome of the affordability pre-check for one candidate chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Affordability {
    Approved,
    Rejected { reason: String },
}

/// What one tick did, for logging and tests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub users_checked: u64,
    pub candidates_evaluated: u64,
    pub purchases_recorded: u64,
    pub failures_recorded: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl TickReport {
    fn aborted(reason: impl Into<String>) -> Self {
        Self {
            aborted: Some(reason.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetReport {
    pub purchases_deleted: u64,
    pub history_deleted: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("store error: {0}")]
    Store(#[from] AgentStoreError),
    #[error("purchase ledger error: {0}")]
    Purchases(#[from] crate::purchases::PurchaseStoreError),
}

pub struct AgentService {
    catalog: Arc<dyn CatalogSource>,
    favorites: Arc<dyn FavoriteStore>,
    purchases: Arc<dyn PurchaseStore>,
    store: Arc<dyn AgentStore>,
    wallet: Arc<AgentWallet>,
    receiver_address: String,
}

impl AgentService {
    pub fn new(
        catalog: Arc<dyn CatalogSource>,
        favorites: Arc<dyn FavoriteStore>,
        purchases: Arc<dyn PurchaseStore>,
        store: Arc<dyn AgentStore>,
        wallet: Arc<AgentWallet>,
        receiver_address: String,
    ) -> Self {
        Self {
            catalog,
            favorites,
            purchases,
            store,
            wallet,
            receiver_address,
        }
    }

    pub fn wallet(&self) -> &AgentWallet {
        &self.wallet
    }

    /// Successful agent spend for the address within the current UTC
    /// calendar month, in micro-USDC.
    pub async fn monthly_spend(&self, address: &str) -> Result<u64, AgentError> {
        let now = Utc::now();
        let history = self.store.list_history_for_owner(address).await?;
        Ok(history
            .iter()
            .filter(|row| row.counts_toward_month_of(now))
            .fold(0u64, |total, row| {
                total.saturating_add(row.amount_microusdc)
            }))
    }

    /// Pure pre-check for one candidate chapter. Never mutates state; the
    /// agent-balance gate runs before the budget gate, and a balance lookup
    /// failure is an ordinary rejection, not an error.
    pub async fn check_affordability(
        &self,
        address: &str,
        price_microusdc: u64,
        monthly_limit_microusdc: u64,
    ) -> Affordability {
        let balance = match self.wallet.balance().await {
            Ok(balance) => balance,
            Err(error) => {
                return Affordability::Rejected {
                    reason: error.to_string(),
                };
            }
        };
        if balance < price_microusdc {
            debug!(balance, price_microusdc, "agent balance below chapter price");
            return Affordability::Rejected {
                reason: REASON_INSUFFICIENT_AGENT_BALANCE.to_string(),
            };
        }

        let spent = match self.monthly_spend(address).await {
            Ok(spent) => spent,
            Err(error) => {
                return Affordability::Rejected {
                    reason: error.to_string(),
                };
            }
        };
        if spent.saturating_add(price_microusdc) > monthly_limit_microusdc {
            return Affordability::Rejected {
                reason: REASON_MONTHLY_LIMIT_EXCEEDED.to_string(),
            };
        }

        Affordability::Approved
    }

    /// One check-and-purchase cycle. Callers must guarantee single-flight
    /// (the scheduler does); within the tick all work is sequential. A
    /// failure on one chapter or user never aborts the rest; only a missing
    /// executor configuration or a catalog load failure aborts the whole
    /// tick.
    pub async fn run_tick(&self) -> TickReport {
        if !self.wallet.executor_configured() {
            debug!("wallet executor not configured, skipping agent cycle");
            return TickReport::aborted("wallet executor not configured");
        }
        if let Err(error) = self.wallet.ensure_initialized().await {
            warn!(%error, "agent wallet unavailable, skipping agent cycle");
            return TickReport::aborted(error.to_string());
        }

        let enabled_users = match self.store.list_enabled().await {
            Ok(users) => users,
            Err(error) => {
                warn!(%error, "failed to list enabled users, skipping agent cycle");
                return TickReport::aborted(error.to_string());
            }
        };
        if enabled_users.is_empty() {
            debug!("no users have auto-purchase enabled");
            return TickReport::default();
        }

        // One catalog snapshot per tick; every user in this cycle observes
        // the same content state.
        let catalog = match self.catalog.load().await {
            Ok(catalog) => catalog,
            Err(error) => {
                warn!(%error, "catalog load failed, skipping agent cycle");
                return TickReport::aborted(error.to_string());
            }
        };

        let mut report = TickReport::default();
        info!(users = enabled_users.len(), "agent cycle starting");

        for settings in &enabled_users {
            report.users_checked += 1;
            self.check_user(settings, &catalog, &mut report).await;
        }

        info!(
            users = report.users_checked,
            evaluated = report.candidates_evaluated,
            purchased = report.purchases_recorded,
            failed = report.failures_recorded,
            "agent cycle completed"
        );
        report
    }

    async fn check_user(
        &self,
        settings: &AgentSettingsRow,
        catalog: &[CatalogSeries],
        report: &mut TickReport,
    ) {
        let favorites = match self.favorites.list_for_owner(&settings.address).await {
            Ok(favorites) => favorites,
            Err(error) => {
                warn!(address = %settings.address, %error, "failed to load favorites");
                return;
            }
        };
        if favorites.is_empty() {
            return;
        }

        for favorite in &favorites {
            let Some(series) = catalog
                .iter()
                .find(|series| series.series_id == favorite.series_id)
            else {
                warn!(
                    address = %settings.address,
                    series_id = %favorite.series_id,
                    "favorited series missing from catalog, skipping"
                );
                continue;
            };

            for chapter in &series.chapters {
                if chapter.free {
                    continue;
                }
                let owned = match self
                    .purchases
                    .has_purchased(&settings.address, &series.series_id, &chapter.chapter_id)
                    .await
                {
                    Ok(owned) => owned,
                    Err(error) => {
                        warn!(%error, "purchase lookup failed, skipping chapter");
                        continue;
                    }
                };
                if owned {
                    continue;
                }

                report.candidates_evaluated += 1;
                self.attempt_purchase(settings, series, chapter, report)
                    .await;
            }
        }
    }

    async fn attempt_purchase(
        &self,
        settings: &AgentSettingsRow,
        series: &CatalogSeries,
        chapter: &crate::catalog::CatalogChapter,
        report: &mut TickReport,
    ) {
        let address = &settings.address;
        let price = chapter.price_microusdc;
        info!(
            %address,
            series = %series.title,
            chapter = %chapter.chapter_id,
            price_microusdc = price,
            "attempting auto-purchase"
        );

        match self
            .check_affordability(address, price, settings.monthly_limit_microusdc)
            .await
        {
            Affordability::Rejected { reason } => {
                info!(%address, chapter = %chapter.chapter_id, %reason, "auto-purchase rejected");
                self.record_failure(address, series, chapter, price, reason)
                    .await;
                report.failures_recorded += 1;
                return;
            }
            Affordability::Approved => {}
        }

        match self.wallet.transfer(&self.receiver_address, price).await {
            Ok(tx_hash) => {
                if let Err(error) = self
                    .purchases
                    .record_purchase(NewPurchase {
                        address: address.clone(),
                        series_id: series.series_id.clone(),
                        chapter_id: chapter.chapter_id.clone(),
                        tx_hash: Some(tx_hash.clone()),
                        amount_microusdc: price,
                    })
                    .await
                {
                    warn!(%error, "purchase transferred but ledger write failed");
                }
                self.append_history(AgentHistoryRow::success(
                    address,
                    &series.series_id,
                    &chapter.chapter_id,
                    price,
                    Utc::now(),
                ))
                .await;
                info!(%address, chapter = %chapter.chapter_id, %tx_hash, "auto-purchase succeeded");
                report.purchases_recorded += 1;
            }
            Err(error) => {
                // No purchase row: the chapter stays locked and becomes an
                // ordinary candidate again next tick.
                warn!(%address, chapter = %chapter.chapter_id, %error, "transfer failed");
                self.record_failure(address, series, chapter, price, error.to_string())
                    .await;
                report.failures_recorded += 1;
            }
        }
    }

    async fn record_failure(
        &self,
        address: &str,
        series: &CatalogSeries,
        chapter: &crate::catalog::CatalogChapter,
        price: u64,
        reason: String,
    ) {
        self.append_history(AgentHistoryRow::failure(
            address,
            &series.series_id,
            &chapter.chapter_id,
            price,
            reason,
            Utc::now(),
        ))
        .await;
    }

    async fn append_history(&self, entry: AgentHistoryRow) {
        if let Err(error) = self.store.append_history(entry).await {
            warn!(%error, "failed to append agent history entry");
        }
    }

    /// The user's settings, defaulting when never written. The default is
    /// not persisted; settings are created lazily on first update.
    pub async fn settings_for(&self, address: &str) -> Result<AgentSettingsRow, AgentError> {
        let address = normalize_address(address);
        Ok(self
            .store
            .get_settings(&address)
            .await?
            .unwrap_or_else(|| AgentSettingsRow::default_for(&address, Utc::now())))
    }

    pub async fn update_settings(
        &self,
        address: &str,
        enabled: bool,
        monthly_limit_microusdc: u64,
    ) -> Result<AgentSettingsRow, AgentError> {
        let row = self
            .store
            .upsert_settings(address, enabled, monthly_limit_microusdc)
            .await?;
        info!(
            address = %row.address,
            enabled = row.enabled,
            monthly_limit_microusdc = row.monthly_limit_microusdc,
            "agent settings updated"
        );
        Ok(row)
    }

    pub async fn history_for(&self, address: &str) -> Result<Vec<AgentHistoryRow>, AgentError> {
        Ok(self.store.list_history_for_owner(address).await?)
    }

    /// Administrative reset: purges the address's purchases and agent
    /// history as a pair. Never called by the loop itself.
    pub async fn reset_user(&self, address: &str) -> Result<ResetReport, AgentError> {
        let purchases_deleted = self.purchases.reset_owner(address).await?;
        let history_deleted = self.store.reset_owner_history(address).await?;
        info!(
            address = %normalize_address(address),
            purchases_deleted,
            history_deleted,
            "user ledger reset"
        );
        Ok(ResetReport {
            purchases_deleted,
            history_deleted,
        })
    }
}
