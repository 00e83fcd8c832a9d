//! Purchase ledger: which chapters each address owns.
//!
//! A chapter is either owned or not. `record_purchase` is idempotent per
//! (address, series_id, chapter_id): recording an already-owned chapter
//! leaves the ledger untouched and reports the stored row, so neither the
//! manual payment-confirmation path nor the agent ever double-spends on a
//! replay. Rows are only ever removed by the administrative per-user reset.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::jsonfile::{load_rows, save_rows};
use crate::types::normalize_address;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRow {
    pub id: uuid::Uuid,
    pub address: String,
    pub series_id: String,
    pub chapter_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub amount_microusdc: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPurchase {
    pub address: String,
    pub series_id: String,
    pub chapter_id: String,
    pub tx_hash: Option<String>,
    pub amount_microusdc: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum PurchaseStoreError {
    #[error("persist failed: {0}")]
    Persist(String),
}

#[async_trait]
pub trait PurchaseStore: Send + Sync {
    async fn has_purchased(
        &self,
        address: &str,
        series_id: &str,
        chapter_id: &str,
    ) -> Result<bool, PurchaseStoreError>;

    /// Returns the stored row and whether it was newly recorded. Replays of
    /// an existing triple report `false` without touching the ledger.
    async fn record_purchase(
        &self,
        purchase: NewPurchase,
    ) -> Result<(PurchaseRow, bool), PurchaseStoreError>;

    async fn list_for_owner(&self, address: &str) -> Result<Vec<PurchaseRow>, PurchaseStoreError>;

    /// Administrative: removes every row for the address, returning the count.
    async fn reset_owner(&self, address: &str) -> Result<u64, PurchaseStoreError>;
}

pub fn memory() -> Arc<dyn PurchaseStore> {
    Arc::new(MemoryPurchaseStore::default())
}

pub fn json_file(path: PathBuf) -> Arc<dyn PurchaseStore> {
    Arc::new(JsonFilePurchaseStore {
        path,
        lock: Mutex::new(()),
    })
}

fn build_row(purchase: NewPurchase, now: DateTime<Utc>) -> PurchaseRow {
    PurchaseRow {
        id: uuid::Uuid::now_v7(),
        address: normalize_address(&purchase.address),
        series_id: purchase.series_id.trim().to_string(),
        chapter_id: purchase.chapter_id.trim().to_string(),
        tx_hash: purchase.tx_hash.filter(|hash| !hash.trim().is_empty()),
        amount_microusdc: purchase.amount_microusdc,
        created_at: now,
    }
}

fn find_existing<'a>(
    rows: &'a [PurchaseRow],
    address: &str,
    series_id: &str,
    chapter_id: &str,
) -> Option<&'a PurchaseRow> {
    rows.iter().find(|row| {
        row.address == address && row.series_id == series_id && row.chapter_id == chapter_id
    })
}

#[derive(Default)]
struct MemoryPurchaseStore {
    rows: Mutex<Vec<PurchaseRow>>,
}

#[async_trait]
impl PurchaseStore for MemoryPurchaseStore {
    async fn has_purchased(
        &self,
        address: &str,
        series_id: &str,
        chapter_id: &str,
    ) -> Result<bool, PurchaseStoreError> {
        let address = normalize_address(address);
        let rows = self.rows.lock().await;
        Ok(find_existing(&rows, &address, series_id, chapter_id).is_some())
    }

    async fn record_purchase(
        &self,
        purchase: NewPurchase,
    ) -> Result<(PurchaseRow, bool), PurchaseStoreError> {
        let row = build_row(purchase, Utc::now());
        let mut rows = self.rows.lock().await;
        if let Some(existing) = find_existing(&rows, &row.address, &row.series_id, &row.chapter_id)
        {
            return Ok((existing.clone(), false));
        }
        rows.push(row.clone());
        Ok((row, true))
    }

    async fn list_for_owner(&self, address: &str) -> Result<Vec<PurchaseRow>, PurchaseStoreError> {
        let address = normalize_address(address);
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|row| row.address == address)
            .cloned()
            .collect())
    }

    async fn reset_owner(&self, address: &str) -> Result<u64, PurchaseStoreError> {
        let address = normalize_address(address);
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|row| row.address != address);
        Ok((before - rows.len()) as u64)
    }
}

#[derive(Serialize, Deserialize, Default)]
struct PurchasesFile {
    purchases: Vec<PurchaseRow>,
}

struct JsonFilePurchaseStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFilePurchaseStore {
    fn load(&self) -> Vec<PurchaseRow> {
        load_rows(&self.path, |file: PurchasesFile| file.purchases)
    }

    fn save(&self, purchases: Vec<PurchaseRow>) -> Result<(), PurchaseStoreError> {
        save_rows(&self.path, &PurchasesFile { purchases })
            .map_err(PurchaseStoreError::Persist)
    }
}

#[async_trait]
impl PurchaseStore for JsonFilePurchaseStore {
    async fn has_purchased(
        &self,
        address: &str,
        series_id: &str,
        chapter_id: &str,
    ) -> Result<bool, PurchaseStoreError> {
        let address = normalize_address(address);
        let _guard = self.lock.lock().await;
        Ok(find_existing(&self.load(), &address, series_id, chapter_id).is_some())
    }

    async fn record_purchase(
        &self,
        purchase: NewPurchase,
    ) -> Result<(PurchaseRow, bool), PurchaseStoreError> {
        let row = build_row(purchase, Utc::now());
        let _guard = self.lock.lock().await;
        let mut rows = self.load();
        if let Some(existing) = find_existing(&rows, &row.address, &row.series_id, &row.chapter_id)
        {
            return Ok((existing.clone(), false));
        }
        rows.push(row.clone());
        self.save(rows)?;
        Ok((row, true))
    }

    async fn list_for_owner(&self, address: &str) -> Result<Vec<PurchaseRow>, PurchaseStoreError> {
        let address = normalize_address(address);
        let _guard = self.lock.lock().await;
        Ok(self
            .load()
            .into_iter()
            .filter(|row| row.address == address)
            .collect())
    }

    async fn reset_owner(&self, address: &str) -> Result<u64, PurchaseStoreError> {
        let address = normalize_address(address);
        let _guard = self.lock.lock().await;
        let mut rows = self.load();
        let before = rows.len();
        rows.retain(|row| row.address != address);
        let deleted = (before - rows.len()) as u64;
        if deleted > 0 {
            self.save(rows)?;
        }
        Ok(deleted)
    }
}
