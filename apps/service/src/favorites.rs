//! Favorites ledger: a user's subscription markers on series.
//!
//! Favorites are created and removed only by explicit user action over HTTP;
//! the purchasing agent reads them to know which series to watch.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::jsonfile::{load_rows, save_rows};
use crate::types::normalize_address;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoriteRow {
    pub id: uuid::Uuid,
    pub address: String,
    pub series_id: String,
    pub series_title: String,
    pub series_cover: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFavorite {
    pub address: String,
    pub series_id: String,
    pub series_title: Option<String>,
    pub series_cover: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FavoriteStoreError {
    #[error("already in favorites")]
    AlreadyExists,
    #[error("favorite not found")]
    NotFound,
    #[error("persist failed: {0}")]
    Persist(String),
}

#[async_trait]
pub trait FavoriteStore: Send + Sync {
    async fn list_for_owner(&self, address: &str) -> Result<Vec<FavoriteRow>, FavoriteStoreError>;

    async fn is_favorited(
        &self,
        address: &str,
        series_id: &str,
    ) -> Result<bool, FavoriteStoreError>;

    /// Rejects duplicates per (address, series_id); the stored row is
    /// persisted before this returns.
    async fn add(&self, favorite: NewFavorite) -> Result<FavoriteRow, FavoriteStoreError>;

    async fn remove(&self, address: &str, series_id: &str) -> Result<(), FavoriteStoreError>;
}

pub fn memory() -> Arc<dyn FavoriteStore> {
    Arc::new(MemoryFavoriteStore::default())
}

pub fn json_file(path: PathBuf) -> Arc<dyn FavoriteStore> {
    Arc::new(JsonFileFavoriteStore {
        path,
        lock: Mutex::new(()),
    })
}

fn build_row(favorite: NewFavorite, now: DateTime<Utc>) -> FavoriteRow {
    let series_id = favorite.series_id.trim().to_string();
    FavoriteRow {
        id: uuid::Uuid::now_v7(),
        address: normalize_address(&favorite.address),
        series_title: favorite
            .series_title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| format!("Series {series_id}")),
        series_cover: favorite.series_cover.unwrap_or_default(),
        series_id,
        created_at: now,
    }
}

#[derive(Default)]
struct MemoryFavoriteStore {
    rows: Mutex<Vec<FavoriteRow>>,
}

#[async_trait]
impl FavoriteStore for MemoryFavoriteStore {
    async fn list_for_owner(&self, address: &str) -> Result<Vec<FavoriteRow>, FavoriteStoreError> {
        let address = normalize_address(address);
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|row| row.address == address)
            .cloned()
            .collect())
    }

    async fn is_favorited(
        &self,
        address: &str,
        series_id: &str,
    ) -> Result<bool, FavoriteStoreError> {
        let address = normalize_address(address);
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .any(|row| row.address == address && row.series_id == series_id))
    }

    async fn add(&self, favorite: NewFavorite) -> Result<FavoriteRow, FavoriteStoreError> {
        let row = build_row(favorite, Utc::now());
        let mut rows = self.rows.lock().await;
        if rows
            .iter()
            .any(|existing| existing.address == row.address && existing.series_id == row.series_id)
        {
            return Err(FavoriteStoreError::AlreadyExists);
        }
        rows.push(row.clone());
        Ok(row)
    }

    async fn remove(&self, address: &str, series_id: &str) -> Result<(), FavoriteStoreError> {
        let address = normalize_address(address);
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|row| !(row.address == address && row.series_id == series_id));
        if rows.len() == before {
            return Err(FavoriteStoreError::NotFound);
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Default)]
struct FavoritesFile {
    favorites: Vec<FavoriteRow>,
}

/// Whole-file read-modify-write store. Safe only because the scheduler is
/// single-flight and HTTP mutations are serialized through the lock.
struct JsonFileFavoriteStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileFavoriteStore {
    fn load(&self) -> Vec<FavoriteRow> {
        load_rows(&self.path, |file: FavoritesFile| file.favorites)
    }

    fn save(&self, favorites: Vec<FavoriteRow>) -> Result<(), FavoriteStoreError> {
        save_rows(&self.path, &FavoritesFile { favorites })
            .map_err(FavoriteStoreError::Persist)
    }
}

#[async_trait]
impl FavoriteStore for JsonFileFavoriteStore {
    async fn list_for_owner(&self, address: &str) -> Result<Vec<FavoriteRow>, FavoriteStoreError> {
        let address = normalize_address(address);
        let _guard = self.lock.lock().await;
        Ok(self
            .load()
            .into_iter()
            .filter(|row| row.address == address)
            .collect())
    }

    async fn is_favorited(
        &self,
        address: &str,
        series_id: &str,
    ) -> Result<bool, FavoriteStoreError> {
        let address = normalize_address(address);
        let _guard = self.lock.lock().await;
        Ok(self
            .load()
            .iter()
            .any(|row| row.address == address && row.series_id == series_id))
    }

    async fn add(&self, favorite: NewFavorite) -> Result<FavoriteRow, FavoriteStoreError> {
        let row = build_row(favorite, Utc::now());
        let _guard = self.lock.lock().await;
        let mut rows = self.load();
        if rows
            .iter()
            .any(|existing| existing.address == row.address && existing.series_id == row.series_id)
        {
            return Err(FavoriteStoreError::AlreadyExists);
        }
        rows.push(row.clone());
        self.save(rows)?;
        Ok(row)
    }

    async fn remove(&self, address: &str, series_id: &str) -> Result<(), FavoriteStoreError> {
        let address = normalize_address(address);
        let _guard = self.lock.lock().await;
        let mut rows = self.load();
        let before = rows.len();
        rows.retain(|row| !(row.address == address && row.series_id == series_id));
        if rows.len() == before {
            return Err(FavoriteStoreError::NotFound);
        }
        self.save(rows)
    }
}
