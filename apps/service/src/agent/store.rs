//! Durable access to agent settings and the purchase-attempt history.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::agent::types::{AgentHistoryRow, AgentSettingsRow};
use crate::jsonfile::{load_rows, save_rows};
use crate::types::normalize_address;

#[derive(Debug, thiserror::Error)]
pub enum AgentStoreError {
    #[error("persist failed: {0}")]
    Persist(String),
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Settings for one user, if they have ever been written.
    async fn get_settings(
        &self,
        address: &str,
    ) -> Result<Option<AgentSettingsRow>, AgentStoreError>;

    /// Creates or replaces the user's settings; stamps `updated_at`.
    async fn upsert_settings(
        &self,
        address: &str,
        enabled: bool,
        monthly_limit_microusdc: u64,
    ) -> Result<AgentSettingsRow, AgentStoreError>;

    /// Users the loop should consider, in stored order.
    async fn list_enabled(&self) -> Result<Vec<AgentSettingsRow>, AgentStoreError>;

    async fn append_history(&self, entry: AgentHistoryRow) -> Result<(), AgentStoreError>;

    async fn list_history_for_owner(
        &self,
        address: &str,
    ) -> Result<Vec<AgentHistoryRow>, AgentStoreError>;

    /// Administrative: removes every history row for the address.
    async fn reset_owner_history(&self, address: &str) -> Result<u64, AgentStoreError>;
}

pub fn memory() -> Arc<dyn AgentStore> {
    Arc::new(MemoryAgentStore::default())
}

pub fn json_file(settings_path: PathBuf, history_path: PathBuf) -> Arc<dyn AgentStore> {
    Arc::new(JsonFileAgentStore {
        settings_path,
        history_path,
        lock: Mutex::new(()),
    })
}

fn upsert(
    rows: &mut Vec<AgentSettingsRow>,
    address: &str,
    enabled: bool,
    monthly_limit_microusdc: u64,
) -> AgentSettingsRow {
    let row = AgentSettingsRow {
        address: normalize_address(address),
        enabled,
        monthly_limit_microusdc,
        updated_at: Utc::now(),
    };
    match rows.iter_mut().find(|existing| existing.address == row.address) {
        Some(existing) => *existing = row.clone(),
        None => rows.push(row.clone()),
    }
    row
}

#[derive(Default)]
struct MemoryAgentStoreInner {
    settings: Vec<AgentSettingsRow>,
    history: Vec<AgentHistoryRow>,
}

#[derive(Default)]
struct MemoryAgentStore {
    inner: Mutex<MemoryAgentStoreInner>,
}

#[async_trait]
impl AgentStore for MemoryAgentStore {
    async fn get_settings(
        &self,
        address: &str,
    ) -> Result<Option<AgentSettingsRow>, AgentStoreError> {
        let address = normalize_address(address);
        let inner = self.inner.lock().await;
        Ok(inner
            .settings
            .iter()
            .find(|row| row.address == address)
            .cloned())
    }

    async fn upsert_settings(
        &self,
        address: &str,
        enabled: bool,
        monthly_limit_microusdc: u64,
    ) -> Result<AgentSettingsRow, AgentStoreError> {
        let mut inner = self.inner.lock().await;
        Ok(upsert(
            &mut inner.settings,
            address,
            enabled,
            monthly_limit_microusdc,
        ))
    }

    async fn list_enabled(&self) -> Result<Vec<AgentSettingsRow>, AgentStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .settings
            .iter()
            .filter(|row| row.enabled)
            .cloned()
            .collect())
    }

    async fn append_history(&self, entry: AgentHistoryRow) -> Result<(), AgentStoreError> {
        let mut inner = self.inner.lock().await;
        inner.history.push(entry);
        Ok(())
    }

    async fn list_history_for_owner(
        &self,
        address: &str,
    ) -> Result<Vec<AgentHistoryRow>, AgentStoreError> {
        let address = normalize_address(address);
        let inner = self.inner.lock().await;
        Ok(inner
            .history
            .iter()
            .filter(|row| row.address == address)
            .cloned()
            .collect())
    }

    async fn reset_owner_history(&self, address: &str) -> Result<u64, AgentStoreError> {
        let address = normalize_address(address);
        let mut inner = self.inner.lock().await;
        let before = inner.history.len();
        inner.history.retain(|row| row.address != address);
        Ok((before - inner.history.len()) as u64)
    }
}

#[derive(Serialize, Deserialize, Default)]
struct SettingsFile {
    settings: Vec<AgentSettingsRow>,
}

#[derive(Serialize, Deserialize, Default)]
struct HistoryFile {
    history: Vec<AgentHistoryRow>,
}

struct JsonFileAgentStore {
    settings_path: PathBuf,
    history_path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileAgentStore {
    fn load_settings(&self) -> Vec<AgentSettingsRow> {
        load_rows(&self.settings_path, |file: SettingsFile| file.settings)
    }

    fn save_settings(&self, settings: Vec<AgentSettingsRow>) -> Result<(), AgentStoreError> {
        save_rows(&self.settings_path, &SettingsFile { settings })
            .map_err(AgentStoreError::Persist)
    }

    fn load_history(&self) -> Vec<AgentHistoryRow> {
        load_rows(&self.history_path, |file: HistoryFile| file.history)
    }

    fn save_history(&self, history: Vec<AgentHistoryRow>) -> Result<(), AgentStoreError> {
        save_rows(&self.history_path, &HistoryFile { history }).map_err(AgentStoreError::Persist)
    }
}

#[async_trait]
impl AgentStore for JsonFileAgentStore {
    async fn get_settings(
        &self,
        address: &str,
    ) -> Result<Option<AgentSettingsRow>, AgentStoreError> {
        let address = normalize_address(address);
        let _guard = self.lock.lock().await;
        Ok(self
            .load_settings()
            .into_iter()
            .find(|row| row.address == address))
    }

    async fn upsert_settings(
        &self,
        address: &str,
        enabled: bool,
        monthly_limit_microusdc: u64,
    ) -> Result<AgentSettingsRow, AgentStoreError> {
        let _guard = self.lock.lock().await;
        let mut rows = self.load_settings();
        let row = upsert(&mut rows, address, enabled, monthly_limit_microusdc);
        self.save_settings(rows)?;
        Ok(row)
    }

    async fn list_enabled(&self) -> Result<Vec<AgentSettingsRow>, AgentStoreError> {
        let _guard = self.lock.lock().await;
        Ok(self
            .load_settings()
            .into_iter()
            .filter(|row| row.enabled)
            .collect())
    }

    async fn append_history(&self, entry: AgentHistoryRow) -> Result<(), AgentStoreError> {
        let _guard = self.lock.lock().await;
        let mut rows = self.load_history();
        rows.push(entry);
        self.save_history(rows)
    }

    async fn list_history_for_owner(
        &self,
        address: &str,
    ) -> Result<Vec<AgentHistoryRow>, AgentStoreError> {
        let address = normalize_address(address);
        let _guard = self.lock.lock().await;
        Ok(self
            .load_history()
            .into_iter()
            .filter(|row| row.address == address)
            .collect())
    }

    async fn reset_owner_history(&self, address: &str) -> Result<u64, AgentStoreError> {
        let address = normalize_address(address);
        let _guard = self.lock.lock().await;
        let mut rows = self.load_history();
        let before = rows.len();
        rows.retain(|row| row.address != address);
        let deleted = (before - rows.len()) as u64;
        if deleted > 0 {
            self.save_history(rows)?;
        }
        Ok(deleted)
    }
}
