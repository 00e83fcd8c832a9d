use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::normalize_address;

/// Default monthly budget for a user who has never touched their settings:
/// 1 USDC.
pub const DEFAULT_MONTHLY_LIMIT_MICROUSDC: u64 = 1_000_000;

/// One user's auto-purchase settings. Created lazily on first write; the
/// loop only considers users with `enabled = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettingsRow {
    pub address: String,
    pub enabled: bool,
    pub monthly_limit_microusdc: u64,
    pub updated_at: DateTime<Utc>,
}

impl AgentSettingsRow {
    pub fn default_for(address: &str, now: DateTime<Utc>) -> Self {
        Self {
            address: normalize_address(address),
            enabled: false,
            monthly_limit_microusdc: DEFAULT_MONTHLY_LIMIT_MICROUSDC,
            updated_at: now,
        }
    }
}

/// One purchase attempt by the agent, successful or not. Append-only; the
/// succeeded rows drive the monthly-spend accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHistoryRow {
    pub id: uuid::Uuid,
    pub address: String,
    pub series_id: String,
    pub chapter_id: String,
    pub amount_microusdc: u64,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

impl AgentHistoryRow {
    pub fn success(
        address: &str,
        series_id: &str,
        chapter_id: &str,
        amount_microusdc: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            address: normalize_address(address),
            series_id: series_id.to_string(),
            chapter_id: chapter_id.to_string(),
            amount_microusdc,
            succeeded: true,
            failure_reason: None,
            attempted_at: now,
        }
    }

    pub fn failure(
        address: &str,
        series_id: &str,
        chapter_id: &str,
        amount_microusdc: u64,
        reason: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            address: normalize_address(address),
            series_id: series_id.to_string(),
            chapter_id: chapter_id.to_string(),
            amount_microusdc,
            succeeded: false,
            failure_reason: Some(reason),
            attempted_at: now,
        }
    }

    /// Whether this row counts toward the spend total of the calendar month
    /// containing `now`. Month windows are computed in UTC; a row from the
    /// previous month never counts, regardless of how recent it is.
    pub fn counts_toward_month_of(&self, now: DateTime<Utc>) -> bool {
        use chrono::Datelike;
        self.succeeded
            && self.attempted_at.year() == now.year()
            && self.attempted_at.month() == now.month()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn month_window_is_utc_calendar_month() {
        let now = Utc.with_ymd_and_hms(2026, 8, 31, 12, 0, 0).unwrap();
        let mut row = AgentHistoryRow::success("0xaaa", "1", "2", 100, now);

        row.attempted_at = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        assert!(row.counts_toward_month_of(now));

        row.attempted_at = Utc.with_ymd_and_hms(2026, 7, 31, 23, 59, 59).unwrap();
        assert!(!row.counts_toward_month_of(now));

        row.attempted_at = Utc.with_ymd_and_hms(2025, 8, 15, 0, 0, 0).unwrap();
        assert!(!row.counts_toward_month_of(now));
    }

    #[test]
    fn failed_rows_never_count() {
        let now = Utc::now();
        let row = AgentHistoryRow::failure("0xaaa", "1", "2", 100, "nope".to_string(), now);
        assert!(!row.counts_toward_month_of(now));
    }
}
