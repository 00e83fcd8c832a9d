//! HTTP surface for the reader front-end.
//!
//! Every payload is camelCase JSON wrapped in a `success` envelope, and all
//! money crosses this boundary as decimal USDC; micro-USDC stays internal.

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::agent::service::{AgentError, AgentService};
use crate::agent::types::{AgentHistoryRow, AgentSettingsRow};
use crate::config::Config;
use crate::favorites::{FavoriteRow, FavoriteStore, FavoriteStoreError, NewFavorite};
use crate::purchases::{NewPurchase, PurchaseRow, PurchaseStore, PurchaseStoreError};
use crate::types::{microusdc_from_usdc, usdc_from_microusdc};
use crate::wallet::WalletExecutorError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub favorites: Arc<dyn FavoriteStore>,
    pub purchases: Arc<dyn PurchaseStore>,
    pub agent: Arc<AgentService>,
    pub started_at: Instant,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/favorites", post(add_favorite))
        .route("/api/favorites/:address", get(list_favorites))
        .route("/api/favorites/:address/:series_id", delete(remove_favorite))
        .route("/api/purchases/:address", get(list_purchases))
        .route("/api/purchases/confirm", post(confirm_purchase))
        .route("/api/agent/settings/:address", get(agent_settings))
        .route("/api/agent/settings", post(update_agent_settings))
        .route("/api/agent/history/:address", get(agent_history))
        .route("/api/agent/wallet", get(agent_wallet))
        .route("/api/reset/:address", post(reset_user))
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    Upstream(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Conflict(message) => (StatusCode::CONFLICT, message),
            Self::Unavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, message),
            Self::Upstream(message) => (StatusCode::BAD_GATEWAY, message),
            Self::Internal(message) => {
                warn!(%message, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };
        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

impl From<FavoriteStoreError> for ApiError {
    fn from(error: FavoriteStoreError) -> Self {
        match error {
            FavoriteStoreError::AlreadyExists => Self::Conflict(error.to_string()),
            FavoriteStoreError::NotFound => Self::NotFound(error.to_string()),
            FavoriteStoreError::Persist(_) => Self::Internal(error.to_string()),
        }
    }
}

impl From<PurchaseStoreError> for ApiError {
    fn from(error: PurchaseStoreError) -> Self {
        Self::Internal(error.to_string())
    }
}

impl From<AgentError> for ApiError {
    fn from(error: AgentError) -> Self {
        Self::Internal(error.to_string())
    }
}

impl From<WalletExecutorError> for ApiError {
    fn from(error: WalletExecutorError) -> Self {
        match error {
            WalletExecutorError::NotConfigured => Self::Unavailable(error.to_string()),
            _ => Self::Upstream(error.to_string()),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FavoriteView {
    id: uuid::Uuid,
    series_id: String,
    title: String,
    cover: String,
    created_at: DateTime<Utc>,
}

impl From<FavoriteRow> for FavoriteView {
    fn from(row: FavoriteRow) -> Self {
        Self {
            id: row.id,
            series_id: row.series_id,
            title: row.series_title,
            cover: row.series_cover,
            created_at: row.created_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseView {
    id: uuid::Uuid,
    series_id: String,
    chapter_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tx_hash: Option<String>,
    amount: f64,
    created_at: DateTime<Utc>,
}

impl From<PurchaseRow> for PurchaseView {
    fn from(row: PurchaseRow) -> Self {
        Self {
            id: row.id,
            series_id: row.series_id,
            chapter_id: row.chapter_id,
            tx_hash: row.tx_hash,
            amount: usdc_from_microusdc(row.amount_microusdc),
            created_at: row.created_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SettingsView {
    address: String,
    enabled: bool,
    monthly_limit: f64,
    monthly_spent: f64,
    updated_at: DateTime<Utc>,
}

impl SettingsView {
    fn new(row: AgentSettingsRow, monthly_spent_microusdc: u64) -> Self {
        Self {
            address: row.address,
            enabled: row.enabled,
            monthly_limit: usdc_from_microusdc(row.monthly_limit_microusdc),
            monthly_spent: usdc_from_microusdc(monthly_spent_microusdc),
            updated_at: row.updated_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryView {
    id: uuid::Uuid,
    series_id: String,
    chapter_id: String,
    amount: f64,
    succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_reason: Option<String>,
    attempted_at: DateTime<Utc>,
}

impl From<AgentHistoryRow> for HistoryView {
    fn from(row: AgentHistoryRow) -> Self {
        Self {
            id: row.id,
            series_id: row.series_id,
            chapter_id: row.chapter_id,
            amount: usdc_from_microusdc(row.amount_microusdc),
            succeeded: row.succeeded,
            failure_reason: row.failure_reason,
            attempted_at: row.attempted_at,
        }
    }
}

async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": state.config.service_name,
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
    }))
}

async fn list_favorites(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rows = state.favorites.list_for_owner(&address).await?;
    let favorites: Vec<FavoriteView> = rows.into_iter().map(FavoriteView::from).collect();
    Ok(Json(json!({ "success": true, "favorites": favorites })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddFavoriteRequest {
    address: String,
    series_id: String,
    #[serde(default)]
    series_title: Option<String>,
    #[serde(default)]
    series_cover: Option<String>,
}

async fn add_favorite(
    State(state): State<AppState>,
    Json(request): Json<AddFavoriteRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if request.address.trim().is_empty() || request.series_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "address and seriesId are required".to_string(),
        ));
    }
    let row = state
        .favorites
        .add(NewFavorite {
            address: request.address,
            series_id: request.series_id,
            series_title: request.series_title,
            series_cover: request.series_cover,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "favorite": FavoriteView::from(row) })),
    ))
}

async fn remove_favorite(
    State(state): State<AppState>,
    Path((address, series_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.favorites.remove(&address, &series_id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn list_purchases(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rows = state.purchases.list_for_owner(&address).await?;
    let purchases: Vec<PurchaseView> = rows.into_iter().map(PurchaseView::from).collect();
    Ok(Json(json!({ "success": true, "purchases": purchases })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmPurchaseRequest {
    address: String,
    series_id: String,
    chapter_id: String,
    #[serde(default)]
    tx_hash: Option<String>,
    /// Decimal USDC paid by the reader's own wallet.
    amount: f64,
}

/// Records a purchase the reader paid for directly. Replays of the same
/// (address, series, chapter) acknowledge without double-recording.
async fn confirm_purchase(
    State(state): State<AppState>,
    Json(request): Json<ConfirmPurchaseRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.address.trim().is_empty()
        || request.series_id.trim().is_empty()
        || request.chapter_id.trim().is_empty()
    {
        return Err(ApiError::BadRequest(
            "address, seriesId and chapterId are required".to_string(),
        ));
    }
    if !request.amount.is_finite() || request.amount < 0.0 {
        return Err(ApiError::BadRequest("amount must be non-negative".to_string()));
    }

    let (row, newly_recorded) = state
        .purchases
        .record_purchase(NewPurchase {
            address: request.address,
            series_id: request.series_id,
            chapter_id: request.chapter_id,
            tx_hash: request.tx_hash,
            amount_microusdc: microusdc_from_usdc(request.amount),
        })
        .await?;
    Ok(Json(json!({
        "success": true,
        "alreadyOwned": !newly_recorded,
        "purchase": PurchaseView::from(row),
    })))
}

async fn agent_settings(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let settings = state.agent.settings_for(&address).await?;
    let spent = state.agent.monthly_spend(&settings.address).await?;
    Ok(Json(json!({
        "success": true,
        "settings": SettingsView::new(settings, spent),
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateSettingsRequest {
    address: String,
    enabled: bool,
    /// Decimal USDC budget per calendar month.
    monthly_limit: f64,
}

async fn update_agent_settings(
    State(state): State<AppState>,
    Json(request): Json<UpdateSettingsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.address.trim().is_empty() {
        return Err(ApiError::BadRequest("address is required".to_string()));
    }
    if !request.monthly_limit.is_finite() || request.monthly_limit < 0.0 {
        return Err(ApiError::BadRequest(
            "monthlyLimit must be non-negative".to_string(),
        ));
    }

    let row = state
        .agent
        .update_settings(
            &request.address,
            request.enabled,
            microusdc_from_usdc(request.monthly_limit),
        )
        .await?;
    let spent = state.agent.monthly_spend(&row.address).await?;
    Ok(Json(json!({
        "success": true,
        "settings": SettingsView::new(row, spent),
    })))
}

async fn agent_history(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rows = state.agent.history_for(&address).await?;
    let history: Vec<HistoryView> = rows.into_iter().map(HistoryView::from).collect();
    Ok(Json(json!({ "success": true, "history": history })))
}

/// The custodial wallet's funding address and live balance, so readers know
/// where to send USDC for the agent to spend.
async fn agent_wallet(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let wallet = state.agent.wallet();
    if !wallet.executor_configured() {
        return Err(ApiError::Unavailable(
            "wallet executor not configured".to_string(),
        ));
    }
    let account = wallet.ensure_initialized().await?;
    let balance = wallet.balance().await?;
    Ok(Json(json!({
        "success": true,
        "address": account.address,
        "network": account.network,
        "balance": usdc_from_microusdc(balance),
    })))
}

async fn reset_user(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let report = state.agent.reset_user(&address).await?;
    Ok(Json(json!({
        "success": true,
        "purchasesDeleted": report.purchases_deleted,
        "historyDeleted": report.history_deleted,
    })))
}
