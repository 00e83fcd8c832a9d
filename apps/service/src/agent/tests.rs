use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Duration as ChronoDuration, Utc};
use tokio::sync::{Mutex, Semaphore};

use crate::agent::scheduler::{AgentScheduler, TickOutcome};
use crate::agent::service::{
    Affordability, AgentService, REASON_INSUFFICIENT_AGENT_BALANCE,
    REASON_MONTHLY_LIMIT_EXCEEDED,
};
use crate::agent::store::{self as agent_store, AgentStore};
use crate::agent::types::AgentHistoryRow;
use crate::catalog::{self, CatalogChapter, CatalogSeries};
use crate::favorites::{self, FavoriteStore, NewFavorite};
use crate::purchases::{self, NewPurchase, PurchaseStore};
use crate::wallet::{AgentWallet, WalletAccount, WalletExecutor, WalletExecutorError};

const RECEIVER: &str = "0xplatform";
const USER: &str = "0xreader01";

struct FakeExecutor {
    configured: bool,
    balance_microusdc: AtomicU64,
    balance_calls: AtomicU64,
    transfer_calls: AtomicU64,
    /// Scripted transfer outcomes, consumed in order; an empty script means
    /// every transfer succeeds with a generated hash.
    transfer_script: Mutex<VecDeque<Result<String, String>>>,
    /// When present, `balance` blocks until the test releases a permit.
    balance_gate: Option<Arc<Semaphore>>,
}

impl FakeExecutor {
    fn with_balance(balance_microusdc: u64) -> Arc<Self> {
        Arc::new(Self {
            configured: true,
            balance_microusdc: AtomicU64::new(balance_microusdc),
            balance_calls: AtomicU64::new(0),
            transfer_calls: AtomicU64::new(0),
            transfer_script: Mutex::new(VecDeque::new()),
            balance_gate: None,
        })
    }

    async fn script_transfers(&self, outcomes: Vec<Result<String, String>>) {
        *self.transfer_script.lock().await = outcomes.into();
    }
}

#[async_trait]
impl WalletExecutor for FakeExecutor {
    fn configured(&self) -> bool {
        self.configured
    }

    async fn create_account(&self, network: &str) -> Result<WalletAccount, WalletExecutorError> {
        Ok(WalletAccount {
            address: "0xagentwallet".to_string(),
            network: network.to_string(),
        })
    }

    async fn balance(&self, _: &str, _: &str) -> Result<u64, WalletExecutorError> {
        if let Some(gate) = &self.balance_gate {
            let permit = gate.acquire().await.map_err(|_| {
                WalletExecutorError::Transport("balance gate closed".to_string())
            })?;
            permit.forget();
        }
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.balance_microusdc.load(Ordering::SeqCst))
    }

    async fn transfer(
        &self,
        _: &str,
        _: &str,
        _: &str,
        amount_microusdc: u64,
    ) -> Result<String, WalletExecutorError> {
        let call = self.transfer_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.transfer_script.lock().await.pop_front();
        match scripted {
            Some(Ok(tx_hash)) => Ok(tx_hash),
            Some(Err(message)) => Err(WalletExecutorError::Provider(message)),
            None => {
                // Spend from the fake balance so consecutive transfers in a
                // tick observe a shrinking wallet.
                self.balance_microusdc
                    .fetch_sub(amount_microusdc.min(self.balance_microusdc.load(Ordering::SeqCst)), Ordering::SeqCst);
                Ok(format!("0xtx{call}"))
            }
        }
    }
}

struct World {
    favorites: Arc<dyn FavoriteStore>,
    purchases: Arc<dyn PurchaseStore>,
    agent_store: Arc<dyn AgentStore>,
    executor: Arc<FakeExecutor>,
    service: Arc<AgentService>,
}

fn premium_chapter(chapter_id: &str, price_microusdc: u64) -> CatalogChapter {
    CatalogChapter {
        chapter_id: chapter_id.to_string(),
        title: format!("Chapter {chapter_id}"),
        price_microusdc,
        free: false,
    }
}

fn series(series_id: &str, chapters: Vec<CatalogChapter>) -> CatalogSeries {
    CatalogSeries {
        series_id: series_id.to_string(),
        title: format!("Series {series_id}"),
        chapters,
    }
}

fn build_world(catalog_series: Vec<CatalogSeries>, executor: Arc<FakeExecutor>) -> World {
    let favorites = favorites::memory();
    let purchases = purchases::memory();
    let agent_store = agent_store::memory();
    let wallet = Arc::new(AgentWallet::new(
        executor.clone(),
        "base-sepolia".to_string(),
        None,
    ));
    let service = Arc::new(AgentService::new(
        catalog::fixed(catalog_series),
        favorites.clone(),
        purchases.clone(),
        agent_store.clone(),
        wallet,
        RECEIVER.to_string(),
    ));
    World {
        favorites,
        purchases,
        agent_store,
        executor,
        service,
    }
}

async fn enable_user(world: &World, monthly_limit_microusdc: u64) {
    world
        .service
        .update_settings(USER, true, monthly_limit_microusdc)
        .await
        .expect("enable user");
}

async fn favorite_series(world: &World, series_id: &str) {
    world
        .favorites
        .add(NewFavorite {
            address: USER.to_string(),
            series_id: series_id.to_string(),
            series_title: None,
            series_cover: None,
        })
        .await
        .expect("add favorite");
}

#[tokio::test]
async fn purchases_premium_chapter_and_records_both_ledgers() {
    let executor = FakeExecutor::with_balance(10_000_000);
    let world = build_world(
        vec![series("1", vec![premium_chapter("1", 50_000)])],
        executor,
    );
    enable_user(&world, 1_000_000).await;
    favorite_series(&world, "1").await;

    let report = world.service.run_tick().await;
    assert_eq!(report.purchases_recorded, 1);
    assert_eq!(report.failures_recorded, 0);

    assert!(world
        .purchases
        .has_purchased(USER, "1", "1")
        .await
        .expect("lookup"));
    let history = world.service.history_for(USER).await.expect("history");
    assert_eq!(history.len(), 1);
    assert!(history[0].succeeded);
    assert_eq!(history[0].amount_microusdc, 50_000);
    assert_eq!(world.service.monthly_spend(USER).await.expect("spend"), 50_000);
}

#[tokio::test]
async fn budget_enforcement_rejects_before_any_transfer() {
    // 0.95 USDC already spent this month against a 1.00 limit; a 0.10
    // chapter must be rejected without touching the payment executor.
    let executor = FakeExecutor::with_balance(10_000_000);
    let world = build_world(
        vec![series("1", vec![premium_chapter("1", 100_000)])],
        executor,
    );
    enable_user(&world, 1_000_000).await;
    favorite_series(&world, "1").await;
    world
        .agent_store
        .append_history(AgentHistoryRow::success(USER, "1", "0", 950_000, Utc::now()))
        .await
        .expect("seed history");

    let report = world.service.run_tick().await;
    assert_eq!(report.purchases_recorded, 0);
    assert_eq!(report.failures_recorded, 1);
    assert_eq!(world.executor.transfer_calls.load(Ordering::SeqCst), 0);

    let history = world.service.history_for(USER).await.expect("history");
    let failure = history.iter().find(|row| !row.succeeded).expect("failure row");
    assert_eq!(
        failure.failure_reason.as_deref(),
        Some(REASON_MONTHLY_LIMIT_EXCEEDED)
    );
    assert!(!world
        .purchases
        .has_purchased(USER, "1", "1")
        .await
        .expect("lookup"));
}

#[tokio::test]
async fn empty_agent_wallet_rejects_with_balance_reason() {
    let executor = FakeExecutor::with_balance(0);
    let world = build_world(
        vec![series("1", vec![premium_chapter("1", 10_000)])],
        executor,
    );
    enable_user(&world, 1_000_000).await;
    favorite_series(&world, "1").await;

    let report = world.service.run_tick().await;
    assert_eq!(report.failures_recorded, 1);
    assert_eq!(world.executor.transfer_calls.load(Ordering::SeqCst), 0);

    let history = world.service.history_for(USER).await.expect("history");
    assert_eq!(
        history[0].failure_reason.as_deref(),
        Some(REASON_INSUFFICIENT_AGENT_BALANCE)
    );
}

#[tokio::test]
async fn already_owned_chapters_are_skipped_without_evaluation() {
    let executor = FakeExecutor::with_balance(10_000_000);
    let world = build_world(
        vec![series("1", vec![premium_chapter("1", 50_000)])],
        executor,
    );
    enable_user(&world, 1_000_000).await;
    favorite_series(&world, "1").await;
    world
        .purchases
        .record_purchase(NewPurchase {
            address: USER.to_string(),
            series_id: "1".to_string(),
            chapter_id: "1".to_string(),
            tx_hash: None,
            amount_microusdc: 50_000,
        })
        .await
        .expect("seed purchase");

    let report = world.service.run_tick().await;
    assert_eq!(report.candidates_evaluated, 0);
    assert_eq!(world.executor.balance_calls.load(Ordering::SeqCst), 0);
    assert!(world.service.history_for(USER).await.expect("history").is_empty());
}

#[tokio::test]
async fn free_chapters_are_never_candidates() {
    let executor = FakeExecutor::with_balance(10_000_000);
    let world = build_world(
        vec![series(
            "1",
            vec![CatalogChapter {
                chapter_id: "1".to_string(),
                title: "Pilot".to_string(),
                price_microusdc: 0,
                free: true,
            }],
        )],
        executor,
    );
    enable_user(&world, 1_000_000).await;
    favorite_series(&world, "1").await;

    let report = world.service.run_tick().await;
    assert_eq!(report.candidates_evaluated, 0);
    assert_eq!(world.executor.transfer_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn transfer_failure_is_isolated_from_later_chapters() {
    let executor = FakeExecutor::with_balance(10_000_000);
    let world = build_world(
        vec![series(
            "1",
            vec![premium_chapter("1", 50_000), premium_chapter("2", 50_000)],
        )],
        executor.clone(),
    );
    enable_user(&world, 1_000_000).await;
    favorite_series(&world, "1").await;
    executor
        .script_transfers(vec![
            Err("provider rejected transaction".to_string()),
            Ok("0xsecond".to_string()),
        ])
        .await;

    let report = world.service.run_tick().await;
    assert_eq!(report.failures_recorded, 1);
    assert_eq!(report.purchases_recorded, 1);

    // Chapter 1 stays locked; chapter 2 is owned.
    assert!(!world.purchases.has_purchased(USER, "1", "1").await.expect("lookup"));
    assert!(world.purchases.has_purchased(USER, "1", "2").await.expect("lookup"));

    let history = world.service.history_for(USER).await.expect("history");
    assert_eq!(history.len(), 2);
    let failed = history.iter().find(|row| !row.succeeded).expect("failed row");
    assert_eq!(failed.chapter_id, "1");
    assert_eq!(
        failed.failure_reason.as_deref(),
        Some("wallet executor rejected request: provider rejected transaction")
    );
    let succeeded = history.iter().find(|row| row.succeeded).expect("success row");
    assert_eq!(succeeded.chapter_id, "2");
}

#[tokio::test]
async fn missing_series_is_skipped_and_others_continue() {
    let executor = FakeExecutor::with_balance(10_000_000);
    let world = build_world(
        vec![series("2", vec![premium_chapter("1", 50_000)])],
        executor,
    );
    enable_user(&world, 1_000_000).await;
    favorite_series(&world, "404").await;
    favorite_series(&world, "2").await;

    let report = world.service.run_tick().await;
    assert_eq!(report.purchases_recorded, 1);
    assert!(world.purchases.has_purchased(USER, "2", "1").await.expect("lookup"));
}

#[tokio::test]
async fn previous_month_spend_does_not_count() {
    let executor = FakeExecutor::with_balance(10_000_000);
    let world = build_world(Vec::new(), executor);

    let now = Utc::now();
    // Guaranteed inside the previous calendar month, whatever today is.
    let last_month = now - ChronoDuration::days(i64::from(now.day()) + 1);
    let mut old = AgentHistoryRow::success(USER, "1", "1", 400_000, now);
    old.attempted_at = last_month;
    world.agent_store.append_history(old).await.expect("seed old");
    world
        .agent_store
        .append_history(AgentHistoryRow::success(USER, "1", "2", 250_000, now))
        .await
        .expect("seed current");

    assert_eq!(world.service.monthly_spend(USER).await.expect("spend"), 250_000);
}

#[tokio::test]
async fn unconfigured_executor_aborts_tick_untouched() {
    let executor = Arc::new(FakeExecutor {
        configured: false,
        balance_microusdc: AtomicU64::new(10_000_000),
        balance_calls: AtomicU64::new(0),
        transfer_calls: AtomicU64::new(0),
        transfer_script: Mutex::new(VecDeque::new()),
        balance_gate: None,
    });
    let world = build_world(
        vec![series("1", vec![premium_chapter("1", 50_000)])],
        executor,
    );
    enable_user(&world, 1_000_000).await;
    favorite_series(&world, "1").await;

    let report = world.service.run_tick().await;
    assert!(report.aborted.is_some());
    assert!(world.service.history_for(USER).await.expect("history").is_empty());
}

#[tokio::test]
async fn check_affordability_is_side_effect_free() {
    let executor = FakeExecutor::with_balance(10_000_000);
    let world = build_world(Vec::new(), executor);

    let decision = world
        .service
        .check_affordability(USER, 50_000, 1_000_000)
        .await;
    assert_eq!(decision, Affordability::Approved);
    assert!(world.service.history_for(USER).await.expect("history").is_empty());
    assert_eq!(world.executor.transfer_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn overlapping_tick_is_skipped_with_no_duplicate_work() {
    let gate = Arc::new(Semaphore::new(0));
    let executor = Arc::new(FakeExecutor {
        configured: true,
        balance_microusdc: AtomicU64::new(10_000_000),
        balance_calls: AtomicU64::new(0),
        transfer_calls: AtomicU64::new(0),
        transfer_script: Mutex::new(VecDeque::new()),
        balance_gate: Some(gate.clone()),
    });
    let world = build_world(
        vec![series("1", vec![premium_chapter("1", 50_000)])],
        executor,
    );
    enable_user(&world, 1_000_000).await;
    favorite_series(&world, "1").await;

    let scheduler = AgentScheduler::new(world.service.clone(), Duration::from_secs(60));

    // First tick parks inside the executor's balance call.
    let first = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.tick().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = scheduler.tick().await;
    assert!(matches!(second, TickOutcome::Skipped));

    gate.add_permits(8);
    let first = first.await.expect("first tick join");
    let TickOutcome::Completed(report) = first else {
        panic!("first tick should complete");
    };
    assert_eq!(report.purchases_recorded, 1);

    // Exactly one attempt total: the skipped tick did no work.
    let history = world.service.history_for(USER).await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(world.executor.transfer_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reset_user_pairs_purchases_and_history() {
    let executor = FakeExecutor::with_balance(10_000_000);
    let world = build_world(
        vec![series("1", vec![premium_chapter("1", 50_000), premium_chapter("2", 50_000)])],
        executor,
    );
    enable_user(&world, 1_000_000).await;
    favorite_series(&world, "1").await;
    world.service.run_tick().await;

    // Another user's rows must survive the reset.
    world
        .purchases
        .record_purchase(NewPurchase {
            address: "0xother".to_string(),
            series_id: "1".to_string(),
            chapter_id: "1".to_string(),
            tx_hash: None,
            amount_microusdc: 50_000,
        })
        .await
        .expect("other purchase");
    world
        .agent_store
        .append_history(AgentHistoryRow::success("0xother", "1", "1", 50_000, Utc::now()))
        .await
        .expect("other history");

    let report = world.service.reset_user(USER).await.expect("reset");
    assert_eq!(report.purchases_deleted, 2);
    assert_eq!(report.history_deleted, 2);
    assert!(world.purchases.list_for_owner(USER).await.expect("list").is_empty());
    assert!(world.service.history_for(USER).await.expect("history").is_empty());
    assert_eq!(
        world.purchases.list_for_owner("0xother").await.expect("list").len(),
        1
    );

    // The reset chapters are ordinary candidates again on the next tick.
    let report = world.service.run_tick().await;
    assert_eq!(report.purchases_recorded, 2);
}
