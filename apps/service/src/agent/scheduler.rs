//! Timer-driven scheduling for the purchasing agent.
//!
//! At most one purchasing cycle runs at a time: the `running` flag is the
//! sole concurrency control for the shared ledger files and the shared agent
//! balance. A tick that fires while the previous one is still in flight is
//! skipped, not queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::agent::service::{AgentService, TickReport};

#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// A previous cycle was still running; nothing was done.
    Skipped,
    Completed(TickReport),
}

pub struct AgentScheduler {
    service: Arc<AgentService>,
    interval: Duration,
    running: AtomicBool,
}

impl AgentScheduler {
    pub fn new(service: Arc<AgentService>, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            service,
            interval,
            running: AtomicBool::new(false),
        })
    }

    /// Runs one cycle unless one is already in flight.
    pub async fn tick(&self) -> TickOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("agent cycle already running, skipping this tick");
            return TickOutcome::Skipped;
        }
        let report = self.service.run_tick().await;
        self.running.store(false, Ordering::SeqCst);
        TickOutcome::Completed(report)
    }

    /// Fires immediately, then on the fixed period until the process exits.
    pub async fn run_forever(self: Arc<Self>) {
        info!(
            interval_seconds = self.interval.as_secs(),
            "auto-purchase agent started"
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }
}
