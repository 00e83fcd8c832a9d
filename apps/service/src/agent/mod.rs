//! The autonomous purchasing agent: per-user settings, the append-only
//! attempt history, the affordability evaluator, and the single-flight
//! scheduling loop that buys newly published premium chapters on behalf of
//! users who opted in.

pub mod scheduler;
pub mod service;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use scheduler::{AgentScheduler, TickOutcome};
pub use service::{AgentService, ResetReport, TickReport};
