//! In-process pipeline counters, logged periodically

use crate::log_metrics;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct StrategyMetrics {
    pub triggers_received: AtomicU64,
    pub triggers_dropped: AtomicU64,
    pub triggers_coalesced: AtomicU64,
    pub triggers_debounced: AtomicU64,
    pub evaluations: AtomicU64,
    pub opportunities: AtomicU64,
    pub simulations_failed: AtomicU64,
    pub broadcasts: AtomicU64,
    pub confirmations: AtomicU64,
    pub failures: AtomicU64,
    pub health_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub triggers_received: u64,
    pub triggers_dropped: u64,
    pub triggers_coalesced: u64,
    pub triggers_debounced: u64,
    pub evaluations: u64,
    pub opportunities: u64,
    pub simulations_failed: u64,
    pub broadcasts: u64,
    pub confirmations: u64,
    pub failures: u64,
    pub health_failures: u64,
}

impl StrategyMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            triggers_received: get(&self.triggers_received),
            triggers_dropped: get(&self.triggers_dropped),
            triggers_coalesced: get(&self.triggers_coalesced),
            triggers_debounced: get(&self.triggers_debounced),
            evaluations: get(&self.evaluations),
            opportunities: get(&self.opportunities),
            simulations_failed: get(&self.simulations_failed),
            broadcasts: get(&self.broadcasts),
            confirmations: get(&self.confirmations),
            failures: get(&self.failures),
            health_failures: get(&self.health_failures),
        }
    }

    pub fn log_summary(&self) {
        let s = self.snapshot();
        log_metrics!(
            "triggers {} (dropped {}, coalesced {}, debounced {}) | evaluations {} | opportunities {} | sim failed {} | broadcasts {} | confirmed {} | failed {} | health failures {}",
            s.triggers_received,
            s.triggers_dropped,
            s.triggers_coalesced,
            s.triggers_debounced,
            s.evaluations,
            s.opportunities,
            s.simulations_failed,
            s.broadcasts,
            s.confirmations,
            s.failures,
            s.health_failures
        );
    }
}
