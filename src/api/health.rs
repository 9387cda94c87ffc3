//! Shared health state for the /health endpoint.
//! Updated by the scheduler loops after each orchestrator run.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters and last-run timestamps (unix seconds, 0 = never).
#[derive(Default)]
pub struct HealthState {
    started_at: AtomicU64,
    last_raffle_check_at: AtomicU64,
    last_funding_check_at: AtomicU64,
    raffle_checks: AtomicU64,
    funding_checks: AtomicU64,
    raffle_checks_aborted: AtomicU64,
    funding_checks_aborted: AtomicU64,
    raffles_submitted: AtomicU64,
    top_ups_submitted: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub last_raffle_check_at: Option<u64>,
    pub last_funding_check_at: Option<u64>,
    pub raffle_checks: u64,
    pub funding_checks: u64,
    /// Checks that ended early because the market directory was unreachable.
    pub raffle_checks_aborted: u64,
    pub funding_checks_aborted: u64,
    pub raffles_submitted: u64,
    pub top_ups_submitted: u64,
    pub pending_transactions: usize,
}

impl HealthState {
    pub fn new(now_secs: u64) -> Self {
        let state = Self::default();
        state.started_at.store(now_secs, Ordering::Relaxed);
        state
    }

    pub fn record_raffle_check(&self, at_secs: u64, submitted: u64, aborted: bool) {
        self.last_raffle_check_at.store(at_secs, Ordering::Relaxed);
        self.raffle_checks.fetch_add(1, Ordering::Relaxed);
        if aborted {
            self.raffle_checks_aborted.fetch_add(1, Ordering::Relaxed);
        }
        self.raffles_submitted.fetch_add(submitted, Ordering::Relaxed);
    }

    /// `submitted` counts top-up transactions sent, including reverted ones.
    pub fn record_funding_check(&self, at_secs: u64, submitted: u64, aborted: bool) {
        self.last_funding_check_at.store(at_secs, Ordering::Relaxed);
        self.funding_checks.fetch_add(1, Ordering::Relaxed);
        if aborted {
            self.funding_checks_aborted.fetch_add(1, Ordering::Relaxed);
        }
        self.top_ups_submitted.fetch_add(submitted, Ordering::Relaxed);
    }

    pub fn snapshot(&self, now_secs: u64, pending_transactions: usize) -> HealthSnapshot {
        let nonzero = |v: u64| (v != 0).then_some(v);
        HealthSnapshot {
            status: "ok",
            uptime_secs: now_secs.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            last_raffle_check_at: nonzero(self.last_raffle_check_at.load(Ordering::Relaxed)),
            last_funding_check_at: nonzero(self.last_funding_check_at.load(Ordering::Relaxed)),
            raffle_checks: self.raffle_checks.load(Ordering::Relaxed),
            funding_checks: self.funding_checks.load(Ordering::Relaxed),
            raffle_checks_aborted: self.raffle_checks_aborted.load(Ordering::Relaxed),
            funding_checks_aborted: self.funding_checks_aborted.load(Ordering::Relaxed),
            raffles_submitted: self.raffles_submitted.load(Ordering::Relaxed),
            top_ups_submitted: self.top_ups_submitted.load(Ordering::Relaxed),
            pending_transactions,
        }
    }
}
