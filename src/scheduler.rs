//! Independent timers driving the orchestrators. Runs of different timers can
//! overlap; a single timer never overlaps with itself.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use crate::api::health::HealthState;
use crate::funding::SubscriptionFunder;
use crate::raffle::RaffleOrchestrator;
use crate::supervisor::now_secs;

/// Handle to the raffle loop. Stopping (or dropping) it cancels only that loop.
pub struct RaffleSchedule {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RaffleSchedule {
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop and wait for an in-flight check to finish.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.task.await;
    }
}

/// Check for due raffles every `period`; the first check happens after one period.
pub fn spawn_raffle_loop(
    orchestrator: Arc<RaffleOrchestrator>,
    health: Arc<HealthState>,
    period: Duration,
) -> RaffleSchedule {
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // consume immediate first tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop_rx.changed() => break,
            }
            let report = orchestrator.check_and_execute_raffles().await;
            health.record_raffle_check(now_secs(), report.submitted.len() as u64, report.aborted);
            if *stop_rx.borrow() {
                break;
            }
        }
        info!("Raffle scheduler stopped");
    });

    RaffleSchedule { stop_tx, task }
}

/// Fund subscriptions now, then every `period`.
pub fn spawn_funding_loop(
    funder: Arc<SubscriptionFunder>,
    health: Arc<HealthState>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await; // first tick fires immediately
            let report = funder.process_unfunded_subscriptions().await;
            health.record_funding_check(now_secs(), report.submitted as u64, report.aborted);
        }
    })
}
