use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, TxHash};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

use crate::api::latency::LatencyStats;
use crate::chain::ChainWriter;
use crate::config::{MAX_TX_RESUBMISSIONS, TX_CONFIRMATION_BLOCKS};
use crate::types::{TransactionStatus, TxAction, TxReceipt, TxState};

/// Owns every submitted transaction from hash to terminal outcome.
///
/// Entries are never removed. A reverted raffle is re-sent up to
/// `max_resubmissions` times; each re-send gets its own entry with the
/// incremented retry count. Top-ups are only recorded: their failures are
/// counted by the funder and nothing here re-sends them.
pub struct TransactionSupervisor {
    writer: Arc<dyn ChainWriter>,
    latency: Arc<LatencyStats>,
    transactions: DashMap<TxHash, TransactionStatus>,
    submitted: DashMap<TxHash, Instant>,
    confirmations: u64,
    max_resubmissions: u32,
}

impl TransactionSupervisor {
    pub fn new(writer: Arc<dyn ChainWriter>, latency: Arc<LatencyStats>) -> Self {
        Self {
            writer,
            latency,
            transactions: DashMap::new(),
            submitted: DashMap::new(),
            confirmations: TX_CONFIRMATION_BLOCKS,
            max_resubmissions: MAX_TX_RESUBMISSIONS,
        }
    }

    /// Register a raffle `hash` as pending and spawn a task that waits for its
    /// confirmation, re-triggering the raffle if it reverts.
    pub fn track_raffle(self: &Arc<Self>, hash: TxHash, market: Address) -> JoinHandle<()> {
        self.observe(hash, TxAction::Raffle { market }, 0);
        let this = Arc::clone(self);
        tokio::spawn(async move { this.supervise_raffle(hash, market, 0).await })
    }

    /// Register a pending entry without a confirmation waiter. The caller
    /// (or the poll loop) settles it via [`Self::apply_receipt`].
    pub fn observe(&self, hash: TxHash, action: TxAction, retries: u32) {
        info!(
            tx_hash = %hash,
            target = %action.target(),
            retries,
            "Tracking transaction {hash} for {action}"
        );
        self.submitted.insert(hash, Instant::now());
        self.transactions.insert(
            hash,
            TransactionStatus {
                hash,
                action,
                status: TxState::Pending,
                retries,
                submitted_at: now_secs(),
                block_number: None,
                gas_used: None,
                confirmation_ms: None,
                error: None,
            },
        );
    }

    /// Move a pending entry to its terminal state. Returns the new state, or
    /// `None` if the hash is unknown or was already settled.
    pub fn apply_receipt(&self, receipt: &TxReceipt) -> Option<TxState> {
        let mut entry = self.transactions.get_mut(&receipt.hash)?;
        if entry.status != TxState::Pending {
            return None;
        }

        entry.status = if receipt.success { TxState::Success } else { TxState::Failed };
        entry.block_number = receipt.block_number;
        entry.gas_used = Some(receipt.gas_used);
        if !receipt.success {
            entry.error = Some("reverted on-chain".to_string());
        }
        if let Some((_, started)) = self.submitted.remove(&receipt.hash) {
            let elapsed = started.elapsed();
            entry.confirmation_ms = Some(elapsed.as_millis() as u64);
            self.latency.record(elapsed);
        }

        let state = entry.status;
        if receipt.success {
            info!(
                tx_hash = %receipt.hash,
                block = receipt.block_number,
                gas_used = receipt.gas_used,
                "Transaction {} confirmed",
                receipt.hash
            );
        } else {
            warn!(
                tx_hash = %receipt.hash,
                block = receipt.block_number,
                retries = entry.retries,
                "Transaction {} reverted",
                receipt.hash
            );
        }
        Some(state)
    }

    async fn supervise_raffle(self: Arc<Self>, mut hash: TxHash, market: Address, mut retries: u32) {
        let action = TxAction::Raffle { market };
        loop {
            let receipt = match self.writer.wait_for_receipt(hash, self.confirmations).await {
                Ok(r) => r,
                Err(e) => {
                    // Status stays pending; the poll loop picks it up.
                    warn!(tx_hash = %hash, "Waiting for receipt of {hash} failed: {e}");
                    return;
                }
            };
            self.apply_receipt(&receipt);
            if receipt.success {
                return;
            }

            if retries >= self.max_resubmissions {
                error!(
                    tx_hash = %hash,
                    target = %market,
                    retries,
                    "Giving up on {action} after {retries} re-submissions"
                );
                return;
            }

            match self.writer.trigger_raffle(market).await {
                Ok(next) => {
                    retries += 1;
                    info!(
                        tx_hash = %next,
                        replaces = %hash,
                        retries,
                        "Re-submitted {action} as {next}"
                    );
                    self.observe(next, action.clone(), retries);
                    hash = next;
                }
                Err(e) => {
                    error!(tx_hash = %hash, target = %market, "Re-submission of {action} failed: {e}");
                    if let Some(mut entry) = self.transactions.get_mut(&hash) {
                        entry.error = Some(e.to_string());
                    }
                    return;
                }
            }
        }
    }

    /// Fetch the receipt of every pending entry directly and settle the mined
    /// ones. Never re-submits. Returns how many entries changed state.
    pub async fn poll_pending(&self) -> usize {
        let pending: Vec<TxHash> = self
            .transactions
            .iter()
            .filter(|e| e.status == TxState::Pending)
            .map(|e| *e.key())
            .collect();
        if pending.is_empty() {
            return 0;
        }
        debug!(count = pending.len(), "Polling {} pending transactions", pending.len());

        let mut settled = 0;
        for hash in pending {
            match self.writer.receipt(hash).await {
                Ok(Some(receipt)) => {
                    if self.apply_receipt(&receipt).is_some() {
                        settled += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(tx_hash = %hash, "Receipt poll for {hash} failed: {e}"),
            }
        }
        settled
    }

    pub async fn run_poll_loop(self: Arc<Self>, period: Duration) {
        let mut ticker = interval(period);
        ticker.tick().await; // consume immediate first tick

        loop {
            ticker.tick().await;
            let settled = self.poll_pending().await;
            if settled > 0 {
                info!(settled, "Poll settled {settled} pending transactions");
            }
        }
    }

    pub fn get(&self, hash: &TxHash) -> Option<TransactionStatus> {
        self.transactions.get(hash).map(|e| e.value().clone())
    }

    /// All entries, newest first.
    pub fn snapshot(&self) -> Vec<TransactionStatus> {
        let mut all: Vec<TransactionStatus> =
            self.transactions.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at).then(b.retries.cmp(&a.retries)));
        all
    }

    pub fn pending_count(&self) -> usize {
        self.transactions
            .iter()
            .filter(|e| e.status == TxState::Pending)
            .count()
    }
}

pub fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, MockChain};
    use alloy::primitives::U256;

    fn supervisor(chain: &Arc<MockChain>) -> Arc<TransactionSupervisor> {
        Arc::new(TransactionSupervisor::new(chain.clone(), Arc::new(LatencyStats::new())))
    }

    #[tokio::test]
    async fn successful_receipt_marks_success() {
        let chain = Arc::new(MockChain::new());
        let sup = supervisor(&chain);
        let market = Address::with_last_byte(1);
        let hash = chain.trigger_raffle(market).await.unwrap();

        sup.track_raffle(hash, market).await.unwrap();

        let status = sup.get(&hash).unwrap();
        assert_eq!(status.status, TxState::Success);
        assert_eq!(status.retries, 0);
        assert!(status.gas_used.is_some());
        assert!(status.confirmation_ms.is_some());
        assert!(chain.calls().contains(&Call::WaitForReceipt(hash, 2)));
        assert_eq!(sup.pending_count(), 0);
    }

    #[tokio::test]
    async fn reverted_raffle_is_resubmitted_until_budget_spent() {
        let chain = Arc::new(MockChain::new());
        chain.queue_receipts([false, false, false, false]);
        let sup = supervisor(&chain);
        let market = Address::with_last_byte(1);
        let hash = chain.trigger_raffle(market).await.unwrap();

        sup.track_raffle(hash, market).await.unwrap();

        let all = sup.snapshot();
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|t| t.status == TxState::Failed));
        let mut retries: Vec<u32> = all.iter().map(|t| t.retries).collect();
        retries.sort();
        assert_eq!(retries, vec![0, 1, 2, 3]);
        // First send plus three re-sends.
        assert_eq!(chain.count(|c| matches!(c, Call::TriggerRaffle(_))), 4);
    }

    #[tokio::test]
    async fn revert_then_success_stops_resubmitting() {
        let chain = Arc::new(MockChain::new());
        chain.queue_receipts([false, true]);
        let sup = supervisor(&chain);
        let market = Address::with_last_byte(1);
        let hash = chain.trigger_raffle(market).await.unwrap();

        sup.track_raffle(hash, market).await.unwrap();

        let all = sup.snapshot();
        assert_eq!(all.len(), 2);
        assert_eq!(sup.get(&hash).unwrap().status, TxState::Failed);
        let retry = all.iter().find(|t| t.retries == 1).unwrap();
        assert_eq!(retry.status, TxState::Success);
        assert_eq!(chain.count(|c| matches!(c, Call::TriggerRaffle(_))), 2);
    }

    #[tokio::test]
    async fn failed_resubmission_leaves_entry_failed_with_error() {
        let chain = Arc::new(MockChain::new());
        chain.queue_receipts([false]);
        let sup = supervisor(&chain);
        let market = Address::with_last_byte(1);
        let hash = chain.trigger_raffle(market).await.unwrap();
        chain.set_simulation_revert(true);

        sup.track_raffle(hash, market).await.unwrap();

        let status = sup.get(&hash).unwrap();
        assert_eq!(status.status, TxState::Failed);
        assert!(status.error.unwrap().contains("Simulation"));
        assert_eq!(sup.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn wait_error_leaves_pending_for_poll() {
        let chain = Arc::new(MockChain::new());
        chain.set_wait_error(true);
        let sup = supervisor(&chain);
        let market = Address::with_last_byte(1);
        let hash = chain.trigger_raffle(market).await.unwrap();

        sup.track_raffle(hash, market).await.unwrap();
        assert_eq!(sup.get(&hash).unwrap().status, TxState::Pending);

        // Not mined yet: nothing changes.
        assert_eq!(sup.poll_pending().await, 0);

        chain.mine(hash, true);
        assert_eq!(sup.poll_pending().await, 1);
        assert_eq!(sup.get(&hash).unwrap().status, TxState::Success);

        // Settled entries are not polled again.
        let polls = chain.count(|c| matches!(c, Call::Receipt(_)));
        assert_eq!(sup.poll_pending().await, 0);
        assert_eq!(chain.count(|c| matches!(c, Call::Receipt(_))), polls);
    }

    #[tokio::test]
    async fn poll_marks_reverts_without_resubmitting() {
        let chain = Arc::new(MockChain::new());
        let sup = supervisor(&chain);
        let market = Address::with_last_byte(1);
        let hash = chain.trigger_raffle(market).await.unwrap();
        sup.observe(hash, TxAction::Raffle { market }, 0);

        chain.mine(hash, false);
        assert_eq!(sup.poll_pending().await, 1);
        assert_eq!(sup.get(&hash).unwrap().status, TxState::Failed);
        assert_eq!(chain.count(|c| matches!(c, Call::TriggerRaffle(_))), 1);
    }

    #[tokio::test]
    async fn reverted_top_up_is_recorded_but_never_resent() {
        let chain = Arc::new(MockChain::new());
        let sup = supervisor(&chain);
        let (amount, id) = (U256::from(5u64), U256::from(77u64));
        let hash = chain.top_up_subscription(amount, id).await.unwrap();
        sup.observe(hash, TxAction::TopUp { amount, subscription_id: id }, 0);

        chain.mine(hash, false);
        assert_eq!(sup.poll_pending().await, 1);
        assert_eq!(sup.poll_pending().await, 0);

        let status = sup.get(&hash).unwrap();
        assert_eq!(status.status, TxState::Failed);
        assert_eq!(status.retries, 0);
        assert_eq!(chain.count(|c| matches!(c, Call::TopUp(..))), 1);
        assert_eq!(sup.snapshot().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_loop_first_runs_after_one_period() {
        let chain = Arc::new(MockChain::new());
        let sup = supervisor(&chain);
        let market = Address::with_last_byte(1);
        let hash = chain.trigger_raffle(market).await.unwrap();
        sup.observe(hash, TxAction::Raffle { market }, 0);
        chain.mine(hash, true);

        let poller = tokio::spawn(sup.clone().run_poll_loop(Duration::from_secs(30)));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(chain.count(|c| matches!(c, Call::Receipt(_))), 0);
        assert_eq!(sup.get(&hash).unwrap().status, TxState::Pending);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(chain.count(|c| matches!(c, Call::Receipt(_))), 1);
        assert_eq!(sup.get(&hash).unwrap().status, TxState::Success);

        // Settled entries are not fetched on later ticks.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(chain.count(|c| matches!(c, Call::Receipt(_))), 1);
        poller.abort();
    }

    #[tokio::test]
    async fn settled_entries_ignore_late_receipts() {
        let chain = Arc::new(MockChain::new());
        let sup = supervisor(&chain);
        let market = Address::with_last_byte(1);
        let hash = chain.trigger_raffle(market).await.unwrap();
        sup.observe(hash, TxAction::Raffle { market }, 0);

        let ok = TxReceipt { hash, success: true, block_number: Some(10), gas_used: 21_000 };
        assert_eq!(sup.apply_receipt(&ok), Some(TxState::Success));
        let late = TxReceipt { success: false, ..ok };
        assert_eq!(sup.apply_receipt(&late), None);
        assert_eq!(sup.get(&hash).unwrap().status, TxState::Success);
    }
}
