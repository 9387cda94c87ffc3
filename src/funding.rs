use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{TxHash, U256};
use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainReader, ChainWriter};
use crate::config::{
    Config, FUNDING_SETTLE_DELAY_SECS, MAX_FUNDING_ATTEMPTS, TX_CONFIRMATION_BLOCKS,
};
use crate::directory::MarketDirectory;
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::state::FundedSubscriptionStore;
use crate::supervisor::TransactionSupervisor;
use crate::types::TxAction;

/// Result of one top-up attempt that got as far as a receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopUpOutcome {
    /// Confirmed and the re-read balance clears the threshold.
    Funded(TxHash),
    /// Confirmed but the balance is still short.
    Unverified(TxHash),
    Reverted(TxHash),
}

#[derive(Debug, Default, Clone)]
pub struct FundingReport {
    /// Directory fetch failed; nothing was processed.
    pub aborted: bool,
    pub subscriptions: usize,
    pub already_funded: usize,
    pub sufficient: usize,
    /// Top-up transactions sent, whatever their outcome.
    pub submitted: usize,
    /// Top-ups whose new balance was verified.
    pub topped_up: Vec<(U256, TxHash)>,
    pub failed: usize,
    pub exhausted: usize,
    pub unreadable: usize,
}

pub struct SubscriptionFunder {
    reader: Arc<dyn ChainReader>,
    writer: Arc<dyn ChainWriter>,
    directory: Arc<dyn MarketDirectory>,
    supervisor: Arc<TransactionSupervisor>,
    store: Arc<FundedSubscriptionStore>,
    retry: RetryPolicy,
    min_balance: U256,
    top_up_amount: U256,
    settle_delay: Duration,
    max_attempts: u32,
    failed_attempts: DashMap<U256, u32>,
}

impl SubscriptionFunder {
    pub fn new(
        cfg: &Config,
        reader: Arc<dyn ChainReader>,
        writer: Arc<dyn ChainWriter>,
        directory: Arc<dyn MarketDirectory>,
        supervisor: Arc<TransactionSupervisor>,
        store: Arc<FundedSubscriptionStore>,
    ) -> Self {
        Self {
            reader,
            writer,
            directory,
            supervisor,
            store,
            retry: RetryPolicy::default(),
            min_balance: cfg.min_subscription_balance,
            top_up_amount: cfg.top_up_amount,
            settle_delay: Duration::from_secs(FUNDING_SETTLE_DELAY_SECS),
            max_attempts: MAX_FUNDING_ATTEMPTS,
            failed_attempts: DashMap::new(),
        }
    }

    /// Check every distinct subscription behind the deployed markets and top
    /// up the ones below the threshold.
    pub async fn process_unfunded_subscriptions(&self) -> FundingReport {
        let listing = match self
            .retry
            .run("fetch_markets", || self.directory.fetch_markets())
            .await
        {
            Ok(l) => l,
            Err(e) => {
                error!("Subscription check aborted, market directory unavailable: {e}");
                return FundingReport { aborted: true, ..Default::default() };
            }
        };

        // Markets can share a subscription; each id is handled once.
        let mut ids = BTreeSet::new();
        for deployed in &listing.deployed {
            let market = deployed.market_address;
            match self
                .retry
                .run("subscription_id", || self.reader.subscription_id(market))
                .await
            {
                Ok(id) if id.is_zero() => debug!(market = %market, "Market {market} has no subscription"),
                Ok(id) => {
                    ids.insert(id);
                }
                Err(e) => warn!(market = %market, "Could not read subscription id of {market}: {e}"),
            }
        }

        let mut report = FundingReport { subscriptions: ids.len(), ..Default::default() };
        info!(
            subscriptions = ids.len(),
            initialised_markets = listing.initialised.len(),
            "Checking {} subscriptions",
            ids.len()
        );

        for id in ids {
            if self.store.contains(&id) {
                report.already_funded += 1;
                continue;
            }

            let info = match self
                .retry
                .run("subscription_info", || self.reader.subscription_info(id))
                .await
            {
                Ok(info) => info,
                Err(e) => {
                    warn!(subscription_id = %id, "Could not read subscription {id}: {e}");
                    report.unreadable += 1;
                    continue;
                }
            };

            if info.balance >= self.min_balance {
                debug!(subscription_id = %id, balance = %info.balance, "Subscription {id} already sufficient");
                self.store.insert(id);
                report.sufficient += 1;
                continue;
            }

            let attempts = self.attempts(&id);
            if attempts >= self.max_attempts {
                warn!(
                    subscription_id = %id,
                    attempts,
                    "Skipping subscription {id}: {attempts} failed funding attempts"
                );
                report.exhausted += 1;
                continue;
            }

            info!(
                subscription_id = %id,
                balance = %info.balance,
                minimum = %self.min_balance,
                "Subscription {id} below minimum, topping up"
            );
            let outcome = match self.send_top_up(id).await {
                Ok(hash) => {
                    report.submitted += 1;
                    self.confirm_top_up(id, hash).await
                }
                Err(e) => Err(e),
            };
            match outcome {
                Ok(TopUpOutcome::Funded(hash)) => {
                    self.failed_attempts.remove(&id);
                    self.store.insert(id);
                    report.topped_up.push((id, hash));
                }
                Ok(TopUpOutcome::Unverified(hash)) => {
                    let n = self.record_failure(id);
                    warn!(
                        subscription_id = %id,
                        tx_hash = %hash,
                        attempts = n,
                        "Top-up of {id} confirmed but balance is still below minimum"
                    );
                    report.failed += 1;
                }
                Ok(TopUpOutcome::Reverted(hash)) => {
                    let n = self.record_failure(id);
                    warn!(subscription_id = %id, tx_hash = %hash, attempts = n, "Top-up of {id} reverted");
                    report.failed += 1;
                }
                Err(e) => {
                    let n = self.record_failure(id);
                    error!(subscription_id = %id, attempts = n, "Top-up of {id} failed: {e}");
                    report.failed += 1;
                }
            }
        }

        info!(
            submitted = report.submitted,
            funded = report.topped_up.len(),
            already_funded = report.already_funded,
            sufficient = report.sufficient,
            failed = report.failed,
            exhausted = report.exhausted,
            unreadable = report.unreadable,
            "Subscription check complete"
        );
        report
    }

    /// Simulate and send the top-up; the supervisor records it but never re-sends it.
    async fn send_top_up(&self, id: U256) -> Result<TxHash> {
        let hash = self.writer.top_up_subscription(self.top_up_amount, id).await?;
        self.supervisor.observe(
            hash,
            TxAction::TopUp { amount: self.top_up_amount, subscription_id: id },
            0,
        );
        Ok(hash)
    }

    async fn confirm_top_up(&self, id: U256, hash: TxHash) -> Result<TopUpOutcome> {
        let receipt = self.writer.wait_for_receipt(hash, TX_CONFIRMATION_BLOCKS).await?;
        self.supervisor.apply_receipt(&receipt);
        if !receipt.success {
            return Ok(TopUpOutcome::Reverted(hash));
        }

        tokio::time::sleep(self.settle_delay).await;
        let info = self
            .retry
            .run("subscription_info", || self.reader.subscription_info(id))
            .await?;
        if info.balance >= self.min_balance {
            info!(subscription_id = %id, tx_hash = %hash, balance = %info.balance, "Subscription {id} funded");
            Ok(TopUpOutcome::Funded(hash))
        } else {
            Ok(TopUpOutcome::Unverified(hash))
        }
    }

    fn attempts(&self, id: &U256) -> u32 {
        self.failed_attempts.get(id).map(|n| *n).unwrap_or(0)
    }

    fn record_failure(&self, id: U256) -> u32 {
        let mut n = self.failed_attempts.entry(id).or_insert(0);
        *n += 1;
        *n
    }

    /// Failed-attempt counters, sorted by subscription id.
    pub fn failed_attempts(&self) -> Vec<(U256, u32)> {
        let mut all: Vec<(U256, u32)> =
            self.failed_attempts.iter().map(|e| (*e.key(), *e.value())).collect();
        all.sort();
        all
    }

    pub fn store(&self) -> &Arc<FundedSubscriptionStore> {
        &self.store
    }
}
