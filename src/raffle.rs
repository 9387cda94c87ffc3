use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, TxHash};
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainReader, ChainWriter};
use crate::config::RAFFLE_COOLDOWN_SECS;
use crate::directory::MarketDirectory;
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::supervisor::{now_secs, TransactionSupervisor};
use crate::types::{KuriState, MarketSnapshot};

/// Why a market was or was not raffled this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaffleDecision {
    NotActive(KuriState),
    TooEarly { next_raffle_time: u64 },
    /// First participant index found without a payment for the current interval.
    PaymentsOutstanding { participant: u16 },
    /// The indexer already holds a winner for this interval.
    WinnerRecorded,
    /// The contract already stores a winner index for this interval.
    WinnerOnChain { winner_index: u16 },
    CoolingDown,
    Submitted(TxHash),
}

#[derive(Debug, Default, Clone)]
pub struct RaffleReport {
    /// Directory fetch failed; nothing was processed.
    pub aborted: bool,
    pub markets: usize,
    pub submitted: Vec<(Address, TxHash)>,
    pub skipped: usize,
    pub errors: usize,
}

pub struct RaffleOrchestrator {
    reader: Arc<dyn ChainReader>,
    writer: Arc<dyn ChainWriter>,
    directory: Arc<dyn MarketDirectory>,
    supervisor: Arc<TransactionSupervisor>,
    retry: RetryPolicy,
    cooldown: Duration,
    last_attempt: DashMap<Address, Instant>,
}

impl RaffleOrchestrator {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        writer: Arc<dyn ChainWriter>,
        directory: Arc<dyn MarketDirectory>,
        supervisor: Arc<TransactionSupervisor>,
    ) -> Self {
        Self {
            reader,
            writer,
            directory,
            supervisor,
            retry: RetryPolicy::default(),
            cooldown: Duration::from_secs(RAFFLE_COOLDOWN_SECS),
            last_attempt: DashMap::new(),
        }
    }

    /// One pass over every deployed market. Per-market failures are logged
    /// and counted; only a failed directory fetch ends the pass early.
    pub async fn check_and_execute_raffles(&self) -> RaffleReport {
        let listing = match self
            .retry
            .run("fetch_markets", || self.directory.fetch_markets())
            .await
        {
            Ok(l) => l,
            Err(e) => {
                error!("Raffle check aborted, market directory unavailable: {e}");
                return RaffleReport { aborted: true, ..Default::default() };
            }
        };

        let mut report = RaffleReport { markets: listing.deployed.len(), ..Default::default() };
        info!(
            markets = report.markets,
            initialised = listing.initialised.len(),
            "Checking {} markets for due raffles",
            report.markets
        );

        for deployed in &listing.deployed {
            let market = deployed.market_address;
            match self.process_market(market).await {
                Ok(RaffleDecision::Submitted(hash)) => report.submitted.push((market, hash)),
                Ok(decision) => {
                    debug!(market = %market, ?decision, "Raffle skipped for {market}");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(market = %market, "Raffle check failed for {market}: {e}");
                    report.errors += 1;
                }
            }
        }

        info!(
            submitted = report.submitted.len(),
            skipped = report.skipped,
            errors = report.errors,
            "Raffle check complete: {} submitted, {} skipped, {} errors",
            report.submitted.len(),
            report.skipped,
            report.errors,
        );
        report
    }

    pub async fn process_market(&self, market: Address) -> Result<RaffleDecision> {
        let snapshot = self.snapshot(market).await?;

        if snapshot.state != KuriState::Active {
            return Ok(RaffleDecision::NotActive(snapshot.state));
        }
        if now_secs() < snapshot.next_raffle_time {
            return Ok(RaffleDecision::TooEarly { next_raffle_time: snapshot.next_raffle_time });
        }
        if let Some(participant) = self.first_unpaid(&snapshot).await? {
            return Ok(RaffleDecision::PaymentsOutstanding { participant });
        }

        let interval = snapshot.current_interval;
        let recorded = self
            .retry
            .run("recent_raffle_winner", || self.directory.recent_raffle_winner(market, interval))
            .await?;
        if let Some(winner) = recorded {
            info!(
                market = %market,
                interval,
                winner = %winner.winner_address,
                "Raffle for {market} interval {interval} already recorded"
            );
            return Ok(RaffleDecision::WinnerRecorded);
        }

        // The indexer can lag the chain; the contract is authoritative.
        let winner_index = self
            .retry
            .run("winner_index", || self.reader.winner_index(market, interval))
            .await?;
        if winner_index != 0 {
            info!(market = %market, interval, winner_index, "Winner already drawn on-chain for {market}");
            return Ok(RaffleDecision::WinnerOnChain { winner_index });
        }

        if !self.claim_attempt(market) {
            return Ok(RaffleDecision::CoolingDown);
        }

        let hash = self.writer.trigger_raffle(market).await?;
        info!(market = %market, tx_hash = %hash, interval, "Raffle submitted for {market}: {hash}");
        self.supervisor.track_raffle(hash, market);
        Ok(RaffleDecision::Submitted(hash))
    }

    async fn snapshot(&self, market: Address) -> Result<MarketSnapshot> {
        let data = self
            .retry
            .run("market_data", || self.reader.market_data(market))
            .await?;
        let current_interval = self
            .retry
            .run("passed_intervals", || self.reader.passed_intervals(market))
            .await?;
        Ok(MarketSnapshot::new(market, &data, current_interval))
    }

    /// Index of the first active participant who has not paid, if any.
    async fn first_unpaid(&self, snapshot: &MarketSnapshot) -> Result<Option<u16>> {
        let market = snapshot.address;
        let interval = snapshot.current_interval;
        for index in 1..=snapshot.total_active_participants {
            let user = self
                .retry
                .run("participant_address", || self.reader.participant_address(market, index))
                .await?;
            let paid = self
                .retry
                .run("has_paid", || self.reader.has_paid(market, user, interval))
                .await?;
            if !paid {
                debug!(market = %market, participant = index, user = %user, "Participant {index} has not paid interval {interval}");
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Record an attempt for `market` unless one was made within the cool-down.
    /// Check and record happen under one map entry lock.
    fn claim_attempt(&self, market: Address) -> bool {
        let now = Instant::now();
        let mut claimed = true;
        self.last_attempt
            .entry(market)
            .and_modify(|last| {
                if now.duration_since(*last) < self.cooldown {
                    claimed = false;
                } else {
                    *last = now;
                }
            })
            .or_insert(now);
        claimed
    }
}
