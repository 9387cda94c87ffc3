//! In-memory chain and directory doubles that record every call.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;

use crate::chain::{ChainReader, ChainWriter};
use crate::config::Config;
use crate::directory::MarketDirectory;
use crate::error::{AppError, Result};
use crate::supervisor::now_secs;
use crate::types::{
    DeployedMarket, KuriState, MarketData, MarketListing, RaffleWinner, SubscriptionInfo, TxReceipt,
};

/// Local-only configuration with the production thresholds.
pub fn test_config() -> Config {
    Config {
        rpc_url: "http://localhost:8545".to_string(),
        private_key: format!("0x{}", "1".repeat(64)),
        subgraph_url: "http://localhost:8080/v1/graphql".to_string(),
        log_level: "debug".to_string(),
        api_port: 0,
        chain_id: 8453,
        vrf_coordinator: Address::with_last_byte(0xC0),
        subscription_manager: Address::with_last_byte(0x5A),
        raffle_interval: Duration::from_secs(300),
        funding_interval: Duration::from_secs(7_200),
        funded_subscriptions_path: String::new(),
        min_subscription_balance: U256::from(100_000_000_000_000_000u64),
        top_up_amount: U256::from(5_000_000_000_000_000_000u64),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    MarketData(Address),
    PassedIntervals(Address),
    ParticipantAddress(Address, u16),
    HasPaid(Address, Address, u16),
    WinnerIndex(Address, u16),
    SubscriptionId(Address),
    SubscriptionInfo(U256),
    TriggerRaffle(Address),
    TopUp(U256, U256),
    WaitForReceipt(TxHash, u64),
    Receipt(TxHash),
}

#[derive(Debug, Clone)]
pub struct MockMarket {
    pub data: MarketData,
    pub interval: u16,
    /// Participant at index `i` lives at `participants[i - 1]`.
    pub participants: Vec<Address>,
    /// `(user, interval)` pairs with a recorded payment.
    pub payments: HashSet<(Address, u16)>,
    pub winner_index: u16,
    pub subscription_id: U256,
}

impl MockMarket {
    /// Active market at interval 1 whose raffle time passed a second ago,
    /// everyone paid for interval 1.
    pub fn due(active_participants: u16) -> Self {
        let now = now_secs();
        let participants: Vec<Address> = (1..=active_participants)
            .map(|i| Address::with_last_byte(0x10 + i as u8))
            .collect();
        let payments = participants.iter().map(|addr| (*addr, 1)).collect();
        Self {
            data: MarketData {
                creator: Address::with_last_byte(0xCC),
                kuri_amount: 1_000,
                total_participants: active_participants,
                total_active_participants: active_participants,
                interval_duration: 604_800,
                next_raffle_time: now - 1,
                next_deposit_time: now + 3_600,
                launch_period: now - 86_400,
                start_time: now - 86_400,
                end_time: now + 86_400 * 30,
                interval_type: 0,
                state: KuriState::Active,
            },
            interval: 1,
            participants,
            payments,
            winner_index: 0,
            subscription_id: U256::ZERO,
        }
    }

    pub fn with_state(mut self, state: KuriState) -> Self {
        self.data.state = state;
        self
    }

    pub fn with_next_raffle_time(mut self, at: u64) -> Self {
        self.data.next_raffle_time = at;
        self
    }

    /// Participant `index` has not paid for the current interval.
    pub fn with_unpaid(mut self, index: u16) -> Self {
        let addr = self.participants[usize::from(index) - 1];
        self.payments.remove(&(addr, self.interval));
        self
    }

    /// Move the market to `interval` without recording any payment for it.
    pub fn with_interval(mut self, interval: u16) -> Self {
        self.interval = interval;
        self
    }

    /// Every participant paid for `interval`.
    pub fn with_all_paid(mut self, interval: u16) -> Self {
        let paid: Vec<_> = self.participants.iter().map(|addr| (*addr, interval)).collect();
        self.payments.extend(paid);
        self
    }

    pub fn with_total_participants(mut self, total: u16) -> Self {
        self.data.total_participants = total;
        self
    }

    pub fn with_winner_index(mut self, winner: u16) -> Self {
        self.winner_index = winner;
        self
    }

    pub fn with_subscription(mut self, id: u64) -> Self {
        self.subscription_id = U256::from(id);
        self
    }
}

#[derive(Default)]
pub struct MockChain {
    calls: Mutex<Vec<Call>>,
    markets: Mutex<HashMap<Address, MockMarket>>,
    balances: Mutex<HashMap<U256, U256>>,
    failing_markets: Mutex<Vec<Address>>,
    receipt_outcomes: Mutex<VecDeque<bool>>,
    mined: Mutex<HashMap<TxHash, TxReceipt>>,
    pending_credits: Mutex<HashMap<TxHash, (U256, U256)>>,
    next_hash: AtomicU64,
    simulation_revert: AtomicBool,
    wait_error: AtomicBool,
    no_credit: AtomicBool,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_market(&self, address: Address, market: MockMarket) {
        self.markets.lock().unwrap().insert(address, market);
    }

    pub fn set_balance(&self, subscription_id: u64, balance: U256) {
        self.balances.lock().unwrap().insert(U256::from(subscription_id), balance);
    }

    pub fn balance(&self, subscription_id: u64) -> Option<U256> {
        self.balances.lock().unwrap().get(&U256::from(subscription_id)).copied()
    }

    /// Every market read for `address` fails.
    pub fn fail_market_reads(&self, address: Address) {
        self.failing_markets.lock().unwrap().push(address);
    }

    /// Outcomes for successive `wait_for_receipt` calls; success once drained.
    pub fn queue_receipts(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.receipt_outcomes.lock().unwrap().extend(outcomes);
    }

    pub fn set_simulation_revert(&self, revert: bool) {
        self.simulation_revert.store(revert, Ordering::SeqCst);
    }

    pub fn set_wait_error(&self, fail: bool) {
        self.wait_error.store(fail, Ordering::SeqCst);
    }

    /// Confirmed top-ups leave the balance untouched.
    pub fn set_no_credit(&self, no_credit: bool) {
        self.no_credit.store(no_credit, Ordering::SeqCst);
    }

    /// Make `hash` visible to `receipt()`.
    pub fn mine(&self, hash: TxHash, success: bool) {
        self.mined.lock().unwrap().insert(
            hash,
            TxReceipt { hash, success, block_number: Some(1_000), gas_used: 90_000 },
        );
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn market(&self, address: Address) -> Result<MockMarket> {
        if self.failing_markets.lock().unwrap().contains(&address) {
            return Err(AppError::Rpc(format!("execution timeout reading {address}")));
        }
        self.markets
            .lock()
            .unwrap()
            .get(&address)
            .cloned()
            .ok_or_else(|| AppError::Rpc(format!("no contract at {address}")))
    }

    fn fresh_hash(&self) -> TxHash {
        let n = self.next_hash.fetch_add(1, Ordering::SeqCst) + 1;
        TxHash::left_padding_from(&n.to_be_bytes())
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn market_data(&self, market: Address) -> Result<MarketData> {
        self.record(Call::MarketData(market));
        Ok(self.market(market)?.data)
    }

    async fn passed_intervals(&self, market: Address) -> Result<u16> {
        self.record(Call::PassedIntervals(market));
        Ok(self.market(market)?.interval)
    }

    async fn participant_address(&self, market: Address, index: u16) -> Result<Address> {
        self.record(Call::ParticipantAddress(market, index));
        let m = self.market(market)?;
        usize::from(index)
            .checked_sub(1)
            .and_then(|i| m.participants.get(i))
            .copied()
            .ok_or_else(|| AppError::Rpc(format!("userIdToAddress({index}) out of range")))
    }

    async fn has_paid(&self, market: Address, user: Address, interval: u16) -> Result<bool> {
        self.record(Call::HasPaid(market, user, interval));
        let m = self.market(market)?;
        Ok(m.payments.contains(&(user, interval)))
    }

    async fn winner_index(&self, market: Address, interval: u16) -> Result<u16> {
        self.record(Call::WinnerIndex(market, interval));
        Ok(self.market(market)?.winner_index)
    }

    async fn subscription_id(&self, market: Address) -> Result<U256> {
        self.record(Call::SubscriptionId(market));
        Ok(self.market(market)?.subscription_id)
    }

    async fn subscription_info(&self, subscription_id: U256) -> Result<SubscriptionInfo> {
        self.record(Call::SubscriptionInfo(subscription_id));
        let balance = self
            .balances
            .lock()
            .unwrap()
            .get(&subscription_id)
            .copied()
            .ok_or_else(|| AppError::Rpc(format!("InvalidSubscription({subscription_id})")))?;
        Ok(SubscriptionInfo {
            balance,
            native_balance: U256::ZERO,
            request_count: 0,
            owner: Address::with_last_byte(0xEE),
            consumers: vec![],
        })
    }
}

#[async_trait]
impl ChainWriter for MockChain {
    async fn trigger_raffle(&self, market: Address) -> Result<TxHash> {
        self.record(Call::TriggerRaffle(market));
        if self.simulation_revert.load(Ordering::SeqCst) {
            return Err(AppError::Simulation(format!("kuriNarukk on {market}: reverted")));
        }
        Ok(self.fresh_hash())
    }

    async fn top_up_subscription(&self, amount: U256, subscription_id: U256) -> Result<TxHash> {
        self.record(Call::TopUp(amount, subscription_id));
        if self.simulation_revert.load(Ordering::SeqCst) {
            return Err(AppError::Simulation(format!(
                "topUpSubscription({amount}, {subscription_id}): reverted"
            )));
        }
        let hash = self.fresh_hash();
        self.pending_credits.lock().unwrap().insert(hash, (amount, subscription_id));
        Ok(hash)
    }

    async fn wait_for_receipt(&self, hash: TxHash, confirmations: u64) -> Result<TxReceipt> {
        self.record(Call::WaitForReceipt(hash, confirmations));
        if self.wait_error.load(Ordering::SeqCst) {
            return Err(AppError::Rpc(format!("timed out waiting for {hash}")));
        }
        let success = self.receipt_outcomes.lock().unwrap().pop_front().unwrap_or(true);

        let credit = self.pending_credits.lock().unwrap().remove(&hash);
        if let (true, Some((amount, id))) = (success, credit) {
            if !self.no_credit.load(Ordering::SeqCst) {
                *self.balances.lock().unwrap().entry(id).or_default() += amount;
            }
        }

        let receipt = TxReceipt { hash, success, block_number: Some(1_000), gas_used: 90_000 };
        self.mined.lock().unwrap().insert(hash, receipt.clone());
        Ok(receipt)
    }

    async fn receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>> {
        self.record(Call::Receipt(hash));
        Ok(self.mined.lock().unwrap().get(&hash).cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryCall {
    FetchMarkets,
    RecentWinner(Address, u16),
}

#[derive(Default)]
pub struct MockDirectory {
    markets: Mutex<Vec<Address>>,
    winners: Mutex<HashMap<(Address, u16), RaffleWinner>>,
    fetch_error: AtomicBool,
    calls: Mutex<Vec<DirectoryCall>>,
}

impl MockDirectory {
    pub fn new(markets: impl IntoIterator<Item = Address>) -> Self {
        let dir = Self::default();
        dir.markets.lock().unwrap().extend(markets);
        dir
    }

    pub fn record_winner(&self, market: Address, interval: u16) {
        self.winners.lock().unwrap().insert(
            (market, interval),
            RaffleWinner {
                id: format!("{market}-{interval}"),
                winner_address: Address::with_last_byte(0xAB).to_string(),
                winner_index: Some(serde_json::json!(2)),
                winner_timestamp: Some(serde_json::json!("1704200000")),
                request_id: Some("42".to_string()),
                interval_index: Some(serde_json::json!(interval)),
            },
        );
    }

    pub fn set_fetch_error(&self, fail: bool) {
        self.fetch_error.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<DirectoryCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MarketDirectory for MockDirectory {
    async fn fetch_markets(&self) -> Result<MarketListing> {
        self.calls.lock().unwrap().push(DirectoryCall::FetchMarkets);
        if self.fetch_error.load(Ordering::SeqCst) {
            return Err(AppError::Indexer("indexer unavailable".to_string()));
        }
        let deployed = self
            .markets
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, addr)| DeployedMarket {
                id: format!("deploy-{i}"),
                caller: None,
                market_address: *addr,
                interval_type: Some("0".to_string()),
                timestamp: Some("1704067200".to_string()),
                wannabe_member: None,
                circle_currency_address: None,
            })
            .collect();
        Ok(MarketListing { deployed, initialised: vec![] })
    }

    async fn recent_raffle_winner(&self, market: Address, interval: u16) -> Result<Option<RaffleWinner>> {
        self.calls.lock().unwrap().push(DirectoryCall::RecentWinner(market, interval));
        Ok(self.winners.lock().unwrap().get(&(market, interval)).cloned())
    }
}
