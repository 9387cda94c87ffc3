//! Contract access seams. The orchestrators only ever see these traits;
//! `rpc::RpcChain` is the production implementation.

pub mod rpc;

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;

use crate::error::Result;
use crate::types::{MarketData, SubscriptionInfo, TxReceipt};

pub use rpc::RpcChain;

/// View calls against market contracts and the VRF coordinator.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// `kuriData()` decoded into a typed snapshot.
    async fn market_data(&self, market: Address) -> Result<MarketData>;

    /// `passedIntervalsCounter()`: the interval payments are currently checked against.
    async fn passed_intervals(&self, market: Address) -> Result<u16>;

    /// `userIdToAddress(index)`; participant indices start at 1.
    async fn participant_address(&self, market: Address, index: u16) -> Result<Address>;

    async fn has_paid(&self, market: Address, user: Address, interval: u16) -> Result<bool>;

    /// `intervalToWinnerIndex(interval)`; 0 while no winner has been drawn.
    async fn winner_index(&self, market: Address, interval: u16) -> Result<u16>;

    /// `s_subscriptionId()`; 0 when the market has no VRF subscription yet.
    async fn subscription_id(&self, market: Address) -> Result<U256>;

    /// Coordinator `getSubscription(subscriptionId)`.
    async fn subscription_info(&self, subscription_id: U256) -> Result<SubscriptionInfo>;
}

/// State-changing calls. Every send is preceded by a simulation; a reverted
/// simulation surfaces as `AppError::Simulation` and nothing is broadcast.
#[async_trait]
pub trait ChainWriter: Send + Sync {
    /// `kuriNarukk()` on the market.
    async fn trigger_raffle(&self, market: Address) -> Result<TxHash>;

    /// `topUpSubscription(amount, subscriptionId)` on the subscription manager.
    async fn top_up_subscription(&self, amount: U256, subscription_id: U256) -> Result<TxHash>;

    /// Block until the transaction is mined and buried under `confirmations` blocks.
    async fn wait_for_receipt(&self, hash: TxHash, confirmations: u64) -> Result<TxReceipt>;

    /// Current receipt, if the transaction has been mined.
    async fn receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>>;
}
