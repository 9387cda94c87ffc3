use alloy::network::{EthereumWallet, ReceiptResponse};
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{DynProvider, PendingTransactionBuilder, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionReceipt;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::chain::{ChainReader, ChainWriter};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::types::{KuriState, MarketData, SubscriptionInfo, TxReceipt};

// Narrow integer outputs (uint24, uint48) are declared at the next native width
// so they decode straight into u32/u64; the ABI words are zero-padded either way.
sol! {
    #[sol(rpc)]
    interface IKuriCore {
        function kuriData() external view returns (
            address creator,
            uint64 kuriAmount,
            uint16 totalParticipantsCount,
            uint16 totalActiveParticipantsCount,
            uint32 intervalDuration,
            uint64 nexRaffleTime,
            uint64 nextIntervalDepositTime,
            uint64 launchPeriod,
            uint64 startTime,
            uint64 endTime,
            uint8 intervalType,
            uint8 state
        );
        function passedIntervalsCounter() external view returns (uint16);
        function userIdToAddress(uint16 userId) external view returns (address);
        function hasPaid(address user, uint256 intervalIndex) external view returns (bool);
        function intervalToWinnerIndex(uint16 intervalIndex) external view returns (uint16);
        function s_subscriptionId() external view returns (uint256);
        function kuriNarukk() external returns (uint256 requestId);
    }

    #[sol(rpc)]
    interface IVRFCoordinatorV2Plus {
        function getSubscription(uint256 subId) external view returns (
            uint256 balance,
            uint256 nativeBalance,
            uint64 reqCount,
            address subOwner,
            address[] consumers
        );
    }

    #[sol(rpc)]
    interface ISubscriptionManager {
        function topUpSubscription(uint256 amount, uint256 subId) external;
    }
}

/// JSON-RPC backed reader and writer. One signing key, one provider; nonce,
/// gas and chain id are filled by the provider stack on every send.
pub struct RpcChain {
    provider: DynProvider,
    signer_address: Address,
    vrf_coordinator: Address,
    subscription_manager: Address,
}

impl RpcChain {
    /// Build the signing provider and verify it talks to the configured chain.
    pub async fn connect(cfg: &Config) -> Result<Self> {
        let signer: PrivateKeySigner = cfg
            .private_key
            .parse()
            .map_err(|e| AppError::Config(format!("invalid PRIVATE_KEY: {e}")))?;
        let signer_address = signer.address();

        let url: reqwest::Url = cfg
            .rpc_url
            .parse()
            .map_err(|e| AppError::Config(format!("RPC_URL is not a valid URL: {e}")))?;

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();

        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(|e| AppError::Rpc(format!("eth_chainId failed: {e}")))?;
        if chain_id != cfg.chain_id {
            return Err(AppError::Config(format!(
                "RPC_URL serves chain {chain_id}, expected CHAIN_ID {}",
                cfg.chain_id
            )));
        }

        info!(
            signer = %signer_address,
            chain_id,
            vrf_coordinator = %cfg.vrf_coordinator,
            subscription_manager = %cfg.subscription_manager,
            "Chain client ready: signer {signer_address} on chain {chain_id}",
        );

        Ok(Self {
            provider,
            signer_address,
            vrf_coordinator: cfg.vrf_coordinator,
            subscription_manager: cfg.subscription_manager,
        })
    }

    pub fn signer_address(&self) -> Address {
        self.signer_address
    }
}

fn rpc_err(call: &str, e: impl std::fmt::Display) -> AppError {
    AppError::Rpc(format!("{call}: {e}"))
}

fn reduce_receipt(receipt: &TransactionReceipt) -> TxReceipt {
    TxReceipt {
        hash: ReceiptResponse::transaction_hash(receipt),
        success: ReceiptResponse::status(receipt),
        block_number: ReceiptResponse::block_number(receipt),
        gas_used: ReceiptResponse::gas_used(receipt),
    }
}

#[async_trait]
impl ChainReader for RpcChain {
    async fn market_data(&self, market: Address) -> Result<MarketData> {
        let raw = IKuriCore::new(market, &self.provider)
            .kuriData()
            .call()
            .await
            .map_err(|e| rpc_err("kuriData", e))?;

        Ok(MarketData {
            creator: raw.creator,
            kuri_amount: raw.kuriAmount,
            total_participants: raw.totalParticipantsCount,
            total_active_participants: raw.totalActiveParticipantsCount,
            interval_duration: raw.intervalDuration,
            next_raffle_time: raw.nexRaffleTime,
            next_deposit_time: raw.nextIntervalDepositTime,
            launch_period: raw.launchPeriod,
            start_time: raw.startTime,
            end_time: raw.endTime,
            interval_type: raw.intervalType,
            state: KuriState::from(raw.state),
        })
    }

    async fn passed_intervals(&self, market: Address) -> Result<u16> {
        IKuriCore::new(market, &self.provider)
            .passedIntervalsCounter()
            .call()
            .await
            .map_err(|e| rpc_err("passedIntervalsCounter", e))
    }

    async fn participant_address(&self, market: Address, index: u16) -> Result<Address> {
        IKuriCore::new(market, &self.provider)
            .userIdToAddress(index)
            .call()
            .await
            .map_err(|e| rpc_err("userIdToAddress", e))
    }

    async fn has_paid(&self, market: Address, user: Address, interval: u16) -> Result<bool> {
        IKuriCore::new(market, &self.provider)
            .hasPaid(user, U256::from(interval))
            .call()
            .await
            .map_err(|e| rpc_err("hasPaid", e))
    }

    async fn winner_index(&self, market: Address, interval: u16) -> Result<u16> {
        IKuriCore::new(market, &self.provider)
            .intervalToWinnerIndex(interval)
            .call()
            .await
            .map_err(|e| rpc_err("intervalToWinnerIndex", e))
    }

    async fn subscription_id(&self, market: Address) -> Result<U256> {
        IKuriCore::new(market, &self.provider)
            .s_subscriptionId()
            .call()
            .await
            .map_err(|e| rpc_err("s_subscriptionId", e))
    }

    async fn subscription_info(&self, subscription_id: U256) -> Result<SubscriptionInfo> {
        let raw = IVRFCoordinatorV2Plus::new(self.vrf_coordinator, &self.provider)
            .getSubscription(subscription_id)
            .call()
            .await
            .map_err(|e| rpc_err("getSubscription", e))?;

        Ok(SubscriptionInfo {
            balance: raw.balance,
            native_balance: raw.nativeBalance,
            request_count: raw.reqCount,
            owner: raw.subOwner,
            consumers: raw.consumers,
        })
    }
}

#[async_trait]
impl ChainWriter for RpcChain {
    async fn trigger_raffle(&self, market: Address) -> Result<TxHash> {
        let contract = IKuriCore::new(market, &self.provider);
        let call = contract.kuriNarukk().from(self.signer_address);

        let request_id = call
            .call()
            .await
            .map_err(|e| AppError::Simulation(format!("kuriNarukk on {market}: {e}")))?;
        debug!(market = %market, %request_id, "kuriNarukk simulation passed");

        let pending = call
            .send()
            .await
            .map_err(|e| AppError::Submission(format!("kuriNarukk on {market}: {e}")))?;
        Ok(*pending.tx_hash())
    }

    async fn top_up_subscription(&self, amount: U256, subscription_id: U256) -> Result<TxHash> {
        let contract = ISubscriptionManager::new(self.subscription_manager, &self.provider);
        let call = contract
            .topUpSubscription(amount, subscription_id)
            .from(self.signer_address);

        call.call().await.map_err(|e| {
            AppError::Simulation(format!("topUpSubscription({amount}, {subscription_id}): {e}"))
        })?;

        let pending = call.send().await.map_err(|e| {
            AppError::Submission(format!("topUpSubscription({amount}, {subscription_id}): {e}"))
        })?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(&self, hash: TxHash, confirmations: u64) -> Result<TxReceipt> {
        let receipt = PendingTransactionBuilder::new(self.provider.root().clone(), hash)
            .with_required_confirmations(confirmations)
            .get_receipt()
            .await
            .map_err(|e| rpc_err("waitForTransactionReceipt", e))?;
        Ok(reduce_receipt(&receipt))
    }

    async fn receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| rpc_err("eth_getTransactionReceipt", e))?;
        Ok(receipt.as_ref().map(reduce_receipt))
    }
}
