use alloy::primitives::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Indexer records
// ---------------------------------------------------------------------------

/// A market deployment event as recorded by the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployedMarket {
    pub id: String,
    #[serde(default)]
    pub caller: Option<String>,
    pub market_address: Address,
    #[serde(default)]
    pub interval_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub wannabe_member: Option<bool>,
    #[serde(default)]
    pub circle_currency_address: Option<String>,
}

/// A `KuriInitialised` event; the indexer flattens the struct into positional columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialisedMarket {
    pub id: String,
    #[serde(rename = "contractAddress", default)]
    pub contract_address: Option<String>,
    #[serde(rename = "_kuriData_2", default)]
    pub total_participants: Option<String>,
    #[serde(rename = "_kuriData_3", default)]
    pub total_active_participants: Option<String>,
    #[serde(rename = "_kuriData_5", default)]
    pub next_raffle_time: Option<String>,
    #[serde(rename = "_kuriData_11", default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MarketListing {
    pub deployed: Vec<DeployedMarket>,
    pub initialised: Vec<InitialisedMarket>,
}

/// Winner recorded by the indexer for one interval of one market.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaffleWinner {
    pub id: String,
    pub winner_address: String,
    #[serde(default)]
    pub winner_index: Option<serde_json::Value>,
    #[serde(default)]
    pub winner_timestamp: Option<serde_json::Value>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub interval_index: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// On-chain market state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KuriState {
    InLaunch,
    Active,
    Completed,
    Unknown(u8),
}

impl From<u8> for KuriState {
    fn from(raw: u8) -> Self {
        match raw {
            0 => KuriState::InLaunch,
            1 => KuriState::Active,
            2 => KuriState::Completed,
            other => KuriState::Unknown(other),
        }
    }
}

impl std::fmt::Display for KuriState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KuriState::InLaunch => write!(f, "INLAUNCH"),
            KuriState::Active => write!(f, "ACTIVE"),
            KuriState::Completed => write!(f, "COMPLETED"),
            KuriState::Unknown(raw) => write!(f, "UNKNOWN({raw})"),
        }
    }
}

/// Decoded `kuriData()` view. Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketData {
    pub creator: Address,
    pub kuri_amount: u64,
    pub total_participants: u16,
    pub total_active_participants: u16,
    pub interval_duration: u32,
    pub next_raffle_time: u64,
    pub next_deposit_time: u64,
    pub launch_period: u64,
    pub start_time: u64,
    pub end_time: u64,
    pub interval_type: u8,
    pub state: KuriState,
}

/// What the raffle decision needs from chain, read fresh every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketSnapshot {
    pub address: Address,
    pub state: KuriState,
    pub next_raffle_time: u64,
    pub next_deposit_time: u64,
    pub total_participants: u16,
    pub total_active_participants: u16,
    pub current_interval: u16,
}

impl MarketSnapshot {
    pub fn new(address: Address, data: &MarketData, current_interval: u16) -> Self {
        Self {
            address,
            state: data.state,
            next_raffle_time: data.next_raffle_time,
            next_deposit_time: data.next_deposit_time,
            total_participants: data.total_participants,
            total_active_participants: data.total_active_participants,
            current_interval,
        }
    }
}

/// Decoded coordinator `getSubscription(subId)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub balance: U256,
    pub native_balance: U256,
    pub request_count: u64,
    pub owner: Address,
    pub consumers: Vec<Address>,
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// The logical action behind a transaction, kept so a reverted one can be re-sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxAction {
    Raffle { market: Address },
    TopUp { amount: U256, subscription_id: U256 },
}

impl TxAction {
    /// Address the action is reported against in logs and the status API.
    pub fn target(&self) -> String {
        match self {
            TxAction::Raffle { market } => market.to_string(),
            TxAction::TopUp { subscription_id, .. } => format!("subscription:{subscription_id}"),
        }
    }
}

impl std::fmt::Display for TxAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxAction::Raffle { market } => write!(f, "raffle({market})"),
            TxAction::TopUp { amount, subscription_id } => {
                write!(f, "top_up({amount}, {subscription_id})")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxState {
    Pending,
    Success,
    Failed,
}

impl std::fmt::Display for TxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TxState::Pending => "pending",
            TxState::Success => "success",
            TxState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One submitted transaction as seen by the supervisor.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionStatus {
    pub hash: TxHash,
    pub action: TxAction,
    pub status: TxState,
    /// Re-submission count of the logical action; 0 for the first send.
    pub retries: u32,
    /// Unix seconds.
    pub submitted_at: u64,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub confirmation_ms: Option<u64>,
    pub error: Option<String>,
}

/// Receipt reduced to what the keeper acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub hash: TxHash,
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}
