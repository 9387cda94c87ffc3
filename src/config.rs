use std::time::Duration;

use alloy::primitives::{Address, U256};

use crate::error::{AppError, Result};

pub const SUBGRAPH_URL: &str = "https://indexer.dev.hyperindex.xyz/11c60b7/v1/graphql";
pub const VRF_COORDINATOR: &str = "0xd5D517aBE5cF79B7e95eC98dB0f0277788aFF634";
pub const SUBSCRIPTION_MANAGER: &str = "0xfe9e01aB2d887Ebfc8cb6C7e7bD04cCb659F9e6B";

/// Base mainnet.
pub const CHAIN_ID: u64 = 8453;

/// Raffle check schedule: every 5 minutes.
pub const RAFFLE_SCHEDULE: &str = "*/5 * * * *";

/// Subscription funding schedule: every 2 hours.
pub const FUNDING_SCHEDULE: &str = "0 */2 * * *";

/// Longest accepted schedule period: one week.
pub const MAX_SCHEDULE_SECS: u64 = 7 * 24 * 3_600;

/// Re-attempts after the first failure of a read. Delays double from the base: 1s, 2s, 4s.
pub const MAX_RETRIES: u32 = 3;
pub const RETRY_BASE_DELAY_MS: u64 = 1_000;

/// Block confirmations required before a receipt counts as final.
pub const TX_CONFIRMATION_BLOCKS: u64 = 2;

/// Pending transaction re-check interval (seconds).
pub const TX_POLL_INTERVAL_SECS: u64 = 30;

/// Re-submissions allowed for a reverted raffle transaction.
pub const MAX_TX_RESUBMISSIONS: u32 = 3;

/// Minimum spacing between raffle attempts for the same market (seconds).
pub const RAFFLE_COOLDOWN_SECS: u64 = 3_600;

/// Failed funding attempts after which a subscription is skipped until restart.
pub const MAX_FUNDING_ATTEMPTS: u32 = 3;

/// Wait after a confirmed top-up before re-reading the balance (seconds).
pub const FUNDING_SETTLE_DELAY_SECS: u64 = 5;

/// 0.1 LINK in juels.
pub const MIN_SUBSCRIPTION_BALANCE_WEI: u64 = 100_000_000_000_000_000;

/// 5 LINK in juels.
pub const TOP_UP_AMOUNT_WEI: u64 = 5_000_000_000_000_000_000;

/// Indexer HTTP timeout (seconds).
pub const INDEXER_TIMEOUT_SECS: u64 = 30;

/// Status websocket push interval (seconds).
pub const DASHBOARD_PUSH_INTERVAL_SECS: u64 = 5;

pub const FUNDED_SUBSCRIPTIONS_PATH: &str = "funded-subscriptions.json";

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    /// Hex signing key (PRIVATE_KEY). Never logged.
    pub private_key: String,
    pub subgraph_url: String,
    pub log_level: String,
    pub api_port: u16,
    /// Expected chain id (CHAIN_ID), checked against the RPC at startup.
    pub chain_id: u64,
    pub vrf_coordinator: Address,
    pub subscription_manager: Address,
    /// Raffle check period, parsed from CRON_SCHEDULE.
    pub raffle_interval: Duration,
    /// Funding check period, parsed from VRF_CHECK_INTERVAL.
    pub funding_interval: Duration,
    pub funded_subscriptions_path: String,
    /// Balance below which a subscription gets topped up (MIN_SUBSCRIPTION_BALANCE, wei)
    pub min_subscription_balance: U256,
    /// Fixed top-up amount (TOP_UP_AMOUNT, wei)
    pub top_up_amount: U256,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let private_key = std::env::var("PRIVATE_KEY")
            .map_err(|_| AppError::Config("PRIVATE_KEY environment variable is required".to_string()))?;
        validate_private_key(&private_key)?;

        let rpc_url = std::env::var("RPC_URL").unwrap_or_default();
        if rpc_url.is_empty() {
            return Err(AppError::Config("RPC_URL environment variable is required".to_string()));
        }

        Ok(Self {
            rpc_url,
            private_key,
            subgraph_url: std::env::var("SUBGRAPH_URL").unwrap_or_else(|_| SUBGRAPH_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            chain_id: std::env::var("CHAIN_ID")
                .unwrap_or_else(|_| CHAIN_ID.to_string())
                .parse::<u64>()
                .map_err(|_| AppError::Config("CHAIN_ID must be an integer".to_string()))?,
            vrf_coordinator: parse_address(
                "VRF_COORDINATOR",
                &std::env::var("VRF_COORDINATOR").unwrap_or_else(|_| VRF_COORDINATOR.to_string()),
            )?,
            subscription_manager: parse_address(
                "SUBSCRIPTION_MANAGER",
                &std::env::var("SUBSCRIPTION_MANAGER")
                    .unwrap_or_else(|_| SUBSCRIPTION_MANAGER.to_string()),
            )?,
            raffle_interval: parse_schedule(
                &std::env::var("CRON_SCHEDULE").unwrap_or_else(|_| RAFFLE_SCHEDULE.to_string()),
            )?,
            funding_interval: parse_schedule(
                &std::env::var("VRF_CHECK_INTERVAL").unwrap_or_else(|_| FUNDING_SCHEDULE.to_string()),
            )?,
            funded_subscriptions_path: std::env::var("FUNDED_SUBSCRIPTIONS_PATH")
                .unwrap_or_else(|_| FUNDED_SUBSCRIPTIONS_PATH.to_string()),
            min_subscription_balance: parse_wei(
                "MIN_SUBSCRIPTION_BALANCE",
                std::env::var("MIN_SUBSCRIPTION_BALANCE").ok(),
                MIN_SUBSCRIPTION_BALANCE_WEI,
            )?,
            top_up_amount: parse_wei(
                "TOP_UP_AMOUNT",
                std::env::var("TOP_UP_AMOUNT").ok(),
                TOP_UP_AMOUNT_WEI,
            )?,
        })
    }
}

fn validate_private_key(key: &str) -> Result<()> {
    if !key.starts_with("0x") {
        return Err(AppError::Config("PRIVATE_KEY must start with 0x".to_string()));
    }
    if key.len() != 66 {
        return Err(AppError::Config(format!(
            "PRIVATE_KEY must be 66 characters long, got {}",
            key.len()
        )));
    }
    if !key[2..].chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AppError::Config("PRIVATE_KEY must be hex encoded".to_string()));
    }
    Ok(())
}

fn parse_address(name: &str, value: &str) -> Result<Address> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|e| AppError::Config(format!("{name} is not a valid address: {e}")))
}

fn parse_wei(name: &str, value: Option<String>, default: u64) -> Result<U256> {
    match value {
        None => Ok(U256::from(default)),
        Some(s) => s
            .trim()
            .parse::<U256>()
            .map_err(|e| AppError::Config(format!("{name} must be an integer amount in wei: {e}"))),
    }
}

/// Convert a periodic five-field cron expression into a fixed tick period.
///
/// Accepted forms: `*/N * * * *` (every N minutes), `M */N * * *` (every N
/// hours), `M * * * *` (hourly), or a bare number of seconds. Periods longer
/// than [`MAX_SCHEDULE_SECS`] are rejected.
pub fn parse_schedule(expr: &str) -> Result<Duration> {
    let expr = expr.trim();
    let bounded = |secs: Option<u64>| -> Result<Duration> {
        match secs {
            Some(0) => Err(AppError::Config("schedule period must be positive".to_string())),
            Some(s) if s <= MAX_SCHEDULE_SECS => Ok(Duration::from_secs(s)),
            _ => Err(AppError::Config(format!(
                "schedule period of {expr:?} exceeds {MAX_SCHEDULE_SECS}s"
            ))),
        }
    };
    if let Ok(secs) = expr.parse::<u64>() {
        return bounded(Some(secs));
    }

    let fields: Vec<&str> = expr.split_whitespace().collect();
    let unsupported = || AppError::Config(format!("unsupported schedule expression: {expr:?}"));
    let (minute, hour, dom, month, dow) = match fields.as_slice() {
        [minute, hour, dom, month, dow] => (*minute, *hour, *dom, *month, *dow),
        _ => return Err(unsupported()),
    };
    if [dom, month, dow].iter().any(|f| *f != "*") {
        return Err(unsupported());
    }

    let step = |field: &str| -> Option<u64> {
        field.strip_prefix("*/")?.parse::<u64>().ok().filter(|n| *n > 0)
    };
    let fixed = |field: &str| field.parse::<u8>().ok();

    match (step(minute), hour) {
        (Some(n), "*") => return bounded(n.checked_mul(60)),
        (Some(_), _) => return Err(unsupported()),
        (None, _) => {}
    }
    if fixed(minute).filter(|m| *m < 60).is_none() {
        return Err(unsupported());
    }
    if hour == "*" {
        return Ok(Duration::from_secs(3_600));
    }
    match step(hour) {
        Some(n) => bounded(n.checked_mul(3_600)),
        None => Err(unsupported()),
    }
}
