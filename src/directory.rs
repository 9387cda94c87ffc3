use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::{Config, INDEXER_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::types::{DeployedMarket, InitialisedMarket, MarketListing, RaffleWinner};

/// Source of deployed markets and recorded raffle winners.
#[async_trait]
pub trait MarketDirectory: Send + Sync {
    /// Deployed markets (newest first) plus their initialisation records.
    async fn fetch_markets(&self) -> Result<MarketListing>;

    /// Most recent winner recorded for `market` at `interval`, if any.
    async fn recent_raffle_winner(&self, market: Address, interval: u16) -> Result<Option<RaffleWinner>>;
}

const MARKETS_QUERY: &str = r#"
query KuriMarkets {
  KuriCoreFactory_KuriMarketDeployed(order_by: { timestamp: desc }) {
    id
    caller
    marketAddress
    intervalType
    timestamp
    wannabeMember
    circleCurrencyAddress
  }
  KuriCore_KuriInitialised {
    id
    _kuriData_0
    _kuriData_1
    _kuriData_2
    _kuriData_3
    _kuriData_4
    _kuriData_5
    _kuriData_6
    _kuriData_7
    _kuriData_8
    _kuriData_9
    _kuriData_10
    _kuriData_11
    contractAddress
  }
}
"#;

const RAFFLE_WINNER_QUERY: &str = r#"
query RecentRaffleWinner($market: String!, $interval: Int!) {
  KuriCore_RaffleWinnerSelected(
    where: { contractAddress: { _eq: $market }, intervalIndex: { _eq: $interval } }
    order_by: { winnerTimestamp: desc }
    limit: 1
  ) {
    id
    intervalIndex
    winnerIndex
    winnerAddress
    winnerTimestamp
    requestId
  }
}
"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct MarketsData {
    #[serde(rename = "KuriCoreFactory_KuriMarketDeployed", default)]
    deployed: Vec<DeployedMarket>,
    #[serde(rename = "KuriCore_KuriInitialised", default)]
    initialised: Vec<InitialisedMarket>,
}

#[derive(Debug, Deserialize)]
struct RaffleWinnerData {
    #[serde(rename = "KuriCore_RaffleWinnerSelected", default)]
    winners: Vec<RaffleWinner>,
}

/// GraphQL client for the Envio indexer.
#[derive(Clone)]
pub struct IndexerClient {
    endpoint: String,
    http: reqwest::Client,
}

impl IndexerClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(INDEXER_TIMEOUT_SECS))
            .build()?;
        Ok(Self { endpoint: cfg.subgraph_url.clone(), http })
    }

    async fn query<T: DeserializeOwned>(&self, query: &str, variables: serde_json::Value) -> Result<T> {
        let body = serde_json::json!({ "query": query, "variables": variables });
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let bytes = resp.bytes().await?;
        decode_response(&bytes)
    }
}

/// Unwrap a GraphQL envelope: any reported error, or a missing `data` member, fails the query.
fn decode_response<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let envelope: GraphQlResponse<T> = serde_json::from_slice(bytes)?;
    if !envelope.errors.is_empty() {
        let messages: Vec<&str> = envelope.errors.iter().map(|e| e.message.as_str()).collect();
        return Err(AppError::Indexer(messages.join("; ")));
    }
    envelope
        .data
        .ok_or_else(|| AppError::Indexer("response carried no data".to_string()))
}

#[async_trait]
impl MarketDirectory for IndexerClient {
    async fn fetch_markets(&self) -> Result<MarketListing> {
        let data: MarketsData = self.query(MARKETS_QUERY, serde_json::json!({})).await?;
        debug!(
            deployed = data.deployed.len(),
            initialised = data.initialised.len(),
            "Indexer returned market listing"
        );
        Ok(MarketListing { deployed: data.deployed, initialised: data.initialised })
    }

    async fn recent_raffle_winner(&self, market: Address, interval: u16) -> Result<Option<RaffleWinner>> {
        let data: RaffleWinnerData = self
            .query(
                RAFFLE_WINNER_QUERY,
                serde_json::json!({ "market": market.to_string(), "interval": interval }),
            )
            .await?;
        Ok(data.winners.into_iter().next())
    }
}
