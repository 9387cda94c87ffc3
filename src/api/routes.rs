use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::TxHash;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tracing::debug;

use crate::api::health::{HealthSnapshot, HealthState};
use crate::api::latency::{LatencyStats, LatencySummary};
use crate::config::DASHBOARD_PUSH_INTERVAL_SECS;
use crate::error::AppError;
use crate::funding::SubscriptionFunder;
use crate::supervisor::{now_secs, TransactionSupervisor};
use crate::types::TransactionStatus;

#[derive(Clone)]
pub struct ApiState {
    pub health: Arc<HealthState>,
    pub supervisor: Arc<TransactionSupervisor>,
    pub funder: Arc<SubscriptionFunder>,
    pub latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/transactions", get(get_transactions))
        .route("/transactions/:hash", get(get_transaction))
        .route("/subscriptions", get(get_subscriptions))
        .route("/stats/latency", get(get_stats_latency))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct FailedAttempts {
    pub subscription_id: String,
    pub attempts: u32,
}

#[derive(Serialize)]
pub struct SubscriptionsResponse {
    pub funded: Vec<String>,
    pub failed_attempts: Vec<FailedAttempts>,
}

#[derive(Serialize)]
pub struct DashboardUpdate {
    pub health: HealthSnapshot,
    pub transactions: Vec<TransactionStatus>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn health_snapshot(state: &ApiState) -> HealthSnapshot {
    state.health.snapshot(now_secs(), state.supervisor.pending_count())
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthSnapshot> {
    Json(health_snapshot(&state))
}

async fn get_transactions(State(state): State<ApiState>) -> Json<Vec<TransactionStatus>> {
    Json(state.supervisor.snapshot())
}

async fn get_transaction(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
) -> Result<Json<TransactionStatus>, AppError> {
    let parsed: TxHash = hash
        .parse()
        .map_err(|_| AppError::NotFound(format!("transaction {hash}")))?;
    state
        .supervisor
        .get(&parsed)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("transaction {hash}")))
}

async fn get_subscriptions(State(state): State<ApiState>) -> Json<SubscriptionsResponse> {
    let funded = state
        .funder
        .store()
        .snapshot()
        .into_iter()
        .map(|id| id.to_string())
        .collect();
    let failed_attempts = state
        .funder
        .failed_attempts()
        .into_iter()
        .map(|(id, attempts)| FailedAttempts { subscription_id: id.to_string(), attempts })
        .collect();
    Json(SubscriptionsResponse { funded, failed_attempts })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySummary> {
    Json(state.latency.summary())
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(move |socket| push_updates(socket, state))
}

/// Push a dashboard snapshot every few seconds until the client goes away.
async fn push_updates(socket: WebSocket, state: ApiState) {
    let (mut sender, mut receiver) = socket.split();
    let mut ticker = tokio::time::interval(Duration::from_secs(DASHBOARD_PUSH_INTERVAL_SECS));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let update = DashboardUpdate {
                    health: health_snapshot(&state),
                    transactions: state.supervisor.snapshot(),
                };
                let Ok(text) = serde_json::to_string(&update) else { continue };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("Dashboard websocket closed");
}
