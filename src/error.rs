use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Read-only RPC call or receipt lookup failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Dry-run of a state-changing call reverted; nothing was broadcast.
    #[error("Simulation reverted: {0}")]
    Simulation(String),

    /// Signing or broadcasting failed after a successful simulation.
    #[error("Submission error: {0}")]
    Submission(String),

    #[error("Indexer error: {0}")]
    Indexer(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
