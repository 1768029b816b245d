//! error taxonomy for duel-escrow

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EscrowError>;

#[derive(Debug, Error)]
pub enum EscrowError {
    // === validation: malformed request, 400, no state touched ===
    #[error("validation failed: {0}")]
    Validation(String),

    // === not-found: unknown duel, 404 ===
    #[error("duel not found")]
    NotFound,

    // === precondition: wrong status, expired, already locked, wrong player ===
    #[error("{0}")]
    Precondition(String),

    // === external-transient: network/rate-limit/5xx from the transfer backend ===
    #[error("transfer backend transient error: {0}")]
    ExternalTransient(String),

    // === external-permanent: below minimum, insufficient balance, invalid proof ===
    #[error("transfer backend rejected request: {0}")]
    ExternalPermanent(String),

    // === accountability-publish: ledger submission failed, non-fatal ===
    #[error("ledger publication failed: {0}")]
    AccountabilityPublish(String),

    // === internal: uncaught, 500, no detail in production ===
    #[error("internal error: {0}")]
    Internal(String),

    // === auth: bad or missing internal secret ===
    #[error("unauthorized")]
    Unauthorized,

    // === rate limiting ===
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

impl EscrowError {
    fn status(&self) -> StatusCode {
        match self {
            EscrowError::Validation(_) => StatusCode::BAD_REQUEST,
            EscrowError::NotFound => StatusCode::NOT_FOUND,
            EscrowError::Precondition(_) => StatusCode::OK,
            EscrowError::ExternalTransient(_) => StatusCode::OK,
            EscrowError::ExternalPermanent(_) => StatusCode::OK,
            EscrowError::AccountabilityPublish(_) => StatusCode::OK,
            EscrowError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EscrowError::Unauthorized => StatusCode::UNAUTHORIZED,
            EscrowError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl IntoResponse for EscrowError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            EscrowError::RateLimited { retry_after_secs } => json!({
                "success": false,
                "error": self.to_string(),
                "retryAfter": retry_after_secs,
            }),
            EscrowError::Internal(_) => {
                tracing::error!(error = %self, "internal error");
                json!({ "success": false, "error": "internal error" })
            }
            _ => json!({ "success": false, "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
