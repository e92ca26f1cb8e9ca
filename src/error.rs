use crate::models::{Challenge, FormatError};
use crate::services::chain::ChainError;
use crate::services::ledger::LedgerError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Payment required: {} {}", .0.required_amount_native, .0.asset)]
    PaymentRequired(Box<Challenge>),

    #[error("Invalid request: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    InvalidFormat(#[from] FormatError),

    #[error("Auto-pay authorization required")]
    Unauthorized,

    #[error("Auto-pay is not configured on this service")]
    AutoPayDisabled,

    #[error("Chain RPC error: {0}")]
    Chain(#[from] ChainError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Upstream agent error: {0}")]
    Upstream(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Internal server error: {0}")]
    InternalError(String),
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub error_code: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub request_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<Challenge>,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::InvalidInput(_) | AppError::InvalidFormat(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            AppError::AutoPayDisabled | AppError::Chain(_) | AppError::Ledger(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::PaymentRequired(_) => "PAYMENT_REQUIRED",
            AppError::InvalidInput(_) => "INVALID_REQUEST",
            AppError::InvalidFormat(FormatError::Address(_)) => "INVALID_ADDRESS",
            AppError::InvalidFormat(FormatError::TxHash(_)) => "INVALID_TX_HASH",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::AutoPayDisabled => "AUTO_PAY_DISABLED",
            AppError::Chain(_) => "CHAIN_UNAVAILABLE",
            AppError::Ledger(_) => "SERVICE_UNAVAILABLE",
            AppError::Upstream(_) => "UPSTREAM_ERROR",
            AppError::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        // Infrastructure faults are reported generically; details stay in the logs.
        let message = match &self {
            AppError::Ledger(_) => "Service temporarily unavailable".to_string(),
            AppError::InternalError(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = ?self, error_code, "Request failed");
        } else {
            tracing::debug!(error = %self, error_code, "Request rejected");
        }

        let challenge = match self {
            AppError::PaymentRequired(challenge) => Some(*challenge),
            _ => None,
        };

        let body = ErrorResponse {
            success: false,
            error: message,
            error_code: error_code.to_string(),
            timestamp: Utc::now(),
            request_id: Uuid::new_v4().to_string(),
            challenge,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_and_infrastructure_errors_map_to_distinct_statuses() {
        assert_eq!(
            AppError::InvalidFormat(FormatError::Address("0x1".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Ledger(LedgerError::Unavailable("down".into())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Chain(ChainError::Unavailable("timeout".into())).error_code(),
            "CHAIN_UNAVAILABLE"
        );
        assert_eq!(AppError::RateLimitExceeded.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn ledger_failures_do_not_leak_details() {
        let response = AppError::Ledger(LedgerError::Unavailable("redis at 10.0.0.3 refused".into()))
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(!body.error.contains("10.0.0.3"));
        assert_eq!(body.error_code, "SERVICE_UNAVAILABLE");
    }
}
