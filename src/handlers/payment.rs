use crate::{
    app::AppState,
    error::AppError,
    models::{ApiResponse, PaymentCredit, TxHash, WalletAddress},
    services::{PayOutcome, RejectionReason, VerificationOutcome, WalletInfo},
};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

pub const AUTO_PAY_KEY_HEADER: &str = "x-auto-pay-key";

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    pub transaction_hash: Option<String>,
    pub wallet_address: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectionReason>,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit: Option<PaymentCredit>,
}

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AutoPayRequest {
    pub wallet_address: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoPayResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<TxHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_native: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<WalletAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusQuery {
    pub wallet_address: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatus {
    pub wallet_address: WalletAddress,
    pub has_credit: bool,
}

fn required<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str, AppError> {
    field
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::InvalidInput(format!("{} is required", name)))
}

/// POST /api/verify-payment
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(body): Json<VerifyPaymentRequest>,
) -> Result<Response, AppError> {
    let tx_hash = TxHash::parse(required(&body.transaction_hash, "transactionHash")?)?;
    let wallet = WalletAddress::parse(required(&body.wallet_address, "walletAddress")?)?;

    let response = match state.verifier.verify(tx_hash, wallet).await? {
        VerificationOutcome::Verified(credit) => (
            StatusCode::OK,
            Json(VerificationResponse {
                success: true,
                message: "Payment verified. You can now submit your query.".to_string(),
                reason: None,
                retryable: false,
                credit: Some(credit),
            }),
        ),
        VerificationOutcome::Rejected(rejection) => {
            let retryable = rejection.reason.is_retryable();
            let status = if retryable {
                StatusCode::ACCEPTED
            } else {
                StatusCode::BAD_REQUEST
            };
            (
                status,
                Json(VerificationResponse {
                    success: false,
                    message: rejection.message,
                    reason: Some(rejection.reason),
                    retryable,
                    credit: None,
                }),
            )
        }
    };

    Ok(response.into_response())
}

/// POST /api/agent-auto-pay
///
/// Pays from the service wallet and credits the requesting wallet. Guarded by
/// a shared key when one is configured.
pub async fn auto_pay(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AutoPayRequest>,
) -> Result<Response, AppError> {
    let payer = state.payer.as_ref().ok_or(AppError::AutoPayDisabled)?;

    if let Some(expected) = state.auto_pay_key.as_deref() {
        let presented = headers
            .get(AUTO_PAY_KEY_HEADER)
            .and_then(|h| h.to_str().ok());
        if presented != Some(expected) {
            tracing::warn!("Auto-pay request with missing or wrong key");
            return Err(AppError::Unauthorized);
        }
    }

    let wallet = WalletAddress::parse(required(&body.wallet_address, "walletAddress")?)?;
    tracing::info!(wallet = %wallet, "Auto-pay requested");

    let receipt = match payer.pay().await? {
        PayOutcome::Paid(receipt) => receipt,
        PayOutcome::Failed(failure) => {
            let status = match failure.tx_hash() {
                Some(_) => StatusCode::BAD_GATEWAY,
                None => StatusCode::SERVICE_UNAVAILABLE,
            };
            let body = AutoPayResponse {
                success: false,
                message: failure.message(),
                transaction_hash: failure.tx_hash(),
                amount_native: None,
                block_number: None,
                wallet_address: Some(wallet),
                error_code: Some(failure.code().to_string()),
            };
            return Ok((status, Json(body)).into_response());
        }
    };

    let failure = match state.verifier.issue_trusted(wallet, &receipt).await {
        Ok(VerificationOutcome::Verified(credit)) => {
            let body = AutoPayResponse {
                success: true,
                message: "Payment sent and credited. You can now submit your query.".to_string(),
                transaction_hash: Some(credit.transaction_hash),
                amount_native: Some(credit.amount_native),
                block_number: Some(credit.block_number),
                wallet_address: Some(credit.wallet_address),
                error_code: None,
            };
            return Ok((StatusCode::OK, Json(body)).into_response());
        }
        Ok(VerificationOutcome::Rejected(rejection)) => rejection.message,
        Err(e) => e.to_string(),
    };

    // The transfer is final on-chain; the hash is the caller's only handle on it.
    tracing::error!(
        tx_hash = %receipt.tx_hash,
        wallet = %wallet,
        error = %failure,
        "Auto-payment confirmed but not credited"
    );
    let body = AutoPayResponse {
        success: false,
        message: format!(
            "Payment {} was sent but could not be credited. Contact the operator with this transaction hash.",
            receipt.tx_hash
        ),
        transaction_hash: Some(receipt.tx_hash),
        amount_native: Some(receipt.amount_native),
        block_number: Some(receipt.block_number),
        wallet_address: Some(wallet),
        error_code: Some("CREDIT_FAILED".to_string()),
    };
    Ok((StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response())
}

/// GET /api/agent-wallet-info
pub async fn wallet_info(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<WalletInfo>>, AppError> {
    let payer = state.payer.as_ref().ok_or(AppError::AutoPayDisabled)?;
    Ok(Json(ApiResponse::ok(payer.wallet_info().await?)))
}

/// GET /api/payment-status?walletAddress=
pub async fn payment_status(
    State(state): State<AppState>,
    Query(query): Query<PaymentStatusQuery>,
) -> Result<Json<ApiResponse<PaymentStatus>>, AppError> {
    let wallet = WalletAddress::parse(required(&query.wallet_address, "walletAddress")?)?;
    let has_credit = state.ledger.has_unused(&wallet).await?;

    Ok(Json(ApiResponse::ok(PaymentStatus {
        wallet_address: wallet,
        has_credit,
    })))
}
