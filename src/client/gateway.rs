use crate::{
    error::ErrorResponse,
    handlers::{AutoPayResponse, PaymentStatus, VerificationResponse, AUTO_PAY_KEY_HEADER},
    middleware::WALLET_HEADER,
    models::{ApiResponse, Challenge, TxHash, WalletAddress},
    services::AgentAnswer,
};
use anyhow::{Context, Result};
use reqwest::{Response, StatusCode};
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    Answered(AgentAnswer),
    PaymentRequired(Challenge),
}

/// Typed client for the gateway's HTTP surface.
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn query(&self, wallet: WalletAddress, query: &str) -> Result<QueryOutcome> {
        let response = self
            .http
            .post(self.url("/api/agent/query"))
            .header(WALLET_HEADER, wallet.to_string())
            .json(&json!({ "query": query }))
            .send()
            .await
            .context("Gateway unreachable")?;

        match response.status() {
            StatusCode::PAYMENT_REQUIRED => {
                let body: ErrorResponse = response.json().await?;
                let challenge = body
                    .challenge
                    .context("402 response carried no payment challenge")?;
                Ok(QueryOutcome::PaymentRequired(challenge))
            }
            status if status.is_success() => {
                let body: ApiResponse<AgentAnswer> = response.json().await?;
                Ok(QueryOutcome::Answered(body.data))
            }
            _ => Err(error_from(response).await),
        }
    }

    /// Submits a payment once. Rejections come back as values; only transport
    /// and input errors are `Err`.
    pub async fn verify_payment(
        &self,
        tx_hash: TxHash,
        wallet: WalletAddress,
    ) -> Result<VerificationResponse> {
        let response = self
            .http
            .post(self.url("/api/verify-payment"))
            .json(&json!({
                "transactionHash": tx_hash.to_string(),
                "walletAddress": wallet.to_string(),
            }))
            .send()
            .await
            .context("Gateway unreachable")?;

        let status = response.status();
        if !(status.is_success() || status == StatusCode::BAD_REQUEST) {
            return Err(error_from(response).await);
        }

        let bytes = response.bytes().await?;
        if let Ok(verification) = serde_json::from_slice::<VerificationResponse>(&bytes) {
            return Ok(verification);
        }
        match serde_json::from_slice::<ErrorResponse>(&bytes) {
            Ok(err) => anyhow::bail!("{} ({})", err.error, err.error_code),
            Err(_) => anyhow::bail!("Unexpected verify response: {}", String::from_utf8_lossy(&bytes)),
        }
    }

    /// Resubmits while the gateway reports a retryable outcome (not yet visible or mined).
    pub async fn verify_until_settled(
        &self,
        tx_hash: TxHash,
        wallet: WalletAddress,
        attempts: usize,
        delay: Duration,
    ) -> Result<VerificationResponse> {
        let mut last = self.verify_payment(tx_hash, wallet).await?;
        for _ in 1..attempts {
            if !last.retryable {
                break;
            }
            tracing::debug!(tx_hash = %tx_hash, reason = ?last.reason, "Verification not settled, retrying");
            tokio::time::sleep(delay).await;
            last = self.verify_payment(tx_hash, wallet).await?;
        }
        Ok(last)
    }

    pub async fn auto_pay(&self, wallet: WalletAddress, api_key: Option<&str>) -> Result<AutoPayResponse> {
        let mut request = self
            .http
            .post(self.url("/api/agent-auto-pay"))
            .json(&json!({ "walletAddress": wallet.to_string() }));
        if let Some(key) = api_key {
            request = request.header(AUTO_PAY_KEY_HEADER, key);
        }

        let response = request.send().await.context("Gateway unreachable")?;
        let status = response.status();
        let bytes = response.bytes().await?;

        // failed payments still answer with the auto-pay shape
        if let Ok(body) = serde_json::from_slice::<AutoPayResponse>(&bytes) {
            return Ok(body);
        }
        match serde_json::from_slice::<ErrorResponse>(&bytes) {
            Ok(err) => anyhow::bail!("{} ({})", err.error, err.error_code),
            Err(_) => anyhow::bail!("Auto-pay failed with {}", status),
        }
    }

    pub async fn has_credit(&self, wallet: WalletAddress) -> Result<bool> {
        let response = self
            .http
            .get(self.url("/api/payment-status"))
            .query(&[("walletAddress", wallet.to_string())])
            .send()
            .await
            .context("Gateway unreachable")?;

        if !response.status().is_success() {
            return Err(error_from(response).await);
        }
        let body: ApiResponse<PaymentStatus> = response.json().await?;
        Ok(body.data.has_credit)
    }
}

async fn error_from(response: Response) -> anyhow::Error {
    let status = response.status();
    match response.json::<ErrorResponse>().await {
        Ok(err) => anyhow::anyhow!("{} {} ({})", status, err.error, err.error_code),
        Err(_) => anyhow::anyhow!("Gateway returned {}", status),
    }
}
