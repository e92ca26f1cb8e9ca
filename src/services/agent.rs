use crate::error::AppError;
use crate::models::WalletAddress;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentAnswer {
    pub response: String,
    pub wallet_address: WalletAddress,
    pub source: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpstreamRequest<'a> {
    query: &'a str,
    wallet_address: WalletAddress,
}

#[derive(Deserialize)]
struct UpstreamReply {
    response: String,
}

/// Adapter to whatever produces answers for admitted queries.
///
/// The gate has already consumed a credit by the time `answer` runs, so this
/// never touches the ledger.
pub struct AgentBackend {
    client: reqwest::Client,
    upstream: Option<String>,
}

impl AgentBackend {
    pub fn new(upstream: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, upstream })
    }

    pub async fn answer(&self, wallet: WalletAddress, query: &str) -> Result<AgentAnswer, AppError> {
        let Some(url) = &self.upstream else {
            return Ok(AgentAnswer {
                response: format!("Query received and paid for: {}", query),
                wallet_address: wallet,
                source: "local".to_string(),
            });
        };

        let resp = self
            .client
            .post(url)
            .json(&UpstreamRequest {
                query,
                wallet_address: wallet,
            })
            .send()
            .await
            .map_err(|e| AppError::Upstream(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AppError::Upstream(format!(
                "agent backend returned {}",
                resp.status()
            )));
        }

        let reply: UpstreamReply = resp
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("malformed agent reply: {}", e)))?;

        tracing::debug!(wallet = %wallet, "Agent backend answered query");

        Ok(AgentAnswer {
            response: reply.response,
            wallet_address: wallet,
            source: "upstream".to_string(),
        })
    }
}
