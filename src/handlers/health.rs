use crate::{app::AppState, models::HealthStatus};
use axum::{extract::State, Json};
use chrono::Utc;

pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    let (ledger_ok, latest_block) =
        tokio::join!(state.ledger.ping(), state.chain.block_number());
    let latest_block = latest_block.ok();
    let chain_ok = latest_block.is_some();

    // without the chain the gate still admits prepaid wallets
    let status = if ledger_ok && chain_ok {
        "healthy"
    } else if ledger_ok {
        "degraded"
    } else {
        "unhealthy"
    };

    if status != "healthy" {
        tracing::warn!(ledger = ledger_ok, chain_rpc = chain_ok, "Health check {}", status);
    }

    Json(HealthStatus {
        status: status.to_string(),
        service: "x402-agent".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        network: state.terms.network.clone(),
        chain_id: state.terms.chain_id,
        ledger: ledger_ok,
        chain_rpc: chain_ok,
        latest_block,
        uptime_seconds: state.analytics.uptime_seconds(),
        timestamp: Utc::now(),
    })
}
