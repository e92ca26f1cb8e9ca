use crate::{
    app::AppState,
    error::AppError,
    middleware::PaidWallet,
    models::ApiResponse,
    services::AgentAnswer,
};
use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct AgentQueryRequest {
    pub query: Option<String>,
}

/// POST /api/agent/query, behind the access gate.
pub async fn agent_query(
    State(state): State<AppState>,
    Extension(PaidWallet(wallet)): Extension<PaidWallet>,
    Json(body): Json<AgentQueryRequest>,
) -> Result<Json<ApiResponse<AgentAnswer>>, AppError> {
    let query = body
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| AppError::InvalidInput("query is required".to_string()))?;

    let answer = state.agent.answer(wallet, query).await?;
    Ok(Json(ApiResponse::ok(answer)))
}
