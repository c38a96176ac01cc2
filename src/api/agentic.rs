//! `POST /query`: question in, answer out.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub question: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/query", post(query))
}

async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<QueryResponse>> {
    let completions = state
        .agentic
        .get_completion(&request.question, None, None)
        .await
        .map_err(|e| ApiError::internal(format!("Error processing query: {}", e)))?;

    let answer = completions
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::internal("No response generated from retriever"))?;

    Ok(Json(QueryResponse {
        answer,
        question: request.question,
    }))
}
