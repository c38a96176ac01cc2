//! KPI counters, either counted from the CSV files or asked of the graph.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::config::KpiMode;
use crate::records::{compute_kpis, extract_number, read_records, KpiResponse};
use crate::retrieval::GraphCompletionRetriever;
use crate::{Error, Result};

pub const INVOICES_QUESTION: &str = "How many invoices are in the system? Give me just the number.";
pub const TRANSACTIONS_QUESTION: &str =
    "How many transactions are in the system? Give me just the number.";
pub const ANOMALIES_QUESTION: &str =
    "How many payment discrepancies or mismatches are there? Give me just the number.";
pub const VENDORS_QUESTION: &str =
    "How many unique vendors are in the system? Give me just the number.";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/kpis", get(kpis))
        .route("/health", get(health))
}

async fn kpis(State(state): State<AppState>) -> ApiResult<Json<KpiResponse>> {
    match state.config.kpi_mode {
        KpiMode::Csv => csv_kpis(&state).map(Json),
        KpiMode::Graph => graph_kpis(&state.kpi)
            .await
            .map(Json)
            .map_err(|e| ApiError::internal(format!("Error fetching KPIs: {}", e))),
    }
}

fn csv_kpis(state: &AppState) -> ApiResult<KpiResponse> {
    let read = || -> Result<KpiResponse> {
        let invoices = read_records(&state.config.invoices_path, b',')?;
        let transactions = read_records(&state.config.transactions_path, b',')?;
        Ok(compute_kpis(&invoices, &transactions))
    };

    read().map_err(|err| match err {
        Error::NotFound(_) => ApiError::not_found(
            "CSV files not found. Make sure new_invoices.csv and new_transactions.csv exist.",
        ),
        other => ApiError::internal(format!("Error calculating KPIs: {}", other)),
    })
}

async fn ask(retriever: &GraphCompletionRetriever, question: &str) -> Result<u64> {
    let answers = retriever.get_completion(question, None, None).await?;
    Ok(answers.first().map(|a| extract_number(a)).unwrap_or(0))
}

/// Ask the four counting questions concurrently.
pub async fn graph_kpis(retriever: &GraphCompletionRetriever) -> Result<KpiResponse> {
    let (total_invoices, total_transactions, anomalies, total_vendors) = tokio::try_join!(
        ask(retriever, INVOICES_QUESTION),
        ask(retriever, TRANSACTIONS_QUESTION),
        ask(retriever, ANOMALIES_QUESTION),
        ask(retriever, VENDORS_QUESTION),
    )?;

    Ok(KpiResponse {
        total_invoices,
        total_transactions,
        anomalies,
        total_vendors,
    })
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let message = match state.config.kpi_mode {
        KpiMode::Csv => "Simple KPI API is running",
        KpiMode::Graph => "KPI API is running",
    };
    Json(json!({ "status": "healthy", "message": message }))
}
