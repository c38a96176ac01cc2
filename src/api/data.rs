//! Raw invoice and transaction records from the CSV files.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::records::{read_records, Record};
use crate::Error;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/invoices", get(invoices))
        .route("/transactions", get(transactions))
}

async fn invoices(State(state): State<AppState>) -> ApiResult<Json<Vec<Record>>> {
    load(&state.config.invoices_path, "Invoices", "invoices")
}

async fn transactions(State(state): State<AppState>) -> ApiResult<Json<Vec<Record>>> {
    load(&state.config.transactions_path, "Transactions", "transactions")
}

fn load(path: &std::path::Path, title: &str, noun: &str) -> ApiResult<Json<Vec<Record>>> {
    match read_records(path, b',') {
        Ok(records) => Ok(Json(records)),
        Err(Error::NotFound(_)) => Err(ApiError::not_found(format!("{} file not found", title))),
        Err(err) => Err(ApiError::internal(format!("Error reading {}: {}", noun, err))),
    }
}
