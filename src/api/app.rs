//! Top-level application: mounts every service under its prefix.

use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::state::AppState;
use super::{agentic, data, graph, kpi, main_api};
use crate::metrics;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/data", data::router())
        .nest("/kpi", kpi::router())
        .nest("/graph", graph::router())
        .nest("/api", main_api::router())
        .merge(agentic::router())
        .layer(middleware::from_fn(track_request))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Route-labelled request metrics. Unmatched paths share one label.
async fn track_request(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let inflight = metrics::record_request_start(&route);
    let response = next.run(request).await;
    inflight.finish(!response.status().is_server_error());
    response
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "FinanceX API - Invoice Reconciliation System",
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "data": {
                "path": "/data",
                "description": "CSV data access (invoices & transactions)"
            },
            "kpi": {
                "path": "/kpi",
                "description": "KPI metrics"
            },
            "graph": {
                "path": "/graph",
                "description": "Knowledge graph visualization data"
            },
            "main": {
                "path": "/api",
                "description": "Chat & data ingestion endpoints"
            },
            "query": {
                "path": "/query",
                "description": "Question answering over the knowledge graph"
            }
        }
    }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "services": {
            "data": "running",
            "kpi": "running",
            "graph": "running",
            "main": "running"
        }
    }))
}

/// Serve until Ctrl+C.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "FinanceX API listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("FinanceX API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
