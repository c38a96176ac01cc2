//! Integration tests for the FinanceX HTTP services
//!
//! Requests go through the full router with an in-memory knowledge store,
//! heuristic extraction and mocked Ollama / Mistral servers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use httpmock::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use financex::api::{build_router, AppState};
use financex::config::{Config, KpiMode};
use financex::knowledge::{KnowledgeStore, StoreOptions};

const BOUNDARY: &str = "financex-test-boundary";

fn manifest_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

fn test_config(dir: &Path) -> Config {
    let mut config = Config::defaults();
    config.prompts_dir = manifest_dir().join("prompts");
    config.invoices_path = manifest_dir().join("data/new_invoices.csv");
    config.transactions_path = manifest_dir().join("data/new_transactions.csv");
    config.visualization_dir = dir.join("visualizations");
    config.kpi_mode = KpiMode::Csv;
    config.mistral_api_key = None;
    config.cache_enabled = false;
    config.save_interaction = false;
    config.storage_dir = None;
    config
}

fn app_with(config: Config) -> (Router, Arc<KnowledgeStore>) {
    let store = Arc::new(KnowledgeStore::offline(StoreOptions::default()).unwrap());
    let state = AppState::new(config, store.clone()).unwrap();
    (build_router(state), store)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_multipart<B: AsRef<[u8]>>(
    uri: &str,
    fields: &[(&str, &str)],
    file: Option<(&str, B)>,
) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((filename, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes.as_ref());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn mock_ollama_answer<'a>(server: &'a MockServer, answer: &str) -> httpmock::Mock<'a> {
    server.mock(|when, then| {
        when.method(POST).path("/api/chat");
        then.status(200)
            .json_body(json!({ "message": { "role": "assistant", "content": answer } }));
    })
}

async fn seed(store: &KnowledgeStore) {
    store
        .add(
            vec![
                "invoice_id: INV-V4-M03-326250, vendor_id: 4, product: MacBook Pro 16, total: 2799".to_string(),
                "transaction_id: TX-V4-M03-250998, vendor_id: 4, amount: 2700, reference: INV-V4-M03-326250".to_string(),
            ],
            "invoice",
        )
        .await;
    store.cognify(None).await.unwrap();
}

// ============================================================================
// Top-level app
// ============================================================================

#[tokio::test]
async fn test_root_lists_services() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app_with(test_config(dir.path()));

    let (status, body) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    for service in ["data", "kpi", "graph", "main"] {
        assert!(body["services"][service]["path"].is_string(), "{}", service);
    }
}

#[tokio::test]
async fn test_health_endpoints() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app_with(test_config(dir.path()));

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (_, body) = send(&app, get("/api/health")).await;
    assert_eq!(body["service"], "FinanceX API");

    let (_, body) = send(&app, get("/graph/health")).await;
    assert_eq!(body, json!({ "status": "healthy", "message": "Graph API is running" }));

    let (_, body) = send(&app, get("/kpi/health")).await;
    assert_eq!(body["message"], "Simple KPI API is running");
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app_with(test_config(dir.path()));

    let (status, _) = send(&app, get("/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Data service
// ============================================================================

#[tokio::test]
async fn test_invoices_are_served_as_records() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app_with(test_config(dir.path()));

    let (status, body) = send(&app, get("/data/invoices")).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0]["invoice_id"], "INV-V2-M02-828264");
    assert_eq!(rows[0]["vendor_id"], 2);
}

#[tokio::test]
async fn test_missing_transactions_file_is_404() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.transactions_path = dir.path().join("missing.csv");
    let (app, _) = app_with(config);

    let (status, body) = send(&app, get("/data/transactions")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Transactions file not found");
}

// ============================================================================
// KPI service
// ============================================================================

#[tokio::test]
async fn test_csv_kpis() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app_with(test_config(dir.path()));

    let (status, body) = send(&app, get("/kpi/kpis")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "total_invoices": 4,
            "total_transactions": 4,
            "anomalies": 2,
            "total_vendors": 4
        })
    );
}

#[tokio::test]
async fn test_csv_kpis_missing_files() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.invoices_path = dir.path().join("nope.csv");
    let (app, _) = app_with(config);

    let (status, body) = send(&app, get("/kpi/kpis")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body["detail"],
        "CSV files not found. Make sure new_invoices.csv and new_transactions.csv exist."
    );
}

#[tokio::test]
async fn test_graph_kpis_parse_numbers_from_answers() {
    let server = MockServer::start_async().await;
    mock_ollama_answer(&server, "There are 7 of them.");

    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.kpi_mode = KpiMode::Graph;
    config.llm_endpoint = server.base_url();
    let (app, _) = app_with(config);

    let (status, body) = send(&app, get("/kpi/kpis")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_invoices"], 7);
    assert_eq!(body["total_vendors"], 7);
}

// ============================================================================
// Graph service
// ============================================================================

#[tokio::test]
async fn test_sample_graph() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app_with(test_config(dir.path()));

    let (status, body) = send(&app, get("/graph/graph")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nodes"].as_array().unwrap().len(), 16);
    assert_eq!(body["edges"].as_array().unwrap().len(), 16);
    assert_eq!(body["stats"]["vendors"], 4);
    assert_eq!(body["stats"]["total_edges"], 16);
}

#[tokio::test]
async fn test_live_graph_follows_the_store() {
    let dir = TempDir::new().unwrap();
    let (app, store) = app_with(test_config(dir.path()));

    let (_, body) = send(&app, get("/graph/graph?source=live")).await;
    assert_eq!(body["stats"]["total_nodes"], 0);

    seed(&store).await;
    let (status, body) = send(&app, get("/graph/graph?source=live")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["stats"]["total_nodes"].as_u64().unwrap() > 0);
    assert!(body["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .any(|n| n["label"] == "INV-V4-M03-326250" && n["type"] == "invoice"));

    let (status, _) = send(&app, get("/graph/graph?source=bogus")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Ingestion
// ============================================================================

#[tokio::test]
async fn test_ingest_text_builds_graph() {
    let dir = TempDir::new().unwrap();
    let (app, store) = app_with(test_config(dir.path()));

    let request = post_json(
        "/api/v1/ingest/text",
        json!({
            "text": "invoice_id: INV-1, vendor_id: 9, total: 10\n\n   \ninvoice_id: INV-2, vendor_id: 9, total: 20",
            "data_type": "invoice"
        }),
    );
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items_processed"], 2);
    assert_eq!(body["message"], "Successfully ingested 2 invoice items");
    assert_eq!(body["data_type"], "invoice");

    let stats = store.stats().await;
    assert!(stats.graph.total_nodes >= 3);
    assert_eq!(stats.pending_items, 0);
}

#[tokio::test]
async fn test_ingest_text_rejects_invalid_data_type() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app_with(test_config(dir.path()));

    let request = post_json("/api/v1/ingest/text", json!({ "text": "x", "data_type": "receipt" }));
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["detail"],
        "Invalid data_type: receipt. Must be 'invoice' or 'transaction'"
    );
}

#[tokio::test]
async fn test_ingest_text_rejects_blank_text() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app_with(test_config(dir.path()));

    let request = post_json("/api/v1/ingest/text", json!({ "text": " \n \n" }));
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "No text content provided");
}

#[tokio::test]
async fn test_ingest_csv_transactions_switch_to_semicolon() {
    let dir = TempDir::new().unwrap();
    let (app, store) = app_with(test_config(dir.path()));

    let csv = b"transaction_id;vendor_id;amount;reference\nTX-1;2;899.00;INV-1\nTX-2;3;10.00;INV-2\n";
    let request = post_multipart(
        "/api/v1/ingest/csv",
        &[("data_type", "transaction"), ("delimiter", ",")],
        Some(("tx.csv", csv)),
    );
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["items_processed"], 2);
    assert_eq!(body["message"], "Successfully ingested 2 transaction items from CSV");
    assert!(store.stats().await.graph.total_nodes > 0);
}

#[tokio::test]
async fn test_ingest_csv_respects_max_rows() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app_with(test_config(dir.path()));

    let csv = std::fs::read(manifest_dir().join("data/new_invoices.csv")).unwrap();
    let request = post_multipart(
        "/api/v1/ingest/csv",
        &[("data_type", "invoice"), ("max_rows", "2")],
        Some(("invoices.csv", csv)),
    );
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items_processed"], 2);
}

#[tokio::test]
async fn test_ingest_csv_header_only_is_400() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app_with(test_config(dir.path()));

    let request = post_multipart(
        "/api/v1/ingest/csv",
        &[("data_type", "invoice")],
        Some(("empty.csv", b"invoice_id,total\n")),
    );
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "CSV file is empty or could not be parsed");
}

#[tokio::test]
async fn test_ingest_pdf_without_ocr_key_is_500() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app_with(test_config(dir.path()));

    let request = post_multipart("/api/v1/ingest/pdf", &[], Some(("a.pdf", b"%PDF")));
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].as_str().unwrap().contains("MISTRAL_API_KEY"));
}

#[tokio::test]
async fn test_ingest_pdf_validates_upload() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.mistral_api_key = Some("test-key".to_string());
    let (app, _) = app_with(config);

    let request = post_multipart("/api/v1/ingest/pdf", &[], Some(("a.txt", b"hello")));
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "File must be a PDF (.pdf)");

    let request = post_multipart("/api/v1/ingest/pdf", &[], Some(("a.pdf", b"")));
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "PDF file is empty");
}

#[tokio::test]
async fn test_ingest_pdf_through_mocked_ocr() {
    let server = MockServer::start_async().await;
    let ocr = server.mock(|when, then| {
        when.method(POST).path("/v1/ocr");
        then.status(200).json_body(json!({
            "pages": [
                { "index": 0, "markdown": "invoice_id: INV-7, vendor_id: 7, total: 70\n\nDue in 30 days" }
            ]
        }));
    });

    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.mistral_api_key = Some("test-key".to_string());
    config.mistral_base_url = server.base_url();
    let (app, _) = app_with(config);

    let request = post_multipart(
        "/api/v1/ingest/pdf",
        &[("data_type", "invoice")],
        Some(("scan.pdf", b"%PDF-1.4")),
    );
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["items_processed"], 2);
    assert_eq!(
        body["message"],
        "Successfully ingested PDF 'scan.pdf' (2 text chunks) as invoice"
    );
    ocr.assert_calls(1);
}

#[tokio::test]
async fn test_ingest_image_checks_extension() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.mistral_api_key = Some("test-key".to_string());
    let (app, _) = app_with(config);

    let request = post_multipart("/api/v1/ingest/image", &[], Some(("scan.tiff", b"II*")));
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .starts_with("File must be an image. Allowed formats: .jpg"));
}

#[tokio::test]
async fn test_ingest_image_through_mocked_ocr() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/v1/ocr").is_true(|req| {
            let body: Value = serde_json::from_slice(req.body().as_ref()).unwrap();
            body["document"]["image_url"]
                .as_str()
                .is_some_and(|url| url.starts_with("data:image/png;base64,"))
        });
        then.status(200).json_body(json!({
            "pages": [{ "index": 0, "markdown": "transaction_id: TX-5, vendor_id: 5, amount: 50" }]
        }));
    });

    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.mistral_api_key = Some("test-key".to_string());
    config.mistral_base_url = server.base_url();
    let (app, _) = app_with(config);

    let request = post_multipart(
        "/api/v1/ingest/image",
        &[("data_type", "transaction")],
        Some(("receipt.PNG", b"\x89PNG")),
    );
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["items_processed"], 1);
    assert_eq!(body["data_type"], "transaction");
}

// ============================================================================
// Chat and query
// ============================================================================

#[tokio::test]
async fn test_chat_rejects_empty_query() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app_with(test_config(dir.path()));

    let (status, body) = send(&app, post_json("/api/v1/chat", json!({ "query": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Query cannot be empty");

    let (status, _) = send(
        &app,
        post_json("/api/v1/chat/with-sources", json!({ "query": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_returns_answer_and_session() {
    let server = MockServer::start_async().await;
    let chat = mock_ollama_answer(&server, "Vendor 4 underpaid by 99.00 EUR.");

    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.llm_endpoint = server.base_url();
    let (app, store) = app_with(config);
    seed(&store).await;

    let request = post_json(
        "/api/v1/chat",
        json!({ "query": "Which vendor underpaid?", "session_id": "s1" }),
    );
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "answer": "Vendor 4 underpaid by 99.00 EUR.", "session_id": "s1" })
    );
    chat.assert_calls(1);
}

#[tokio::test]
async fn test_chat_llm_failure_is_500() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/api/chat");
        then.status(500).body("model not loaded");
    });

    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.llm_endpoint = server.base_url();
    let (app, _) = app_with(config);

    let (status, body) = send(&app, post_json("/api/v1/chat", json!({ "query": "hi" }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.starts_with("Error during chat:"));
    assert!(detail.contains("model not loaded"));
}

#[tokio::test]
async fn test_chat_times_out_with_504() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/api/chat");
        then.status(200)
            .delay(std::time::Duration::from_secs(3))
            .json_body(json!({ "message": { "role": "assistant", "content": "late" } }));
    });

    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.llm_endpoint = server.base_url();
    config.chat_timeout_secs = 1;
    let (app, _) = app_with(config);

    let (status, body) = send(&app, post_json("/api/v1/chat", json!({ "query": "slow?" }))).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert!(body["detail"].as_str().unwrap().starts_with("Request timed out."));
}

#[tokio::test]
async fn test_chat_with_sources_links_visualization() {
    let server = MockServer::start_async().await;
    mock_ollama_answer(&server, "Invoice INV-V4-M03-326250 was paid 2700.");

    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.llm_endpoint = server.base_url();
    let (app, store) = app_with(config);
    seed(&store).await;

    let request = post_json(
        "/api/v1/chat/with-sources",
        json!({ "query": "What was paid for INV-V4-M03-326250?" }),
    );
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["answer"], "Invoice INV-V4-M03-326250 was paid 2700.");
    assert!(!body["sources"].as_array().unwrap().is_empty());
    assert_eq!(body["sources"][0]["index"], 1);
    assert!(body["sources_summary"].as_str().unwrap().starts_with("  [1] "));

    let url = body["visualization_url"].as_str().unwrap();
    assert!(url.starts_with("/api/v1/visualizations/sources_"));

    let response = app.clone().oneshot(get(url)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = response.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&html).contains("<html"));
}

#[tokio::test]
async fn test_chat_with_sources_on_empty_graph_has_no_visualization() {
    let server = MockServer::start_async().await;
    mock_ollama_answer(&server, "I don't know.");

    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.llm_endpoint = server.base_url();
    let (app, _) = app_with(config);

    let (status, body) = send(
        &app,
        post_json("/api/v1/chat/with-sources", json!({ "query": "anything?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["visualization_url"].is_null());
    assert_eq!(body["sources_summary"], "No source information available.");
}

#[tokio::test]
async fn test_missing_visualization_is_404() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app_with(test_config(dir.path()));

    let (status, body) = send(&app, get("/api/v1/visualizations/sources_missing.html")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Visualization not found");

    let (status, _) = send(&app, get("/api/v1/visualizations/..%2FCargo.toml")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_agentic_query() {
    let server = MockServer::start_async().await;
    mock_ollama_answer(&server, "4 vendors.");

    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.llm_endpoint = server.base_url();
    let (app, _) = app_with(config);

    let (status, body) = send(
        &app,
        post_json("/query", json!({ "question": "How many vendors?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "answer": "4 vendors.", "question": "How many vendors?" }));
}

#[tokio::test]
async fn test_stats_reflect_ingestion() {
    let dir = TempDir::new().unwrap();
    let (app, store) = app_with(test_config(dir.path()));
    seed(&store).await;

    let (status, body) = send(&app, get("/api/v1/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["stats"]["total_nodes"].as_u64().unwrap() > 0);
    assert!(body["stats"]["total_chunks"].as_u64().unwrap() > 0);
    assert_eq!(body["stats"]["pending_items"], 0);
}
