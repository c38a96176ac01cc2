//! Ingestion and chat endpoints, mounted under `/api`.

use std::collections::HashMap;
use std::path::Path;

use axum::extract::{DefaultBodyLimit, Multipart, Path as UrlPath, State};
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use super::state::{AppState, DataType};
use crate::config::DEFAULT_MAX_CSV_ROWS;
use crate::integrations::mistral::{image_mime_type, IMAGE_EXTENSIONS};
use crate::integrations::OcrDocument;
use crate::knowledge::{split_paragraphs, CognifyReport};
use crate::records::{csv_rows_as_items, delimiter_byte};
use crate::retrieval::{CompletionResult, SourceRef};
use crate::{metrics, Error};

pub const CHAT_TIMEOUT_MESSAGE: &str = "Request timed out. The knowledge graph query took too long. Try a simpler question or check if Ollama is running properly.";

const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct TextIngestionRequest {
    pub text: String,
    #[serde(default = "default_data_type")]
    pub data_type: String,
    #[serde(default)]
    pub custom_prompt: Option<String>,
}

fn default_data_type() -> String {
    DataType::Invoice.as_str().to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestionResponse {
    pub message: String,
    pub items_processed: usize,
    pub data_type: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatWithSourcesResponse {
    pub answer: String,
    pub session_id: Option<String>,
    pub sources: Vec<SourceRef>,
    pub sources_summary: String,
    pub visualization_url: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/v1/ingest/text", post(ingest_text))
        .route("/v1/ingest/csv", post(ingest_csv))
        .route("/v1/ingest/pdf", post(ingest_pdf))
        .route("/v1/ingest/image", post(ingest_image))
        .route("/v1/chat", post(chat))
        .route("/v1/chat/with-sources", post(chat_with_sources))
        .route("/v1/visualizations/{file}", get(visualization))
        .route("/v1/stats", get(stats))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "FinanceX API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "ingest_text": "/v1/ingest/text",
            "ingest_csv": "/v1/ingest/csv",
            "ingest_pdf": "/v1/ingest/pdf",
            "ingest_image": "/v1/ingest/image",
            "chat": "/v1/chat",
            "chat_with_sources": "/v1/chat/with-sources",
            "stats": "/v1/stats",
            "health": "/health"
        }
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "FinanceX API" }))
}

/// Queue items and build the graph from them.
async fn build_graph(
    state: &AppState,
    items: Vec<String>,
    data_type: DataType,
    custom_prompt: Option<&str>,
) -> crate::Result<CognifyReport> {
    let prompt = state.ingest_prompts.select(data_type, custom_prompt);
    let report = state.store.ingest(items, data_type.as_str(), Some(prompt)).await?;
    metrics::record_ingested_items(data_type.as_str(), report.items);
    info!(
        data_type = data_type.as_str(),
        items = report.items,
        nodes = report.nodes_added,
        edges = report.edges_added,
        "ingested"
    );
    Ok(report)
}

async fn ingest_text(
    State(state): State<AppState>,
    Json(request): Json<TextIngestionRequest>,
) -> ApiResult<Json<IngestionResponse>> {
    let data_type = DataType::parse(&request.data_type).map_err(ApiError::bad_request)?;

    let items: Vec<String> = request
        .text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    if items.is_empty() {
        return Err(ApiError::bad_request("No text content provided"));
    }

    let count = items.len();
    build_graph(&state, items, data_type, request.custom_prompt.as_deref())
        .await
        .map_err(|e| ApiError::internal(format!("Error during ingestion: {}", e)))?;

    Ok(Json(IngestionResponse {
        message: format!("Successfully ingested {} {} items", count, request.data_type),
        items_processed: count,
        data_type: request.data_type,
    }))
}

/// Uploaded file plus the text form fields next to it.
#[derive(Debug, Default)]
struct UploadForm {
    file: Option<Bytes>,
    filename: Option<String>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                form.filename = field.file_name().map(str::to_string);
                let bytes = field.bytes().await.map_err(|e| {
                    ApiError::bad_request(format!("Failed to read upload: {}", e))
                })?;
                form.file = Some(bytes);
            } else {
                let value = field.text().await.map_err(|e| {
                    ApiError::bad_request(format!("Invalid form field {}: {}", name, e))
                })?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    fn data_type_field(&self) -> &str {
        self.field("data_type").unwrap_or("invoice")
    }

    fn custom_prompt(&self) -> Option<&str> {
        self.field("custom_prompt").filter(|p| !p.trim().is_empty())
    }

    fn file(&self) -> ApiResult<&Bytes> {
        self.file
            .as_ref()
            .ok_or_else(|| ApiError::bad_request("Missing file field"))
    }
}

async fn ingest_csv(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<IngestionResponse>> {
    let form = UploadForm::read(multipart).await?;
    let data_type_raw = form.data_type_field().to_string();
    let data_type = DataType::parse(&data_type_raw).map_err(ApiError::bad_request)?;

    let mut delimiter = form.field("delimiter").unwrap_or(",");
    if data_type == DataType::Transaction && delimiter == "," {
        delimiter = ";";
    }
    let delimiter =
        delimiter_byte(delimiter).map_err(|e| ApiError::from_error(e, "Error parsing CSV"))?;
    let max_rows = match form.field("max_rows") {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map_err(|_| ApiError::bad_request(format!("Invalid max_rows: {}", raw)))?,
        None => DEFAULT_MAX_CSV_ROWS,
    };

    let items = csv_rows_as_items(form.file()?, delimiter, max_rows).map_err(|err| match err {
        Error::CsvError(msg) => ApiError::bad_request(format!("Error parsing CSV: {}", msg)),
        other => ApiError::from_error(other, "Error during CSV ingestion"),
    })?;

    let count = items.len();
    build_graph(&state, items, data_type, form.custom_prompt())
        .await
        .map_err(|e| ApiError::internal(format!("Error during CSV ingestion: {}", e)))?;

    Ok(Json(IngestionResponse {
        message: format!(
            "Successfully ingested {} {} items from CSV",
            count, data_type_raw
        ),
        items_processed: count,
        data_type: data_type_raw,
    }))
}

fn extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

async fn ingest_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<IngestionResponse>> {
    let ocr = state.ocr.clone().ok_or_else(|| {
        ApiError::internal(
            "MISTRAL_API_KEY environment variable not set. Please set it to use PDF OCR.",
        )
    })?;

    let form = UploadForm::read(multipart).await?;
    let filename = form.filename.clone().unwrap_or_default();
    if extension(&filename) != ".pdf" {
        return Err(ApiError::bad_request("File must be a PDF (.pdf)"));
    }
    let data_type_raw = form.data_type_field().to_string();
    let data_type = DataType::parse(&data_type_raw).map_err(ApiError::bad_request)?;

    let bytes = form.file()?;
    if bytes.is_empty() {
        return Err(ApiError::bad_request("PDF file is empty"));
    }

    let text = ocr
        .extract_text(&OcrDocument::pdf(bytes))
        .await
        .map_err(|e| ApiError::internal(format!("Error retrieving OCR text from Mistral: {}", e)))?;
    if text.trim().is_empty() {
        return Err(ApiError::bad_request(
            "No text could be extracted from the PDF. The PDF might be empty or contain only images without OCR.",
        ));
    }

    let chunks = split_paragraphs(&text);
    if chunks.is_empty() {
        return Err(ApiError::bad_request("No processable text content found in PDF"));
    }

    let count = chunks.len();
    build_graph(&state, chunks, data_type, form.custom_prompt())
        .await
        .map_err(|e| ApiError::internal(format!("Error during PDF ingestion: {}", e)))?;

    Ok(Json(IngestionResponse {
        message: format!(
            "Successfully ingested PDF '{}' ({} text chunks) as {}",
            filename, count, data_type_raw
        ),
        items_processed: count,
        data_type: data_type_raw,
    }))
}

async fn ingest_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<IngestionResponse>> {
    let ocr = state.ocr.clone().ok_or_else(|| {
        ApiError::internal(
            "MISTRAL_API_KEY environment variable not set. Please set it to use image OCR.",
        )
    })?;

    let form = UploadForm::read(multipart).await?;
    let filename = form
        .filename
        .clone()
        .filter(|f| !f.is_empty())
        .ok_or_else(|| ApiError::bad_request("File must have a filename"))?;
    let ext = extension(&filename);
    if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return Err(ApiError::bad_request(format!(
            "File must be an image. Allowed formats: {}",
            IMAGE_EXTENSIONS.join(", ")
        )));
    }
    let data_type_raw = form.data_type_field().to_string();
    let data_type = DataType::parse(&data_type_raw).map_err(ApiError::bad_request)?;

    let bytes = form.file()?;
    if bytes.is_empty() {
        return Err(ApiError::bad_request("Image file is empty"));
    }

    let text = ocr
        .extract_text(&OcrDocument::image(bytes, image_mime_type(&ext)))
        .await
        .map_err(|e| {
            ApiError::internal(format!("Error processing image with Mistral OCR: {}", e))
        })?;

    let mut chunks = split_paragraphs(&text);
    if chunks.is_empty() && !text.trim().is_empty() {
        chunks.push(text.trim().to_string());
    }
    if chunks.is_empty() {
        return Err(ApiError::bad_request("No processable text content found in image"));
    }

    let count = chunks.len();
    build_graph(&state, chunks, data_type, form.custom_prompt())
        .await
        .map_err(|e| ApiError::internal(format!("Error during image ingestion: {}", e)))?;

    Ok(Json(IngestionResponse {
        message: format!(
            "Successfully ingested image '{}' ({} text chunks) as {}",
            filename, count, data_type_raw
        ),
        items_processed: count,
        data_type: data_type_raw,
    }))
}

fn validated_query(query: &str) -> ApiResult<&str> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ApiError::bad_request("Query cannot be empty"));
    }
    Ok(query)
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    let query = validated_query(&request.query)?;

    let results = tokio::time::timeout(
        state.config.chat_timeout(),
        state
            .retriever
            .get_completion(query, None, request.session_id.as_deref()),
    )
    .await
    .map_err(|_| ApiError::timeout(CHAT_TIMEOUT_MESSAGE))?
    .map_err(|e| ApiError::internal(format!("Error during chat: {}", e)))?;

    let answer = results
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::internal("No response generated"))?;

    Ok(Json(ChatResponse {
        answer,
        session_id: request.session_id,
    }))
}

async fn chat_with_sources(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatWithSourcesResponse>> {
    let query = validated_query(&request.query)?;

    let result = tokio::time::timeout(
        state.config.chat_timeout(),
        state
            .retriever
            .get_completion_with_sources(query, None, request.session_id.as_deref()),
    )
    .await
    .map_err(|_| ApiError::timeout(CHAT_TIMEOUT_MESSAGE))?
    .map_err(|e| ApiError::internal(format!("Error during chat: {}", e)))?;

    let visualization_url = write_visualization(&state.config.visualization_dir, &result, query);

    Ok(Json(ChatWithSourcesResponse {
        sources: result.sources(),
        sources_summary: result.sources_summary(),
        answer: result.answer,
        session_id: request.session_id,
        visualization_url,
    }))
}

/// A failed visualization does not fail the answer.
fn write_visualization(dir: &Path, result: &CompletionResult, query: &str) -> Option<String> {
    let file = format!("sources_{}.html", Uuid::new_v4().simple());
    let title = format!("Sources: {}", query);
    match result.visualize_sources(&dir.join(&file), &title) {
        Ok(Some(_)) => Some(format!("/api/v1/visualizations/{}", file)),
        Ok(None) => None,
        Err(err) => {
            warn!("Failed to write source visualization: {}", err);
            None
        }
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(['/', '\\'])
        && name != "."
        && name != ".."
        && !name.starts_with('.')
}

async fn visualization(
    State(state): State<AppState>,
    UrlPath(file): UrlPath<String>,
) -> ApiResult<Html<String>> {
    if !is_plain_file_name(&file) {
        return Err(ApiError::not_found("Visualization not found"));
    }
    let path = state.config.visualization_dir.join(&file);
    match tokio::fs::read_to_string(&path).await {
        Ok(html) => Ok(Html(html)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::not_found("Visualization not found"))
        }
        Err(err) => Err(ApiError::internal(format!(
            "Error reading visualization: {}",
            err
        ))),
    }
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    let stats = state.store.stats().await;
    Json(json!({
        "message": "Knowledge graph statistics",
        "stats": stats,
    }))
}
