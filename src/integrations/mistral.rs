//! Mistral OCR client.
//!
//! Documents are sent inline as base64 data URLs: images as `image_url`,
//! PDFs as `document_url`.

use std::time::Duration;

use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{Error, Result};

const MISTRAL_API_URL: &str = "https://api.mistral.ai";
const OCR_MODEL: &str = "mistral-ocr-latest";

/// Image extensions accepted by the OCR ingestion path.
pub const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".bmp", ".webp"];

/// Document handed to the OCR endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OcrDocument {
    ImageUrl { image_url: String },
    DocumentUrl { document_url: String },
}

impl OcrDocument {
    /// Inline image as a data URL.
    pub fn image(bytes: &[u8], mime_type: &str) -> Self {
        OcrDocument::ImageUrl {
            image_url: data_url(bytes, mime_type),
        }
    }

    /// Inline PDF as a data URL.
    pub fn pdf(bytes: &[u8]) -> Self {
        OcrDocument::DocumentUrl {
            document_url: data_url(bytes, "application/pdf"),
        }
    }
}

fn data_url(bytes: &[u8], mime_type: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{};base64,{}", mime_type, encoded)
}

/// MIME type for an image extension (with leading dot), `image/jpeg` otherwise.
pub fn image_mime_type(extension: &str) -> &'static str {
    match extension.to_lowercase().as_str() {
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".bmp" => "image/bmp",
        ".webp" => "image/webp",
        _ => "image/jpeg",
    }
}

#[derive(Debug, Serialize)]
struct OcrRequest<'a> {
    model: &'a str,
    document: &'a OcrDocument,
    include_image_base64: bool,
}

/// One OCR'd page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OcrPage {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub markdown: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// OCR response body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OcrResponse {
    #[serde(default)]
    pub pages: Vec<OcrPage>,
    #[serde(default)]
    pub document_annotation: Option<Value>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl OcrResponse {
    /// Text of the document: page markdown joined by blank lines, then the
    /// document annotation, then a top-level `text` field.
    pub fn extracted_text(&self) -> String {
        let pages: Vec<&str> = self
            .pages
            .iter()
            .filter_map(|p| p.markdown.as_deref().or(p.text.as_deref()))
            .filter(|t| !t.trim().is_empty())
            .collect();
        if !pages.is_empty() {
            return pages.join("\n\n");
        }

        if let Some(text) = self.document_annotation.as_ref().and_then(annotation_text) {
            if !text.trim().is_empty() {
                return text;
            }
        }

        self.text.clone().unwrap_or_default()
    }
}

fn annotation_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => ["markdown", "text", "content"]
            .iter()
            .find_map(|k| map.get(*k).and_then(|v| v.as_str()).map(str::to_string)),
        _ => None,
    }
}

/// Mistral OCR client.
#[derive(Debug, Clone)]
pub struct MistralOcrClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl MistralOcrClient {
    /// Create a client from `MISTRAL_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("MISTRAL_API_KEY").map_err(|_| {
            Error::ConfigError(
                "MISTRAL_API_KEY environment variable not set. Please set it to use OCR."
                    .to_string(),
            )
        })?;
        Self::new(api_key, MISTRAL_API_URL, OCR_MODEL, Duration::from_secs(60))
    }

    /// Create a client with explicit settings.
    pub fn new<S: Into<String>>(
        api_key: S,
        base_url: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::ConfigError("MISTRAL_API_KEY is empty".to_string()));
        }

        let http = Client::builder()
            .user_agent("financex/0.1.0")
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ConfigError(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    /// Run OCR on a document.
    pub async fn process(&self, document: &OcrDocument) -> Result<OcrResponse> {
        let request = OcrRequest {
            model: &self.model,
            document,
            include_image_base64: false,
        };

        let response = self
            .http
            .post(format!("{}/v1/ocr", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::OcrError(format!("Mistral request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::OcrError(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::OcrError(format!("Mistral error {}: {}", status, text)));
        }

        let parsed: OcrResponse = serde_json::from_str(&text)
            .map_err(|e| Error::OcrError(format!("Invalid OCR response: {}", e)))?;
        debug!(pages = parsed.pages.len(), "Mistral OCR response parsed");

        Ok(parsed)
    }

    /// OCR a document and return its text.
    pub async fn extract_text(&self, document: &OcrDocument) -> Result<String> {
        Ok(self.process(document).await?.extracted_text())
    }
}
