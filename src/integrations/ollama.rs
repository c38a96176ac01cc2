//! Ollama client for local LLM inference and embeddings.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const OLLAMA_URL: &str = "http://localhost:11434";

/// Ollama client for local LLM.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OllamaClient {
    /// Create new client with default URL.
    pub fn new() -> Self {
        Self::with_url(OLLAMA_URL)
    }

    /// Create client with custom URL.
    pub fn with_url(base_url: &str) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(120))
    }

    /// Create client with custom URL and request timeout.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if Ollama server is running.
    pub async fn is_running(&self) -> bool {
        self.http
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    /// List available models.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| Error::LlmError(format!("Ollama request failed: {}", e)))?;

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| Error::LlmError(format!("Invalid response: {}", e)))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Chat with model.
    pub async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let request = ChatRequest {
            model: model.to_string(),
            messages,
            stream: false,
            options: ModelOptions {
                temperature,
                num_predict: max_tokens,
            },
        };

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::LlmError(format!("Ollama request failed: {}", e)))?;

        let response = check_status(response).await?;

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::LlmError(format!("Invalid response: {}", e)))?;

        Ok(result.message.content)
    }

    /// Embed a batch of texts (`POST /api/embed`).
    pub async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbedRequest {
            model: model.to_string(),
            input: texts.to_vec(),
        };

        let response = self
            .http
            .post(format!("{}/api/embed", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::LlmError(format!("Ollama embed request failed: {}", e)))?;

        let response = check_status(response).await?;

        let result: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::LlmError(format!("Invalid embed response: {}", e)))?;

        if result.embeddings.len() != texts.len() {
            return Err(Error::LlmError(format!(
                "Ollama returned {} embeddings for {} inputs",
                result.embeddings.len(),
                texts.len()
            )));
        }

        Ok(result.embeddings)
    }
}

/// A model on an Ollama server with fixed sampling settings.
#[derive(Debug, Clone)]
pub struct OllamaModel {
    pub client: OllamaClient,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl OllamaModel {
    pub fn new(
        client: OllamaClient,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            temperature,
            max_tokens,
        }
    }

    /// Chat completion with this model's settings.
    pub async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String> {
        self.client
            .chat(messages, &self.model, self.temperature, self.max_tokens)
            .await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(Error::LlmError(format!("Ollama error {}: {}", status, text)))
}

/// Chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
}

#[derive(Debug, Serialize)]
struct ModelOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ModelOptions,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> OllamaClient {
        OllamaClient::with_url(&server.base_url())
    }

    #[tokio::test]
    async fn list_models_returns_names() {
        let server = MockServer::start_async().await;

        let tags_mock = server.mock(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(200).json_body(json!({
                "models": [
                    { "name": "nomic-embed-text:latest" },
                    { "name": "cognee-distillabs-model-gguf-quantized" }
                ]
            }));
        });

        let models = client(&server).list_models().await.unwrap();

        assert_eq!(
            models,
            vec![
                "nomic-embed-text:latest".to_string(),
                "cognee-distillabs-model-gguf-quantized".to_string()
            ]
        );
        tags_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn chat_reports_error_on_http_failure() {
        let server = MockServer::start_async().await;

        let chat_mock = server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(500).body("boom");
        });

        let err = client(&server)
            .chat(vec![ChatMessage::user("hi")], "llama3", 0.2, 64)
            .await
            .unwrap_err();

        let msg = format!("{err}");
        assert!(msg.contains("Ollama error 500"));
        assert!(msg.contains("boom"));
        chat_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn chat_returns_assistant_message() {
        let server = MockServer::start_async().await;

        let chat_mock = server.mock(|when, then| {
            when.method(POST).path("/api/chat").is_true(|req| {
                let body: serde_json::Value =
                    serde_json::from_slice(req.body().as_ref()).unwrap();
                body["stream"] == json!(false) && body["messages"][0]["role"] == "system"
            });
            then.status(200).json_body(json!({
                "message": {
                    "role": "assistant",
                    "content": "There are 4 vendors."
                }
            }));
        });

        let reply = client(&server)
            .chat(
                vec![ChatMessage::system("analyst"), ChatMessage::user("Vendors?")],
                "llama3",
                0.0,
                256,
            )
            .await
            .unwrap();

        assert_eq!(reply, "There are 4 vendors.");
        chat_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn chat_sends_max_tokens_as_num_predict() {
        let server = MockServer::start_async().await;

        let chat_mock = server.mock(|when, then| {
            when.method(POST).path("/api/chat").is_true(|req| {
                let body: serde_json::Value =
                    serde_json::from_slice(req.body().as_ref()).unwrap();
                body["options"]["num_predict"] == json!(16384)
            });
            then.status(200)
                .json_body(json!({ "message": { "role": "assistant", "content": "ok" } }));
        });

        client(&server)
            .chat(vec![ChatMessage::user("hi")], "m", 0.0, 16384)
            .await
            .unwrap();

        chat_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn embed_returns_vectors_in_input_order() {
        let server = MockServer::start_async().await;

        let embed_mock = server.mock(|when, then| {
            when.method(POST).path("/api/embed").is_true(|req| {
                let body: serde_json::Value =
                    serde_json::from_slice(req.body().as_ref()).unwrap();
                body["model"] == "nomic-embed-text:latest" && body["input"][1] == "vendor"
            });
            then.status(200).json_body(json!({
                "embeddings": [[0.1, 0.2], [0.3, 0.4]]
            }));
        });

        let vectors = client(&server)
            .embed(
                &["invoice".to_string(), "vendor".to_string()],
                "nomic-embed-text:latest",
            )
            .await
            .unwrap();

        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
        embed_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn embed_rejects_count_mismatch() {
        let server = MockServer::start_async().await;

        server.mock(|when, then| {
            when.method(POST).path("/api/embed");
            then.status(200).json_body(json!({ "embeddings": [[0.1]] }));
        });

        let err = client(&server)
            .embed(&["a".to_string(), "b".to_string()], "m")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::LlmError(_)));
    }

    #[tokio::test]
    async fn embed_of_nothing_skips_request() {
        let server = MockServer::start_async().await;
        let embed_mock = server.mock(|when, then| {
            when.method(POST).path("/api/embed");
            then.status(200).json_body(json!({ "embeddings": [] }));
        });

        let vectors = client(&server).embed(&[], "m").await.unwrap();

        assert!(vectors.is_empty());
        embed_mock.assert_calls(0);
    }

    #[tokio::test]
    async fn is_running_respects_http_status() {
        let healthy = MockServer::start_async().await;
        healthy.mock(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(200);
        });

        let failing = MockServer::start_async().await;
        failing.mock(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(503);
        });

        assert!(client(&healthy).is_running().await);
        assert!(!client(&failing).is_running().await);
    }

    #[tokio::test]
    async fn model_complete_applies_its_settings() {
        let server = MockServer::start_async().await;
        let chat_mock = server.mock(|when, then| {
            when.method(POST).path("/api/chat").is_true(|req| {
                let body: serde_json::Value =
                    serde_json::from_slice(req.body().as_ref()).unwrap();
                body["model"] == "cognee-distillabs-model-gguf-quantized"
                    && body["options"]["num_predict"] == json!(512)
            });
            then.status(200)
                .json_body(json!({ "message": { "role": "assistant", "content": "4" } }));
        });

        let model = OllamaModel::new(
            client(&server),
            "cognee-distillabs-model-gguf-quantized",
            0.0,
            512,
        );
        let reply = model.complete(vec![ChatMessage::user("count")]).await.unwrap();

        assert_eq!(reply, "4");
        chat_mock.assert_calls(1);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = OllamaClient::with_url("http://localhost:11434/");
        assert_eq!(client.base_url(), "http://localhost:11434");
    }
}
