//! Clients for external services: Ollama (LLM and embeddings) and Mistral OCR.

pub mod mistral;
pub mod ollama;

pub use mistral::{MistralOcrClient, OcrDocument, OcrResponse};
pub use ollama::{ChatMessage, OllamaClient, OllamaModel};
