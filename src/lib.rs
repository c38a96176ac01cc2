//! FinanceX: financial document ingestion and knowledge-graph Q&A.
//!
//! This library provides:
//! - Ingestion of invoices and transactions (text, CSV, PDF and images via OCR)
//!   into a knowledge graph built with a local Ollama model
//! - Graph-grounded question answering with session history and cited sources
//! - KPI counters from CSV files or from the graph
//! - The HTTP services that expose all of the above

pub mod api;
pub mod config;
pub mod error;
pub mod integrations;
pub mod knowledge;
pub mod metrics;
pub mod prompts;
pub mod records;
pub mod retrieval;

// Re-export common types
pub use config::{Config, EmbeddingProvider, KpiMode};
pub use error::{Error, Result};
pub use integrations::{MistralOcrClient, OllamaClient, OllamaModel};
pub use knowledge::{KnowledgeStore, StoreOptions, Triplet};
pub use prompts::{load_prompt, Prompt};
pub use retrieval::{CompletionResult, GraphCompletionRetriever, SessionCache};

// Commands module uses re-exported types, so it must be declared after the re-exports
pub mod commands;
