//! Shared application state handed to every handler.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::integrations::MistralOcrClient;
use crate::knowledge::KnowledgeStore;
use crate::prompts::Prompt;
use crate::retrieval::{GraphCompletionRetriever, SessionCache};
use crate::Result;

/// The `/query` retriever searches a wider neighbourhood than chat.
pub const AGENTIC_TOP_K: usize = 10;

/// Kind of financial record being ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Invoice,
    Transaction,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Invoice => "invoice",
            DataType::Transaction => "transaction",
        }
    }

    /// Parse a request field, producing the client-facing message on failure.
    pub fn parse(value: &str) -> std::result::Result<Self, String> {
        value.parse()
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "invoice" => Ok(DataType::Invoice),
            "transaction" => Ok(DataType::Transaction),
            _ => Err(format!(
                "Invalid data_type: {}. Must be 'invoice' or 'transaction'",
                s
            )),
        }
    }
}

/// Graph-extraction prompts for ingestion.
#[derive(Debug, Clone)]
pub struct IngestPrompts {
    pub invoice: String,
    pub transaction: String,
}

impl IngestPrompts {
    pub fn load(dir: &std::path::Path) -> Result<Self> {
        Ok(Self {
            invoice: Prompt::InvoiceIngest.load_from(dir)?,
            transaction: Prompt::TransactionIngest.load_from(dir)?,
        })
    }

    /// A non-blank custom prompt wins over the data type's prompt.
    pub fn select<'a>(&'a self, data_type: DataType, custom: Option<&'a str>) -> &'a str {
        match custom.filter(|p| !p.trim().is_empty()) {
            Some(prompt) => prompt,
            None => match data_type {
                DataType::Invoice => &self.invoice,
                DataType::Transaction => &self.transaction,
            },
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<KnowledgeStore>,
    /// Chat retriever, with session history when caching is enabled.
    pub retriever: Arc<GraphCompletionRetriever>,
    pub agentic: Arc<GraphCompletionRetriever>,
    pub kpi: Arc<GraphCompletionRetriever>,
    pub ingest_prompts: Arc<IngestPrompts>,
    /// `None` when no Mistral API key is configured.
    pub ocr: Option<Arc<MistralOcrClient>>,
}

impl AppState {
    /// Build retrievers and clients around an opened store. Prompts are read
    /// once here.
    pub fn new(config: Config, store: Arc<KnowledgeStore>) -> Result<Self> {
        let cache = config.cache_enabled.then(|| {
            Arc::new(SessionCache::new(
                config.cache_max_turns,
                config.cache_max_sessions,
            ))
        });

        let retriever = GraphCompletionRetriever::from_config(&config, store.clone(), cache)?;
        let agentic = GraphCompletionRetriever::from_config(&config, store.clone(), None)?
            .with_top_k(AGENTIC_TOP_K);
        let kpi = GraphCompletionRetriever::from_config(&config, store.clone(), None)?
            .with_top_k(config.kpi_top_k)
            .with_save_interaction(false);

        let ocr = match config.mistral_api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Some(Arc::new(MistralOcrClient::new(
                key,
                &config.mistral_base_url,
                &config.ocr_model,
                Duration::from_secs(config.ocr_timeout_secs),
            )?)),
            _ => None,
        };

        Ok(Self {
            ingest_prompts: Arc::new(IngestPrompts::load(&config.prompts_dir)?),
            config: Arc::new(config),
            store,
            retriever: Arc::new(retriever),
            agentic: Arc::new(agentic),
            kpi: Arc::new(kpi),
            ocr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_is_case_insensitive() {
        assert_eq!("Invoice".parse::<DataType>(), Ok(DataType::Invoice));
        assert_eq!(DataType::parse(" TRANSACTION "), Ok(DataType::Transaction));
    }

    #[test]
    fn invalid_data_type_message_names_the_value() {
        let err = DataType::parse("receipt").unwrap_err();
        assert_eq!(
            err,
            "Invalid data_type: receipt. Must be 'invoice' or 'transaction'"
        );
    }

    #[test]
    fn custom_prompt_overrides_data_type() {
        let prompts = IngestPrompts {
            invoice: "inv".to_string(),
            transaction: "tx".to_string(),
        };
        assert_eq!(prompts.select(DataType::Invoice, None), "inv");
        assert_eq!(prompts.select(DataType::Transaction, Some("  ")), "tx");
        assert_eq!(prompts.select(DataType::Invoice, Some("mine")), "mine");
    }
}
