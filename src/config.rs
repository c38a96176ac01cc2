//! Configuration for the FinanceX services
//!
//! Loads configuration from config.yml; environment variables (and `.env`)
//! take precedence over values from the file.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default constants (fallback if config.yml not found)
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_LLM_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_LLM_MODEL: &str = "cognee-distillabs-model-gguf-quantized";
pub const DEFAULT_LLM_MAX_TOKENS: u32 = 16384;
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text:latest";
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 768;
pub const DEFAULT_MISTRAL_URL: &str = "https://api.mistral.ai";
pub const DEFAULT_OCR_MODEL: &str = "mistral-ocr-latest";
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_KPI_TOP_K: usize = 50;
pub const DEFAULT_CHAT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CACHE_MAX_TURNS: usize = 10;
pub const DEFAULT_CACHE_MAX_SESSIONS: usize = 1_000;
pub const DEFAULT_CHUNK_SIZE: usize = 128;
pub const DEFAULT_CHUNK_OVERLAP: usize = 16;
pub const DEFAULT_EXTRACTION_CONCURRENCY: usize = 4;
pub const DEFAULT_MAX_CSV_ROWS: usize = 10_000;

/// Where embeddings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Ollama `/api/embed`
    Ollama,
    /// Deterministic hashed bag-of-words (offline, tests)
    Local,
}

impl FromStr for EmbeddingProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(EmbeddingProvider::Ollama),
            "local" | "hash" => Ok(EmbeddingProvider::Local),
            other => Err(format!("unknown embedding provider: {}", other)),
        }
    }
}

/// How `/kpi/kpis` computes its counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KpiMode {
    /// Count rows in the CSV files (fast)
    Csv,
    /// Ask the knowledge graph counting questions
    Graph,
}

impl FromStr for KpiMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" | "simple" => Ok(KpiMode::Csv),
            "graph" | "llm" => Ok(KpiMode::Graph),
            other => Err(format!("unknown kpi mode: {}", other)),
        }
    }
}

/// YAML config structures
#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    server: Option<ServerSection>,
    llm: Option<LlmSection>,
    embedding: Option<EmbeddingSection>,
    ocr: Option<OcrSection>,
    data: Option<DataSection>,
    prompts: Option<PromptsSection>,
    retriever: Option<RetrieverSection>,
    cache: Option<CacheSection>,
    storage: Option<StorageSection>,
    ingest: Option<IngestSection>,
    kpi: Option<KpiSection>,
    visualization: Option<VisualizationSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    #[serde(default, deserialize_with = "deserialize_scalar")]
    host: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    port: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmSection {
    #[serde(default, deserialize_with = "deserialize_scalar")]
    endpoint: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    model: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    temperature: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    max_tokens: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    timeout_secs: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddingSection {
    #[serde(default, deserialize_with = "deserialize_scalar")]
    provider: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    endpoint: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    model: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    dimensions: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OcrSection {
    #[serde(default, deserialize_with = "deserialize_scalar")]
    api_key: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    base_url: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    model: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    timeout_secs: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DataSection {
    #[serde(default, deserialize_with = "deserialize_scalar")]
    invoices: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    transactions: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PromptsSection {
    #[serde(default, deserialize_with = "deserialize_scalar")]
    dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrieverSection {
    #[serde(default, deserialize_with = "deserialize_scalar")]
    top_k: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    kpi_top_k: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    chat_timeout_secs: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    save_interaction: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CacheSection {
    #[serde(default, deserialize_with = "deserialize_scalar")]
    enabled: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    max_turns: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    max_sessions: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StorageSection {
    #[serde(default, deserialize_with = "deserialize_scalar")]
    dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IngestSection {
    #[serde(default, deserialize_with = "deserialize_scalar")]
    chunk_size: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    chunk_overlap: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    extraction_concurrency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct KpiSection {
    #[serde(default, deserialize_with = "deserialize_scalar")]
    mode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VisualizationSection {
    #[serde(default, deserialize_with = "deserialize_scalar")]
    dir: Option<String>,
}

/// Deserialize a scalar (string, number or bool) into its string form
fn deserialize_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<serde_yaml::Value> = Option::deserialize(deserializer)?;
    match value {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(serde_yaml::Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected scalar value, got {:?}",
            other
        ))),
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub llm_endpoint: String,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    pub llm_timeout_secs: u64,

    pub embedding_provider: EmbeddingProvider,
    pub embedding_endpoint: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,

    pub mistral_api_key: Option<String>,
    pub mistral_base_url: String,
    pub ocr_model: String,
    pub ocr_timeout_secs: u64,

    pub invoices_path: PathBuf,
    pub transactions_path: PathBuf,
    pub prompts_dir: PathBuf,

    pub top_k: usize,
    pub kpi_top_k: usize,
    pub chat_timeout_secs: u64,
    pub save_interaction: bool,

    pub cache_enabled: bool,
    pub cache_max_turns: usize,
    pub cache_max_sessions: usize,

    /// `None` keeps the knowledge store in memory only
    pub storage_dir: Option<PathBuf>,

    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub extraction_concurrency: usize,

    pub kpi_mode: KpiMode,
    pub visualization_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Load configuration from config.yml or use defaults
    /// Environment variables take precedence over config.yml values
    pub fn new() -> Self {
        Self::load_from_file("config.yml")
            .or_else(|_| Self::load_from_file("../config.yml"))
            .unwrap_or_else(|_| Self::defaults())
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        Self::load_dotenv();

        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self, String> {
        let yaml: YamlConfig = serde_yaml::from_str(content)
            .map_err(|e| format!("Failed to parse config file: {}", e))?;

        Ok(Self::from_yaml(yaml))
    }

    /// Defaults with environment overrides applied
    pub fn defaults() -> Self {
        Self::from_yaml(YamlConfig::default())
    }

    fn from_yaml(yaml: YamlConfig) -> Self {
        let server = yaml.server.unwrap_or_default();
        let llm = yaml.llm.unwrap_or_default();
        let embedding = yaml.embedding.unwrap_or_default();
        let ocr = yaml.ocr.unwrap_or_default();
        let data = yaml.data.unwrap_or_default();
        let prompts = yaml.prompts.unwrap_or_default();
        let retriever = yaml.retriever.unwrap_or_default();
        let cache = yaml.cache.unwrap_or_default();
        let storage = yaml.storage.unwrap_or_default();
        let ingest = yaml.ingest.unwrap_or_default();
        let kpi = yaml.kpi.unwrap_or_default();
        let visualization = yaml.visualization.unwrap_or_default();

        let llm_endpoint: String = resolve(llm.endpoint, "LLM_ENDPOINT")
            .unwrap_or_else(|| DEFAULT_LLM_ENDPOINT.to_string());
        let llm_endpoint = strip_openai_suffix(&llm_endpoint);

        let embedding_endpoint: String = resolve(embedding.endpoint, "EMBEDDING_ENDPOINT")
            .map(|e: String| strip_embed_suffix(&e))
            .unwrap_or_else(|| llm_endpoint.clone());

        // Empty string disables persistence
        let storage_dir = resolve::<String>(storage.dir, "FINANCEX_STORAGE_DIR")
            .or_else(|| Some(".financex".to_string()))
            .filter(|d| !d.trim().is_empty())
            .map(PathBuf::from);

        Self {
            host: resolve(server.host, "FINANCEX_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: resolve(server.port, "FINANCEX_PORT").unwrap_or(DEFAULT_PORT),

            llm_endpoint,
            llm_model: resolve(llm.model, "LLM_MODEL")
                .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            llm_temperature: resolve(llm.temperature, "LLM_TEMPERATURE").unwrap_or(0.0),
            llm_max_tokens: resolve(llm.max_tokens, "LLM_MAX_TOKENS")
                .unwrap_or(DEFAULT_LLM_MAX_TOKENS),
            llm_timeout_secs: resolve(llm.timeout_secs, "LLM_TIMEOUT_SECS").unwrap_or(120),

            embedding_provider: resolve(embedding.provider, "EMBEDDING_PROVIDER")
                .unwrap_or(EmbeddingProvider::Ollama),
            embedding_endpoint,
            embedding_model: resolve(embedding.model, "EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            embedding_dimensions: resolve(embedding.dimensions, "EMBEDDING_DIMENSIONS")
                .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),

            mistral_api_key: resolve::<String>(ocr.api_key, "MISTRAL_API_KEY")
                .filter(|k| !k.trim().is_empty()),
            mistral_base_url: resolve(ocr.base_url, "MISTRAL_BASE_URL")
                .unwrap_or_else(|| DEFAULT_MISTRAL_URL.to_string()),
            ocr_model: resolve(ocr.model, "MISTRAL_OCR_MODEL")
                .unwrap_or_else(|| DEFAULT_OCR_MODEL.to_string()),
            ocr_timeout_secs: resolve(ocr.timeout_secs, "MISTRAL_OCR_TIMEOUT_SECS").unwrap_or(60),

            invoices_path: resolve(data.invoices, "INVOICES_PATH")
                .unwrap_or_else(|| PathBuf::from("data/new_invoices.csv")),
            transactions_path: resolve(data.transactions, "TRANSACTIONS_PATH")
                .unwrap_or_else(|| PathBuf::from("data/new_transactions.csv")),
            prompts_dir: resolve(prompts.dir, "PROMPTS_DIR")
                .unwrap_or_else(crate::prompts::prompts_dir),

            top_k: resolve(retriever.top_k, "RETRIEVER_TOP_K").unwrap_or(DEFAULT_TOP_K),
            kpi_top_k: resolve(retriever.kpi_top_k, "KPI_TOP_K").unwrap_or(DEFAULT_KPI_TOP_K),
            chat_timeout_secs: resolve(retriever.chat_timeout_secs, "CHAT_TIMEOUT_SECS")
                .unwrap_or(DEFAULT_CHAT_TIMEOUT_SECS),
            save_interaction: resolve(retriever.save_interaction, "SAVE_INTERACTION")
                .unwrap_or(false),

            cache_enabled: resolve(cache.enabled, "CACHING").unwrap_or(true),
            cache_max_turns: resolve(cache.max_turns, "CACHE_MAX_TURNS")
                .unwrap_or(DEFAULT_CACHE_MAX_TURNS),
            cache_max_sessions: resolve(cache.max_sessions, "CACHE_MAX_SESSIONS")
                .unwrap_or(DEFAULT_CACHE_MAX_SESSIONS),

            storage_dir,

            chunk_size: resolve(ingest.chunk_size, "CHUNK_SIZE").unwrap_or(DEFAULT_CHUNK_SIZE),
            chunk_overlap: resolve(ingest.chunk_overlap, "CHUNK_OVERLAP")
                .unwrap_or(DEFAULT_CHUNK_OVERLAP),
            extraction_concurrency: resolve(
                ingest.extraction_concurrency,
                "EXTRACTION_CONCURRENCY",
            )
            .unwrap_or(DEFAULT_EXTRACTION_CONCURRENCY),

            kpi_mode: resolve(kpi.mode, "KPI_MODE").unwrap_or(KpiMode::Csv),
            visualization_dir: resolve(visualization.dir, "VISUALIZATION_DIR")
                .unwrap_or_else(|| PathBuf::from("graphs")),
        }
    }

    /// Address the HTTP server binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn chat_timeout(&self) -> Duration {
        Duration::from_secs(self.chat_timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }
}

/// Resolve a value: the env var wins, then the YAML value (`${VAR}` expanded)
fn resolve<T: FromStr>(value: Option<String>, env_key: &str) -> Option<T> {
    if let Ok(env_val) = std::env::var(env_key) {
        if let Ok(parsed) = env_val.trim().parse::<T>() {
            return Some(parsed);
        }
    }

    let raw = value?;
    let expanded = if raw.starts_with("${") && raw.ends_with('}') {
        let var_name = &raw[2..raw.len() - 1];
        std::env::var(var_name).ok()?
    } else {
        raw
    };

    expanded.trim().parse::<T>().ok()
}

/// Ollama exposes an OpenAI-compatible API under `/v1`; we talk to the native one.
fn strip_openai_suffix(endpoint: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    trimmed
        .strip_suffix("/v1")
        .unwrap_or(trimmed)
        .to_string()
}

fn strip_embed_suffix(endpoint: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    trimmed
        .strip_suffix("/api/embed")
        .unwrap_or(trimmed)
        .to_string()
}
