//! Run the HTTP services.

use tracing::{info, warn};

use super::open_store;
use crate::api::{self, AppState};
use crate::config::{Config, EmbeddingProvider};
use crate::integrations::OllamaClient;

pub async fn run(config: Config) -> anyhow::Result<()> {
    for problem in check_ollama(&config).await {
        warn!("{}", problem);
    }

    let store = open_store(&config)?;
    let stats = store.stats().await;
    info!(
        nodes = stats.graph.total_nodes,
        edges = stats.graph.total_edges,
        model = %config.llm_model,
        "Knowledge store ready"
    );

    let state = AppState::new(config, store)?;
    api::serve(state).await
}

/// Unreachable Ollama servers and configured models that are not pulled.
/// The server still starts; chat requests fail until these are fixed.
async fn check_ollama(config: &Config) -> Vec<String> {
    let mut wanted = vec![(config.llm_endpoint.as_str(), config.llm_model.as_str())];
    if config.embedding_provider == EmbeddingProvider::Ollama {
        wanted.push((
            config.embedding_endpoint.as_str(),
            config.embedding_model.as_str(),
        ));
    }

    let mut problems = Vec::new();
    for (endpoint, model) in wanted {
        let client = OllamaClient::with_url(endpoint);
        if !client.is_running().await {
            problems.push(format!("Ollama is not reachable at {}", endpoint));
            continue;
        }
        match client.list_models().await {
            Ok(models) if models.iter().any(|m| same_model(m, model)) => {}
            Ok(_) => problems.push(format!(
                "Model {} is not available at {}; run `ollama pull {}`",
                model, endpoint, model
            )),
            Err(err) => problems.push(format!("Could not list models at {}: {}", endpoint, err)),
        }
    }
    problems.dedup();
    problems
}

/// Ollama reports untagged models as `name:latest`.
fn same_model(available: &str, wanted: &str) -> bool {
    available == wanted || available.strip_suffix(":latest") == Some(wanted)
}
