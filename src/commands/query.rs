//! Ask the knowledge graph a question from the terminal.

use std::path::PathBuf;

use super::open_store;
use crate::config::Config;
use crate::retrieval::GraphCompletionRetriever;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct QueryArgs {
    pub question: String,
    pub top_k: Option<usize>,
    pub session_id: Option<String>,
    /// Write a D3 page of the cited triplets here.
    pub visualize: Option<PathBuf>,
}

pub async fn run(config: &Config, args: QueryArgs) -> Result<()> {
    let question = args.question.trim();
    if question.is_empty() {
        return Err(Error::InvalidArgument("Query cannot be empty".to_string()));
    }

    let store = open_store(config)?;
    let mut retriever = GraphCompletionRetriever::from_config(config, store, None)?;
    if let Some(top_k) = args.top_k {
        retriever = retriever.with_top_k(top_k);
    }

    let result = tokio::time::timeout(
        config.chat_timeout(),
        retriever.get_completion_with_sources(question, None, args.session_id.as_deref()),
    )
    .await
    .map_err(|_| Error::Timeout(config.chat_timeout_secs))??;

    println!("{}\n", result.answer);
    println!("Sources:\n{}", result.sources_summary());

    if let Some(path) = args.visualize {
        match result.visualize_sources(&path, &format!("Sources: {}", question))? {
            Some(path) => println!("\nVisualization written to {}", path.display()),
            None => println!("\nNo sources to visualize."),
        }
    }
    Ok(())
}
