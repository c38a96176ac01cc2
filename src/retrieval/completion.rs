use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::session::{format_history, ConversationTurn, SessionCache};
use super::sources::CompletionResult;
use crate::config::Config;
use crate::integrations::{ChatMessage, OllamaClient, OllamaModel};
use crate::knowledge::{resolve_edges_to_text, KnowledgeStore, Triplet};
use crate::prompts::{render_prompt, Prompt};
use crate::Result;

/// Prompt templates used to answer questions.
#[derive(Debug, Clone)]
pub struct RetrieverPrompts {
    pub system: String,
    /// Template with `{{ question }}` and `{{ context }}`.
    pub user: String,
    /// Template with `{{ text }}`.
    pub summarize: String,
}

impl RetrieverPrompts {
    pub fn load(dir: &std::path::Path) -> Result<Self> {
        Ok(Self {
            system: Prompt::System.load_from(dir)?,
            user: Prompt::User.load_from(dir)?,
            summarize: Prompt::SummarizeContext.load_from(dir)?,
        })
    }
}

/// Answers questions from the knowledge graph: triplet search, user prompt
/// rendering, LLM completion and optional session history.
pub struct GraphCompletionRetriever {
    store: Arc<KnowledgeStore>,
    llm: OllamaModel,
    prompts: RetrieverPrompts,
    top_k: usize,
    save_interaction: bool,
    cache: Option<Arc<SessionCache>>,
}

impl GraphCompletionRetriever {
    pub fn new(store: Arc<KnowledgeStore>, llm: OllamaModel, prompts: RetrieverPrompts) -> Self {
        Self {
            store,
            llm,
            prompts,
            top_k: crate::config::DEFAULT_TOP_K,
            save_interaction: false,
            cache: None,
        }
    }

    /// Retriever wired from configuration. Prompts are read once here.
    pub fn from_config(
        config: &Config,
        store: Arc<KnowledgeStore>,
        cache: Option<Arc<SessionCache>>,
    ) -> Result<Self> {
        let llm = OllamaModel::new(
            OllamaClient::with_timeout(&config.llm_endpoint, config.llm_timeout()),
            config.llm_model.clone(),
            config.llm_temperature,
            config.llm_max_tokens,
        );
        let mut retriever = Self::new(store, llm, RetrieverPrompts::load(&config.prompts_dir)?)
            .with_top_k(config.top_k)
            .with_save_interaction(config.save_interaction);
        retriever.cache = cache;
        Ok(retriever)
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_save_interaction(mut self, save: bool) -> Self {
        self.save_interaction = save;
        self
    }

    pub fn with_session_cache(mut self, cache: Arc<SessionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Triplets relevant to the query.
    pub async fn get_context(&self, query: &str) -> Result<Vec<Triplet>> {
        self.get_context_with_top_k(query, self.top_k).await
    }

    pub async fn get_context_with_top_k(&self, query: &str, top_k: usize) -> Result<Vec<Triplet>> {
        self.store.brute_force_triplet_search(query, top_k).await
    }

    /// One completion for the query. `context` skips the graph search.
    pub async fn get_completion(
        &self,
        query: &str,
        context: Option<Vec<Triplet>>,
        session_id: Option<&str>,
    ) -> Result<Vec<String>> {
        let result = self.get_completion_with_sources(query, context, session_id).await?;
        Ok(vec![result.answer])
    }

    /// Completion together with the context and triplets behind it.
    pub async fn get_completion_with_sources(
        &self,
        query: &str,
        context: Option<Vec<Triplet>>,
        session_id: Option<&str>,
    ) -> Result<CompletionResult> {
        let context_given = context.is_some();
        let triplets = match context {
            Some(triplets) => triplets,
            None => self.get_context(query).await?,
        };
        let context_text = resolve_edges_to_text(&triplets);
        debug!(triplets = triplets.len(), "resolved graph context");

        let user_prompt = render_prompt(
            &self.prompts.user,
            &HashMap::from([("question", query), ("context", context_text.as_str())]),
        );

        let answer = match &self.cache {
            Some(cache) => {
                let history = cache.history(session_id).await;
                let (summary, completion) = tokio::join!(
                    self.summarize(&context_text, triplets.is_empty()),
                    self.complete(&user_prompt, &history)
                );
                let answer = completion?;
                let summary = summary.unwrap_or_else(|err| {
                    warn!("context summary failed: {err}");
                    String::new()
                });
                cache
                    .save(session_id, ConversationTurn::new(query, &summary, &answer))
                    .await;
                answer
            }
            None => self.complete(&user_prompt, &[]).await?,
        };

        if self.save_interaction && context_given && !triplets.is_empty() && !answer.is_empty() {
            self.store
                .save_interaction(query, &answer, &context_text, &triplets)
                .await?;
        }

        info!(triplets = triplets.len(), "completion generated");
        Ok(CompletionResult {
            answer,
            context_text,
            triplets,
        })
    }

    async fn complete(&self, user_prompt: &str, history: &[ConversationTurn]) -> Result<String> {
        let mut messages = vec![ChatMessage::system(self.prompts.system.clone())];
        if !history.is_empty() {
            messages.push(ChatMessage::user(format!(
                "Previous conversation:\n{}",
                format_history(history)
            )));
        }
        messages.push(ChatMessage::user(user_prompt));
        self.llm.complete(messages).await
    }

    async fn summarize(&self, context_text: &str, empty: bool) -> Result<String> {
        if empty {
            return Ok(String::new());
        }
        let prompt = render_prompt(
            &self.prompts.summarize,
            &HashMap::from([("text", context_text)]),
        );
        self.llm.complete(vec![ChatMessage::user(prompt)]).await
    }
}
