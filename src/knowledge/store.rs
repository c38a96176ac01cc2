use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::chunker::{Chunk, Chunker};
use super::embedding::{cosine_similarity, EmbedBackend};
use super::extractor::{
    parse_extraction, EntityExtractor, ExtractedGraph, GRAPH_FORMAT_INSTRUCTIONS,
};
use super::graph::{Edge, GraphSnapshot, GraphStats, KnowledgeGraph, Node};
use crate::config::{Config, EmbeddingProvider};
use crate::integrations::{ChatMessage, OllamaClient, OllamaModel};
use crate::{Error, Result};

const GRAPH_FILE: &str = "graph.json";
const ENDPOINT_WEIGHT: f32 = 0.5;
const KEYWORD_BOOST: f32 = 0.1;
const INTERACTION_RELATIONSHIP: &str = "used_graph_element_to_answer";

/// Raw data waiting for `cognify`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataItem {
    pub text: String,
    pub dataset: String,
    /// Extraction instructions for this item; `cognify`'s prompt otherwise.
    pub prompt: Option<String>,
}

/// How chunks are turned into nodes and edges.
#[derive(Debug, Clone)]
pub enum ExtractionBackend {
    /// Ask the LLM for JSON; fall back to heuristics on bad output.
    Llm(OllamaModel),
    Heuristic,
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub extraction_concurrency: usize,
    pub storage_dir: Option<PathBuf>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            chunk_size: crate::config::DEFAULT_CHUNK_SIZE,
            chunk_overlap: crate::config::DEFAULT_CHUNK_OVERLAP,
            extraction_concurrency: crate::config::DEFAULT_EXTRACTION_CONCURRENCY,
            storage_dir: None,
        }
    }
}

/// Edge ranked against a query, with both endpoints resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Triplet {
    pub source: Node,
    pub relationship: String,
    pub target: Node,
    pub score: f32,
}

/// Outcome of one `cognify` run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CognifyReport {
    pub items: usize,
    pub chunks: usize,
    pub nodes_added: usize,
    pub edges_added: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    #[serde(flatten)]
    pub graph: GraphStats,
    pub total_chunks: usize,
    pub pending_items: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Persisted {
    #[serde(flatten)]
    graph: GraphSnapshot,
    #[serde(default)]
    chunks: Vec<Chunk>,
}

#[derive(Debug, Default)]
struct StoreState {
    graph: KnowledgeGraph,
    chunks: Vec<Chunk>,
}

/// Knowledge graph store: queue data with [`add`](Self::add), build the graph
/// with [`cognify`](Self::cognify), query it with
/// [`brute_force_triplet_search`](Self::brute_force_triplet_search).
pub struct KnowledgeStore {
    chunker: Chunker,
    extractor: EntityExtractor,
    extraction: ExtractionBackend,
    embedder: EmbedBackend,
    concurrency: usize,
    storage_dir: Option<PathBuf>,
    pending: Mutex<Vec<DataItem>>,
    state: RwLock<StoreState>,
    cognify_lock: Mutex<()>,
}

impl KnowledgeStore {
    /// Open a store, loading the persisted graph when one exists.
    pub fn open(
        options: StoreOptions,
        embedder: EmbedBackend,
        extraction: ExtractionBackend,
    ) -> Result<Self> {
        let state = match &options.storage_dir {
            Some(dir) => load_state(dir)?,
            None => StoreState::default(),
        };

        Ok(Self {
            chunker: Chunker::new(options.chunk_size, options.chunk_overlap),
            extractor: EntityExtractor::new(),
            extraction,
            embedder,
            concurrency: options.extraction_concurrency.max(1),
            storage_dir: options.storage_dir,
            pending: Mutex::new(Vec::new()),
            state: RwLock::new(state),
            cognify_lock: Mutex::new(()),
        })
    }

    /// Store wired to Ollama as configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let llm = OllamaClient::with_timeout(&config.llm_endpoint, config.llm_timeout());
        let embedder = match config.embedding_provider {
            EmbeddingProvider::Ollama => {
                let client = if config.embedding_endpoint == config.llm_endpoint {
                    llm.clone()
                } else {
                    OllamaClient::with_timeout(&config.embedding_endpoint, config.llm_timeout())
                };
                EmbedBackend::ollama(client, config.embedding_model.clone())
            }
            EmbeddingProvider::Local => EmbedBackend::local(config.embedding_dimensions),
        };
        let extraction = ExtractionBackend::Llm(OllamaModel::new(
            llm,
            config.llm_model.clone(),
            config.llm_temperature,
            config.llm_max_tokens,
        ));

        Self::open(
            StoreOptions {
                chunk_size: config.chunk_size,
                chunk_overlap: config.chunk_overlap,
                extraction_concurrency: config.extraction_concurrency,
                storage_dir: config.storage_dir.clone(),
            },
            embedder,
            extraction,
        )
    }

    /// In-memory store with local embeddings and heuristic extraction.
    pub fn offline(options: StoreOptions) -> Result<Self> {
        Self::open(options, EmbedBackend::local(256), ExtractionBackend::Heuristic)
    }

    /// Queue items for the next `cognify`. Blank items are dropped.
    pub async fn add(&self, items: Vec<String>, dataset: &str) -> usize {
        self.add_with_prompt(items, dataset, None).await
    }

    /// Queue items that keep their own extraction prompt, whichever
    /// `cognify` run ends up processing them.
    pub async fn add_with_prompt(
        &self,
        items: Vec<String>,
        dataset: &str,
        prompt: Option<&str>,
    ) -> usize {
        let mut pending = self.pending.lock().await;
        let before = pending.len();
        pending.extend(
            items
                .into_iter()
                .filter(|t| !t.trim().is_empty())
                .map(|text| DataItem {
                    text,
                    dataset: dataset.to_string(),
                    prompt: prompt.map(str::to_string),
                }),
        );
        let added = pending.len() - before;
        debug!(added, dataset, "queued data items");
        added
    }

    /// Queue and process `items` as one step. The report covers these items
    /// only, unless plain `add` calls queued more in the meantime.
    pub async fn ingest(
        &self,
        items: Vec<String>,
        dataset: &str,
        prompt: Option<&str>,
    ) -> Result<CognifyReport> {
        let _guard = self.cognify_lock.lock().await;
        self.add_with_prompt(items, dataset, prompt).await;
        self.process_pending(None).await
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Process queued items into the graph using `prompt` as the extraction
    /// instructions.
    ///
    /// Nodes and edges are merged before embedding. If embedding fails the
    /// graph keeps the unembedded elements and the next run retries them.
    /// Items queued with their own prompt keep it.
    pub async fn cognify(&self, prompt: Option<&str>) -> Result<CognifyReport> {
        let _guard = self.cognify_lock.lock().await;
        self.process_pending(prompt).await
    }

    /// Caller holds `cognify_lock`.
    async fn process_pending(&self, prompt: Option<&str>) -> Result<CognifyReport> {
        let items = std::mem::take(&mut *self.pending.lock().await);
        if items.is_empty() {
            return Ok(CognifyReport::default());
        }

        let chunks: Vec<(Chunk, Option<Arc<str>>)> = items
            .iter()
            .flat_map(|item| {
                let item_prompt: Option<Arc<str>> =
                    item.prompt.as_deref().or(prompt).map(Arc::from);
                self.chunker
                    .chunk(&item.text, &item.dataset)
                    .into_iter()
                    .map(move |chunk| (chunk, item_prompt.clone()))
            })
            .collect();

        let extracted: Vec<(Chunk, ExtractedGraph)> = stream::iter(chunks)
            .map(|(chunk, chunk_prompt)| async move {
                let graph = self.extract_chunk(&chunk, chunk_prompt.as_deref()).await;
                (chunk, graph)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = CognifyReport {
            items: items.len(),
            chunks: extracted.len(),
            ..Default::default()
        };

        {
            let mut state = self.state.write().await;
            for (chunk, graph) in extracted {
                for node in graph.nodes {
                    if state.graph.add_node(node) {
                        report.nodes_added += 1;
                    }
                }
                for edge in graph.edges {
                    if state.graph.add_edge(edge) {
                        report.edges_added += 1;
                    }
                }
                state.chunks.push(chunk);
            }
        }

        self.embed_missing().await?;
        self.persist().await?;

        info!(
            items = report.items,
            chunks = report.chunks,
            nodes_added = report.nodes_added,
            edges_added = report.edges_added,
            "cognify complete"
        );
        Ok(report)
    }

    async fn extract_chunk(&self, chunk: &Chunk, prompt: Option<&str>) -> ExtractedGraph {
        let ExtractionBackend::Llm(model) = &self.extraction else {
            return self.extractor.extract(chunk);
        };

        let system = match prompt {
            Some(p) if !p.trim().is_empty() => {
                format!("{}\n\n{}", p.trim(), GRAPH_FORMAT_INSTRUCTIONS)
            }
            _ => GRAPH_FORMAT_INSTRUCTIONS.to_string(),
        };
        let messages = vec![ChatMessage::system(system), ChatMessage::user(chunk.text.clone())];

        match model.complete(messages).await {
            Ok(reply) => parse_extraction(&reply, chunk).unwrap_or_else(|| {
                warn!(chunk = %chunk.id, "unparsable graph extraction, using heuristics");
                self.extractor.extract(chunk)
            }),
            Err(err) => {
                warn!(chunk = %chunk.id, "graph extraction failed ({err}), using heuristics");
                self.extractor.extract(chunk)
            }
        }
    }

    async fn embed_missing(&self) -> Result<()> {
        let (node_jobs, edge_jobs) = {
            let state = self.state.read().await;
            let nodes: Vec<(String, String)> = state
                .graph
                .nodes()
                .filter(|n| n.embedding.is_empty())
                .map(|n| (n.id.clone(), n.embedding_text()))
                .collect();
            let edges: Vec<(usize, String)> = state
                .graph
                .edges()
                .iter()
                .enumerate()
                .filter(|(_, e)| e.embedding.is_empty())
                .map(|(i, e)| (i, edge_text(&state.graph, &e.source, &e.relationship, &e.target)))
                .collect();
            (nodes, edges)
        };
        if node_jobs.is_empty() && edge_jobs.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = node_jobs
            .iter()
            .map(|(_, t)| t.clone())
            .chain(edge_jobs.iter().map(|(_, t)| t.clone()))
            .collect();
        let mut vectors = self.embedder.embed(&texts).await?.into_iter();

        let mut state = self.state.write().await;
        for ((id, _), vector) in node_jobs.iter().zip(vectors.by_ref()) {
            if let Some(node) = state.graph.node_mut(id) {
                node.embedding = vector;
            }
        }
        let edges = state.graph.edges_mut();
        for ((idx, _), vector) in edge_jobs.iter().zip(vectors) {
            if let Some(edge) = edges.get_mut(*idx) {
                edge.embedding = vector;
            }
        }
        debug!(nodes = node_jobs.len(), edges = edge_jobs.len(), "embedded graph elements");
        Ok(())
    }

    /// Rank every edge against the query: cosine similarity of the edge plus
    /// half the best endpoint similarity plus a boost per query keyword found
    /// in the endpoints or relationship.
    pub async fn brute_force_triplet_search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<Triplet>> {
        if top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        if self.state.read().await.graph.edge_count() == 0 {
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed_one(query).await?;
        let keywords: HashSet<String> = self.extractor.keywords(query).into_iter().collect();

        let state = self.state.read().await;
        let mut scored: Vec<Triplet> = state
            .graph
            .triplets()
            .map(|(source, edge, target)| {
                let endpoint = cosine_similarity(&query_vec, &source.embedding)
                    .max(cosine_similarity(&query_vec, &target.embedding));
                let matches = [&source.id, &target.id, &edge.relationship]
                    .iter()
                    .flat_map(|s| s.split('_'))
                    .collect::<HashSet<_>>()
                    .into_iter()
                    .filter(|t| keywords.contains(*t))
                    .count();
                let score = cosine_similarity(&query_vec, &edge.embedding)
                    + ENDPOINT_WEIGHT * endpoint
                    + KEYWORD_BOOST * matches as f32;

                Triplet {
                    source: without_embedding(source),
                    relationship: edge.relationship.clone(),
                    target: without_embedding(target),
                    score,
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        debug!(results = scored.len(), "triplet search");
        Ok(scored)
    }

    /// Record an answered question as a `UserInteraction` node linked to the
    /// nodes that supported the answer.
    pub async fn save_interaction(
        &self,
        question: &str,
        answer: &str,
        context_text: &str,
        triplets: &[Triplet],
    ) -> Result<()> {
        let interaction = Node::new(&format!("Interaction {}", Uuid::new_v4()), "UserInteraction")
            .with_description(format!(
                "Question: {}\nAnswer: {}\nContext: {}",
                question, answer, context_text
            ));
        {
            let mut state = self.state.write().await;
            let id = interaction.id.clone();
            state.graph.add_node(interaction);
            for node in triplets.iter().flat_map(|t| [&t.source, &t.target]) {
                let mut edge = Edge::new("", "", INTERACTION_RELATIONSHIP);
                edge.source = id.clone();
                edge.target = node.id.clone();
                state.graph.add_edge(edge);
            }
        }
        self.embed_missing().await?;
        self.persist().await?;
        debug!(question, "saved interaction");
        Ok(())
    }

    pub async fn stats(&self) -> StoreStats {
        let pending_items = self.pending_count().await;
        let state = self.state.read().await;
        StoreStats {
            graph: state.graph.stats(),
            total_chunks: state.chunks.len(),
            pending_items,
        }
    }

    /// Copy of the graph without embeddings.
    pub async fn snapshot(&self) -> GraphSnapshot {
        let mut snapshot = self.state.read().await.graph.snapshot();
        for node in &mut snapshot.nodes {
            node.embedding.clear();
        }
        for edge in &mut snapshot.edges {
            edge.embedding.clear();
        }
        snapshot
    }

    /// Drop all data, queued items and persisted state.
    pub async fn prune(&self) -> Result<()> {
        let _guard = self.cognify_lock.lock().await;
        self.pending.lock().await.clear();
        {
            let mut state = self.state.write().await;
            state.graph.clear();
            state.chunks.clear();
        }
        if let Some(dir) = &self.storage_dir {
            let path = dir.join(GRAPH_FILE);
            if path.exists() {
                tokio::fs::remove_file(&path).await?;
            }
        }
        info!("knowledge store pruned");
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let Some(dir) = &self.storage_dir else {
            return Ok(());
        };
        let json = {
            let state = self.state.read().await;
            serde_json::to_vec(&Persisted {
                graph: state.graph.snapshot(),
                chunks: state.chunks.clone(),
            })?
        };

        tokio::fs::create_dir_all(dir).await?;
        let tmp = dir.join(format!("{}.tmp", GRAPH_FILE));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, dir.join(GRAPH_FILE)).await?;
        Ok(())
    }
}

fn load_state(dir: &Path) -> Result<StoreState> {
    let path = dir.join(GRAPH_FILE);
    if !path.exists() {
        return Ok(StoreState::default());
    }
    let bytes = std::fs::read(&path)?;
    let persisted: Persisted = serde_json::from_slice(&bytes)
        .map_err(|e| Error::StorageError(format!("{}: {}", path.display(), e)))?;
    info!(
        nodes = persisted.graph.nodes.len(),
        edges = persisted.graph.edges.len(),
        "loaded knowledge graph from {}",
        path.display()
    );
    Ok(StoreState {
        graph: KnowledgeGraph::from_snapshot(persisted.graph),
        chunks: persisted.chunks,
    })
}

fn edge_text(graph: &KnowledgeGraph, source: &str, relationship: &str, target: &str) -> String {
    let name = |id: &str| graph.node(id).map(|n| n.name.clone()).unwrap_or_else(|| id.to_string());
    format!("{} {} {}", name(source), relationship.replace('_', " "), name(target))
}

fn without_embedding(node: &Node) -> Node {
    Node {
        embedding: Vec::new(),
        ..node.clone()
    }
}

/// Render triplets as the context block handed to the LLM.
pub fn resolve_edges_to_text(triplets: &[Triplet]) -> String {
    let mut seen = HashSet::new();
    let mut nodes = String::new();
    for node in triplets.iter().flat_map(|t| [&t.source, &t.target]) {
        if !seen.insert(node.id.as_str()) {
            continue;
        }
        nodes.push_str(&format!("Node: {} ({})\n", node.name, node.node_type));
        if !node.description.is_empty() {
            nodes.push_str(&format!("  {}\n", node.description));
        }
    }

    let connections: Vec<String> = triplets
        .iter()
        .map(|t| format!("{} --[{}]--> {}", t.source.name, t.relationship, t.target.name))
        .collect();

    format!("Nodes:\n{}\nConnections:\n{}", nodes, connections.join("\n"))
}
