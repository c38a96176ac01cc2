//! Graph extraction from chunks.
//!
//! The LLM path asks for a JSON object of nodes and edges and is parsed by
//! [`parse_extraction`]. [`EntityExtractor`] is the offline fallback: it reads
//! `key: value` rows produced by CSV ingestion and otherwise keeps capitalized
//! or numeric tokens as entities linked by co-occurrence.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use super::chunker::Chunk;
use super::graph::{node_id, Edge, Node, DEFAULT_NODE_TYPE};

/// Output format appended to the ingestion prompt.
pub const GRAPH_FORMAT_INSTRUCTIONS: &str = r#"Respond with a single JSON object and nothing else:
{"nodes": [{"id": "...", "name": "...", "type": "...", "description": "..."}],
 "edges": [{"source": "<node id>", "target": "<node id>", "relationship": "..."}]}"#;

static FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Za-z_][A-Za-z0-9_ ]*?)\s*[:=]\s*([^,;\n]+)").expect("valid field regex")
});

/// Nodes and edges pulled from one chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl ExtractedGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    fn tag_chunk(mut self, chunk: &Chunk) -> Self {
        for node in &mut self.nodes {
            node.chunks.insert(chunk.id);
        }
        self
    }
}

#[derive(Debug, Deserialize)]
struct RawGraph {
    #[serde(default)]
    nodes: Vec<RawNode>,
    #[serde(default)]
    edges: Vec<RawEdge>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type", alias = "node_type", alias = "label")]
    node_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEdge {
    #[serde(alias = "source_node_id", alias = "from")]
    source: String,
    #[serde(alias = "target_node_id", alias = "to")]
    target: String,
    #[serde(
        default,
        alias = "relationship_name",
        alias = "relation",
        alias = "type"
    )]
    relationship: Option<String>,
}

/// Parse an LLM extraction reply. Tolerates prose or code fences around the
/// JSON object. Returns `None` when no usable graph is found.
pub fn parse_extraction(reply: &str, chunk: &Chunk) -> Option<ExtractedGraph> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    let raw: RawGraph = serde_json::from_str(&reply[start..=end]).ok()?;

    let mut ids: HashMap<String, String> = HashMap::new();
    let mut nodes = Vec::new();
    for raw_node in raw.nodes {
        let Some(name) = raw_node.name.clone().or_else(|| raw_node.id.clone()) else {
            continue;
        };
        let node = Node::new(&name, raw_node.node_type.as_deref().unwrap_or_default())
            .with_description(raw_node.description.unwrap_or_default());
        if node.id.is_empty() {
            continue;
        }
        if let Some(raw_id) = raw_node.id {
            ids.insert(raw_id, node.id.clone());
        }
        ids.insert(name, node.id.clone());
        nodes.push(node);
    }

    let resolve = |raw: &str| ids.get(raw).cloned().unwrap_or_else(|| node_id(raw));
    let edges: Vec<Edge> = raw
        .edges
        .into_iter()
        .map(|e| {
            let mut edge = Edge::new("", "", e.relationship.as_deref().unwrap_or_default());
            edge.source = resolve(&e.source);
            edge.target = resolve(&e.target);
            edge
        })
        .filter(|e| !e.source.is_empty() && !e.target.is_empty())
        .collect();

    let graph = ExtractedGraph { nodes, edges };
    if graph.is_empty() {
        None
    } else {
        Some(graph.tag_chunk(chunk))
    }
}

/// Heuristic extractor with no network calls.
#[derive(Debug, Clone)]
pub struct EntityExtractor {
    stopwords: HashSet<&'static str>,
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityExtractor {
    pub fn new() -> Self {
        let stopwords = [
            "and", "or", "but", "the", "a", "an", "of", "in", "on", "for", "to", "with", "is",
            "are", "was", "how", "many", "what", "which", "who", "there", "does", "do", "from",
            "by", "at", "all",
        ]
        .into_iter()
        .collect();
        Self { stopwords }
    }

    /// Extract a graph from a chunk.
    pub fn extract(&self, chunk: &Chunk) -> ExtractedGraph {
        let fields = parse_fields(&chunk.text);
        let graph = if fields.contains_key("invoice_id") || fields.contains_key("transaction_id")
        {
            record_graph(&fields)
        } else {
            self.mention_graph(&chunk.text)
        };
        graph.tag_chunk(chunk)
    }

    /// Lowercased search terms of a query.
    pub fn keywords(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        text.split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
            .filter(|t| !t.is_empty() && !self.stopwords.contains(t.as_str()))
            .filter(|t| seen.insert(t.clone()))
            .collect()
    }

    fn mention_graph(&self, text: &str) -> ExtractedGraph {
        let mut seen = HashSet::new();
        let mut nodes: Vec<Node> = Vec::new();

        for raw in text.split_whitespace() {
            let token = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '-');
            if token.len() < 3 || self.stopwords.contains(token.to_lowercase().as_str()) {
                continue;
            }
            let candidate = token.chars().next().is_some_and(char::is_uppercase)
                || token.chars().any(|c| c.is_ascii_digit());
            if !candidate {
                continue;
            }
            let node = Node::new(token, DEFAULT_NODE_TYPE);
            if !node.id.is_empty() && seen.insert(node.id.clone()) {
                nodes.push(node);
            }
        }

        let edges = nodes
            .windows(2)
            .map(|pair| Edge::new(&pair[0].id, &pair[1].id, "co_occurs"))
            .collect();

        ExtractedGraph { nodes, edges }
    }
}

fn parse_fields(text: &str) -> HashMap<String, String> {
    FIELD
        .captures_iter(text)
        .map(|caps| {
            (
                caps[1].trim().to_lowercase().replace(' ', "_"),
                caps[2].trim().trim_matches(|c| c == '\'' || c == '"').to_string(),
            )
        })
        .filter(|(_, v)| !v.is_empty())
        .collect()
}

/// Graph for one invoice or transaction row.
fn record_graph(fields: &HashMap<String, String>) -> ExtractedGraph {
    let mut graph = ExtractedGraph::default();
    let field = |key: &str| fields.get(key).map(String::as_str);

    let vendor = field("vendor_id").map(|id| Node::new(&format!("Vendor {}", id), "Vendor"));

    if let Some(invoice_id) = field("invoice_id") {
        let description = describe(fields, &["total", "currency", "issue_date", "due_date"]);
        let invoice = Node::new(invoice_id, "Invoice").with_description(description);

        if let Some(vendor) = &vendor {
            graph.edges.push(Edge::new(&invoice.id, &vendor.id, "issued_by"));
        }
        if let Some(product) = field("product") {
            let product = Node::new(product, "Product")
                .with_description(describe(fields, &["quantity", "unit_price"]));
            graph.edges.push(Edge::new(&invoice.id, &product.id, "contains_item"));
            graph.nodes.push(product);
        }
        graph.nodes.push(invoice);
    }

    if let Some(transaction_id) = field("transaction_id") {
        let description = describe(fields, &["amount", "currency", "booking_date", "reference"]);
        let transaction = Node::new(transaction_id, "Transaction").with_description(description);

        if let Some(vendor) = &vendor {
            graph.edges.push(Edge::new(&transaction.id, &vendor.id, "paid_to"));
        }
        let reference = field("reference").filter(|r| r.to_uppercase().starts_with("INV"));
        if let Some(reference) = reference {
            let invoice = Node::new(reference, "Invoice");
            graph.edges.push(Edge::new(&transaction.id, &invoice.id, "matches"));
            graph.nodes.push(invoice);
        }
        graph.nodes.push(transaction);
    }

    if let Some(vendor) = vendor {
        graph.nodes.push(vendor);
    }
    graph
}

fn describe(fields: &HashMap<String, String>, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| fields.get(*k).map(|v| format!("{}: {}", k, v)))
        .collect::<Vec<_>>()
        .join(", ")
}
