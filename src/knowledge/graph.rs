use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Node type used when extraction gives none.
pub const DEFAULT_NODE_TYPE: &str = "Entity";

/// Typed graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub chunks: HashSet<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

impl Node {
    pub fn new(name: &str, node_type: &str) -> Self {
        let node_type = if node_type.trim().is_empty() {
            DEFAULT_NODE_TYPE
        } else {
            node_type.trim()
        };
        Self {
            id: node_id(name),
            name: name.trim().to_string(),
            node_type: node_type.to_string(),
            description: String::new(),
            chunks: HashSet::new(),
            embedding: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Text embedded for similarity search.
    pub fn embedding_text(&self) -> String {
        if self.description.is_empty() {
            format!("{} ({})", self.name, self.node_type)
        } else {
            format!("{} ({}): {}", self.name, self.node_type, self.description)
        }
    }
}

/// Directed, labelled edge between two node ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub relationship: String,
    #[serde(default = "default_weight")]
    pub weight: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

fn default_weight() -> f32 {
    1.0
}

impl Edge {
    pub fn new(source: &str, target: &str, relationship: &str) -> Self {
        let relationship = relationship.trim();
        Self {
            source: node_id(source),
            target: node_id(target),
            relationship: if relationship.is_empty() {
                "related_to".to_string()
            } else {
                relationship.replace(' ', "_").to_lowercase()
            },
            weight: 1.0,
            embedding: Vec::new(),
        }
    }

    fn key(&self) -> (String, String, String) {
        (
            self.source.clone(),
            self.target.clone(),
            self.relationship.clone(),
        )
    }
}

/// Stable node id for a display name: lowercase alphanumerics joined by `_`.
pub fn node_id(name: &str) -> String {
    let mut id = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.trim().chars() {
        if c.is_alphanumeric() {
            if pending_sep && !id.is_empty() {
                id.push('_');
            }
            pending_sep = false;
            id.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    id
}

/// Counters over the stored graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub node_types: BTreeMap<String, usize>,
    pub relationships: BTreeMap<String, usize>,
}

/// Serializable form of the graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// In-memory knowledge graph.
#[derive(Debug, Default, Clone)]
pub struct KnowledgeGraph {
    nodes: HashMap<String, Node>,
    edges: Vec<Edge>,
    edge_index: HashMap<(String, String, String), usize>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let mut graph = Self::new();
        for node in snapshot.nodes {
            graph.add_node(node);
        }
        for edge in snapshot.edges {
            graph.add_edge(edge);
        }
        graph
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let mut nodes: Vec<Node> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        GraphSnapshot {
            nodes,
            edges: self.edges.clone(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Insert or merge a node. Returns true when the id is new.
    ///
    /// Merging keeps the first name, upgrades a default type, fills an empty
    /// description and unions chunk provenance.
    pub fn add_node(&mut self, node: Node) -> bool {
        if node.id.is_empty() {
            return false;
        }
        match self.nodes.get_mut(&node.id) {
            Some(existing) => {
                if existing.node_type == DEFAULT_NODE_TYPE && node.node_type != DEFAULT_NODE_TYPE {
                    existing.node_type = node.node_type;
                }
                if existing.description.is_empty() {
                    existing.description = node.description;
                }
                existing.chunks.extend(node.chunks);
                if existing.embedding.is_empty() {
                    existing.embedding = node.embedding;
                }
                false
            }
            None => {
                self.nodes.insert(node.id.clone(), node);
                true
            }
        }
    }

    /// Insert or reinforce an edge. Missing endpoints become default-typed
    /// nodes. Self loops are ignored. Returns true when the edge is new.
    pub fn add_edge(&mut self, edge: Edge) -> bool {
        if edge.source.is_empty() || edge.target.is_empty() || edge.source == edge.target {
            return false;
        }
        for id in [&edge.source, &edge.target] {
            if !self.nodes.contains_key(id) {
                self.add_node(Node::new(id, DEFAULT_NODE_TYPE));
            }
        }

        let key = edge.key();
        match self.edge_index.get(&key) {
            Some(&idx) => {
                let existing = &mut self.edges[idx];
                existing.weight += edge.weight;
                if existing.embedding.is_empty() {
                    existing.embedding = edge.embedding;
                }
                false
            }
            None => {
                self.edge_index.insert(key, self.edges.len());
                self.edges.push(edge);
                true
            }
        }
    }

    /// Mutable access for attaching embeddings after merge.
    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn edges_mut(&mut self) -> &mut [Edge] {
        &mut self.edges
    }

    /// Edges with both endpoints resolved.
    pub fn triplets(&self) -> impl Iterator<Item = (&Node, &Edge, &Node)> {
        self.edges.iter().filter_map(|edge| {
            let source = self.nodes.get(&edge.source)?;
            let target = self.nodes.get(&edge.target)?;
            Some((source, edge, target))
        })
    }

    /// Number of nodes of a type (case-insensitive).
    pub fn count_by_type(&self, node_type: &str) -> usize {
        self.nodes
            .values()
            .filter(|n| n.node_type.eq_ignore_ascii_case(node_type))
            .count()
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            total_nodes: self.nodes.len(),
            total_edges: self.edges.len(),
            ..Default::default()
        };
        for node in self.nodes.values() {
            *stats.node_types.entry(node.node_type.clone()).or_default() += 1;
        }
        for edge in &self.edges {
            *stats
                .relationships
                .entry(edge.relationship.clone())
                .or_default() += 1;
        }
        stats
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.edge_index.clear();
    }
}
