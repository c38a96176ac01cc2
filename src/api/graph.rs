//! Node/edge payload for the dashboard graph view.

use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::knowledge::GraphSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub relationship: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphData {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub stats: BTreeMap<String, usize>,
}

impl GraphData {
    /// Stats are `total_nodes`, `total_edges` and one plural count per node type.
    pub fn new(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Self {
        let mut stats = BTreeMap::new();
        stats.insert("total_nodes".to_string(), nodes.len());
        stats.insert("total_edges".to_string(), edges.len());
        for node in &nodes {
            *stats.entry(format!("{}s", node.node_type)).or_insert(0) += 1;
        }
        Self {
            nodes,
            edges,
            stats,
        }
    }

    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let nodes = snapshot
            .nodes
            .into_iter()
            .map(|n| GraphNode {
                id: n.id,
                label: n.name,
                node_type: n.node_type.to_lowercase(),
            })
            .collect();
        let edges = snapshot
            .edges
            .into_iter()
            .map(|e| GraphEdge {
                source: e.source,
                target: e.target,
                relationship: e.relationship,
            })
            .collect();
        Self::new(nodes, edges)
    }
}

const SAMPLE_NODES: &[(&str, &str, &str)] = &[
    ("vendor_2", "Vendor 2", "vendor"),
    ("vendor_3", "Vendor 3", "vendor"),
    ("vendor_4", "Vendor 4", "vendor"),
    ("vendor_15", "Vendor 15", "vendor"),
    ("inv_v2_m02", "INV-V2-M02-828264", "invoice"),
    ("inv_v3_m03", "INV-V3-M03-200261", "invoice"),
    ("inv_v4_m03", "INV-V4-M03-326250", "invoice"),
    ("inv_v15_m01", "INV-V15-M01-282247", "invoice"),
    ("tx_v2_m02", "TX-V2-M02-176206", "transaction"),
    ("tx_v3_m03", "TX-V3-M03-535592", "transaction"),
    ("tx_v4_m03", "TX-V4-M03-250998", "transaction"),
    ("tx_v15_m01", "TX-V15-M01-960858", "transaction"),
    ("prod_laptop", "Lenovo ThinkPad X1", "product"),
    ("prod_monitor", "LG UltraWide Monitor", "product"),
    ("prod_macbook", "MacBook Pro 16\"", "product"),
    ("prod_keyboard", "HyperX Keyboard", "product"),
];

const SAMPLE_EDGES: &[(&str, &str, &str)] = &[
    ("inv_v2_m02", "vendor_2", "issued_by"),
    ("inv_v3_m03", "vendor_3", "issued_by"),
    ("inv_v4_m03", "vendor_4", "issued_by"),
    ("inv_v15_m01", "vendor_15", "issued_by"),
    ("tx_v2_m02", "vendor_2", "paid_to"),
    ("tx_v3_m03", "vendor_3", "paid_to"),
    ("tx_v4_m03", "vendor_4", "paid_to"),
    ("tx_v15_m01", "vendor_15", "paid_to"),
    ("inv_v2_m02", "prod_monitor", "contains_item"),
    ("inv_v3_m03", "prod_laptop", "contains_item"),
    ("inv_v4_m03", "prod_macbook", "contains_item"),
    ("inv_v15_m01", "prod_keyboard", "contains_item"),
    ("tx_v2_m02", "inv_v2_m02", "matches"),
    ("tx_v3_m03", "inv_v3_m03", "matches"),
    ("tx_v4_m03", "inv_v4_m03", "matches"),
    ("tx_v15_m01", "inv_v15_m01", "matches"),
];

/// Representative graph of four matched vendor/invoice/transaction chains.
pub fn sample_graph() -> GraphData {
    let nodes = SAMPLE_NODES
        .iter()
        .map(|(id, label, node_type)| GraphNode {
            id: id.to_string(),
            label: label.to_string(),
            node_type: node_type.to_string(),
        })
        .collect();
    let edges = SAMPLE_EDGES
        .iter()
        .map(|(source, target, relationship)| GraphEdge {
            source: source.to_string(),
            target: target.to_string(),
            relationship: relationship.to_string(),
        })
        .collect();
    GraphData::new(nodes, edges)
}

#[derive(Debug, Default, Deserialize)]
pub struct GraphQuery {
    /// `live` serves the stored knowledge graph instead of the sample.
    pub source: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/graph", get(graph))
        .route("/health", get(health))
}

async fn graph(
    State(state): State<AppState>,
    Query(query): Query<GraphQuery>,
) -> ApiResult<Json<GraphData>> {
    match query.source.as_deref().map(str::to_lowercase).as_deref() {
        None | Some("sample") => Ok(Json(sample_graph())),
        Some("live") => Ok(Json(GraphData::from_snapshot(state.store.snapshot().await))),
        Some(other) => Err(ApiError::bad_request(format!(
            "Invalid source: {}. Must be 'sample' or 'live'",
            other
        ))),
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "message": "Graph API is running" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{Edge, KnowledgeGraph, Node};

    #[test]
    fn sample_graph_stats() {
        let data = sample_graph();
        assert_eq!(data.nodes.len(), 16);
        assert_eq!(data.edges.len(), 16);
        for key in ["vendors", "invoices", "transactions", "products"] {
            assert_eq!(data.stats[key], 4, "{}", key);
        }
        assert_eq!(data.stats["total_nodes"], 16);
        assert_eq!(data.stats["total_edges"], 16);
    }

    #[test]
    fn sample_edges_reference_known_nodes() {
        let data = sample_graph();
        let ids: std::collections::HashSet<_> = data.nodes.iter().map(|n| n.id.as_str()).collect();
        for edge in &data.edges {
            assert!(ids.contains(edge.source.as_str()));
            assert!(ids.contains(edge.target.as_str()));
        }
    }

    #[test]
    fn sample_node_serializes_type_field() {
        let value = serde_json::to_value(&sample_graph().nodes[0]).unwrap();
        assert_eq!(value, json!({ "id": "vendor_2", "label": "Vendor 2", "type": "vendor" }));
    }

    #[test]
    fn live_graph_uses_lowercase_types() {
        let mut graph = KnowledgeGraph::new();
        graph.add_node(Node::new("Vendor 4", "Vendor"));
        graph.add_node(Node::new("INV-1", "Invoice"));
        graph.add_edge(Edge::new("INV-1", "Vendor 4", "issued_by"));

        let data = GraphData::from_snapshot(graph.snapshot());
        assert_eq!(data.stats["vendors"], 1);
        assert_eq!(data.stats["invoices"], 1);
        assert_eq!(data.edges[0].relationship, "issued_by");
        assert!(data.nodes.iter().any(|n| n.label == "Vendor 4" && n.node_type == "vendor"));
    }
}
