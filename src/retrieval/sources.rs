//! Answers with the graph triplets that produced them.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;

use crate::knowledge::{Node, Triplet};
use crate::prompts::render_prompt;
use crate::Result;

const NODE_COLORS: &[(&str, &str)] = &[
    ("Entity", "#5C10F4"),
    ("Transaction", "#00C8FF"),
    ("Vendor", "#FF6B6B"),
    ("Invoice", "#4ECDC4"),
    ("LineItem", "#45B7D1"),
    ("Product", "#96CEB4"),
];
const DEFAULT_COLOR: &str = "#D8D8D8";

/// One cited triplet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub index: usize,
    pub source: String,
    pub relationship: String,
    pub target: String,
    pub score: f32,
}

/// Completion plus the context it was generated from.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionResult {
    pub answer: String,
    pub context_text: String,
    pub triplets: Vec<Triplet>,
}

impl CompletionResult {
    /// Numbered sources, starting at 1.
    pub fn sources(&self) -> Vec<SourceRef> {
        self.triplets
            .iter()
            .enumerate()
            .map(|(i, t)| SourceRef {
                index: i + 1,
                source: display_name(&t.source),
                relationship: relationship(t),
                target: display_name(&t.target),
                score: t.score,
            })
            .collect()
    }

    pub fn sources_summary(&self) -> String {
        if self.triplets.is_empty() {
            return "No source information available.".to_string();
        }
        self.sources()
            .iter()
            .map(|s| format!("  [{}] {} --({})--> {}", s.index, s.source, s.relationship, s.target))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Write a standalone D3 page showing the cited subgraph.
    ///
    /// Returns `None` without touching the filesystem when there are no
    /// triplets.
    pub fn visualize_sources(&self, output_path: &Path, title: &str) -> Result<Option<PathBuf>> {
        if self.triplets.is_empty() {
            return Ok(None);
        }

        let mut nodes: BTreeMap<&str, serde_json::Value> = BTreeMap::new();
        let mut links = Vec::new();
        for triplet in &self.triplets {
            for node in [&triplet.source, &triplet.target] {
                nodes.entry(node.id.as_str()).or_insert_with(|| node_json(node));
            }
            links.push(json!({
                "source": triplet.source.id,
                "target": triplet.target.id,
                "relation": relationship(triplet),
            }));
        }
        let nodes: Vec<serde_json::Value> = nodes.into_values().collect();

        // Single pass, so substituted text is never rescanned for placeholders.
        let title = escape_html(title);
        let node_count = nodes.len().to_string();
        let edge_count = links.len().to_string();
        let nodes_json = script_json(&nodes)?;
        let links_json = script_json(&links)?;
        let vars = HashMap::from([
            ("TITLE", title.as_str()),
            ("NODE_COUNT", node_count.as_str()),
            ("EDGE_COUNT", edge_count.as_str()),
            ("NODES", nodes_json.as_str()),
            ("LINKS", links_json.as_str()),
        ]);
        let html = render_prompt(VISUALIZATION_TEMPLATE, &vars);

        if let Some(dir) = output_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(output_path, html)?;
        Ok(Some(output_path.to_path_buf()))
    }
}

fn display_name(node: &Node) -> String {
    if !node.name.trim().is_empty() {
        return node.name.clone();
    }
    if node.id.chars().count() > 20 {
        format!("{}...", node.id.chars().take(8).collect::<String>())
    } else if node.id.is_empty() {
        "Unknown".to_string()
    } else {
        node.id.clone()
    }
}

fn relationship(triplet: &Triplet) -> String {
    if triplet.relationship.is_empty() {
        "related_to".to_string()
    } else {
        triplet.relationship.clone()
    }
}

pub fn node_color(node_type: &str) -> &'static str {
    NODE_COLORS
        .iter()
        .find(|(t, _)| *t == node_type)
        .map(|(_, c)| *c)
        .unwrap_or(DEFAULT_COLOR)
}

fn node_json(node: &Node) -> serde_json::Value {
    let name = if node.name.is_empty() {
        node.id.chars().take(30).collect()
    } else {
        node.name.clone()
    };
    json!({
        "id": node.id,
        "name": name,
        "type": node.node_type,
        "content": node.description,
        "color": node_color(&node.node_type),
    })
}

/// JSON safe to embed in a `<script>` block.
fn script_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?.replace("</", "<\\/"))
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const VISUALIZATION_TEMPLATE: &str = r##"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{{TITLE}}</title>
<script src="https://d3js.org/d3.v5.min.js"></script>
<style>
  html, body { margin: 0; height: 100%; overflow: hidden; background: #16213e; color: #f4f4f4;
               font-family: "Segoe UI", Tahoma, sans-serif; }
  svg { width: 100vw; height: 100vh; display: block; }
  .links line { stroke: rgba(255, 255, 255, 0.3); stroke-width: 2px; }
  .nodes circle { stroke: #fff; stroke-width: 2px; cursor: pointer; }
  .node-label { font-size: 12px; font-weight: bold; text-anchor: middle; pointer-events: none; fill: #f4f4f4; }
  .edge-label { font-size: 10px; text-anchor: middle; pointer-events: none; fill: #ffd700; }
  #title { position: fixed; top: 16px; left: 50%; transform: translateX(-50%); font-size: 22px; color: #ffd700; }
  #details { position: fixed; right: 16px; top: 16px; width: 280px; padding: 12px; border-radius: 8px;
             background: rgba(30, 30, 50, 0.9); font-size: 13px; }
  #stats, #legend { position: fixed; left: 16px; padding: 10px 14px; border-radius: 8px;
                    background: rgba(30, 30, 50, 0.9); font-size: 12px; }
  #stats { bottom: 16px; }
  #legend { top: 16px; }
  .swatch { display: inline-block; width: 10px; height: 10px; border-radius: 50%; margin-right: 6px; }
</style>
</head>
<body>
<div id="title">{{TITLE}}</div>
<svg></svg>
<div id="details">Click a node to see details</div>
<div id="stats">Nodes: {{NODE_COUNT}} | Edges: {{EDGE_COUNT}}</div>
<div id="legend"></div>
<script>
var nodes = {{NODES}};
var links = {{LINKS}};

var svg = d3.select("svg"), width = window.innerWidth, height = window.innerHeight;
var root = svg.append("g");

var colors = {};
nodes.forEach(function (n) { colors[n.type] = n.color; });
var legend = d3.select("#legend").selectAll("div").data(Object.keys(colors)).enter().append("div");
legend.append("span").attr("class", "swatch").style("background", function (t) { return colors[t]; });
legend.append("span").text(function (t) { return t; });

var simulation = d3.forceSimulation(nodes)
  .force("link", d3.forceLink(links).id(function (d) { return d.id; }).distance(150))
  .force("charge", d3.forceManyBody().strength(-400))
  .force("center", d3.forceCenter(width / 2, height / 2))
  .force("collision", d3.forceCollide().radius(50));

var link = root.append("g").attr("class", "links").selectAll("line").data(links).enter().append("line");
var edgeLabel = root.append("g").selectAll("text").data(links).enter().append("text")
  .attr("class", "edge-label").text(function (d) { return d.relation; });

var node = root.append("g").attr("class", "nodes").selectAll("circle").data(nodes).enter().append("circle")
  .attr("r", 25)
  .attr("fill", function (d) { return d.color; })
  .call(d3.drag().on("start", dragStart).on("drag", dragMove).on("end", dragEnd))
  .on("click", function (d) {
    var details = d3.select("#details").html("");
    details.append("div").text("Name: " + d.name);
    details.append("div").text("Type: " + d.type);
    details.append("div").text("ID: " + d.id);
    if (d.content) {
      details.append("div").text(d.content.length > 200 ? d.content.substring(0, 200) + "..." : d.content);
    }
  });

var nodeLabel = root.append("g").selectAll("text").data(nodes).enter().append("text")
  .attr("class", "node-label").attr("dy", 4)
  .text(function (d) { return d.name.length > 15 ? d.name.substring(0, 15) + "..." : d.name; });

simulation.on("tick", function () {
  link.attr("x1", function (d) { return d.source.x; }).attr("y1", function (d) { return d.source.y; })
      .attr("x2", function (d) { return d.target.x; }).attr("y2", function (d) { return d.target.y; });
  edgeLabel.attr("x", function (d) { return (d.source.x + d.target.x) / 2; })
           .attr("y", function (d) { return (d.source.y + d.target.y) / 2 - 8; });
  node.attr("cx", function (d) { return d.x; }).attr("cy", function (d) { return d.y; });
  nodeLabel.attr("x", function (d) { return d.x; }).attr("y", function (d) { return d.y; });
});

svg.call(d3.zoom().scaleExtent([0.1, 4]).on("zoom", function () { root.attr("transform", d3.event.transform); }));

function dragStart(d) { if (!d3.event.active) simulation.alphaTarget(0.3).restart(); d.fx = d.x; d.fy = d.y; }
function dragMove(d) { d.fx = d3.event.x; d.fy = d3.event.y; }
function dragEnd(d) { if (!d3.event.active) simulation.alphaTarget(0); d.fx = null; d.fy = null; }
</script>
</body>
</html>
"##;
