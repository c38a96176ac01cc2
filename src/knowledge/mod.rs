//! In-crate knowledge graph store.
//!
//! Data is queued with `add`, turned into a typed graph by `cognify`
//! (chunking, LLM or heuristic extraction, embedding) and queried with a
//! brute-force triplet search. The graph optionally persists as JSON.

pub mod chunker;
pub mod embedding;
pub mod extractor;
pub mod graph;
pub mod store;

pub use chunker::{split_paragraphs, Chunk, Chunker};
pub use embedding::{cosine_similarity, EmbedBackend, LocalEmbedder};
pub use extractor::{parse_extraction, EntityExtractor, ExtractedGraph};
pub use graph::{node_id, Edge, GraphSnapshot, GraphStats, KnowledgeGraph, Node};
pub use store::{
    resolve_edges_to_text, CognifyReport, DataItem, ExtractionBackend, KnowledgeStore,
    StoreOptions, StoreStats, Triplet,
};
