use tracing::debug;

use crate::integrations::OllamaClient;
use crate::Result;

/// Where vectors come from.
#[derive(Debug, Clone)]
pub enum EmbedBackend {
    Ollama { client: OllamaClient, model: String },
    Local(LocalEmbedder),
}

impl EmbedBackend {
    pub fn ollama(client: OllamaClient, model: impl Into<String>) -> Self {
        EmbedBackend::Ollama {
            client,
            model: model.into(),
        }
    }

    pub fn local(dim: usize) -> Self {
        EmbedBackend::Local(LocalEmbedder::new(dim))
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match self {
            EmbedBackend::Ollama { client, model } => {
                debug!(count = texts.len(), model = %model, "embedding via Ollama");
                client.embed(texts, model).await
            }
            EmbedBackend::Local(local) => Ok(texts.iter().map(|t| local.embed(t)).collect()),
        }
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default())
    }
}

/// Deterministic bag-of-words hashing embedder for offline use.
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    dim: usize,
}

impl LocalEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = fnv1a(token.to_lowercase().as_bytes()) % self.dim as u64;
            vec[bucket as usize] += 1.0;
        }
        normalize(&mut vec);
        vec
    }
}

/// 64-bit FNV-1a. Vectors are persisted, so bucketing must not change
/// between builds.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h = 0xcbf29ce484222325u64;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

/// Cosine similarity; 0 for empty, mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (&x, &y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vec.iter_mut().for_each(|v| *v /= norm);
    }
}
