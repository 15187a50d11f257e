//! Embeddings for stored entries
//!
//! Entries carry a cheap hashed bag-of-words vector: each token is hashed into
//! one of `dimensions` buckets and the counts are L2-normalized. It is a
//! placeholder for a real embedding backend, which can be plugged in through
//! [`EmbeddingProvider`].

use crate::error::{MemoryError, MemoryResult};
use serde::{Deserialize, Serialize};

/// A dense embedding vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    /// The vector
    pub vector: Vec<f32>,

    /// Model that produced it
    pub model: String,
}

impl Embedding {
    /// Create a new embedding
    pub fn new(vector: Vec<f32>, model: impl Into<String>) -> Self {
        Self {
            vector,
            model: model.into(),
        }
    }

    /// Number of dimensions
    pub fn dimensions(&self) -> usize {
        self.vector.len()
    }

    /// Cosine similarity with another embedding
    pub fn cosine_similarity(&self, other: &Embedding) -> MemoryResult<f32> {
        cosine_similarity(&self.vector, &other.vector)
    }
}

/// Cosine similarity of two equally sized vectors (0 when either is zero)
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> MemoryResult<f32> {
    if a.len() != b.len() {
        return Err(MemoryError::validation(
            "embedding_dimensions",
            "dimensions must match",
            format!("{} vs {}", a.len(), b.len()),
        ));
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot / (norm_a * norm_b))
}

/// Embedding generation backend
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a piece of text
    async fn embed(&self, text: &str) -> MemoryResult<Embedding>;

    /// Model name
    fn model_name(&self) -> &str;

    /// Output dimensionality
    fn dimensions(&self) -> usize;
}

/// Hashed bag-of-words embedding
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dimensions: usize,
}

impl HashEmbeddingProvider {
    /// Create a provider producing `dimensions`-long vectors
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Synchronous embedding
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = (fnv1a(&token.to_lowercase()) % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }

        vector
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str) -> MemoryResult<Embedding> {
        Ok(Embedding::new(self.embed_text(text), self.model_name()))
    }

    fn model_name(&self) -> &str {
        "hashed-bow"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// FNV-1a; bucket assignment must be stable across processes
fn fnv1a(text: &str) -> u64 {
    text.bytes().fold(0xcbf29ce484222325u64, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x100000001b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0], "test");
        let b = Embedding::new(vec![1.0, 0.0, 0.0], "test");
        let c = Embedding::new(vec![0.0, 1.0, 0.0], "test");

        // Identical vectors
        assert!((a.cosine_similarity(&b).unwrap() - 1.0).abs() < 1e-6);

        // Orthogonal vectors
        assert!(a.cosine_similarity(&c).unwrap().abs() < 1e-6);

        // Mismatched dimensions
        let d = Embedding::new(vec![1.0, 0.0], "test");
        assert!(a.cosine_similarity(&d).is_err());
    }

    #[tokio::test]
    async fn test_hash_embedding_is_normalized_and_stable() {
        let provider = HashEmbeddingProvider::new(64);

        let first = provider.embed("fade in the title card").await.unwrap();
        let second = provider.embed("Fade in the TITLE card").await.unwrap();

        assert_eq!(first.dimensions(), 64);
        assert_eq!(first.vector, second.vector);

        let norm: f32 = first.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_embeds_to_zero() {
        let provider = HashEmbeddingProvider::new(8);
        assert!(provider.embed_text("  ...  ").iter().all(|x| *x == 0.0));
    }
}
