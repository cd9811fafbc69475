//! The embedding provider contract.
//!
//! Implementations map text to a fixed-dimension, unit-norm `f32` vector.
//! The dimension is a construction-time constant and must match the vector
//! schema. Implementations running real inference must execute off the
//! async scheduler (`spawn_blocking` or a dedicated runtime); the trait is
//! async so callers never block either way.

use async_trait::async_trait;
use cortex_types::error::RetrievalError;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Maps text to dense unit-norm vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// The fixed output dimension.
    fn dimension(&self) -> usize;

    /// Encodes one text.
    async fn encode(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;

    /// Encodes a batch. The default loops; batching implementations
    /// override for throughput.
    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.encode(text).await?);
        }
        Ok(out)
    }
}

/// The local default: deterministic feature hashing.
///
/// Tokens (and their in-token character trigrams) are hashed into buckets,
/// then the vector is L2-normalized. No model download, no I/O, stable
/// across runs; good enough for local deployments and tests; production
/// inference plugs in through the [`Embedder`] trait.
#[derive(Debug, Clone)]
pub struct FeatureHashEmbedder {
    dimension: usize,
}

impl FeatureHashEmbedder {
    /// An embedder with the given output dimension.
    pub fn new(dimension: usize) -> Self {
        FeatureHashEmbedder { dimension }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let h = hasher.finish();
        let bucket = (h % self.dimension as u64) as usize;
        // Sign bit decorrelates buckets (hashing-trick style).
        let sign = if h & (1 << 63) == 0 { 1.0 } else { -1.0 };
        (bucket, sign)
    }

    fn encode_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimension];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let (bucket, sign) = self.bucket(token);
            vector[bucket] += sign;
            let chars: Vec<char> = token.chars().collect();
            for window in chars.windows(3) {
                let tri: String = window.iter().collect();
                let (bucket, sign) = self.bucket(&format!("tri:{tri}"));
                vector[bucket] += 0.5 * sign;
            }
        }
        l2_normalize(&mut vector);
        vector
    }
}

/// Scales a vector to unit norm in place. Zero vectors stay zero.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

#[async_trait]
impl Embedder for FeatureHashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn encode(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        Ok(self.encode_sync(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn output_is_unit_norm_and_deterministic() {
        let e = FeatureHashEmbedder::new(384);
        let a = e.encode("The quick brown fox").await.unwrap();
        let b = e.encode("The quick brown fox").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 384);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn similar_texts_are_closer_than_unrelated() {
        let e = FeatureHashEmbedder::new(384);
        let a = e.encode("database storage engine with indexes").await.unwrap();
        let b = e.encode("storage engine database index design").await.unwrap();
        let c = e.encode("banana smoothie recipes for summer").await.unwrap();
        let dot = |x: &[f32], y: &[f32]| x.iter().zip(y).map(|(p, q)| p * q).sum::<f32>();
        assert!(dot(&a, &b) > dot(&a, &c));
    }

    #[tokio::test]
    async fn empty_text_yields_zero_vector() {
        let e = FeatureHashEmbedder::new(64);
        let v = e.encode("").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
