//! Deterministic feature-hashing embedder.

use super::vectors::{normalize_vector, Vector};
use super::Embedder;
use crate::{Error, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

pub const DEFAULT_DIMENSIONS: usize = 384;

/// Maps lowercase word unigrams and bigrams into a fixed number of signed
/// buckets, then L2-normalizes. Same text always yields the same vector, and
/// texts sharing words land close together under cosine similarity.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(Error::configuration("embedding dimensions must be positive"));
        }
        Ok(Self { dimensions })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&digest[..8]);
        let h = u64::from_le_bytes(raw);
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        ((h % self.dimensions as u64) as usize, sign)
    }

    pub fn embed_sync(&self, text: &str) -> Result<Vector> {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();
        if words.is_empty() {
            return Err(Error::invalid_input("cannot embed text without words"));
        }

        let mut v = vec![0.0f32; self.dimensions];
        for w in &words {
            let (i, sign) = self.bucket(w);
            v[i] += sign;
        }
        for pair in words.windows(2) {
            let (i, sign) = self.bucket(&format!("{} {}", pair[0], pair[1]));
            v[i] += 0.5 * sign;
        }
        Ok(normalize_vector(&v))
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_DIMENSIONS,
        }
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "feature-hashing"
    }

    async fn embed(&self, text: &str) -> Result<Vector> {
        self.embed_sync(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{cosine_similarity, magnitude};

    #[test]
    fn vectors_have_fixed_length_and_unit_norm() {
        let e = HashingEmbedder::new(64).unwrap();
        let v = e.embed_sync("restart the nginx service").unwrap();
        assert_eq!(v.len(), 64);
        assert!((magnitude(&v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn embedding_is_deterministic_and_case_insensitive() {
        let e = HashingEmbedder::default();
        assert_eq!(
            e.embed_sync("Disk Full on /var").unwrap(),
            e.embed_sync("disk full on var").unwrap()
        );
    }

    #[test]
    fn related_texts_score_higher_than_unrelated() {
        let e = HashingEmbedder::default();
        let a = e.embed_sync("tcp handshake syn ack").unwrap();
        let b = e.embed_sync("explain the tcp handshake").unwrap();
        let c = e.embed_sync("bake a chocolate cake").unwrap();
        assert!(cosine_similarity(&a, &b).unwrap() > cosine_similarity(&a, &c).unwrap());
    }

    #[test]
    fn rejects_empty_text_and_zero_dimensions() {
        assert!(HashingEmbedder::default().embed_sync("  ..  ").is_err());
        assert!(HashingEmbedder::new(0).is_err());
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let e = HashingEmbedder::new(16).unwrap();
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let out = e.embed_batch(&texts).await.unwrap();
        assert_eq!(out[0], e.embed_sync("alpha").unwrap());
        assert_eq!(out[1], e.embed_sync("beta").unwrap());
    }
}
