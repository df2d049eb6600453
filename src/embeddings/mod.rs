//! 向量嵌入模块：为 `/api/embeddings` 提供固定维度的数值向量。
//!
//! Embedding support.
//!
//! - [`Embedder`] is the seam the API layer talks to.
//! - [`HashingEmbedder`] is a deterministic, offline feature-hashing embedder.
//! - [`crate::backend::OllamaBackend`] implements [`Embedder`] against `/api/embeddings`.
//! - Vector helpers for normalization and similarity.

mod hashing;
mod vectors;

pub use hashing::{HashingEmbedder, DEFAULT_DIMENSIONS};
pub use vectors::{cosine_similarity, magnitude, normalize_vector, Vector};

use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model or scheme name reported alongside vectors.
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vector>;

    /// Embed several inputs, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}
