//! Embedding provider trait and vector utilities.
//!
//! [`EmbeddingProvider`] is the seam between retrieval and whatever service
//! produces vectors. Concrete HTTP providers live in the `warren` app crate;
//! the pipeline only needs `embed`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

/// A backend that turns text into fixed-width vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier recorded next to stored vectors.
    fn model_name(&self) -> &str;

    /// Vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed a batch, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.embed(&[text.to_string()]).await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("{}: empty embedding response", self.model_name()))?;
        if vector.len() != self.dims() {
            return Err(anyhow!(
                "{}: expected {} dimensions, got {}",
                self.model_name(),
                self.dims(),
                vector.len()
            ));
        }
        Ok(vector)
    }
}

/// Encode a vector as little-endian `f32` bytes for BLOB storage.
///
/// ```rust
/// use warren_core::embedding::{blob_to_vec, vec_to_blob};
///
/// let v = vec![0.25f32, -1.5];
/// assert_eq!(vec_to_blob(&v).len(), 8);
/// assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a BLOB written by [`vec_to_blob`]. Trailing partial values are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, mismatched lengths, or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b.iter())
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, na, nb), (x, y)| {
            (d + x * y, na + x * x, nb + y * y)
        });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
