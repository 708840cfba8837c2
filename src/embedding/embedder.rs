//! Process-wide embedder: text preparation, batching, normalization

use super::{EmbeddingError, EmbeddingProvider, FastEmbedProvider, HashingProvider};
use crate::config::EmbeddingConfig;
use crate::corpus::normalize_text;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Backend name selecting [`HashingProvider`]
pub const HASHING_BACKEND: &str = "hashing";

/// Wraps an [`EmbeddingProvider`] with the pipeline's text contract
///
/// Texts are whitespace-normalized, rejected when empty, and truncated to
/// their first `max_tokens` whitespace tokens. Truncation is lossy for long
/// articles: only the opening of the body contributes to the vector.
/// Output vectors are L2-normalized so cosine similarity is a dot product.
///
/// Build one per process and share it by `Arc`; loading a model is expensive
/// and never repeated implicitly.
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    max_tokens: usize,
    batch_size: usize,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, max_tokens: usize, batch_size: usize) -> Self {
        Self {
            provider,
            max_tokens: max_tokens.max(1),
            batch_size: batch_size.max(1),
        }
    }

    /// Load the backend named by `config.model` and check its dimension
    pub fn from_config(
        config: &EmbeddingConfig,
        cache_dir: Option<PathBuf>,
    ) -> Result<Self, EmbeddingError> {
        let provider: Arc<dyn EmbeddingProvider> = if config.model == HASHING_BACKEND {
            Arc::new(HashingProvider::new(config.dim)?)
        } else {
            Arc::new(FastEmbedProvider::new(&config.model, cache_dir)?)
        };

        if provider.dimension() != config.dim {
            return Err(EmbeddingError::DimensionMismatch {
                expected: config.dim,
                actual: provider.dimension(),
            });
        }

        tracing::info!(
            "Embedder ready: {} ({}D, batch {}, {} tokens max)",
            provider.model_name(),
            provider.dimension(),
            config.batch_size,
            config.max_tokens
        );

        Ok(Self::new(provider, config.max_tokens, config.batch_size))
    }

    /// Tag stored alongside every vector this embedder produces
    pub fn model_version(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Normalize and truncate a text, rejecting it when nothing remains
    pub fn prepare(&self, text: &str) -> Result<String, EmbeddingError> {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "Text is empty after normalization".to_string(),
            ));
        }

        let mut tokens = normalized.split(' ');
        let truncated: Vec<&str> = tokens.by_ref().take(self.max_tokens).collect();
        if tokens.next().is_some() {
            debug!("Truncated text to {} tokens", self.max_tokens);
        }
        Ok(truncated.join(" "))
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| EmbeddingError::Generation("No embeddings generated".to_string()))
    }

    /// Embed many texts, invoking the backend at most `batch_size` texts at a time
    ///
    /// Fails as a whole if any text is invalid or the backend fails; callers
    /// that need per-item isolation retry items individually.
    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let prepared = texts
            .iter()
            .map(|t| self.prepare(t))
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(prepared.len());
        for chunk in prepared.chunks(self.batch_size) {
            let vectors = self.provider.embed_batch(chunk)?;
            if vectors.len() != chunk.len() {
                return Err(EmbeddingError::Generation(format!(
                    "Embedding count mismatch: expected {}, got {}",
                    chunk.len(),
                    vectors.len()
                )));
            }

            for vector in vectors {
                if vector.len() != self.dimension() {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: self.dimension(),
                        actual: vector.len(),
                    });
                }
                let normalized = l2_normalize(vector).ok_or_else(|| {
                    EmbeddingError::Generation("Model produced a zero vector".to_string())
                })?;
                out.push(normalized);
            }
        }

        Ok(out)
    }
}

/// Scale a vector to unit length; `None` for zero or non-finite vectors
pub fn l2_normalize(mut vector: Vec<f32>) -> Option<Vec<f32>> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm <= f32::EPSILON {
        return None;
    }
    for x in vector.iter_mut() {
        *x /= norm;
    }
    Some(vector)
}
