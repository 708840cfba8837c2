/// Embedding provider trait and FastEmbed implementation
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding model unavailable: {0}")]
    Unavailable(String),

    #[error("Embedding generation failed: {0}")]
    Generation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Trait for embedding backends
///
/// Implementations are deterministic at inference time: the same text always
/// yields the same vector.
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for multiple texts, one vector per input, in order
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Generate embedding for a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| EmbeddingError::Generation("No embeddings generated".to_string()))
    }

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// FastEmbed provider for local embedding generation
///
/// Runs the ONNX export of a sentence-transformer locally; no API calls.
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedProvider {
    /// Create a new FastEmbed provider with the specified model
    ///
    /// **Important**: Models are downloaded on first use into `cache_dir`
    /// (FastEmbed's default cache when `None`).
    /// - all-MiniLM-L6-v2: 90MB (384 dims)
    /// - bge-small-en-v1.5: 130MB (384 dims)
    /// - bge-base-en-v1.5: 440MB (768 dims)
    pub fn new(model_name: &str, cache_dir: Option<PathBuf>) -> Result<Self, EmbeddingError> {
        let spec = resolve_model(model_name).ok_or_else(|| {
            EmbeddingError::Unavailable(format!(
                "Unsupported model: {}. Supported: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5",
                model_name
            ))
        })?;

        tracing::info!(
            "Initializing embedding model: {} ({}D, ~{}MB download if not cached)",
            spec.name,
            spec.dimension,
            spec.size_mb
        );

        let mut init_options = InitOptions::new(spec.model).with_show_download_progress(false);
        if let Some(dir) = cache_dir {
            init_options = init_options.with_cache_dir(dir);
        }

        let model = TextEmbedding::try_new(init_options)
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: spec.name.to_string(),
            dimension: spec.dimension,
        })
    }
}

/// A supported FastEmbed model
struct ModelSpec {
    model: EmbeddingModel,
    /// Canonical name, recorded as the model version of its vectors
    name: &'static str,
    dimension: usize,
    size_mb: usize,
}

/// Look up a model by name, ignoring case and the hub organization prefix
fn resolve_model(name: &str) -> Option<ModelSpec> {
    let lowered = name.trim().to_lowercase();
    let bare = lowered
        .strip_prefix("baai/")
        .or_else(|| lowered.strip_prefix("sentence-transformers/"))
        .unwrap_or(&lowered);

    let (model, name, dimension, size_mb) = match bare {
        "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, "all-MiniLM-L6-v2", 384, 90),
        "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, "bge-small-en-v1.5", 384, 130),
        "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, "bge-base-en-v1.5", 768, 440),
        _ => return None,
    };
    Some(ModelSpec {
        model,
        name,
        dimension,
        size_mb,
    })
}

impl EmbeddingProvider for FastEmbedProvider {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        if texts.iter().any(|t| t.is_empty()) {
            return Err(EmbeddingError::InvalidInput(
                "Batch contains empty text".to_string(),
            ));
        }

        let embeddings = self
            .model
            .embed(texts.to_vec(), Some(texts.len()))
            .map_err(|e| EmbeddingError::Generation(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::Generation(format!(
                "Embedding count mismatch: expected {}, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        for embedding in &embeddings {
            if embedding.len() != self.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension,
                    actual: embedding.len(),
                });
            }
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_model() {
        let result = FastEmbedProvider::new("word2vec", None);
        assert!(matches!(result, Err(EmbeddingError::Unavailable(_))));
    }

    #[test]
    fn test_model_aliases_share_one_name() {
        for alias in [
            "all-MiniLM-L6-v2",
            "all-minilm-l6-v2",
            "ALL-MINILM-L6-V2",
            "sentence-transformers/all-MiniLM-L6-v2",
        ] {
            let spec = resolve_model(alias).unwrap();
            assert_eq!(spec.name, "all-MiniLM-L6-v2");
            assert_eq!(spec.dimension, 384);
        }

        for alias in ["bge-base-en-v1.5", "BAAI/bge-base-en-v1.5", "BGE-Base-EN-v1.5"] {
            let spec = resolve_model(alias).unwrap();
            assert_eq!(spec.name, "bge-base-en-v1.5");
            assert_eq!(spec.dimension, 768);
        }

        assert!(resolve_model("bge-large-en-v1.5").is_none());
    }

    #[test]
    #[ignore] // Requires model download (~130MB) - run with: cargo test -- --ignored
    fn test_batch_embedding() {
        let provider = FastEmbedProvider::new("bge-small-en-v1.5", None).unwrap();
        let texts = vec![
            "Falcon 9 launches a cargo Dragon.".to_string(),
            "Astronomers discover a new comet.".to_string(),
        ];

        let embeddings = provider.embed_batch(&texts).unwrap();
        assert_eq!(embeddings.len(), 2);
        for embedding in embeddings {
            assert_eq!(embedding.len(), 384);
        }
    }

    #[test]
    #[ignore] // Requires model download (~130MB) - run with: cargo test -- --ignored
    fn test_deterministic_output() {
        let provider = FastEmbedProvider::new("bge-small-en-v1.5", None).unwrap();
        let a = provider.embed("Starship static fire test").unwrap();
        let b = provider.embed("Starship static fire test").unwrap();
        assert_eq!(a, b);
    }
}
