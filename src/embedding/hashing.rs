//! Deterministic feature-hashing embedder
//!
//! Each content word is hashed with BLAKE3 into one of `dimension` buckets
//! with a pseudo-random sign; bucket weights use sublinear term frequency.
//! No model download, so it serves offline deployments and tests.

use super::{EmbeddingError, EmbeddingProvider};
use crate::corpus::text::tokenize;
use std::collections::BTreeMap;

pub struct HashingProvider {
    dimension: usize,
    model_name: String,
}

impl HashingProvider {
    pub fn new(dimension: usize) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::Unavailable(
                "Hashing dimension must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            dimension,
            model_name: format!("hashing-v1-{}", dimension),
        })
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "Text has no indexable words".to_string(),
            ));
        }

        // Ordered so bucket accumulation is bit-for-bit reproducible
        let mut counts: BTreeMap<&str, u32> = BTreeMap::new();
        for token in &tokens {
            *counts.entry(token.as_str()).or_insert(0) += 1;
        }

        let mut vector = vec![0.0f32; self.dimension];
        for (token, tf) in counts {
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let mut index_bytes = [0u8; 8];
            index_bytes.copy_from_slice(&bytes[..8]);
            let bucket = (u64::from_le_bytes(index_bytes) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign * (1.0 + (tf as f32).ln());
        }

        Ok(vector)
    }
}

impl EmbeddingProvider for HashingProvider {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed_one(t)).collect()
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
    fn test_deterministic() {
        let provider = HashingProvider::new(64).unwrap();
        let a = provider.embed("Rocket launch from Cape Canaveral").unwrap();
        let b = provider.embed("Rocket launch from Cape Canaveral").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_model_name_tracks_dimension() {
        assert_eq!(HashingProvider::new(384).unwrap().model_name(), "hashing-v1-384");
    }

    #[test]
    fn test_stopword_only_text_rejected() {
        let provider = HashingProvider::new(64).unwrap();
        assert!(matches!(
            provider.embed("the of and"),
            Err(EmbeddingError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(HashingProvider::new(0).is_err());
    }
}
