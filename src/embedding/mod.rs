//! Embedding generation
//!
//! - `EmbeddingProvider` trait for backend abstraction
//! - `FastEmbedProvider` for local sentence-transformer models
//! - `HashingProvider` for deterministic offline embedding
//! - `Embedder`, the process-wide wrapper every pipeline stage shares

mod embedder;
mod hashing;
mod provider;

pub use embedder::{l2_normalize, Embedder, HASHING_BACKEND};
pub use hashing::HashingProvider;
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
