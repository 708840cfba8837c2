//! AstroNews - semantic retrieval over space news
//!
//! Ingests news articles into a persistent embedding index and answers
//! similarity searches, topic clustering runs and summaries over it. The
//! [`service::NewsService`] facade is the entry point for request handlers;
//! the components it wires together are usable on their own.

pub mod cli;
pub mod clustering;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod retrieval;
pub mod service;
pub mod storage;
pub mod summarizer;

pub use error::{AstroError, ErrorKind, Result};
