//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "astronews",
    version,
    about = "Semantic search, topic clustering and summarization over space news",
    long_about = "AstroNews embeds space-news articles into a persistent vector index and answers \
                  similarity searches, topic clustering runs and per-article summaries over it."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/astronews/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration profile to apply
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Embed and index articles from a JSONL file
    Ingest {
        /// JSONL file, or a directory whose newest *.jsonl is used
        path: PathBuf,
    },

    /// Find the articles most similar to a query
    Search {
        /// Search query text
        query: String,

        /// Number of results (defaults to search.default_k)
        #[arg(short, long)]
        k: Option<usize>,

        /// Drop results below this cosine similarity
        #[arg(long, allow_negative_numbers = true)]
        min_similarity: Option<f32>,

        /// Re-rank with keyword and recency signals
        #[arg(long, conflicts_with = "min_similarity")]
        hybrid: bool,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Group indexed articles into topic clusters
    Cluster {
        /// Number of clusters (defaults to clustering.default_k)
        #[arg(short, long)]
        k: Option<usize>,

        /// Give up after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Show the run in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Summarize an indexed article
    Summarize {
        article_id: String,

        /// Maximum summary length in characters
        #[arg(long)]
        max_length: Option<usize>,
    },

    /// Remove an article from the embedding index
    Delete { article_id: String },

    /// Re-embed articles indexed under a previous model
    Migrate,

    /// Show index status
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
