//! Configuration management for AstroNews
//!
//! Handles loading, validation, profiles, and environment overrides of the
//! TOML configuration file.

use crate::error::{AstroError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub clustering: ClusteringConfig,
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// Embedding configuration
///
/// `model` selects the backend: `"hashing"` for the deterministic offline
/// backend, anything else is resolved as a FastEmbed model name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    /// Expected vector length
    pub dim: usize,
    /// Maximum texts per model invocation
    pub batch_size: usize,
    /// Texts are truncated to their first `max_tokens` tokens
    pub max_tokens: usize,
}

/// Search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub default_k: usize,
    pub min_similarity: f32,
    #[serde(default)]
    pub hybrid: HybridConfig,
}

/// Weights and knobs for hybrid (semantic + keyword + recency) ranking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    pub semantic_weight: f32,
    pub keyword_weight: f32,
    pub recency_weight: f32,
    /// Number of semantic neighbours re-ranked
    pub candidate_pool: usize,
    pub recency_tau_days: f64,
    /// Score multiplier when a must-have query term is missing from the article
    pub must_have_penalty: f32,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            semantic_weight: 0.45,
            keyword_weight: 0.35,
            recency_weight: 0.20,
            candidate_pool: 50,
            recency_tau_days: 14.0,
            must_have_penalty: 0.6,
        }
    }
}

/// Clustering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    pub default_k: usize,
    pub max_iterations: usize,
    pub convergence_threshold: f32,
    pub timeout_secs: u64,
}

/// Summarizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    /// When false, summaries always use the truncated-text fallback
    pub enabled: bool,
    /// Maximum summary length in characters
    pub max_length: usize,
    pub max_sentences: usize,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_similarity: Option<f32>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AstroError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| AstroError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| AstroError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| AstroError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        if let Some(k) = overrides.default_k {
            self.search.default_k = k;
        }
        if let Some(min) = overrides.min_similarity {
            self.search.min_similarity = min;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: ASTRONEWS_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    fn apply_overrides(&mut self, vars: impl Iterator<Item = (String, String)>) {
        for (key, value) in vars {
            let config_key = match key.strip_prefix("ASTRONEWS_") {
                Some(k) => k,
                None if key == "EMBEDDING_MODEL" => "EMBEDDING__MODEL",
                None => continue,
            };
            if let Err(e) = self.set_value_from_env(config_key, &value) {
                tracing::warn!("Failed to apply env override {}: {}", key, e);
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "EMBEDDING__DIM" => {
                self.embedding.dim = parse_value(path, value)?;
            }
            "EMBEDDING__BATCH_SIZE" => {
                self.embedding.batch_size = parse_value(path, value)?;
            }
            "SEARCH__DEFAULT_K" => {
                self.search.default_k = parse_value(path, value)?;
            }
            "SEARCH__MIN_SIMILARITY" => {
                self.search.min_similarity = parse_value(path, value)?;
            }
            "CLUSTERING__DEFAULT_K" => {
                self.clustering.default_k = parse_value(path, value)?;
            }
            "CLUSTERING__TIMEOUT_SECS" => {
                self.clustering.timeout_secs = parse_value(path, value)?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AstroError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("astronews").join("config.toml"))
    }

    /// Resolve `storage.data_dir`, expanding a leading `~/`
    pub fn data_dir(&self) -> Result<PathBuf> {
        expand_path(&self.storage.data_dir)
    }

    /// Location of the SQLite database
    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("store").join("db.sqlite"))
    }
}

fn parse_value<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| AstroError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| AstroError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| AstroError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.astronews"),
            },
            embedding: EmbeddingConfig {
                model: "bge-small-en-v1.5".to_string(),
                dim: 384,
                batch_size: 32,
                max_tokens: 256,
            },
            search: SearchConfig {
                default_k: 5,
                min_similarity: 0.0,
                hybrid: HybridConfig::default(),
            },
            clustering: ClusteringConfig {
                default_k: 8,
                max_iterations: 100,
                convergence_threshold: 1e-6,
                timeout_secs: 60,
            },
            summarizer: SummarizerConfig {
                enabled: true,
                max_length: 400,
                max_sentences: 3,
            },
            profiles: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let mut config = Config::default();
        config.embedding.model = "hashing".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.embedding.dim, 384);
        assert_eq!(loaded.search.default_k, 5);
        assert_eq!(loaded.meta.schema_version, "1.0.0");
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load(Path::new("/nonexistent/astronews.toml"));
        assert!(matches!(result, Err(AstroError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_profile_overrides() {
        let mut config = Config::default();
        config.profiles.insert(
            "offline".to_string(),
            ProfileOverrides {
                embedding_model: Some("hashing".to_string()),
                default_k: Some(10),
                min_similarity: None,
            },
        );

        config.apply_profile("offline").unwrap();
        assert_eq!(config.embedding.model, "hashing");
        assert_eq!(config.search.default_k, 10);
        assert_eq!(config.search.min_similarity, 0.0);

        assert!(config.apply_profile("missing").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        let vars = vec![
            ("ASTRONEWS_SEARCH__DEFAULT_K".to_string(), "12".to_string()),
            ("EMBEDDING_MODEL".to_string(), "hashing".to_string()),
            ("ASTRONEWS_EMBEDDING__DIM".to_string(), "not-a-number".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ];

        config.apply_overrides(vars.into_iter());
        assert_eq!(config.search.default_k, 12);
        assert_eq!(config.embedding.model, "hashing");
        // Unparseable values are ignored
        assert_eq!(config.embedding.dim, 384);
    }

    #[test]
    fn test_database_path() {
        let mut config = Config::default();
        config.storage.data_dir = PathBuf::from("/tmp/astro");
        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/tmp/astro/store/db.sqlite")
        );
    }
}
