use crate::config::Config;
use crate::error::{AstroError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every violation
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_search(config, &mut errors);
        Self::validate_clustering(config, &mut errors);
        Self::validate_summarizer(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AstroError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.dim == 0 {
            errors.push(ValidationError::new(
                "embedding.dim",
                "Vector dimension must be greater than 0",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.max_tokens == 0 {
            errors.push(ValidationError::new(
                "embedding.max_tokens",
                "Token budget must be greater than 0",
            ));
        }
    }

    fn validate_search(config: &Config, errors: &mut Vec<ValidationError>) {
        let search = &config.search;

        if search.default_k == 0 {
            errors.push(ValidationError::new(
                "search.default_k",
                "Default k must be greater than 0",
            ));
        }

        if !(-1.0..=1.0).contains(&search.min_similarity) {
            errors.push(ValidationError::new(
                "search.min_similarity",
                format!(
                    "Similarity threshold must be between -1.0 and 1.0, got {}",
                    search.min_similarity
                ),
            ));
        }

        let hybrid = &search.hybrid;
        let weights = [
            ("search.hybrid.semantic_weight", hybrid.semantic_weight),
            ("search.hybrid.keyword_weight", hybrid.keyword_weight),
            ("search.hybrid.recency_weight", hybrid.recency_weight),
        ];
        for (path, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                errors.push(ValidationError::new(
                    path,
                    format!("Weight must be a non-negative number, got {}", weight),
                ));
            }
        }
        if hybrid.semantic_weight + hybrid.keyword_weight + hybrid.recency_weight <= 0.0 {
            errors.push(ValidationError::new(
                "search.hybrid",
                "At least one hybrid weight must be positive",
            ));
        }

        if hybrid.candidate_pool == 0 {
            errors.push(ValidationError::new(
                "search.hybrid.candidate_pool",
                "Candidate pool must be greater than 0",
            ));
        }

        if !(hybrid.recency_tau_days > 0.0) {
            errors.push(ValidationError::new(
                "search.hybrid.recency_tau_days",
                "Recency time constant must be positive",
            ));
        }

        if !(0.0..=1.0).contains(&hybrid.must_have_penalty) {
            errors.push(ValidationError::new(
                "search.hybrid.must_have_penalty",
                format!(
                    "Penalty must be between 0.0 and 1.0, got {}",
                    hybrid.must_have_penalty
                ),
            ));
        }
    }

    fn validate_clustering(config: &Config, errors: &mut Vec<ValidationError>) {
        let clustering = &config.clustering;

        if clustering.default_k == 0 {
            errors.push(ValidationError::new(
                "clustering.default_k",
                "Default k must be greater than 0",
            ));
        }

        if clustering.max_iterations == 0 {
            errors.push(ValidationError::new(
                "clustering.max_iterations",
                "Max iterations must be greater than 0",
            ));
        }

        let threshold = clustering.convergence_threshold;
        if !threshold.is_finite() || threshold <= 0.0 {
            errors.push(ValidationError::new(
                "clustering.convergence_threshold",
                "Convergence threshold must be a finite positive number",
            ));
        }
    }

    fn validate_summarizer(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.summarizer.max_length == 0 {
            errors.push(ValidationError::new(
                "summarizer.max_length",
                "Summary length must be greater than 0",
            ));
        }

        if config.summarizer.max_sentences == 0 {
            errors.push(ValidationError::new(
                "summarizer.max_sentences",
                "Sentence count must be greater than 0",
            ));
        }
    }
}
