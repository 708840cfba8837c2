use astronews::cli::{Cli, Commands, ConfigAction};
use astronews::clustering::ClusterOutcome;
use astronews::config::{Config, ConfigValidator};
use astronews::error::{AstroError, Result};
use astronews::indexer::IngestReport;
use astronews::retrieval::SearchOutcome;
use astronews::service::NewsService;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    let Cli {
        config,
        profile,
        command,
        ..
    } = cli;

    // Handle commands
    match command {
        Commands::Config { action } => cmd_config(config, profile, action)?,
        command => {
            let config = load_config(config, profile)?;
            let service = NewsService::open(&config)?;
            run(&service, command).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose {
        "astronews=debug"
    } else {
        "astronews=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(service: &NewsService, command: Commands) -> Result<()> {
    match command {
        Commands::Ingest { path } => {
            let report = service.ingest_path(path).await?;
            print_report("Ingested", &report);
        }
        Commands::Search {
            query,
            k,
            min_similarity,
            hybrid,
            json,
        } => {
            let k = k.unwrap_or(service.config().search.default_k);
            if hybrid {
                cmd_search_hybrid(service, &query, k, json).await?;
            } else {
                let min_similarity =
                    min_similarity.unwrap_or(service.config().search.min_similarity);
                cmd_search(service, &query, k, min_similarity, json).await?;
            }
        }
        Commands::Cluster { k, timeout, json } => {
            let k = k.unwrap_or(service.config().clustering.default_k);
            cmd_cluster(service, k, timeout.map(Duration::from_secs), json).await?;
        }
        Commands::Summarize {
            article_id,
            max_length,
        } => {
            let summary = service.summarize(&article_id, max_length).await?;
            println!("{}", summary.text);
        }
        Commands::Delete { article_id } => {
            if service.delete(&article_id).await? {
                println!("✓ Removed {} from the index", article_id);
            } else {
                println!("{} is not indexed", article_id);
            }
        }
        Commands::Migrate => {
            let report = service.migrate().await?;
            print_report("Migrated", &report);
        }
        Commands::Status => cmd_status(service).await?,
        // Handled before the service opens
        Commands::Config { .. } => {}
    }

    Ok(())
}

async fn cmd_search(
    service: &NewsService,
    query: &str,
    k: usize,
    min_similarity: f32,
    json: bool,
) -> Result<()> {
    let outcome = service.search_with(query, k, min_similarity).await?;
    if json {
        return print_json(&outcome);
    }

    match outcome {
        SearchOutcome::EmptyIndex => println!("The index is empty. Run 'astronews ingest' first."),
        SearchOutcome::Results(results) if results.is_empty() => println!("No matches"),
        SearchOutcome::Results(results) => {
            for (rank, result) in results.iter().enumerate() {
                println!(
                    "{:>2}. [{:.3}] {} ({})",
                    rank + 1,
                    result.similarity,
                    result.title,
                    result.published_at.format("%Y-%m-%d")
                );
                match &result.source {
                    Some(source) => println!("    {} ({})", result.source_url, source),
                    None => println!("    {}", result.source_url),
                }
            }
        }
    }
    Ok(())
}

async fn cmd_search_hybrid(service: &NewsService, query: &str, k: usize, json: bool) -> Result<()> {
    let outcome = service
        .search_hybrid(query, k, chrono::Utc::now())
        .await?;
    if json {
        return print_json(&outcome);
    }

    match outcome {
        SearchOutcome::EmptyIndex => println!("The index is empty. Run 'astronews ingest' first."),
        SearchOutcome::Results(results) if results.is_empty() => println!("No matches"),
        SearchOutcome::Results(results) => {
            for (rank, hit) in results.iter().enumerate() {
                println!(
                    "{:>2}. [{:.3}] {} ({})",
                    rank + 1,
                    hit.scores.final_score,
                    hit.result.title,
                    hit.result.published_at.format("%Y-%m-%d")
                );
                println!(
                    "    semantic {:.3}  keyword {:.3}  recency {:.3}{}",
                    hit.scores.semantic,
                    hit.scores.keyword,
                    hit.scores.recency,
                    if hit.scores.penalized {
                        "  (missing must-have term)"
                    } else {
                        ""
                    }
                );
                println!("    {}", hit.result.source_url);
            }
        }
    }
    Ok(())
}

async fn cmd_cluster(
    service: &NewsService,
    k: usize,
    timeout: Option<Duration>,
    json: bool,
) -> Result<()> {
    let outcome = service.cluster(k, timeout).await?;
    if json {
        return print_json(&outcome);
    }

    let run = match outcome {
        ClusterOutcome::EmptyIndex => {
            println!("The index is empty. Run 'astronews ingest' first.");
            return Ok(());
        }
        ClusterOutcome::Clustered(run) => run,
    };

    println!("✓ Cluster run {}", run.run_id);
    if run.adjusted {
        println!(
            "  k reduced from {} to {} (article count)",
            run.k_requested, run.k_effective
        );
    }
    println!(
        "  {} iterations, {}, inertia {:.4}",
        run.iterations,
        if run.converged {
            "converged"
        } else {
            "not converged"
        },
        run.inertia
    );
    for exemplar in &run.exemplars {
        println!(
            "  [{}] {} articles, e.g. \"{}\"",
            exemplar.cluster_id, exemplar.size, exemplar.title
        );
    }
    Ok(())
}

async fn cmd_status(service: &NewsService) -> Result<()> {
    let status = service.status().await?;

    println!("AstroNews Status");
    println!("================");
    println!("\nModel: {} ({}D)", status.active_model, status.dimension);
    println!("Articles: {}", status.articles);
    println!("Summaries cached: {}", status.summaries);

    println!("\nEmbeddings:");
    if status.embeddings.is_empty() {
        println!("  none");
    }
    for entry in &status.embeddings {
        let marker = if entry.model_version == status.active_model {
            ""
        } else {
            "  (stale, run 'astronews migrate')"
        };
        println!("  {}: {}{}", entry.model_version, entry.count, marker);
    }

    println!("\nCluster runs: {}", status.cluster_runs);
    if let Some(run) = &status.latest_run {
        println!(
            "  latest {} at {}: k={} over {}",
            run.run_id,
            run.created_at.format("%Y-%m-%d %H:%M:%S"),
            run.k_effective,
            run.model_version
        );
    }
    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, profile)?;
            let toml = toml::to_string_pretty(&config)?;
            println!("{}", toml);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
            println!(
                "  Embedding: {} ({}D)",
                config.embedding.model, config.embedding.dim
            );
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            // Create parent directory
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| AstroError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    let mut config = if path.exists() {
        Config::load(&path)?
    } else {
        tracing::warn!(
            "Config file not found, using defaults. Run 'astronews config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    };

    if let Some(profile) = profile {
        config.apply_profile(&profile)?;
    }
    ConfigValidator::validate(&config)?;
    Ok(config)
}

fn print_report(verb: &str, report: &IngestReport) {
    println!(
        "✓ {}: {} inserted, {} updated, {} skipped, {} failed ({} ms)",
        verb,
        report.inserted,
        report.updated,
        report.skipped,
        report.failed.len(),
        report.duration_ms
    );
    for failure in &report.failed {
        println!("  ✗ {}: {}", failure.article_id, failure.reason);
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| AstroError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })?;
    println!("{}", json);
    Ok(())
}
