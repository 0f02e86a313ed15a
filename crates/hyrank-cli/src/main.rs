//! hyrank CLI - hybrid search over a local record store.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{debug, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use ulid::Ulid;

use hyrank_core::{HyrankConfig, HyrankError, Record, StrategyStatus};
use hyrank_query::{EngineConfig, Query, SearchEngine, SearchResponse, Weights};
use hyrank_store::{SqliteStore, StoreOptions};

/// hyrank - hybrid keyword, fuzzy and semantic search
#[derive(Parser)]
#[command(name = "hyrank")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database path (default: from config)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Config file (default: ~/.config/hyrank/config.toml, then ./hyrank.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Add a record
    Add {
        /// Record title
        title: String,

        /// Record body
        content: String,

        /// Metadata as a JSON object
        #[arg(long)]
        metadata: Option<String>,

        /// Embedding as a JSON array of numbers
        #[arg(long)]
        embedding: Option<String>,
    },

    /// Import records from a JSON Lines file
    Import {
        /// One record object per line
        file: PathBuf,
    },

    /// Search the store
    Search {
        /// Query text
        text: Option<String>,

        /// Query vector as a JSON array of numbers
        #[arg(long)]
        vector: Option<String>,

        /// Maximum number of results
        #[arg(short = 'k', long)]
        limit: Option<i64>,

        #[arg(long)]
        keyword_weight: Option<f32>,

        #[arg(long)]
        fuzzy_weight: Option<f32>,

        #[arg(long)]
        semantic_weight: Option<f32>,

        /// Deadline for candidate fetches
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a record
    Delete {
        /// Record id
        id: String,
    },

    /// Show statistics
    Stats,
}

/// One line of an import file.
#[derive(Deserialize)]
struct ImportLine {
    title: String,
    content: String,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    created_at: Option<u64>,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false);

    // RUST_LOG takes precedence over --verbose when set.
    match EnvFilter::try_from_default_env() {
        Ok(filter) => {
            let subscriber = builder.with_env_filter(filter).finish();
            tracing::subscriber::set_global_default(subscriber).ok();
        }
        Err(_) => {
            tracing::subscriber::set_global_default(builder.finish()).ok();
        }
    }
}

fn load_config(cli: &Cli) -> Result<HyrankConfig, HyrankError> {
    let mut config = match &cli.config {
        Some(path) => HyrankConfig::load(path)?,
        None => HyrankConfig::load_default()?,
    };

    if let Some(path) = &cli.database {
        config.database.path = path.clone();
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_config(&cli)?;
    debug!("Using database at {}", config.database.path.display());

    match cli.command {
        Commands::Init => {
            init_database(&config)?;
        }
        Commands::Add {
            title,
            content,
            metadata,
            embedding,
        } => {
            let store = open_store(&config)?;
            let mut record = Record::new(&title, &content);
            if let Some(metadata) = metadata {
                record = record.with_metadata(parse_json(&metadata, "--metadata")?);
            }
            let embedding: Option<Vec<f32>> = embedding
                .map(|e| parse_json(&e, "--embedding"))
                .transpose()?;

            let id = add_record(&store, record, embedding).await?;
            println!("{}", id);
        }
        Commands::Import { file } => {
            let store = open_store(&config)?;
            import(&store, &file).await?;
        }
        Commands::Search {
            text,
            vector,
            limit,
            keyword_weight,
            fuzzy_weight,
            semantic_weight,
            timeout_ms,
            json,
        } => {
            let defaults = config.search.weights();
            let weights = Weights::new(
                keyword_weight.unwrap_or(defaults.keyword),
                fuzzy_weight.unwrap_or(defaults.fuzzy),
                semantic_weight.unwrap_or(defaults.semantic),
            );

            let mut query = Query::default()
                .with_limit(limit.unwrap_or(config.search.default_limit))
                .with_weights(weights);
            if let Some(text) = text {
                query = query.with_text(text);
            }
            if let Some(vector) = vector {
                query = query.with_vector(parse_json(&vector, "--vector")?);
            }
            if let Some(ms) = timeout_ms {
                query = query.with_timeout(Duration::from_millis(ms));
            }

            let store = open_store(&config)?;
            let engine = SearchEngine::with_config(
                Arc::new(store),
                EngineConfig::from_config(&config.search),
            );

            let response = engine.search(&query).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_response(&response);
            }
        }
        Commands::Delete { id } => {
            let id = Ulid::from_string(&id)
                .map_err(|e| HyrankError::invalid_argument(format!("Invalid id '{}': {}", id, e)))?;
            let store = open_store(&config)?;
            store.delete_record(id).await?;
            println!("Deleted {}", id);
        }
        Commands::Stats => {
            let store = open_store(&config)?;
            stats(&store).await?;
        }
    }

    Ok(())
}

fn init_database(config: &HyrankConfig) -> Result<(), Box<dyn std::error::Error>> {
    let db_path = &config.database.path;
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let store = SqliteStore::open(db_path, StoreOptions::from_config(config))?;
    println!("Initialized database at: {}", db_path.display());
    println!("Embedding dimension: {}", store.dimension());
    if !store.vec_enabled() {
        println!("sqlite-vec not available, using brute-force vector search");
    }
    Ok(())
}

fn open_store(config: &HyrankConfig) -> Result<SqliteStore, Box<dyn std::error::Error>> {
    let db_path = &config.database.path;
    if !db_path.exists() {
        eprintln!(
            "Database not found at {}. Run 'hyrank init' first, or specify a path with -d.",
            db_path.display()
        );
        std::process::exit(1);
    }

    Ok(SqliteStore::open(db_path, StoreOptions::from_config(config))?)
}

fn parse_json<T: serde::de::DeserializeOwned>(
    value: &str,
    flag: &str,
) -> Result<T, HyrankError> {
    serde_json::from_str(value)
        .map_err(|e| HyrankError::invalid_argument(format!("Invalid {}: {}", flag, e)))
}

async fn add_record(
    store: &SqliteStore,
    record: Record,
    embedding: Option<Vec<f32>>,
) -> Result<Ulid, HyrankError> {
    let id = store.insert_record(record).await?;
    if let Some(embedding) = embedding {
        store.set_embedding(id, &embedding).await?;
    }
    Ok(id)
}

async fn import(store: &SqliteStore, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let content = fs::read_to_string(file)?;

    let mut imported = 0;
    let mut error_count = 0;

    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let parsed: ImportLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                eprintln!("  Line {}: {}", index + 1, e);
                error_count += 1;
                continue;
            }
        };

        let mut record =
            Record::new(&parsed.title, &parsed.content).with_metadata(parsed.metadata);
        if let Some(created_at) = parsed.created_at {
            record = record.with_created_at(created_at);
        }

        match add_record(store, record, parsed.embedding).await {
            Ok(_) => imported += 1,
            Err(e) => {
                eprintln!("  Line {}: {}", index + 1, e);
                error_count += 1;
            }
        }
    }

    println!("Imported {} record(s)", imported);
    if error_count > 0 {
        println!("Errors: {}", error_count);
    }
    Ok(())
}

fn print_response(response: &SearchResponse) {
    if response.results.is_empty() {
        println!("No results found.");
    }

    for result in &response.results {
        let title = result
            .payload
            .get("title")
            .and_then(|t| t.as_str())
            .unwrap_or("");
        let breakdown: Vec<String> = result
            .per_strategy
            .iter()
            .map(|(kind, score)| format!("{}={:.3}", kind, score))
            .collect();

        println!(
            "{:>3}. [{:.3}] {} {} ({})",
            result.rank,
            result.final_score,
            result.id,
            title,
            breakdown.join(", ")
        );
    }

    for (kind, status) in &response.strategies {
        match status {
            StrategyStatus::Failed { reason } => {
                eprintln!("warning: {} strategy failed: {}", kind, reason)
            }
            StrategyStatus::TimedOut { after_ms } => {
                eprintln!("warning: {} strategy timed out after {}ms", kind, after_ms)
            }
            StrategyStatus::Completed { .. } | StrategyStatus::Skipped { .. } => {}
        }
    }

    println!("\n{} result(s) in {}ms", response.results.len(), response.latency_ms);
}

async fn stats(store: &SqliteStore) -> Result<(), Box<dyn std::error::Error>> {
    let stats = store.stats().await?;

    println!("Records:         {}", stats.records);
    println!("Embeddings:      {}", stats.embeddings);
    println!("Dimension:       {}", stats.dimension);
    println!(
        "Vector index:    {}",
        if stats.vector_index {
            "sqlite-vec"
        } else {
            "brute force"
        }
    );
    println!("Storage:         {} bytes", stats.storage_bytes);
    Ok(())
}
