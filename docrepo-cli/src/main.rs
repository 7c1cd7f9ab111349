use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use docrepo_core::models::{
    self, Feedback, Interview, JobPosting, PracticeInterview, User,
};
use docrepo_core::{
    Filters, MemoryStore, QueryOptions, Repository, RepositoryConfig, SortDirection,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "docrepo")]
#[command(about = "docrepo CLI - validated document repository over a JSON data file")]
#[command(version)]
struct Cli {
    /// Engine configuration (TOML)
    #[arg(long, global = true, env = "DOCREPO_CONFIG")]
    config: Option<PathBuf>,

    /// Data file holding every collection
    #[arg(long, global = true, default_value = "docrepo.json")]
    data: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered collections with their schema and size
    Collections,
    /// Validate and create every document of a JSON file
    Import {
        /// JSON file: { "collection": [documents...], ... }
        file: PathBuf,
    },
    /// Export stored documents to a JSON file
    Export {
        /// Output JSON file
        file: PathBuf,
        /// Export only this collection
        #[arg(long)]
        collection: Option<String>,
    },
    /// Print the first entity matching the filters
    Get {
        collection: String,
        /// Filter as key=value (repeatable); nested keys use `__`
        #[arg(short = 'f', long = "filter", required = true)]
        filters: Vec<String>,
    },
    /// List entities, optionally filtered
    List {
        collection: String,
        #[arg(short = 'f', long = "filter")]
        filters: Vec<String>,
        /// Sort field (default: creation time)
        #[arg(long)]
        sort: Option<String>,
        /// Sort ascending instead of descending
        #[arg(long)]
        asc: bool,
        /// Maximum number of entities (0 = unbounded)
        #[arg(long, default_value_t = 0)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        skip: usize,
    },
    /// Count entities, optionally filtered
    Count {
        collection: String,
        #[arg(short = 'f', long = "filter")]
        filters: Vec<String>,
    },
    /// Set fields on one entity
    Update {
        collection: String,
        id: String,
        /// Field assignment as key=value (repeatable)
        #[arg(short = 's', long = "set", required = true)]
        assignments: Vec<String>,
    },
    /// Add a number to a numeric field of one entity
    Increment {
        collection: String,
        id: String,
        field: String,
        #[arg(allow_hyphen_values = true)]
        delta: String,
    },
    /// Delete the single matching entity, or every match with --all
    Delete {
        collection: String,
        #[arg(short = 'f', long = "filter", required = true)]
        filters: Vec<String>,
        #[arg(long)]
        all: bool,
    },
}

/// Run `$body` with `$T` bound to the entity type of `$collection`.
macro_rules! with_entity {
    ($collection:expr, $T:ident => $body:expr) => {
        match $collection {
            models::USERS => {
                type $T = User;
                $body
            }
            models::INTERVIEWS => {
                type $T = Interview;
                $body
            }
            models::JOB_POSTINGS => {
                type $T = JobPosting;
                $body
            }
            models::FEEDBACK => {
                type $T = Feedback;
                $body
            }
            models::PRACTICE_INTERVIEWS => {
                type $T = PracticeInterview;
                $body
            }
            other => Err(anyhow!("unknown collection '{}'", other)),
        }
    };
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) if path.exists() => RepositoryConfig::from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        Some(path) => {
            warn!(path = %path.display(), "Config file not found, using defaults");
            RepositoryConfig::default()
        }
        None => RepositoryConfig::default(),
    };

    let store = Arc::new(load_store(&cli.data)?);
    let registry = Arc::new(models::default_registry()?);
    let repo = Repository::with_config(store.clone(), registry, config);

    let mutated = run(&repo, cli.command).await?;
    if mutated {
        save_store(&store, &cli.data)?;
    }
    Ok(())
}

/// Execute one command, returning whether the data file must be rewritten.
async fn run(repo: &Repository<MemoryStore>, command: Commands) -> Result<bool> {
    match command {
        Commands::Collections => {
            for collection in repo.registry().collections() {
                let binding = repo.registry().resolve(&collection)?;
                println!(
                    "{:<22} {:<18} {} documents",
                    collection,
                    binding.schema_name,
                    repo.store().len(&collection)
                );
            }
            Ok(false)
        }
        Commands::Import { file } => {
            import_data(repo, &file).await?;
            Ok(true)
        }
        Commands::Export { file, collection } => {
            export_data(repo.store(), &file, collection.as_deref())?;
            Ok(false)
        }
        Commands::Get { collection, filters } => {
            let filters = parse_filters(&filters)?;
            let found: Value = with_entity!(collection.as_str(), T => {
                let entity = repo.get::<T>(&collection, &filters).await?;
                serde_json::to_value(entity).map_err(anyhow::Error::from)
            })?;
            if found.is_null() {
                bail!("no document in '{}' matches the filters", collection);
            }
            print_json(&found)?;
            Ok(false)
        }
        Commands::List {
            collection,
            filters,
            sort,
            asc,
            limit,
            skip,
        } => {
            let filters = parse_filters(&filters)?;
            let mut options = QueryOptions::new().with_limit(limit).with_skip(skip);
            if let Some(field) = sort {
                let direction = if asc { SortDirection::Asc } else { SortDirection::Desc };
                options = options.sort_by(field, direction);
            } else if asc {
                options.direction = Some(SortDirection::Asc);
            }

            let listed: Value = with_entity!(collection.as_str(), T => {
                let entities = if filters.is_empty() {
                    repo.get_all::<T>(&collection, &options).await?
                } else {
                    repo.get_multiple::<T>(&collection, &filters, &options).await?
                };
                serde_json::to_value(entities).map_err(anyhow::Error::from)
            })?;
            print_json(&listed)?;
            Ok(false)
        }
        Commands::Count { collection, filters } => {
            let filters = parse_filters(&filters)?;
            let count: u64 = with_entity!(collection.as_str(), T => {
                if filters.is_empty() {
                    repo.count_all::<T>(&collection).await.map_err(anyhow::Error::from)
                } else {
                    repo.count::<T>(&collection, &filters).await.map_err(anyhow::Error::from)
                }
            })?;
            println!("{}", count);
            Ok(false)
        }
        Commands::Update {
            collection,
            id,
            assignments,
        } => {
            let fields = parse_assignments(&assignments)?;
            let updated: Value = with_entity!(collection.as_str(), T => {
                let entity = repo.update_fields::<T>(&collection, &id, fields).await?;
                serde_json::to_value(entity).map_err(anyhow::Error::from)
            })?;
            if updated.is_null() {
                bail!("no document '{}' in '{}'", id, collection);
            }
            print_json(&updated)?;
            Ok(true)
        }
        Commands::Increment {
            collection,
            id,
            field,
            delta,
        } => {
            let delta: Value = serde_json::from_str(&delta)
                .ok()
                .filter(Value::is_number)
                .ok_or_else(|| anyhow!("delta must be a number, got '{}'", delta))?;
            let updated: Value = with_entity!(collection.as_str(), T => {
                let entity = repo.increment::<T>(&collection, &id, &field, delta).await?;
                serde_json::to_value(entity).map_err(anyhow::Error::from)
            })?;
            if updated.is_null() {
                bail!("no document '{}' in '{}'", id, collection);
            }
            print_json(&updated)?;
            Ok(true)
        }
        Commands::Delete {
            collection,
            filters,
            all,
        } => {
            let filters = parse_filters(&filters)?;
            let deleted: Value = with_entity!(collection.as_str(), T => {
                if all {
                    let entities = repo.delete_multiple::<T>(&collection, &filters).await?;
                    serde_json::to_value(entities).map_err(anyhow::Error::from)
                } else {
                    let entity = repo.delete::<T>(&collection, &filters).await?;
                    serde_json::to_value(entity).map_err(anyhow::Error::from)
                }
            })?;
            print_json(&deleted)?;
            Ok(true)
        }
    }
}

/// Import data from JSON file
/// Format: { "collection_name": [documents...], ... }
///
/// Each collection is created as one batch, so an invalid document rejects
/// its whole collection.
async fn import_data(repo: &Repository<MemoryStore>, file: &Path) -> Result<()> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("Failed to read file: {}", file.display()))?;

    let data: Map<String, Value> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in file: {}", file.display()))?;

    let mut total_docs = 0;

    for (collection_name, documents) in data {
        let docs = documents
            .as_array()
            .with_context(|| format!("Collection '{}' must be an array", collection_name))?
            .clone();

        let created: usize = with_entity!(collection_name.as_str(), T => {
            let entities = docs
                .into_iter()
                .map(serde_json::from_value::<T>)
                .collect::<std::result::Result<Vec<T>, _>>()
                .with_context(|| format!("Invalid document in '{}'", collection_name))?;
            repo.create_multiple::<T>(&collection_name, &entities)
                .await
                .map(|created| created.len())
                .with_context(|| format!("Failed to import into '{}'", collection_name))
        })?;

        println!("Imported {} documents into '{}'", created, collection_name);
        total_docs += created;
    }

    info!(total_docs, "import finished");
    println!("Total: {} documents imported", total_docs);
    Ok(())
}

/// Export stored documents to JSON file
fn export_data(store: &MemoryStore, file: &Path, collection_filter: Option<&str>) -> Result<()> {
    let mut output: Map<String, Value> = Map::new();
    let mut total_docs = 0;

    for (coll_name, docs) in store.snapshot() {
        if let Some(filter) = collection_filter {
            if coll_name != filter {
                continue;
            }
        }
        println!("Exporting {} documents from '{}'", docs.len(), coll_name);
        total_docs += docs.len();
        output.insert(coll_name, Value::Array(docs));
    }

    let json =
        serde_json::to_string_pretty(&output).with_context(|| "Failed to serialize to JSON")?;

    fs::write(file, json)
        .with_context(|| format!("Failed to write to file: {}", file.display()))?;

    println!(
        "Total: {} documents exported to {}",
        total_docs,
        file.display()
    );
    Ok(())
}

/// Open the data file; a missing file is an empty store.
fn load_store(path: &Path) -> Result<MemoryStore> {
    if !path.exists() {
        debug!(path = %path.display(), "data file not found, starting empty");
        return Ok(MemoryStore::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read data file: {}", path.display()))?;
    let snapshot: BTreeMap<String, Vec<Value>> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid data file: {}", path.display()))?;
    MemoryStore::from_snapshot(snapshot)
        .with_context(|| format!("Corrupt data file: {}", path.display()))
}

fn save_store(store: &MemoryStore, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&store.snapshot())
        .with_context(|| "Failed to serialize data file")?;
    fs::write(path, json).with_context(|| format!("Failed to write data file: {}", path.display()))
}

/// `key=value` → (key, value); the value is JSON when it parses, a string
/// otherwise.
fn parse_pair(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got '{}'", raw))?;
    if key.is_empty() {
        bail!("empty key in '{}'", raw);
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn parse_filters(raw: &[String]) -> Result<Filters> {
    raw.iter()
        .map(|pair| parse_pair(pair))
        .collect::<Result<Vec<_>>>()
        .map(|pairs| pairs.into_iter().collect())
}

fn parse_assignments(raw: &[String]) -> Result<Map<String, Value>> {
    raw.iter().map(|pair| parse_pair(pair)).collect()
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
