//! Bazaar CLI
//!
//! Operates a marketplace persisted as a JSON snapshot. Every invocation
//! loads the snapshot, runs, and writes it back when something changed.
//!
//! # Usage
//!
//! ```bash
//! # Create an empty marketplace
//! bazaar init
//!
//! # Apply a batch of commands
//! bazaar exec --file batch.json
//!
//! # Inspect state
//! bazaar agents --min-reputation 4 --page 1 --limit 20
//! bazaar task 3
//! bazaar balance 0x00000000000000000000000000000000000000b1
//!
//! # Override settings from the environment
//! BAZAAR__MARKET__CREDITS_REWARD_PER_TASK=25 bazaar exec --file batch.json
//! ```

mod batch;
mod config;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bazaar_projection::{paginate, AgentMetadata, AgentQuery, AgentView, ErrorEnvelope};
use bazaar_state::{FileSnapshotStore, MarketSnapshot, Marketplace, SnapshotStore, SCHEMA_VERSION};
use bazaar_types::{Address, MarketError, TaskId, Token};

use crate::config::{AppConfig, LoggingConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Bazaar - agent marketplace ledger
#[derive(Parser, Debug)]
#[command(name = "bazaar")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    /// Path to configuration file (TOML, JSON, or YAML)
    #[arg(short, long, global = true, env = "BAZAAR_CONFIG")]
    config: Option<String>,

    /// Snapshot file, overrides `storage.snapshot_path`
    #[arg(long, global = true, env = "BAZAAR_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "BAZAAR_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, global = true, env = "BAZAAR_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write an empty marketplace snapshot
    Init {
        /// Replace an existing snapshot
        #[arg(long)]
        force: bool,
    },

    /// Apply a JSON batch of commands in order
    Exec {
        /// Batch file, `-` for stdin
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show one agent
    Agent {
        identity: Address,

        /// Profile document to enrich the view with
        #[arg(long)]
        metadata: Option<PathBuf>,
    },

    /// List registered agents
    ///
    /// Removed agents drop out of the registry, so every listed agent is
    /// active.
    Agents {
        #[arg(long, default_value = "1")]
        page: u64,

        #[arg(long, default_value = "20")]
        limit: u64,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        min_reputation: Option<f64>,

        /// Case-insensitive match on name and description
        #[arg(long)]
        search: Option<String>,
    },

    /// Show one task and its escrow
    Task { task_id: TaskId },

    /// Show a holder's custody and credits balances
    Balance {
        holder: Address,

        #[arg(long, default_value = "native")]
        token: Token,
    },

    /// Upgrade the snapshot to the current schema
    Migrate,

    /// Show the journal head
    Journal,
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut app_config = AppConfig::load(args.config.as_deref())?;
    if let Some(path) = args.snapshot {
        app_config.storage.snapshot_path = path;
    }
    if let Some(level) = args.log_level {
        app_config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        app_config.logging.format = format;
    }

    init_logging(&app_config.logging)?;

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        snapshot = %app_config.storage.snapshot_path.display(),
        "bazaar starting"
    );

    let store = FileSnapshotStore::new(app_config.storage.snapshot_path.clone());

    match args.command {
        Commands::Init { force } => init(&app_config, &store, force).await,
        Commands::Exec { file } => exec(&app_config, &store, &file).await,
        Commands::Agent { identity, metadata } => {
            let market = open(&app_config, &store).await?;
            let data = market.get_agent_data(identity).await.map_err(reject)?;
            let metadata = match metadata {
                Some(path) => read_metadata(&path)?,
                None => AgentMetadata::default(),
            };
            let proposals = market
                .read(|state| state.registry().active_proposals_of(&identity))
                .await;
            print_json(&serde_json::json!({
                "agent": AgentView::new(&data.agent, metadata),
                "proposals": proposals,
            }))
        }
        Commands::Agents {
            page,
            limit,
            category,
            min_reputation,
            search,
        } => {
            let query = AgentQuery {
                status: None,
                category,
                min_reputation,
                search,
            };
            let market = open(&app_config, &store).await?;
            let mut views: Vec<AgentView> = market
                .read(|state| {
                    state
                        .registry()
                        .agents()
                        .map(|agent| AgentView::new(agent, AgentMetadata::default()))
                        .collect()
                })
                .await;
            views.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

            let filters = query.filter_info();
            print_json(&paginate(query.apply(views), page, limit).with_filters(filters))
        }
        Commands::Task { task_id } => {
            let market = open(&app_config, &store).await?;
            let task = market.get_task(task_id).await.map_err(reject)?;
            let escrow = market.escrow_balance(task_id).await.map_err(reject)?;
            print_json(&serde_json::json!({ "task": task, "escrow": escrow }))
        }
        Commands::Balance { holder, token } => {
            let market = open(&app_config, &store).await?;
            print_json(&serde_json::json!({
                "holder": holder,
                "token": token,
                "balance": market.holder_balance(holder, token).await,
                "credits": market.credits_balance(holder).await,
            }))
        }
        Commands::Migrate => migrate(&store).await,
        Commands::Journal => {
            let market = open(&app_config, &store).await?;
            print_json(&market.journal_head().await)
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

async fn init(app_config: &AppConfig, store: &FileSnapshotStore, force: bool) -> anyhow::Result<()> {
    if store.path().exists() && !force {
        anyhow::bail!(
            "snapshot {} already exists, pass --force to replace it",
            store.path().display()
        );
    }

    let market = Marketplace::new(app_config.market.clone());
    market.save(store).await?;
    tracing::info!(path = %store.path().display(), "marketplace initialized");
    print_json(&market.journal_head().await)
}

async fn exec(app_config: &AppConfig, store: &FileSnapshotStore, file: &Path) -> anyhow::Result<()> {
    let json = if file == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("reading batch from stdin")?
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("reading batch {}", file.display()))?
    };
    let entries = batch::parse(&json).context("parsing batch")?;

    let market = open(app_config, store).await?;
    let report = batch::run(&market, entries).await;
    if report.applied > 0 {
        market.save(store).await?;
    }

    tracing::info!(
        applied = report.applied,
        head = market.journal_head().await.sequence,
        "batch finished"
    );
    print_json(&report)?;

    if !report.is_complete() {
        anyhow::bail!("batch stopped after {} command(s)", report.applied);
    }
    Ok(())
}

async fn migrate(store: &FileSnapshotStore) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(store.path())
        .with_context(|| format!("reading snapshot {}", store.path().display()))?;
    let found = serde_json::from_str::<serde_json::Value>(&raw)?
        .get("schema_version")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(1);

    let snapshot = MarketSnapshot::from_json(&raw)?;
    store.save(&snapshot).await?;

    tracing::info!(from = found, to = SCHEMA_VERSION, "snapshot migrated");
    print_json(&serde_json::json!({ "from": found, "to": SCHEMA_VERSION }))
}

// =============================================================================
// Helpers
// =============================================================================

async fn open(app_config: &AppConfig, store: &FileSnapshotStore) -> anyhow::Result<Marketplace> {
    let market = Marketplace::open(app_config.market.clone(), store)
        .await
        .with_context(|| format!("opening snapshot {}", store.path().display()))?;
    Ok(market)
}

fn read_metadata(path: &Path) -> anyhow::Result<AgentMetadata> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading metadata {}", path.display()))?;
    serde_json::from_str(&json).context("parsing agent metadata")
}

/// Print a rejection as an error envelope and hand it back for the exit code
fn reject(err: MarketError) -> anyhow::Error {
    let envelope = ErrorEnvelope::from(&err);
    match serde_json::to_string_pretty(&envelope) {
        Ok(json) => eprintln!("{}", json),
        Err(_) => eprintln!("{}", err),
    }
    anyhow::Error::new(err)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialize logging, on stderr so stdout stays machine-readable
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            subscriber
                .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            subscriber
                .with(fmt::layer().pretty().with_target(true).with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_typed_arguments() {
        let args = Args::parse_from([
            "bazaar",
            "balance",
            "0x00000000000000000000000000000000000000b1",
            "--token",
            "native",
        ]);
        match args.command {
            Commands::Balance { holder, token } => {
                assert_eq!(holder, Address::from_low_u64(0xb1));
                assert_eq!(token, Token::Native);
            }
            other => panic!("unexpected command {:?}", other),
        }

        assert!(Args::try_parse_from(["bazaar", "task", "not-a-number"]).is_err());
        assert!(Args::try_parse_from(["bazaar", "agent", "0xzz"]).is_err());
    }

    #[test]
    fn test_agents_has_no_status_filter() {
        let args = Args::parse_from(["bazaar", "agents", "--category", "language"]);
        assert!(matches!(args.command, Commands::Agents { .. }));
        assert!(Args::try_parse_from(["bazaar", "agents", "--status", "inactive"]).is_err());
    }

    #[tokio::test]
    async fn test_init_then_migrate() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("bazaar.json"));
        let app_config = AppConfig::default();

        init(&app_config, &store, false).await.unwrap();
        assert!(init(&app_config, &store, false).await.is_err());
        init(&app_config, &store, true).await.unwrap();

        migrate(&store).await.unwrap();
        let market = open(&app_config, &store).await.unwrap();
        assert_eq!(market.journal_head().await.sequence, 0);
    }
}
