//! # Warren CLI (`warren`)
//!
//! ```bash
//! warren --config ./config/warren.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `warren init` | Create the SQLite database and run schema migrations |
//! | `warren ingest <file.json>` | Load content items from a JSON array |
//! | `warren embed pending` | Backfill missing or stale embeddings |
//! | `warren search "<query>"` | Run staged retrieval over approved content |
//! | `warren assemble "<query>" --session <id>` | Print the packed prompt |
//! | `warren generate "<prompt>" --session <id>` | Draft content with the configured model |
//! | `warren serve` | Start the HTTP API |

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use warren::{commands, config, migrate, server};
use warren_core::models::ContentKind;

/// Warren: compliance-aware marketing content assistant for financial advisors.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/warren.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "warren", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/warren.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest content items from a JSON file (an array of items).
    Ingest {
        file: PathBuf,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Search approved content.
    Search {
        query: String,

        /// Only return items of this kind (`compliance_rule`,
        /// `marketing_example`, `disclosure`, `reference`).
        #[arg(long, value_parser = parse_kind)]
        kind: Option<ContentKind>,

        #[arg(long)]
        audience: Option<String>,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Assemble and print the prompt for a query without calling the model.
    Assemble {
        query: String,

        #[arg(long)]
        session: String,

        #[arg(long)]
        audience: Option<String>,

        /// Restrict examples to this content kind.
        #[arg(long, value_parser = parse_kind)]
        kind: Option<ContentKind>,
    },

    /// Draft content for a prompt.
    Generate {
        prompt: String,

        #[arg(long)]
        session: String,

        #[arg(long)]
        audience: Option<String>,

        /// Restrict examples to this content kind.
        #[arg(long, value_parser = parse_kind)]
        kind: Option<ContentKind>,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that are missing or have stale embeddings.
    Pending {
        /// Maximum number of chunks to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

fn parse_kind(s: &str) -> Result<ContentKind, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    cfg.logging.init();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { file } => {
            commands::run_ingest(&cfg, &file).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending { limit, batch_size } => {
                commands::run_embed_pending(&cfg, limit, batch_size).await?;
            }
        },
        Commands::Search {
            query,
            kind,
            audience,
            limit,
        } => {
            commands::run_search(&cfg, &query, kind, audience, limit).await?;
        }
        Commands::Assemble {
            query,
            session,
            audience,
            kind,
        } => {
            commands::run_assemble(&cfg, &session, &query, audience, kind).await?;
        }
        Commands::Generate {
            prompt,
            session,
            audience,
            kind,
        } => {
            commands::run_generate(&cfg, &session, &prompt, audience, kind).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
