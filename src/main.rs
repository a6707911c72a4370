//! # Vault Context CLI (`vctx`)
//!
//! Search a remote note vault and assemble a token-budgeted context from the
//! best matching notes.
//!
//! ## Usage
//!
//! ```bash
//! vctx --config ./config/vctx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vctx search "<query>"` | Rank notes and print results (or the assembled context) |
//! | `vctx ls [path]` | List a vault directory |
//! | `vctx cat <path>` | Print one note |
//! | `vctx check` | Verify the vault is reachable with the configured credentials |
//! | `vctx serve` | Start the HTTP tool server |
//! | `vctx completions <shell>` | Print shell completions |
//!
//! Logs go to stderr; set `RUST_LOG=vault_context=debug` for pipeline detail.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use vault_context::client::VaultClient;
use vault_context::config::{self, Config};
use vault_context::search::{search, SearchResult};
use vault_context::server;
use vault_context_core::store::RemoteStore;

/// Vault Context: query-time retrieval over a remote note vault.
#[derive(Parser)]
#[command(name = "vctx", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vctx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the vault.
    Search {
        /// Query text. Supports `path:<prefix>`, `tag:<name>` and `ext:<ext>` filters.
        query: String,

        /// Maximum number of candidates (overrides `aggregation.limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Token budget for the assembled context (overrides `context.max_tokens`).
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,

        /// Print the assembled context instead of the ranked list.
        #[arg(long, conflicts_with = "json")]
        context: bool,
    },

    /// List a vault directory (root by default).
    Ls {
        #[arg(default_value = "")]
        path: String,
    },

    /// Print a note.
    Cat { path: String },

    /// Check connectivity and credentials.
    Check,

    /// Start the HTTP tool server.
    Serve,

    /// Generate shell completions.
    Completions { shell: Shell },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "vctx", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Search {
            query,
            limit,
            max_tokens,
            json,
            context,
        } => run_search(&cfg, &query, limit, max_tokens, json, context).await?,
        Commands::Ls { path } => {
            let client = VaultClient::from_config(&cfg)?;
            for entry in client.list_directory(&path).await? {
                if entry.is_directory {
                    println!("{}/", entry.name);
                } else {
                    println!("{}", entry.name);
                }
            }
        }
        Commands::Cat { path } => {
            let client = VaultClient::from_config(&cfg)?;
            let note = client.read_note(&path).await?;
            print!("{}", note.content);
        }
        Commands::Check => {
            let client = VaultClient::from_config(&cfg)?;
            let entries = client.list_directory("").await?;
            println!("vault:   {}", client.base_url());
            println!("status:  ok ({} root entries)", entries.len());
            println!("breaker: {}", client.breaker().state().as_str());
        }
        Commands::Serve => server::run_server(&cfg).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}

async fn run_search(
    cfg: &Config,
    query: &str,
    limit: Option<usize>,
    max_tokens: Option<usize>,
    json: bool,
    context: bool,
) -> anyhow::Result<()> {
    let mut options = cfg.search_options();
    if let Some(limit) = limit {
        options.aggregation.limit = limit;
    }
    if let Some(max_tokens) = max_tokens {
        options.context.max_tokens = max_tokens;
    }

    let store: Arc<dyn RemoteStore> = Arc::new(VaultClient::from_config(cfg)?);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = search(store, query, &options, cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if context {
        println!("{}", result.context.content);
    } else {
        print_ranked(&result);
    }
    Ok(())
}

fn print_ranked(result: &SearchResult) {
    if result.ranked.is_empty() {
        println!("No results.");
        return;
    }
    for (i, candidate) in result.ranked.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} ({})",
            i + 1,
            candidate.match_score,
            candidate.path,
            candidate.match_type.as_str()
        );
        if !candidate.duplicates.is_empty() {
            println!("    also: {}", candidate.duplicates.join(", "));
        }
    }
    let stats = &result.stats;
    println!();
    println!(
        "{} directories, {} files, {} fetches, {} failures{}{}",
        stats.directories_listed,
        stats.files_seen,
        stats.content_fetches,
        stats.partial_failures,
        if stats.truncated { ", truncated" } else { "" },
        if stats.cancelled { ", cancelled" } else { "" },
    );
    println!(
        "context: {} tokens ({:.1}% of budget) from {} notes",
        result.context.token_count,
        result.context.budget_used_pct,
        result.context.sources.len()
    );
}
