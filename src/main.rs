//! # ChatVat CLI (`chatvat`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chatvat serve` | Start the HTTP server and the periodic refresh loop |
//! | `chatvat refresh` | Run one refresh cycle and print the report |
//! | `chatvat search "<query>"` | Show the top-k knowledge entries for a query |
//! | `chatvat ask "<query>"` | Answer a question end to end |
//! | `chatvat stats` | Entry count and the most recent refresh run |
//! | `chatvat backup <path>` | Write a consistent copy of the knowledge store |
//!
//! ## Examples
//!
//! ```bash
//! chatvat --config ./chatvat.config.json refresh
//! chatvat search "opening ceremony"
//! RUST_LOG=chatvat=debug chatvat serve
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chatvat::app::App;
use chatvat::config::{self, DEFAULT_CONFIG_PATH};
use chatvat::refresh::{RefreshOutcome, RefreshReport};
use chatvat::server;
use chatvat_core::store::KnowledgeStore;

const DEFAULT_LOG_FILTER: &str = "info,hyper=warn,reqwest=warn,sqlx=warn";

/// ChatVat: a self-refreshing knowledge service with retrieval-augmented
/// answers.
#[derive(Parser)]
#[command(name = "chatvat", version, about)]
struct Cli {
    /// Path to the configuration file (JSON, or TOML if it ends in `.toml`).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve `/health`, `/chat`, `/status` and `/refresh`, refreshing
    /// sources in the background.
    Serve,

    /// Run one refresh cycle against all configured sources.
    Refresh,

    /// Show the entries retrieval would pick for a query.
    Search {
        query: String,

        /// Number of entries (defaults to `retrieval.top_k`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Answer a question from the knowledge base.
    Ask { query: String },

    /// Print entry count and the last refresh run.
    Stats,

    /// Snapshot the knowledge store to a new file.
    Backup { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let app = App::build(cfg).await?;

    match cli.command {
        Commands::Serve => {
            server::run_server(app).await?;
        }
        Commands::Refresh => {
            match app.orchestrator.trigger().await {
                RefreshOutcome::Completed(report) => print_report(&report),
                RefreshOutcome::AlreadyRunning => println!("A refresh cycle is already running."),
            }
            app.store.close().await;
        }
        Commands::Search { query, limit } => {
            let k = limit.unwrap_or(app.config.retrieval.top_k);
            let entries = app.retriever().retrieve(&query, k).await?;
            if entries.is_empty() {
                println!("No results.");
            }
            for (i, entry) in entries.iter().enumerate() {
                println!(
                    "{}. [{}] {} ({})",
                    i + 1,
                    entry.fingerprint.short(),
                    entry.source_id,
                    entry.last_confirmed_at.format("%Y-%m-%d %H:%M")
                );
                println!("   {}", snippet(&entry.text, 160));
            }
        }
        Commands::Ask { query } => {
            let ctx = app.chat_service()?.ask(&query).await?;
            println!("{}", ctx.answer.unwrap_or_default());
            if !ctx.retrieved.is_empty() {
                println!();
                println!("Sources:");
                for entry in &ctx.retrieved {
                    println!("  - {} [{}]", entry.source_id, entry.fingerprint.short());
                }
            }
        }
        Commands::Stats => {
            let count = app.store.count().await?;
            println!("Knowledge store: {}", app.store.path().display());
            println!("Entries: {}", count);
            match app.store.last_run().await? {
                Some(report) => {
                    println!();
                    println!("Last refresh run:");
                    print_report(&report);
                }
                None => println!("No refresh has run yet."),
            }
        }
        Commands::Backup { path } => {
            app.store.backup_to(&path).await?;
            println!("Backup written to {}", path.display());
        }
    }

    Ok(())
}

fn print_report(report: &RefreshReport) {
    println!(
        "  started:   {}",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "  duration:  {} ms{}",
        (report.finished_at - report.started_at).num_milliseconds(),
        if report.cancelled { " (cancelled)" } else { "" }
    );
    println!(
        "  sources:   {} processed, {} failed",
        report.sources_processed, report.sources_failed
    );
    println!(
        "  entries:   {} added, {} confirmed, {} retired",
        report.entries_added, report.entries_confirmed, report.entries_retired
    );
    if report.chunks_failed > 0 {
        println!("  chunks failed: {}", report.chunks_failed);
    }
    for err in &report.errors {
        println!("  error [{}] {}: {}", err.kind, err.source_id, err.message);
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut)
}
