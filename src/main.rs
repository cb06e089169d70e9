use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use coderag_core::{App, Config};
use coderag_index::IndexReport;

#[derive(Parser, Debug)]
#[command(name = "coderag")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file; defaults apply when it does not exist.
    #[arg(short, long, default_value = "coderag.toml", env = "CODERAG_CONFIG", global = true)]
    config: PathBuf,

    /// Source tree to index, overriding `source.path`.
    #[arg(short, long, global = true)]
    source: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bring the index in line with the source tree.
    Index {
        /// Drop every entry and index from scratch.
        #[arg(long)]
        rebuild: bool,
    },
    /// Index once, then keep the index updated as files change.
    Watch,
    /// Answer a question from the indexed sources.
    Ask {
        question: String,
        /// Print the answer record as JSON.
        #[arg(long)]
        json: bool,
        /// Load the model before asking.
        #[arg(long)]
        warmup: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    if let Some(source) = cli.source {
        config.source.path = source;
    }

    let app = App::from_config(config)
        .await
        .context("failed to open index")?;

    match cli.command {
        Commands::Index { rebuild } => {
            let indexer = app.indexer()?;
            let root = app.source_root();
            let report = if rebuild {
                indexer.rebuild(root).await?
            } else {
                indexer.refresh(root).await?
            };
            print_report(root, &report);
            if report.needs_rebuild {
                anyhow::bail!(
                    "stored vectors do not match the embedding model; run `coderag index --rebuild`"
                );
            }
        }
        Commands::Watch => {
            let (indexer, watcher) = app.watch()?;
            let report = indexer.refresh(app.source_root()).await?;
            print_report(app.source_root(), &report);
            tracing::info!(root = %app.source_root().display(), "watching for changes, ctrl-c to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            watcher.stop();
        }
        Commands::Ask {
            question,
            json,
            warmup,
        } => {
            let agent = app.agent();
            if warmup && let Err(e) = agent.warmup().await {
                tracing::warn!("continuing without warmup: {e}");
            }
            match agent.answer(&question).await {
                Ok(record) if json => println!("{}", serde_json::to_string_pretty(&record)?),
                Ok(record) => println!("{}", record.answer),
                Err(e) => {
                    eprintln!("{}: {e}", e.reason());
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

fn print_report(root: &Path, report: &IndexReport) {
    println!(
        "{}: {} scanned, {} added, {} changed, {} removed, {} unchanged, {} chunks written in {} ms",
        root.display(),
        report.files_scanned,
        report.files_added,
        report.files_changed,
        report.files_removed,
        report.files_unchanged,
        report.chunks_created,
        report.duration_ms,
    );
    for err in &report.errors {
        eprintln!("  failed: {} ({})", err.path, err.message);
    }
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
