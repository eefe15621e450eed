//! Keiba knowledge CLI
//!
//! Horse scoring over a partitioned knowledge snapshot.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keiba_knowledge::cli::{self, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so command output on stdout stays machine-readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keiba_knowledge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Score {
            names,
            condition,
            format,
        } => cli::run_score(names, condition, format).await,
        Commands::Build {
            snapshot,
            output,
            chunks,
            method,
        } => cli::run_build(snapshot, output, chunks, method),
        Commands::Index => cli::run_index().await,
        Commands::Resolve { names } => cli::run_resolve(names).await,
    }
}
