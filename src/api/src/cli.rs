//! CLI commands for keiba-knowledge.
//!
//! Scoring queries, snapshot partitioning and index inspection.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use crate::config::AppConfig;
use crate::coordinator::ScoringService;
use crate::knowledge::base::KnowledgeBase;
use crate::knowledge::builder::SnapshotBuilder;
use crate::knowledge::index::PartitionMethod;
use crate::knowledge::record::{Snapshot, TrackCondition};
use crate::retry::RetryConfig;
use crate::types::ScoreResponse;

#[derive(Parser)]
#[command(name = "keiba-knowledge")]
#[command(version, about = "Keiba knowledge cache and horse scoring engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Score one or more horses
    Score {
        /// Horse names
        #[arg(value_name = "NAME", required = true)]
        names: Vec<String>,

        /// Track condition (良, 稍重, 重, 不良 or firm, good, yielding, heavy)
        #[arg(short, long)]
        condition: Option<String>,

        /// Output format (json, table)
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Partition a monolithic snapshot into chunks plus an index
    Build {
        /// Path to the snapshot JSON file
        #[arg(value_name = "SNAPSHOT")]
        snapshot: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Number of chunks
        #[arg(long, default_value_t = 16)]
        chunks: u32,

        /// Partitioning method (range, hash)
        #[arg(short, long, default_value = "range")]
        method: String,
    },

    /// Show the partition index and cache configuration
    Index,

    /// Print the chunk each horse resolves to
    Resolve {
        /// Horse names
        #[arg(value_name = "NAME", required = true)]
        names: Vec<String>,
    },
}

/// Score horses and print the response.
pub async fn run_score(
    names: Vec<String>,
    condition: Option<String>,
    format: String,
) -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    let condition = match condition {
        Some(label) => Some(
            TrackCondition::parse(&label)
                .with_context(|| format!("Unknown track condition: {}", label))?,
        ),
        None => None,
    };

    let service = ScoringService::start(&config).await?;
    let response = service.score_batch(&names, condition).await?;

    match format.as_str() {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        "table" => {
            print_table(&response);
        }
        _ => {
            eprintln!("Unknown format: {}. Using JSON.", format);
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    service.shutdown();
    Ok(())
}

/// Print scoring results in table format.
fn print_table(response: &ScoreResponse) {
    if let Some(condition) = response.metadata.condition {
        println!("Track condition: {}", condition.label());
        println!();
    }

    println!("=== Scores ===");
    for horse in &response.scored {
        let note = if horse.reference {
            " (reference)".to_string()
        } else if horse.defaulted > 0 {
            format!(" ({} defaulted)", horse.defaulted)
        } else {
            String::new()
        };
        println!(
            "  {:2}. {:<20} {:6.1}  {}  races: {:2}{}",
            horse.rank,
            horse.name,
            horse.aggregate,
            horse.grade.label(),
            horse.races,
            note
        );
    }
    println!();

    if !response.not_found.is_empty() {
        println!("=== Not Scored ===");
        for failed in &response.not_found {
            println!("  {:<20} {}", failed.name, failed.message);
        }
        println!();
    }

    let m = &response.metadata;
    println!(
        "requested: {}  scored: {}  cache hits: {}  chunk loads: {}  fallback: {} ({:.1}ms)",
        m.requested, m.scored, m.cache_hits, m.chunk_loads, m.fallback_lookups, m.fallback_ms
    );
    println!(
        "total: {:.1}ms  avg/horse: {:.2}ms",
        m.total_ms, m.avg_ms_per_entity
    );
}

/// Partition a snapshot file and write the index and chunks.
pub fn run_build(
    snapshot_path: PathBuf,
    output: PathBuf,
    chunks: u32,
    method: String,
) -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    let method = PartitionMethod::from_str(&method)
        .with_context(|| format!("Unknown partition method: {}", method))?;

    info!("Loading snapshot from {}", snapshot_path.display());
    let bytes = std::fs::read(&snapshot_path)
        .with_context(|| format!("Failed to read {}", snapshot_path.display()))?;
    let raw: Snapshot = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse {}", snapshot_path.display()))?;
    let snapshot = Snapshot::from_profiles(raw.metadata.version, raw.horses);

    let partitioned = SnapshotBuilder::partition(&snapshot, chunks, method)?;
    partitioned.write_to_dir(&output, &config.knowledge.index_file)?;

    if partitioned.reassemble() != snapshot.horses {
        anyhow::bail!("Partitioned snapshot does not reassemble to its source");
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "version": partitioned.index.version,
            "method": partitioned.index.method,
            "total_chunks": partitioned.index.total_chunks,
            "total_horses": partitioned.index.total_horses,
            "output": output.display().to_string(),
        }))?
    );
    Ok(())
}

/// Print the index summary, or the fallback configuration.
pub async fn run_index() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let base = KnowledgeBase::open(&config.knowledge, &RetryConfig::from(&config.retry)).await?;

    let summary = match base.index() {
        Some(index) => serde_json::json!({
            "mode": base.mode(),
            "version": index.version,
            "built_at": index.built_at,
            "method": index.method,
            "total_chunks": index.total_chunks,
            "total_horses": index.total_horses,
            "cache_capacity": config.knowledge.cache_capacity,
            "chunks": index.chunks,
        }),
        None => serde_json::json!({
            "mode": base.mode(),
            "snapshot_file": config.knowledge.snapshot_file,
            "fallback_cache_capacity": config.knowledge.fallback_cache_capacity,
            "stream_block_size": config.knowledge.stream_block_size,
        }),
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Print the chunk id and file for each name.
pub async fn run_resolve(names: Vec<String>) -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let base = KnowledgeBase::open(&config.knowledge, &RetryConfig::from(&config.retry)).await?;
    let index = base
        .index()
        .context("No partition index; snapshot is served through the streaming fallback")?;

    for name in &names {
        match index.resolve(name).and_then(|id| index.chunk(id)) {
            Some(meta) => println!("{}\t{}\t{}", name, meta.chunk_id, meta.filename),
            None => println!("{}\t-\t(no chunk covers this name)", name),
        }
    }
    Ok(())
}
