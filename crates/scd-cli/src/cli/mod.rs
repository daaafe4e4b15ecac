//! CLI for scd.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use scd_core::config;
use std::path::PathBuf;

use commands::{run_batch, run_get, run_segments};

/// Top-level CLI for scd.
#[derive(Debug, Parser)]
#[command(name = "scd")]
#[command(
    about = "scd: resolve a page's media manifest and download its segments",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download one item from a page traffic capture (HAR).
    Get {
        /// HAR capture of the playable page; its first entry is the page URL.
        har: PathBuf,
        /// Output file name (default: "<author> - <title>.mp3" from the page URL).
        #[arg(long)]
        name: Option<String>,
        /// Output directory (default: `output_dir` from config).
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },

    /// Download several items in batches, one capture per item.
    Batch {
        /// HAR captures, one per item, in collection order.
        #[arg(required = true)]
        hars: Vec<PathBuf>,
        /// Items retrieved concurrently per batch (default: `batch_size` from config).
        #[arg(long, value_name = "N")]
        batch_size: Option<usize>,
        /// Store items under a collection directory, given as "TITLE - AUTHOR".
        #[arg(long, value_name = "NAME")]
        collection: Option<String>,
        /// Output directory (default: `output_dir` from config).
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },

    /// Print the segment list extracted from a manifest file.
    Segments {
        /// Path to the manifest.
        path: PathBuf,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Get { har, name, out } => run_get(&cfg, &har, name, out).await?,
            CliCommand::Batch {
                hars,
                batch_size,
                collection,
                out,
            } => run_batch(&cfg, &hars, batch_size, collection.as_deref(), out).await?,
            CliCommand::Segments { path } => run_segments(&path)?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
