//! CLI command handlers, one per file.

mod batch;
mod get;
mod progress;
mod segments;

pub use batch::run_batch;
#[cfg(test)]
pub(crate) use batch::parse_collection;
pub use get::run_get;
pub use segments::run_segments;

use scd_core::config::ScdConfig;
use scd_core::fetch::{CurlFetcher, CurlOptions};
use scd_core::page::har::HarLauncher;
use scd_core::progress::Progress;
use scd_core::storage::DirectorySink;
use scd_core::{RetrieveSettings, Retriever};
use std::path::PathBuf;

pub(crate) type CliRetriever = Retriever<HarLauncher, CurlFetcher, DirectorySink>;

/// Retriever over HAR replay, curl fetches and the output directory.
fn build_retriever(
    cfg: &ScdConfig,
    launcher: HarLauncher,
    out: Option<PathBuf>,
    progress: Progress,
) -> CliRetriever {
    let out = out.unwrap_or_else(|| cfg.resolved_output_dir());
    tracing::debug!(out = %out.display(), "output directory");
    Retriever::new(
        launcher,
        CurlFetcher::new(CurlOptions::from_config(cfg)),
        DirectorySink::new(out),
        RetrieveSettings::from_config(cfg),
    )
    .with_progress(progress)
}
