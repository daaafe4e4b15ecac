//! `scd get` – resolve and download one item.

use anyhow::{Context, Result};
use scd_core::config::ScdConfig;
use scd_core::job::{NameHint, TrackInfo};
use scd_core::page::har::{HarArchive, HarLauncher};
use std::path::{Path, PathBuf};

use super::{build_retriever, progress};

pub async fn run_get(
    cfg: &ScdConfig,
    har: &Path,
    name: Option<String>,
    out: Option<PathBuf>,
) -> Result<()> {
    let archive = HarArchive::load(har)?;
    let track = TrackInfo::from_page_url(archive.page_url());
    let mut job = track.job(1, None);
    if let Some(name) = name {
        job.name = NameHint::file(name);
    }
    println!("Retrieving {} -> {}", job.page_url, job.name);

    let (progress, printer) = progress::spawn_printer();
    let retriever = build_retriever(cfg, HarLauncher::new([archive]), out, progress);
    let result = retriever.retrieve(&job).await;
    drop(retriever);
    let _ = printer.await;

    let report = result.with_context(|| format!("retrieve {}", job.page_url))?;
    println!(
        "Saved {} ({} segments, {} bytes)\nsha256 {}",
        report.path.display(),
        report.segment_count,
        report.bytes,
        report.sha256
    );
    Ok(())
}
