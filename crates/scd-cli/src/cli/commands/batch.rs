//! `scd batch` – download several items in fixed-size batches.

use anyhow::Result;
use scd_core::batch::JobOutcome;
use scd_core::config::ScdConfig;
use scd_core::job::{Collection, RetrievalJob, TrackInfo};
use scd_core::page::har::{HarArchive, HarLauncher};
use std::path::PathBuf;
use std::sync::Arc;

use super::{build_retriever, progress};

/// Split `"TITLE - AUTHOR"` at the last separator; no separator means unknown author.
pub(crate) fn parse_collection(name: &str) -> (String, String) {
    match name.rsplit_once(" - ") {
        Some((title, author)) => (title.trim().to_string(), author.trim().to_string()),
        None => (name.trim().to_string(), "unknown".to_string()),
    }
}

pub async fn run_batch(
    cfg: &ScdConfig,
    hars: &[PathBuf],
    batch_size: Option<usize>,
    collection: Option<&str>,
    out: Option<PathBuf>,
) -> Result<()> {
    let archives = hars
        .iter()
        .map(|p| HarArchive::load(p))
        .collect::<Result<Vec<_>>>()?;
    let tracks: Vec<TrackInfo> = archives
        .iter()
        .map(|a| TrackInfo::from_page_url(a.page_url()))
        .collect();
    let jobs: Vec<RetrievalJob> = match collection {
        Some(name) => {
            let (title, author) = parse_collection(name);
            let collection = Collection {
                title,
                author,
                tracks,
            };
            println!("Collection: {}", collection.dir_name());
            collection.jobs(1)
        }
        None => tracks.iter().zip(1..).map(|(t, id)| t.job(id, None)).collect(),
    };
    let batch_size = batch_size.unwrap_or(cfg.batch_size).max(1);
    println!("Retrieving {} item(s), {} at a time", jobs.len(), batch_size);

    let (progress, printer) = progress::spawn_printer();
    let retriever = Arc::new(build_retriever(cfg, HarLauncher::new(archives), out, progress));
    let report = retriever.retrieve_all(jobs.clone(), batch_size).await;
    drop(retriever);
    let _ = printer.await;

    for (record, job) in report.records.iter().zip(&jobs) {
        match &record.outcome {
            JobOutcome::Succeeded(r) => println!("ok      {}  {}", job.name, r.path.display()),
            JobOutcome::Failed(e) => println!("failed  {}  {}", job.name, e),
            JobOutcome::Skipped => println!("skipped {}  (unavailable)", job.name),
            JobOutcome::Panicked(msg) => println!("failed  {}  task died: {}", job.name, msg),
        }
    }
    println!(
        "{} succeeded, {} failed, {} skipped in {} batch(es)",
        report.succeeded(),
        report.failed(),
        report.skipped(),
        report.batches()
    );

    if report.failed() > 0 {
        anyhow::bail!("{} of {} item(s) failed", report.failed(), jobs.len());
    }
    Ok(())
}
