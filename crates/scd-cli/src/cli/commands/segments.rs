//! `scd segments` – print the segment list of a manifest file.

use anyhow::{Context, Result};
use scd_core::extract;
use std::path::Path;

pub fn run_segments(path: &Path) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let body = String::from_utf8_lossy(&bytes);
    let segments = extract::extract(&body)?;
    if segments.is_empty() {
        println!("No segments.");
        return Ok(());
    }
    for segment in &segments {
        println!("{}", segment);
    }
    Ok(())
}
