//! Per-job retrieval failure.

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::assembly::AssemblyError;
use crate::extract::ExtractError;
use crate::page::PageError;

/// Why one retrieval job did not produce an artifact. Every variant is local
/// to its job; sibling jobs in a batch are unaffected.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("no manifest seen within {timeout:?} of opening {page_url}")]
    ManifestTimeout { page_url: String, timeout: Duration },
    #[error("page {page_url} finished loading without requesting a manifest")]
    ManifestNotFound { page_url: String },
    #[error("manifest {manifest_url} lists no segments")]
    EmptyManifest { manifest_url: String },
    #[error(transparent)]
    MalformedSegmentUrl(#[from] ExtractError),
    #[error("assembly incomplete: {0}")]
    AssemblyIncomplete(#[from] AssemblyError),
    #[error("page session: {0}")]
    Page(#[from] PageError),
    #[error("persist artifact: {0}")]
    Persist(#[source] io::Error),
    #[error("task failed: {0}")]
    Task(String),
}

impl RetrievalError {
    /// Whether running the same job again could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RetrievalError::ManifestTimeout { .. } | RetrievalError::Page(_) => true,
            RetrievalError::AssemblyIncomplete(e) => e.all_transient,
            RetrievalError::ManifestNotFound { .. }
            | RetrievalError::EmptyManifest { .. }
            | RetrievalError::MalformedSegmentUrl(_)
            | RetrievalError::Persist(_)
            | RetrievalError::Task(_) => false,
        }
    }
}

impl From<tokio::task::JoinError> for RetrievalError {
    fn from(e: tokio::task::JoinError) -> Self {
        RetrievalError::Task(e.to_string())
    }
}
