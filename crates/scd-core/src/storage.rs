//! Artifact persistence.
//!
//! The finished byte stream is written to `<name>.part` next to its final
//! path, synced, then renamed into place, so a partially written artifact is
//! never visible under its final name.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::job::NameHint;

const NAME_MAX: usize = 255;
const FALLBACK_NAME: &str = "download.bin";

/// Persistence collaborator: stores one artifact, returns where it landed.
pub trait ArtifactSink: Send + Sync + 'static {
    fn write(&self, name: &NameHint, bytes: &[u8]) -> io::Result<PathBuf>;
}

/// Appends `.part` to the final path (`a.mp3` -> `a.mp3.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(".part");
    PathBuf::from(o)
}

/// Make one path component safe on Linux. Spaces are kept (track names use
/// them); separators, NUL and control characters become `_`.
pub fn sanitize_component(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;
    for c in name.chars() {
        let c = if c == '\0' || c == '/' || c == '\\' || c.is_control() {
            '_'
        } else {
            c
        };
        if c == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(c);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == ' ' || c == '.' || c == '_');
    let mut take = trimmed.len().min(NAME_MAX);
    while take > 0 && !trimmed.is_char_boundary(take) {
        take -= 1;
    }
    trimmed[..take].to_string()
}

/// Writes artifacts under a root directory, one subdirectory per collection.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path for `name`, sanitized. Does not touch the filesystem.
    pub fn path_for(&self, name: &NameHint) -> PathBuf {
        let mut path = self.root.clone();
        if let Some(dir) = name.dir.as_deref().map(sanitize_component) {
            if !dir.is_empty() {
                path.push(dir);
            }
        }
        let file = sanitize_component(&name.file);
        path.push(if file.is_empty() {
            FALLBACK_NAME.to_string()
        } else {
            file
        });
        path
    }
}

impl ArtifactSink for DirectorySink {
    fn write(&self, name: &NameHint, bytes: &[u8]) -> io::Result<PathBuf> {
        let final_path = self.path_for(name);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let part = temp_path(&final_path);
        let result = (|| {
            let mut f = File::create(&part)?;
            f.write_all(bytes)?;
            f.sync_all()?;
            fs::rename(&part, &final_path)
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&part);
            return Err(e);
        }
        tracing::debug!(path = %final_path.display(), bytes = bytes.len(), "artifact written");
        Ok(final_path)
    }
}

/// SHA-256 of `bytes` as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
