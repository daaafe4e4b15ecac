//! Retrieval jobs, their lifecycle, and artifact naming.

use serde::{Deserialize, Serialize};
use std::fmt;

pub type JobId = u64;

/// Lifecycle of one retrieval job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    ResolvingManifest,
    FetchingSegments,
    Assembling,
    Persisted,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::ResolvingManifest => "resolving-manifest",
            JobState::FetchingSegments => "fetching-segments",
            JobState::Assembling => "assembling",
            JobState::Persisted => "persisted",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Persisted | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the persistence collaborator should put an artifact: an optional
/// collection directory plus a file name. Both are sanitized by the sink.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameHint {
    pub dir: Option<String>,
    pub file: String,
}

impl NameHint {
    pub fn file(file: impl Into<String>) -> Self {
        Self {
            dir: None,
            file: file.into(),
        }
    }

    pub fn in_dir(dir: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            dir: Some(dir.into()),
            file: file.into(),
        }
    }
}

impl fmt::Display for NameHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dir {
            Some(dir) => write!(f, "{}/{}", dir, self.file),
            None => f.write_str(&self.file),
        }
    }
}

/// One media item to retrieve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalJob {
    pub id: JobId,
    /// Playable page whose traffic carries the manifest.
    pub page_url: String,
    pub name: NameHint,
    /// Unavailable items (e.g. region or tier locked) are skipped by the batch scheduler.
    pub available: bool,
}

impl RetrievalJob {
    pub fn new(id: JobId, page_url: impl Into<String>, name: NameHint) -> Self {
        Self {
            id,
            page_url: page_url.into(),
            name,
            available: true,
        }
    }

    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }
}

/// Human-readable track metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub title: String,
    pub author: String,
    pub url: String,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

impl TrackInfo {
    /// Guess author and title from a `https://host/<author>/<title>` page URL.
    pub fn from_page_url(page_url: &str) -> Self {
        let segments: Vec<String> = url::Url::parse(page_url)
            .ok()
            .and_then(|u| {
                u.path_segments().map(|s| {
                    s.filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect()
                })
            })
            .unwrap_or_default();
        let (author, title) = match segments.as_slice() {
            [.., author, title] => (author.clone(), title.clone()),
            [title] => ("unknown".to_string(), title.clone()),
            [] => ("unknown".to_string(), "track".to_string()),
        };
        Self {
            title,
            author,
            url: page_url.to_string(),
            available: true,
        }
    }

    /// `"{author} - {title}.mp3"`
    pub fn file_name(&self) -> String {
        format!("{} - {}.mp3", self.author, self.title)
    }

    pub fn job(&self, id: JobId, dir: Option<&str>) -> RetrievalJob {
        let name = match dir {
            Some(d) => NameHint::in_dir(d, self.file_name()),
            None => NameHint::file(self.file_name()),
        };
        RetrievalJob::new(id, self.url.clone(), name).with_available(self.available)
    }
}

/// A playlist or album: tracks stored together under `"{title} - {author}"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub tracks: Vec<TrackInfo>,
}

impl Collection {
    pub fn dir_name(&self) -> String {
        format!("{} - {}", self.title, self.author)
    }

    pub fn unavailable_count(&self) -> usize {
        self.tracks.iter().filter(|t| !t.available).count()
    }

    /// One job per track, ids starting at `first_id`, in track order.
    pub fn jobs(&self, first_id: JobId) -> Vec<RetrievalJob> {
        let dir = self.dir_name();
        self.tracks
            .iter()
            .zip(first_id..)
            .map(|(track, id)| track.job(id, Some(&dir)))
            .collect()
    }
}
