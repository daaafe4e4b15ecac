use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Global configuration loaded from `~/.config/scd/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScdConfig {
    /// Number of tracks retrieved concurrently when downloading a collection.
    pub batch_size: usize,
    /// How long to wait for the manifest request after navigation starts.
    pub manifest_timeout_secs: u64,
    /// Substring that marks a request URL as the manifest (e.g. "m3u8").
    pub manifest_url_pattern: String,
    /// Response content types that also mark an exchange as the manifest.
    #[serde(default = "default_manifest_content_types")]
    pub manifest_content_types: Vec<String>,
    /// Connect timeout per segment GET.
    pub connect_timeout_secs: u64,
    /// Whole-transfer timeout per segment GET.
    pub segment_timeout_secs: u64,
    /// Where artifacts are written. Defaults to `~/soundcloud-downloader`.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

fn default_manifest_content_types() -> Vec<String> {
    vec![
        "application/vnd.apple.mpegurl".to_string(),
        "application/x-mpegurl".to_string(),
    ]
}

impl Default for ScdConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            manifest_timeout_secs: 30,
            manifest_url_pattern: "m3u8".to_string(),
            manifest_content_types: default_manifest_content_types(),
            connect_timeout_secs: 30,
            segment_timeout_secs: 300,
            output_dir: None,
        }
    }
}

impl ScdConfig {
    pub fn manifest_timeout(&self) -> Duration {
        Duration::from_secs(self.manifest_timeout_secs.max(1))
    }

    /// Output directory from config, falling back to `$HOME/soundcloud-downloader`
    /// (or the current directory when HOME is unset).
    pub fn resolved_output_dir(&self) -> PathBuf {
        if let Some(dir) = &self.output_dir {
            return dir.clone();
        }
        match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join("soundcloud-downloader"),
            None => PathBuf::from("."),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("scd")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<ScdConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = ScdConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: ScdConfig = toml::from_str(&data)?;
    Ok(cfg)
}
