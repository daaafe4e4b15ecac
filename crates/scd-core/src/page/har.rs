//! HAR replay page session.
//!
//! Replays a traffic capture (HAR 1.2, as exported by browser devtools) as if
//! a live page were making those requests. Navigating to the capture's page
//! URL emits every recorded exchange that completed with a 2xx status on the
//! hijack stream, in capture order, then closes the stream. Redirect hops,
//! informational and aborted (status 0) entries carry no body and are not
//! replayed.

use anyhow::{Context, Result};
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{ExchangeStream, HijackHandle, NetworkExchange, PageError, PageLauncher, PageSession};

#[derive(Debug, Deserialize)]
struct HarLog {
    log: HarRoot,
}

#[derive(Debug, Deserialize)]
struct HarRoot {
    entries: Vec<HarEntry>,
}

#[derive(Debug, Deserialize)]
struct HarEntry {
    request: HarRequest,
    response: HarResponse,
}

#[derive(Debug, Deserialize)]
struct HarRequest {
    url: String,
}

#[derive(Debug, Deserialize)]
struct HarResponse {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    headers: Vec<HarHeader>,
    #[serde(default)]
    content: HarContent,
}

#[derive(Debug, Default, Deserialize)]
struct HarContent {
    #[serde(default, rename = "mimeType")]
    mime_type: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HarHeader {
    name: String,
    value: String,
}

/// One recorded response, body already decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedExchange {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl RecordedExchange {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A parsed capture: the page URL (first entry) plus recorded exchanges.
#[derive(Debug, Clone)]
pub struct HarArchive {
    page_url: String,
    exchanges: Vec<RecordedExchange>,
}

impl HarArchive {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read HAR file: {}", path.display()))?;
        Self::from_json(&bytes).with_context(|| format!("parse HAR: {}", path.display()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let har: HarLog = serde_json::from_slice(bytes).context("invalid HAR JSON")?;
        let entries = har.log.entries;
        let Some(first) = entries.first() else {
            anyhow::bail!("HAR file has no entries");
        };
        let page_url = first.request.url.clone();
        let exchanges = entries
            .into_iter()
            .map(decode_entry)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            page_url,
            exchanges,
        })
    }

    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    pub fn exchanges(&self) -> &[RecordedExchange] {
        &self.exchanges
    }
}

fn decode_entry(entry: HarEntry) -> Result<RecordedExchange> {
    let content_type = entry
        .response
        .content
        .mime_type
        .filter(|m| !m.is_empty())
        .or_else(|| {
            entry
                .response
                .headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case("Content-Type"))
                .map(|h| h.value.clone())
        });
    let text = entry.response.content.text.unwrap_or_default();
    let body = match entry.response.content.encoding.as_deref() {
        Some(enc) if enc.eq_ignore_ascii_case("base64") => base64::engine::general_purpose::STANDARD
            .decode(text.trim())
            .with_context(|| format!("decode base64 body of {}", entry.request.url))?,
        _ => text.into_bytes(),
    };
    Ok(RecordedExchange {
        url: entry.request.url,
        status: entry.response.status,
        content_type,
        body,
    })
}

/// Launches replay sessions over a fixed set of captures, keyed by page URL.
#[derive(Debug, Clone, Default)]
pub struct HarLauncher {
    archives: Arc<HashMap<String, Arc<HarArchive>>>,
}

impl HarLauncher {
    /// When two captures share a page URL the later one wins.
    pub fn new(archives: impl IntoIterator<Item = HarArchive>) -> Self {
        let archives = archives
            .into_iter()
            .map(|a| (a.page_url.clone(), Arc::new(a)))
            .collect();
        Self {
            archives: Arc::new(archives),
        }
    }
}

impl PageLauncher for HarLauncher {
    type Session = HarSession;

    fn launch(&self) -> Result<HarSession, PageError> {
        Ok(HarSession {
            archives: Arc::clone(&self.archives),
            sender: None,
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }
}

pub struct HarSession {
    archives: Arc<HashMap<String, Arc<HarArchive>>>,
    sender: Option<mpsc::UnboundedSender<NetworkExchange>>,
    stopped: Arc<AtomicBool>,
}

/// Stops a replay; entries not yet emitted are dropped.
#[derive(Debug, Clone)]
pub struct HarHijack {
    stopped: Arc<AtomicBool>,
}

impl HijackHandle for HarHijack {
    fn stop(&self) -> Result<(), PageError> {
        self.stopped.store(true, Ordering::Release);
        Ok(())
    }
}

impl PageSession for HarSession {
    type Hijack = HarHijack;

    fn hijack(&mut self) -> Result<(HarHijack, ExchangeStream), PageError> {
        if self.sender.is_some() {
            return Err(PageError::Hijack("session is already hijacked".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.sender = Some(tx);
        Ok((
            HarHijack {
                stopped: Arc::clone(&self.stopped),
            },
            rx,
        ))
    }

    fn navigate(&mut self, url: &str) -> Result<(), PageError> {
        let archive = self
            .archives
            .get(url)
            .cloned()
            .ok_or_else(|| PageError::Navigation {
                url: url.to_string(),
                reason: "no capture recorded for this page".to_string(),
            })?;
        // Replay is finite: the stream closes once every entry was offered.
        let Some(tx) = self.sender.take() else {
            return Ok(());
        };
        let mut emitted = 0usize;
        for recorded in archive.exchanges() {
            if self.stopped.load(Ordering::Acquire) {
                break;
            }
            if !recorded.is_success() {
                tracing::debug!(
                    url = %recorded.url,
                    status = recorded.status,
                    "skipping non-2xx capture entry"
                );
                continue;
            }
            let exchange = NetworkExchange::completed(
                recorded.url.clone(),
                recorded.content_type.clone(),
                recorded.body.clone(),
            );
            if tx.send(exchange).is_err() {
                break;
            }
            emitted += 1;
        }
        tracing::debug!(page = url, emitted, "capture replay finished");
        Ok(())
    }
}
