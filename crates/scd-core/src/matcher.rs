//! Manifest matcher: picks the manifest out of a page's network traffic.
//!
//! The first exchange whose URL or content type matches the pattern fulfils a
//! one-shot signal with the manifest body. "First" is delivery order on the
//! exchange stream: a later candidate is only considered once every earlier
//! candidate's body was dropped. After a match the matcher is inert and
//! ignores every further exchange of the same retrieval attempt.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::config::ScdConfig;
use crate::page::{ExchangeStream, NetworkExchange};

/// Predicate deciding whether an exchange carries the manifest.
#[derive(Debug, Clone, Default)]
pub struct ManifestPattern {
    url_contains: Option<String>,
    content_types: Vec<String>,
}

impl ManifestPattern {
    pub fn url_contains(needle: impl Into<String>) -> Self {
        Self {
            url_contains: Some(needle.into()),
            content_types: Vec::new(),
        }
    }

    pub fn with_content_types<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.content_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn from_config(cfg: &ScdConfig) -> Self {
        Self::url_contains(cfg.manifest_url_pattern.clone())
            .with_content_types(cfg.manifest_content_types.iter().cloned())
    }

    /// URL substring match, or content-type match ignoring case and parameters.
    pub fn matches(&self, url: &str, content_type: Option<&str>) -> bool {
        let url_hit = self
            .url_contains
            .as_deref()
            .map(|needle| !needle.is_empty() && url.contains(needle))
            .unwrap_or(false);
        if url_hit {
            return true;
        }
        let Some(ct) = content_type else {
            return false;
        };
        let essence = ct.split(';').next().unwrap_or("").trim();
        self.content_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(essence))
    }
}

/// The matched manifest: raw body and the URL it was fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestHandle {
    url: String,
    body: Vec<u8>,
}

impl ManifestHandle {
    pub fn new(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            body,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// What `observe` did with one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// This exchange was the manifest; the signal fired.
    Matched,
    /// Not a manifest (or its body never arrived); still waiting.
    Pending,
    /// A manifest was already matched; the exchange was passed through.
    Ignored,
}

/// Resolves to the matched manifest, or `None` if the matcher was dropped
/// without ever matching.
#[derive(Debug)]
pub struct ManifestSignal(oneshot::Receiver<ManifestHandle>);

impl Future for ManifestSignal {
    type Output = Option<ManifestHandle>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().0).poll(cx).map(Result::ok)
    }
}

#[derive(Debug)]
pub struct ManifestMatcher {
    pattern: ManifestPattern,
    matched: AtomicBool,
    signal: Mutex<Option<oneshot::Sender<ManifestHandle>>>,
}

impl ManifestMatcher {
    pub fn new(pattern: ManifestPattern) -> (Self, ManifestSignal) {
        let (tx, rx) = oneshot::channel();
        let matcher = Self {
            pattern,
            matched: AtomicBool::new(false),
            signal: Mutex::new(Some(tx)),
        };
        (matcher, ManifestSignal(rx))
    }

    pub fn is_matched(&self) -> bool {
        self.matched.load(Ordering::Acquire)
    }

    /// Inspect one exchange. The exchange is always resumed so the page keeps
    /// receiving its response, whatever the outcome.
    pub async fn observe(&self, exchange: NetworkExchange) -> Observation {
        match self.candidate(exchange) {
            Some(candidate) => {
                let body = candidate.exchange.into_body().await;
                self.claim(candidate.url, body)
            }
            None if self.is_matched() => Observation::Ignored,
            None => Observation::Pending,
        }
    }

    /// Observe a whole exchange stream until it closes. Every exchange is
    /// resumed on arrival; candidates are claimed strictly in arrival order.
    pub async fn watch(&self, mut stream: ExchangeStream) {
        let mut queue: VecDeque<Candidate> = VecDeque::new();
        let mut open = true;
        while open || !queue.is_empty() {
            tokio::select! {
                biased;
                exchange = stream.recv(), if open => match exchange {
                    Some(exchange) => {
                        if let Some(candidate) = self.candidate(exchange) {
                            queue.push_back(candidate);
                        }
                    }
                    None => open = false,
                },
                body = front_body(&mut queue), if !queue.is_empty() => {
                    if let Some(candidate) = queue.pop_front() {
                        if self.claim(candidate.url, body) == Observation::Matched {
                            queue.clear();
                        }
                    }
                }
            }
        }
    }

    /// Resume the exchange and keep it only if it may be the manifest.
    fn candidate(&self, mut exchange: NetworkExchange) -> Option<Candidate> {
        exchange.resume();
        if self.is_matched()
            || !self
                .pattern
                .matches(exchange.url(), exchange.content_type())
        {
            return None;
        }
        Some(Candidate {
            url: exchange.url().to_string(),
            exchange,
        })
    }

    fn claim(&self, url: String, body: Option<Vec<u8>>) -> Observation {
        let Some(body) = body else {
            tracing::debug!(url = %url, "manifest candidate dropped before its body completed");
            return Observation::Pending;
        };
        // The swap is the single claim point.
        if self.matched.swap(true, Ordering::AcqRel) {
            return Observation::Ignored;
        }
        let sender = self
            .signal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tracing::info!(url = %url, bytes = body.len(), "manifest matched");
        if let Some(tx) = sender {
            let _ = tx.send(ManifestHandle::new(url, body));
        }
        Observation::Matched
    }
}

/// A pattern-matching exchange whose body has not been claimed yet.
#[derive(Debug)]
struct Candidate {
    url: String,
    exchange: NetworkExchange,
}

async fn front_body(queue: &mut VecDeque<Candidate>) -> Option<Vec<u8>> {
    match queue.front_mut() {
        Some(candidate) => candidate.exchange.body().await,
        None => std::future::pending().await,
    }
}
