//! In-memory collaborators for unit tests.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::fetch::{FetchCause, FetchError, SegmentFetcher};
use crate::job::NameHint;
use crate::page::{
    ExchangeStream, HijackHandle, NetworkExchange, PageError, PageLauncher, PageSession,
};
use crate::storage::ArtifactSink;

/// A page that emits a fixed list of exchanges when navigated to.
#[derive(Debug, Clone)]
pub struct ScriptedPage {
    url: String,
    exchanges: Vec<(String, Option<String>, Vec<u8>)>,
    keep_open: bool,
}

impl ScriptedPage {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            exchanges: Vec::new(),
            keep_open: false,
        }
    }

    pub fn exchange(
        mut self,
        url: impl Into<String>,
        content_type: Option<&str>,
        body: impl AsRef<[u8]>,
    ) -> Self {
        self.exchanges.push((
            url.into(),
            content_type.map(str::to_string),
            body.as_ref().to_vec(),
        ));
        self
    }

    /// Keep the exchange stream open after navigation, like a live page.
    pub fn keep_open(mut self) -> Self {
        self.keep_open = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedLauncher {
    pages: Arc<HashMap<String, ScriptedPage>>,
    hijacks: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
}

impl ScriptedLauncher {
    pub fn new(pages: impl IntoIterator<Item = ScriptedPage>) -> Self {
        Self {
            pages: Arc::new(pages.into_iter().map(|p| (p.url.clone(), p)).collect()),
            hijacks: Arc::default(),
        }
    }

    pub fn all_hijacks_stopped(&self) -> bool {
        let hijacks = self.hijacks.lock().unwrap();
        !hijacks.is_empty() && hijacks.iter().all(|s| s.load(Ordering::Acquire))
    }
}

pub struct ScriptedSession {
    pages: Arc<HashMap<String, ScriptedPage>>,
    hijacks: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
    sender: Option<mpsc::UnboundedSender<NetworkExchange>>,
    stopped: Arc<AtomicBool>,
}

pub struct ScriptedHijack(Arc<AtomicBool>);

impl HijackHandle for ScriptedHijack {
    fn stop(&self) -> Result<(), PageError> {
        self.0.store(true, Ordering::Release);
        Ok(())
    }
}

impl PageLauncher for ScriptedLauncher {
    type Session = ScriptedSession;

    fn launch(&self) -> Result<ScriptedSession, PageError> {
        Ok(ScriptedSession {
            pages: Arc::clone(&self.pages),
            hijacks: Arc::clone(&self.hijacks),
            sender: None,
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl PageSession for ScriptedSession {
    type Hijack = ScriptedHijack;

    fn hijack(&mut self) -> Result<(ScriptedHijack, ExchangeStream), PageError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sender = Some(tx);
        self.hijacks.lock().unwrap().push(Arc::clone(&self.stopped));
        Ok((ScriptedHijack(Arc::clone(&self.stopped)), rx))
    }

    fn navigate(&mut self, url: &str) -> Result<(), PageError> {
        let page = self.pages.get(url).ok_or_else(|| PageError::Navigation {
            url: url.to_string(),
            reason: "no such page".to_string(),
        })?;
        if let Some(tx) = &self.sender {
            for (u, ct, body) in &page.exchanges {
                if self.stopped.load(Ordering::Acquire) {
                    break;
                }
                let _ = tx.send(NetworkExchange::completed(u.clone(), ct.clone(), body.clone()));
            }
        }
        if !page.keep_open {
            self.sender = None;
        }
        Ok(())
    }
}

enum Canned {
    Body(Vec<u8>),
    Status(u32),
}

/// Serves canned bodies or statuses per URL; unknown URLs are 404.
#[derive(Default)]
pub struct MapFetcher {
    routes: HashMap<String, Canned>,
    delays: HashMap<String, Duration>,
}

impl MapFetcher {
    pub fn with(mut self, url: &str, body: impl AsRef<[u8]>) -> Self {
        self.routes.insert(url.to_string(), Canned::Body(body.as_ref().to_vec()));
        self
    }

    pub fn with_status(mut self, url: &str, status: u32) -> Self {
        self.routes.insert(url.to_string(), Canned::Status(status));
        self
    }

    pub fn with_delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }
}

impl SegmentFetcher for MapFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if let Some(delay) = self.delays.get(url) {
            std::thread::sleep(*delay);
        }
        match self.routes.get(url) {
            Some(Canned::Body(b)) => Ok(b.clone()),
            Some(Canned::Status(code)) => Err(FetchError::new(url, FetchCause::Status(*code))),
            None => Err(FetchError::new(url, FetchCause::Status(404))),
        }
    }
}

/// Records artifacts in memory keyed by `NameHint` display form.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    failing: bool,
}

impl MemorySink {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(key).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().unwrap().is_empty()
    }
}

impl ArtifactSink for MemorySink {
    fn write(&self, name: &NameHint, bytes: &[u8]) -> io::Result<PathBuf> {
        if self.failing {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only sink"));
        }
        let key = name.to_string();
        self.files.lock().unwrap().insert(key.clone(), bytes.to_vec());
        Ok(PathBuf::from("mem").join(key))
    }
}
