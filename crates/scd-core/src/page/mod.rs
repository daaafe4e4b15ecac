//! Page-automation collaborator interface.
//!
//! The engine needs exactly three capabilities from a page session: subscribe
//! to the network exchanges it makes (hijack), navigate to a URL and wait for
//! the page to settle, and stop the hijack again. Browser drivers, HAR
//! replays and test doubles all plug in through these traits.

mod exchange;
pub mod har;

pub use exchange::{ExchangeCompleter, ExchangeStream, NetworkExchange, ResumeGate};

use thiserror::Error;

/// Failure reported by a page collaborator.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("could not open page session: {0}")]
    Launch(String),
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("request interception failed: {0}")]
    Hijack(String),
}

/// Handle to an active traffic hijack. `stop` must be idempotent.
pub trait HijackHandle: Send + 'static {
    fn stop(&self) -> Result<(), PageError>;
}

/// One page session (browser tab or equivalent).
pub trait PageSession: Send + 'static {
    type Hijack: HijackHandle;

    /// Start intercepting traffic. Every exchange the page makes from now on is
    /// delivered on the returned stream until the hijack is stopped.
    fn hijack(&mut self) -> Result<(Self::Hijack, ExchangeStream), PageError>;

    /// Navigate to `url` and block until the page settles.
    fn navigate(&mut self, url: &str) -> Result<(), PageError>;
}

/// Opens a fresh page session per retrieval job.
pub trait PageLauncher: Send + Sync + 'static {
    type Session: PageSession;

    fn launch(&self) -> Result<Self::Session, PageError>;
}
