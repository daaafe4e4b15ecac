//! Per-segment fetch failure and its transient/permanent classification.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchCause {
    #[error("{0}")]
    Transport(#[from] curl::Error),
    #[error("HTTP {0}")]
    Status(u32),
    #[error("{0}")]
    Other(String),
}

/// Failure fetching one segment URL. Captured into the assembly, never retried.
#[derive(Debug, Error)]
#[error("fetch {url}: {cause}")]
pub struct FetchError {
    pub url: String,
    #[source]
    pub cause: FetchCause,
}

impl FetchError {
    pub fn new(url: impl Into<String>, cause: FetchCause) -> Self {
        Self {
            url: url.into(),
            cause,
        }
    }

    /// True for failures a later attempt may not hit: timeouts, connection
    /// errors, throttling (429/503) and other 5xx responses.
    pub fn is_transient(&self) -> bool {
        match &self.cause {
            FetchCause::Transport(e) => {
                e.is_operation_timedout()
                    || e.is_couldnt_connect()
                    || e.is_couldnt_resolve_host()
                    || e.is_couldnt_resolve_proxy()
                    || e.is_read_error()
                    || e.is_recv_error()
                    || e.is_send_error()
                    || e.is_got_nothing()
            }
            FetchCause::Status(code) => *code == 429 || (500..=599).contains(code),
            FetchCause::Other(_) => false,
        }
    }
}
