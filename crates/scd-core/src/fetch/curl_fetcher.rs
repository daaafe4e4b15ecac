//! Blocking single-GET segment fetcher backed by libcurl.

use std::time::Duration;

use crate::config::ScdConfig;

use super::error::{FetchCause, FetchError};
use super::SegmentFetcher;

/// Per-transfer curl timeouts.
#[derive(Debug, Clone, Copy)]
pub struct CurlOptions {
    pub connect_timeout: Duration,
    pub timeout: Duration,
}

impl Default for CurlOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            timeout: Duration::from_secs(300),
        }
    }
}

impl CurlOptions {
    pub fn from_config(cfg: &ScdConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs.max(1)),
            timeout: Duration::from_secs(cfg.segment_timeout_secs.max(1)),
        }
    }
}

/// One GET per call, redirects followed, no retry. Call from a blocking thread.
#[derive(Debug, Clone, Default)]
pub struct CurlFetcher {
    opts: CurlOptions,
}

impl CurlFetcher {
    pub fn new(opts: CurlOptions) -> Self {
        Self { opts }
    }
}

impl SegmentFetcher for CurlFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let transport = |e: curl::Error| FetchError::new(url, FetchCause::Transport(e));

        let mut easy = curl::easy::Easy::new();
        easy.url(url).map_err(transport)?;
        easy.follow_location(true).map_err(transport)?;
        easy.connect_timeout(self.opts.connect_timeout)
            .map_err(transport)?;
        easy.timeout(self.opts.timeout).map_err(transport)?;

        let mut body = Vec::new();
        {
            let mut transfer = easy.transfer();
            transfer
                .write_function(|data| {
                    body.extend_from_slice(data);
                    Ok(data.len())
                })
                .map_err(transport)?;
            transfer.perform().map_err(transport)?;
        }

        let code = easy.response_code().map_err(transport)?;
        if !(200..300).contains(&code) {
            return Err(FetchError::new(url, FetchCause::Status(code)));
        }
        Ok(body)
    }
}
