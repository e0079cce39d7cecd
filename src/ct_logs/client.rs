// CT log API client
//
// One client wraps a single log base URL and performs get-sth and
// get-entries with retries, response size caps, and idle-connection reuse
// to amortize TLS handshakes across batches.

use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::ct_logs::types::{GetEntriesResponse, Sth};
use crate::error::CtError;
use crate::shutdown::Shutdown;
use crate::Result;

/// Hard cap on any response body read from a log server
const MAX_RESPONSE_SIZE: usize = 64 << 20;

/// Base backoff before the first retry; doubled per attempt
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Ceiling on the exponential backoff between attempts
const BACKOFF_CAP: Duration = Duration::from_secs(30);

pub(crate) const USER_AGENT: &str = concat!("ctrecon/", env!("CARGO_PKG_VERSION"));

pub struct CtClient {
    base_url: String,
    http: reqwest::Client,
    retries: u32,
}

impl CtClient {
    /// Create a client for one log. The base URL gains a trailing slash if
    /// it lacks one; `retries` is the number of re-attempts after the first.
    pub fn new(base_url: &str, timeout: Duration, retries: u32) -> Result<Self> {
        let mut base_url = base_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            base_url,
            http,
            retries,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `<base>/ct/v1/get-sth`
    pub async fn get_sth(&self, shutdown: &Shutdown) -> Result<Sth> {
        let url = format!("{}ct/v1/get-sth", self.base_url);
        self.get_json(&url, shutdown).await
    }

    /// GET `<base>/ct/v1/get-entries?start=S&end=E` (inclusive indices).
    /// The log may return fewer entries than requested.
    pub async fn get_raw_entries(
        &self,
        shutdown: &Shutdown,
        start: u64,
        end: u64,
    ) -> Result<GetEntriesResponse> {
        let url = format!(
            "{}ct/v1/get-entries?start={}&end={}",
            self.base_url, start, end
        );
        self.get_json(&url, shutdown).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, shutdown: &Shutdown) -> Result<T> {
        let body = self.get_with_retry(url, shutdown).await?;
        serde_json::from_slice(&body)
            .map_err(|e| CtError::protocol(format!("decoding {url}: {e}")))
    }

    async fn get_with_retry(&self, url: &str, shutdown: &Shutdown) -> Result<Vec<u8>> {
        let mut last_err = CtError::Other("no attempts made".to_string());

        for attempt in 0..=self.retries {
            if attempt > 0 {
                let backoff = backoff_for(attempt);
                debug!(
                    "retrying {} in {:?} (attempt {}/{})",
                    url,
                    backoff,
                    attempt + 1,
                    self.retries + 1
                );
                tokio::select! {
                    _ = shutdown.cancelled() => return Err(CtError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }

            let res = tokio::select! {
                _ = shutdown.cancelled() => return Err(CtError::Cancelled),
                res = self.get_once(url) => res,
            };

            match res {
                Ok(body) => return Ok(body),
                Err(e) => {
                    debug!("request to {} failed: {}", url, e);
                    last_err = e;
                }
            }
        }

        Err(CtError::RetriesExhausted {
            attempts: self.retries + 1,
            source: Box::new(last_err),
        })
    }

    async fn get_once(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CtError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        read_capped(resp, MAX_RESPONSE_SIZE).await
    }
}

/// Read a response body through a hard size cap. Bytes past the cap are
/// discarded rather than failing the request.
pub(crate) async fn read_capped(mut resp: reqwest::Response, cap: usize) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        let remaining = cap - body.len();
        if chunk.len() >= remaining {
            body.extend_from_slice(&chunk[..remaining]);
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn backoff_for(attempt: u32) -> Duration {
    let backoff = BACKOFF_BASE * (1u32 << (attempt - 1).min(5));
    backoff.min(BACKOFF_CAP)
}
