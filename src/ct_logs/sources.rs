// CT log directory
//
// Fetches and filters the Google log list (v3 schema), the discovery source
// for scrape targets when no explicit log URL is given.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::ct_logs::client::{read_capped, USER_AGENT};
use crate::error::CtError;
use crate::shutdown::Shutdown;
use crate::Result;

pub const DEFAULT_LOG_LIST_URL: &str = "https://www.gstatic.com/ct/log_list/v3/log_list.json";

/// Hard cap on the log-list response body
const MAX_LOG_LIST_SIZE: usize = 4 << 20;

// Log list v3 schema: https://www.gstatic.com/ct/log_list/v3/log_list_schema.json

#[derive(Debug, Deserialize)]
pub struct LogList {
    #[serde(default)]
    pub version: String,
    pub operators: Vec<Operator>,
}

#[derive(Debug, Deserialize)]
pub struct Operator {
    pub name: String,
    #[serde(default)]
    pub email: Vec<String>,
    #[serde(default)]
    pub logs: Vec<Log>,
}

#[derive(Debug, Deserialize)]
pub struct Log {
    #[serde(default)]
    pub description: String,
    pub log_id: String,
    #[serde(default)]
    pub key: String,
    pub url: String,
    #[serde(default)]
    pub dns: String,
    #[serde(default)]
    pub mmd: u64,
    #[serde(default)]
    pub state: LogState,
    pub temporal_interval: Option<TemporalInterval>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogState {
    pub usable: Option<StateInfo>,
    pub readonly: Option<ReadOnlyInfo>,
    pub retired: Option<StateInfo>,
    pub qualified: Option<StateInfo>,
    pub pending: Option<StateInfo>,
    pub rejected: Option<StateInfo>,
}

#[derive(Debug, Deserialize)]
pub struct StateInfo {
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ReadOnlyInfo {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub final_tree_size: u64,
}

#[derive(Debug, Deserialize)]
pub struct TemporalInterval {
    pub start_inclusive: DateTime<Utc>,
    pub end_exclusive: DateTime<Utc>,
}

impl Log {
    pub fn current_state(&self) -> &'static str {
        if self.state.usable.is_some() {
            "usable"
        } else if self.state.readonly.is_some() {
            "readonly"
        } else if self.state.qualified.is_some() {
            "qualified"
        } else if self.state.retired.is_some() {
            "retired"
        } else if self.state.pending.is_some() {
            "pending"
        } else if self.state.rejected.is_some() {
            "rejected"
        } else {
            "unknown"
        }
    }

    pub fn matches_state(&self, filter: &str) -> bool {
        filter == "all" || self.current_state() == filter
    }

    /// Normalized URL for the scraper: explicit https scheme, trailing slash.
    pub fn full_url(&self) -> String {
        normalize_log_url(&self.url)
    }
}

/// Force an explicit `https://` scheme and a trailing slash, the shape every
/// log URL must have before it reaches the client.
pub fn normalize_log_url(url: &str) -> String {
    let mut url = if let Some(rest) = url.strip_prefix("http://") {
        format!("https://{rest}")
    } else if url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    };
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}

pub struct LogWithOperator {
    pub log: Log,
    pub operator: String,
}

pub struct LogListFetcher {
    http: reqwest::Client,
}

impl LogListFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .build()?;
        Ok(Self { http })
    }

    pub async fn fetch(&self, url: &str, shutdown: &Shutdown) -> Result<LogList> {
        let resp = tokio::select! {
            _ = shutdown.cancelled() => return Err(CtError::Cancelled),
            resp = self.http.get(url).send() => resp?,
        };

        let status = resp.status();
        if !status.is_success() {
            return Err(CtError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = tokio::select! {
            _ = shutdown.cancelled() => return Err(CtError::Cancelled),
            body = read_capped(resp, MAX_LOG_LIST_SIZE) => body?,
        };

        serde_json::from_slice(&body)
            .map_err(|e| CtError::protocol(format!("parsing log list: {e}")))
    }

    pub async fn fetch_default(&self, shutdown: &Shutdown) -> Result<LogList> {
        self.fetch(DEFAULT_LOG_LIST_URL, shutdown).await
    }
}

/// Flatten operators and keep the logs whose state matches the filter.
pub fn filter_logs(list: LogList, state: &str) -> Vec<LogWithOperator> {
    let mut result = Vec::new();
    for op in list.operators {
        for log in op.logs {
            if log.matches_state(state) {
                result.push(LogWithOperator {
                    log,
                    operator: op.name.clone(),
                });
            }
        }
    }
    result
}
