// Release version check
//
// Passive check against the project's release feed at startup; prints an
// upgrade hint when a newer tag exists. No binary is ever downloaded or
// replaced.

use std::time::Duration;

use serde::Deserialize;

use crate::ct_logs::client::{read_capped, USER_AGENT};
use crate::error::CtError;
use crate::shutdown::Shutdown;
use crate::Result;

const RELEASES_URL: &str = "https://api.github.com/repos/ctrecon/ctrecon/releases/latest";
const API_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_API_RESPONSE: usize = 2 << 20;

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
}

/// Fetch the latest release tag, without the `v` prefix.
pub async fn latest_version(shutdown: &Shutdown) -> Result<String> {
    let http = reqwest::Client::builder()
        .timeout(API_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()?;

    let resp = tokio::select! {
        _ = shutdown.cancelled() => return Err(CtError::Cancelled),
        resp = http.get(RELEASES_URL).send() => resp?,
    };

    let status = resp.status();
    if !status.is_success() {
        return Err(CtError::Http {
            status: status.as_u16(),
            url: RELEASES_URL.to_string(),
        });
    }

    let body = tokio::select! {
        _ = shutdown.cancelled() => return Err(CtError::Cancelled),
        body = read_capped(resp, MAX_API_RESPONSE) => body?,
    };

    let release: Release = serde_json::from_slice(&body)?;
    Ok(release.tag_name.trim_start_matches('v').to_string())
}

/// Semver triple comparison; non-numeric suffixes are ignored.
pub fn is_newer(current: &str, remote: &str) -> bool {
    let cur = parse_version(current);
    let rem = parse_version(remote);

    for i in 0..3 {
        if rem[i] > cur[i] {
            return true;
        }
        if rem[i] < cur[i] {
            return false;
        }
    }
    false
}

fn parse_version(v: &str) -> [u64; 3] {
    let mut parts = [0u64; 3];
    for (i, part) in v.trim_start_matches('v').splitn(3, '.').enumerate() {
        let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
        parts[i] = digits.parse().unwrap_or(0);
    }
    parts
}
