// Resume state persistence
//
// One JSON state file per log under the state directory. Saving is best
// effort: failures are logged at debug and never affect the scrape.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeProgress {
    pub log_url: String,
    pub tree_size: u64,
    pub last_index: u64,
    pub entries_done: u64,
    pub last_updated: DateTime<Utc>,
}

/// State filename derived from the log URL: scheme stripped, `/` and `:`
/// replaced with `_`.
pub fn state_file_path(state_dir: &Path, log_url: &str) -> PathBuf {
    let safe = log_url
        .strip_prefix("https://")
        .or_else(|| log_url.strip_prefix("http://"))
        .unwrap_or(log_url)
        .replace(['/', ':'], "_");
    state_dir.join(format!("{safe}.state.json"))
}

pub fn load_progress(state_dir: &Path, log_url: &str) -> Option<ScrapeProgress> {
    let path = state_file_path(state_dir, log_url);
    let data = fs::read(path).ok()?;
    serde_json::from_slice(&data).ok()
}

pub fn save_progress(state_dir: &Path, progress: &ScrapeProgress) {
    let data = match serde_json::to_vec(progress) {
        Ok(data) => data,
        Err(e) => {
            debug!("failed to marshal progress: {}", e);
            return;
        }
    };

    if let Err(e) = create_state_dir(state_dir) {
        debug!("failed to create state directory: {}", e);
        return;
    }

    let path = state_file_path(state_dir, &progress.log_url);
    if let Err(e) = write_state_file(&path, &data) {
        debug!("failed to write state file: {}", e);
    }
}

#[cfg(unix)]
fn create_state_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_state_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn write_state_file(path: &Path, data: &[u8]) -> io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)
}

#[cfg(not(unix))]
fn write_state_file(path: &Path, data: &[u8]) -> io::Result<()> {
    fs::write(path, data)
}
