// Scrape orchestration
//
// The runner resolves the target log set, computes the index window per
// log, wires fetcher -> parser -> writer, and reports progress. Logs are
// scraped sequentially; fetching and parsing within one log are concurrent.

pub mod banner;
pub mod monitor;
pub mod progress;

use std::io::{self, BufRead, IsTerminal};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::certificates::LeafParser;
use crate::cli::Args;
use crate::ct_logs::sources::{filter_logs, normalize_log_url, LogListFetcher};
use crate::ct_logs::types::EntryBatch;
use crate::ct_logs::{CtClient, WorkerPool};
use crate::error::CtError;
use crate::output::{sanitize, Writer};
use crate::shutdown::Shutdown;
use crate::updater;
use crate::Result;

use self::progress::ScrapeProgress;

/// Persist resume state every this many processed entries
const SAVE_EVERY: u64 = 10_000;

/// Progress line cadence
const PROGRESS_TICK: Duration = Duration::from_secs(5);

pub struct Runner {
    args: Args,
}

impl Runner {
    pub fn new(args: Args) -> Self {
        Self { args }
    }

    pub async fn run(&self, shutdown: Shutdown) -> Result<()> {
        if !self.args.silent {
            banner::show_banner();
        }

        if !self.args.disable_update_check && !self.args.silent {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let Ok(latest) = updater::latest_version(&shutdown).await else {
                    return;
                };
                if updater::is_newer(env!("CARGO_PKG_VERSION"), &latest) {
                    info!(
                        "new version available: {} (current: {})",
                        latest,
                        env!("CARGO_PKG_VERSION")
                    );
                }
            });
        }

        if self.args.list_logs {
            return self.list_logs(&shutdown).await;
        }
        if self.args.monitor {
            return self.monitor(&shutdown).await;
        }
        self.scrape(&shutdown).await
    }

    async fn list_logs(&self, shutdown: &Shutdown) -> Result<()> {
        let fetcher = LogListFetcher::new(Duration::from_secs(self.args.timeout))?;

        info!("fetching CT log list...");
        let list = fetcher.fetch_default(shutdown).await?;
        let logs = filter_logs(list, self.args.log_state.as_str());

        if self.args.json {
            for l in &logs {
                let line = serde_json::json!({
                    "operator": sanitize(&l.operator),
                    "description": sanitize(&l.log.description),
                    "url": l.log.full_url(),
                    "state": l.log.current_state(),
                    "mmd": l.log.mmd,
                });
                println!("{line}");
            }
        } else {
            println!(
                "{:<12} {:<50} {:<45} {}",
                "STATE", "DESCRIPTION", "URL", "OPERATOR"
            );
            println!("{}", "-".repeat(140));
            for l in &logs {
                println!(
                    "{:<12} {:<50} {:<45} {}",
                    l.log.current_state(),
                    truncate(&sanitize(&l.log.description), 48),
                    truncate(&l.log.full_url(), 43),
                    sanitize(&l.operator)
                );
            }
            println!("\nTotal: {} logs", logs.len());
        }

        Ok(())
    }

    async fn scrape(&self, shutdown: &Shutdown) -> Result<()> {
        let domains = self.collect_domains();
        let log_urls = self.resolve_log_urls(shutdown).await?;
        if log_urls.is_empty() {
            return Err(CtError::config(
                "no CT logs to scrape - use -u <url> to specify a log or omit to auto-discover",
            ));
        }

        let writer = Arc::new(Writer::new(
            self.args.output.as_deref(),
            self.args.output_mode(),
        )?);
        let parser = Arc::new(LeafParser::new(&domains));

        if !domains.is_empty() {
            info!("filtering for domains: {}", domains.join(", "));
        }

        let mut failed_logs = 0usize;
        for log_url in &log_urls {
            if shutdown.is_cancelled() {
                writer.close()?;
                return Err(CtError::Cancelled);
            }
            match self.scrape_log(shutdown, log_url, &parser, &writer).await {
                Ok(()) => {}
                Err(CtError::Cancelled) => {
                    writer.close()?;
                    return Err(CtError::Cancelled);
                }
                Err(e) => {
                    warn!("error scraping {}: {}", log_url, e);
                    failed_logs += 1;
                }
            }
        }

        writer.close()?;

        if failed_logs == log_urls.len() && writer.stats() == 0 {
            return Err(CtError::Other(
                "every log failed and no results were written".to_string(),
            ));
        }

        info!("done - {} unique results written", writer.stats());
        Ok(())
    }

    async fn scrape_log(
        &self,
        shutdown: &Shutdown,
        log_url: &str,
        parser: &Arc<LeafParser>,
        writer: &Arc<Writer>,
    ) -> Result<()> {
        let timeout = Duration::from_secs(self.args.timeout);
        let client = Arc::new(CtClient::new(log_url, timeout, self.args.retries)?);

        info!("connecting to {}", log_url);
        let sth = client.get_sth(shutdown).await?;
        let tree_size = sth.tree_size;
        info!("tree size: {} entries", tree_size);

        let (mut start, end) =
            calculate_range(tree_size, self.args.start, self.args.count, self.args.from_end);
        if start >= end {
            info!("no entries to process");
            return Ok(());
        }
        let mut total_entries = end - start;

        let state_dir = self.args.state_dir();
        if self.args.resume {
            match progress::load_progress(&state_dir, log_url) {
                Some(saved) if saved.last_index >= start => {
                    start = saved.last_index + 1;
                    if start >= end {
                        info!("resume: all entries already processed for this log");
                        return Ok(());
                    }
                    total_entries = end - start;
                    info!(
                        "resuming from entry {} ({} entries remaining)",
                        start, total_entries
                    );
                }
                _ => info!("resume: no saved state found for this log, starting fresh"),
            }
        }

        info!(
            "scraping entries {} to {} ({} entries) with up to {} workers",
            start,
            end - 1,
            total_entries,
            self.args.workers
        );

        let pool = WorkerPool::new(
            Arc::clone(&client),
            self.args.batch_size,
            self.args.workers as usize,
            self.args.rate_limit,
        );
        let (tx, mut rx) = mpsc::channel::<EntryBatch>(self.args.workers as usize * 2);

        let processed = Arc::new(AtomicU64::new(0));
        let started = Instant::now();

        let progress_task = {
            let writer = Arc::clone(writer);
            let processed = Arc::clone(&processed);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = interval(PROGRESS_TICK);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = ticker.tick() => {
                            let done = processed.load(Ordering::Relaxed);
                            if done == 0 {
                                continue;
                            }
                            let elapsed = started.elapsed().as_secs_f64();
                            info!(
                                "progress: {}/{} ({:.1}%) - {:.0} entries/sec - {} results",
                                done,
                                total_entries,
                                done as f64 / total_entries as f64 * 100.0,
                                done as f64 / elapsed,
                                writer.stats()
                            );
                        }
                    }
                }
            })
        };

        let fetch_task = tokio::spawn(Arc::clone(&pool).fetch_range(
            shutdown.clone(),
            start,
            end,
            tx,
        ));

        let parse_sem = Arc::new(Semaphore::new(parse_worker_count(&self.args)));
        let mut last_save = 0u64;

        // The pool closes the channel on completion; keep draining so
        // already-fetched batches are parsed even after cancellation.
        while let Some(batch) = rx.recv().await {
            let batch_last = batch.start_index + batch.entries.len() as u64 - 1;
            parse_batch(batch, parser, writer, log_url, &parse_sem, &processed).await;
            writer.flush()?;

            if self.args.resume {
                let current = processed.load(Ordering::Relaxed);
                if current - last_save >= SAVE_EVERY {
                    progress::save_progress(
                        &state_dir,
                        &ScrapeProgress {
                            log_url: log_url.to_string(),
                            tree_size,
                            last_index: batch_last,
                            entries_done: current,
                            last_updated: Utc::now(),
                        },
                    );
                    last_save = current;
                }
            }
        }

        progress_task.abort();
        writer.flush()?;

        if self.args.resume {
            progress::save_progress(
                &state_dir,
                &ScrapeProgress {
                    log_url: log_url.to_string(),
                    tree_size,
                    last_index: end - 1,
                    entries_done: processed.load(Ordering::Relaxed),
                    last_updated: Utc::now(),
                },
            );
            info!(
                "resume state saved to {}",
                progress::state_file_path(&state_dir, log_url).display()
            );
        }

        fetch_task
            .await
            .map_err(|e| CtError::Other(format!("fetch task failed: {e}")))??;

        let elapsed = started.elapsed();
        let done = processed.load(Ordering::Relaxed);
        info!(
            "completed {}: {} entries in {:.0?} ({:.0} entries/sec)",
            log_url,
            done,
            elapsed,
            done as f64 / elapsed.as_secs_f64()
        );
        if pool.dropped_entries() > 0 {
            warn!(
                "dropped {} entries due to fetch errors ({:.1}% of requested range)",
                pool.dropped_entries(),
                pool.dropped_entries() as f64 / total_entries as f64 * 100.0
            );
        }
        debug!("fetch stats: {}", pool.error_info());

        Ok(())
    }

    fn collect_domains(&self) -> Vec<String> {
        let mut domains = self.args.domain.clone();

        if let Some(path) = &self.args.domain_file {
            match read_lines(path) {
                Ok(lines) => domains.extend(lines),
                Err(e) => warn!("reading domain file: {}", e),
            }
        }

        // A piped stdin contributes one domain per line.
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            for line in stdin.lock().lines().map_while(io::Result::ok) {
                let line = line.trim();
                if !line.is_empty() && !line.starts_with('#') {
                    domains.push(line.to_string());
                }
            }
        }

        domains
    }

    async fn resolve_log_urls(&self, shutdown: &Shutdown) -> Result<Vec<String>> {
        if !self.args.log_url.is_empty() {
            return Ok(self
                .args
                .log_url
                .iter()
                .map(|u| {
                    if u.starts_with("http://") {
                        warn!("upgrading {} to HTTPS", u);
                    }
                    normalize_log_url(u)
                })
                .collect());
        }

        info!("auto-discovering CT logs...");
        let state = self.args.log_state.as_str();
        let fetcher = LogListFetcher::new(Duration::from_secs(self.args.timeout))?;
        let list = fetcher.fetch_default(shutdown).await?;
        let logs = filter_logs(list, state);
        if logs.is_empty() {
            return Err(CtError::Other(format!(
                "no logs found matching state filter '{state}'"
            )));
        }

        info!("found {} {} CT logs", logs.len(), state);
        Ok(logs.iter().map(|l| l.log.full_url()).collect())
    }

}

/// Parse concurrency: the flag when set, otherwise the CPU count.
pub(crate) fn parse_worker_count(args: &Args) -> usize {
    if args.parse_workers > 0 {
        return args.parse_workers as usize;
    }
    std::thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(4)
        .min(128)
}

/// Parse every entry of one batch, gated by the parse semaphore. Parse
/// errors and write errors are per-entry debug events, never fatal.
pub(crate) async fn parse_batch(
    batch: EntryBatch,
    parser: &Arc<LeafParser>,
    writer: &Arc<Writer>,
    log_url: &str,
    parse_sem: &Arc<Semaphore>,
    processed: &Arc<AtomicU64>,
) {
    let start_index = batch.start_index;
    let mut tasks = JoinSet::new();

    for (i, entry) in batch.entries.into_iter().enumerate() {
        let idx = start_index + i as u64;
        let Ok(permit) = Arc::clone(parse_sem).acquire_owned().await else {
            return;
        };
        let parser = Arc::clone(parser);
        let writer = Arc::clone(writer);
        let processed = Arc::clone(processed);
        let log_url = log_url.to_string();

        tasks.spawn(async move {
            let _permit = permit;
            match parser.parse_entry(&entry, idx, &log_url) {
                Ok(Some(result)) => {
                    if let Err(e) = writer.write_result(&result) {
                        debug!("write error at entry {}: {}", idx, e);
                    }
                }
                Ok(None) => {}
                Err(e) => debug!("parse error at entry {}: {}", idx, e),
            }
            processed.fetch_add(1, Ordering::Relaxed);
        });
    }

    while tasks.join_next().await.is_some() {}
}

/// Index window per the range flags; callers treat `start >= end` as a
/// no-op.
pub(crate) fn calculate_range(tree_size: u64, start: i64, count: u64, from_end: bool) -> (u64, u64) {
    if from_end {
        let end = tree_size;
        if count > 0 {
            (end.saturating_sub(count), end)
        } else if start >= 0 {
            (start as u64, end)
        } else {
            // Default tail window when neither a count nor a start is given.
            (tree_size.saturating_sub(10_000), end)
        }
    } else {
        let s = if start >= 0 { start as u64 } else { 0 };
        let e = if count > 0 {
            s.saturating_add(count).min(tree_size)
        } else {
            tree_size
        };
        (s, e)
    }
}

fn read_lines(path: &Path) -> io::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

pub(crate) fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len < 3 {
        return s.chars().take(max_len).collect();
    }
    let mut out: String = s.chars().take(max_len - 2).collect();
    out.push_str("..");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_explicit_start_and_count() {
        assert_eq!(calculate_range(1000, 100, 50, false), (100, 150));
        // Count clamps to the tree size.
        assert_eq!(calculate_range(120, 100, 50, false), (100, 120));
    }

    #[test]
    fn test_range_auto_start() {
        assert_eq!(calculate_range(1000, -1, 50, false), (0, 50));
        assert_eq!(calculate_range(1000, -1, 0, false), (0, 1000));
        assert_eq!(calculate_range(30, -1, 50, false), (0, 30));
    }

    #[test]
    fn test_range_from_end() {
        assert_eq!(calculate_range(1000, -1, 100, true), (900, 1000));
        assert_eq!(calculate_range(50, -1, 100, true), (0, 50));
        assert_eq!(calculate_range(1000, 400, 0, true), (400, 1000));
        // No count, no start: default to the last 10k entries.
        assert_eq!(calculate_range(100_000, -1, 0, true), (90_000, 100_000));
        assert_eq!(calculate_range(5_000, -1, 0, true), (0, 5_000));
    }

    #[test]
    fn test_range_empty_tree() {
        let (start, end) = calculate_range(0, -1, 0, false);
        assert!(start >= end);
        let (start, end) = calculate_range(0, -1, 100, true);
        assert!(start >= end);
    }

    #[test]
    fn test_range_start_past_tree() {
        let (start, end) = calculate_range(100, 500, 10, false);
        assert!(start >= end);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exactly-10", 10), "exactly-10");
        assert_eq!(truncate("a-longer-string", 10), "a-longer..");
        assert_eq!(truncate("abc", 2), "ab");
    }
}
