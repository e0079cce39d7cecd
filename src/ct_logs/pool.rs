// Adaptive fetch pool
//
// Fetches a half-open index range from one log and streams entry batches
// into a bounded channel. The pool starts with a single worker and adds one
// per controller tick while the observed error rate stays under threshold:
// slow mirrors are probed cautiously, healthy logs ramp to full concurrency.
// There is no ramp-down; on degradation the error rate rises and growth
// stops.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::debug;

use crate::ct_logs::client::CtClient;
use crate::ct_logs::types::EntryBatch;
use crate::error::CtError;
use crate::shutdown::Shutdown;
use crate::Result;

/// Controller sampling interval for worker ramp-up
const RAMP_TICK: Duration = Duration::from_millis(500);

/// Error-rate ceiling below which another worker may be added
const RAMP_ERROR_RATE: f64 = 0.1;

pub struct WorkerPool {
    client: Arc<CtClient>,
    batch_size: u64,
    max_workers: usize,
    rate_limit: u32,

    active_workers: AtomicUsize,
    err_count: AtomicU64,
    success_count: AtomicU64,
    dropped_entries: AtomicU64,
}

/// State shared by every worker of one fetch_range call
struct FetchShared {
    // Next unclaimed index; workers claim batch_size runs with fetch_add.
    next: AtomicU64,
    end: u64,
    limiter: Option<Mutex<Interval>>,
    tx: mpsc::Sender<EntryBatch>,
    shutdown: Shutdown,
}

impl WorkerPool {
    pub fn new(
        client: Arc<CtClient>,
        batch_size: u64,
        max_workers: usize,
        rate_limit: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            batch_size: batch_size.max(1),
            max_workers: max_workers.max(1),
            rate_limit,
            active_workers: AtomicUsize::new(0),
            err_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            dropped_entries: AtomicU64::new(0),
        })
    }

    /// Entries that could not be fetched after the client's retries and were
    /// skipped; surfaced by the runner in the final summary.
    pub fn dropped_entries(&self) -> u64 {
        self.dropped_entries.load(Ordering::Relaxed)
    }

    pub fn error_info(&self) -> String {
        let errors = self.err_count.load(Ordering::Relaxed);
        let successes = self.success_count.load(Ordering::Relaxed);
        let total = errors + successes;
        if total == 0 {
            return "no requests made".to_string();
        }
        format!(
            "{} errors / {} total requests ({:.1}% error rate)",
            errors,
            total,
            errors as f64 / total as f64 * 100.0
        )
    }

    /// Fetch `[start, end)` and stream batches into `tx`.
    ///
    /// The channel closes when this returns, whatever the outcome, so
    /// parse-side loops terminate deterministically. Returns `Cancelled`
    /// when the shutdown token fires; fetch failures are not errors here,
    /// they surface through `dropped_entries`.
    pub async fn fetch_range(
        self: Arc<Self>,
        shutdown: Shutdown,
        start: u64,
        end: u64,
        tx: mpsc::Sender<EntryBatch>,
    ) -> Result<()> {
        if start >= end {
            return Ok(());
        }

        let limiter = if self.rate_limit > 0 {
            let mut iv = interval(Duration::from_secs(1) / self.rate_limit.max(1));
            iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(Mutex::new(iv))
        } else {
            None
        };

        let shared = Arc::new(FetchShared {
            next: AtomicU64::new(start),
            end,
            limiter,
            tx,
            shutdown: shutdown.clone(),
        });

        let mut workers = JoinSet::new();
        Self::spawn_worker(&self, &mut workers, &shared);

        let mut ticker = interval(RAMP_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    // Let in-flight workers notice the token and drain.
                    while workers.join_next().await.is_some() {}
                    return Err(CtError::Cancelled);
                }
                joined = workers.join_next() => {
                    if joined.is_none() {
                        return Ok(());
                    }
                }
                _ = ticker.tick() => {
                    let current = self.active_workers.load(Ordering::Relaxed);
                    if current == 0 || current >= self.max_workers {
                        continue;
                    }
                    let successes = self.success_count.load(Ordering::Relaxed);
                    let errors = self.err_count.load(Ordering::Relaxed);
                    let total = successes + errors;
                    if total == 0 {
                        continue;
                    }
                    let error_rate = errors as f64 / total as f64;
                    if error_rate < RAMP_ERROR_RATE {
                        debug!(
                            "ramping up: {} -> {} workers (error rate: {:.1}%)",
                            current,
                            current + 1,
                            error_rate * 100.0
                        );
                        Self::spawn_worker(&self, &mut workers, &shared);
                    }
                }
            }
        }
    }

    fn spawn_worker(pool: &Arc<Self>, workers: &mut JoinSet<()>, shared: &Arc<FetchShared>) {
        let worker_pool = Arc::clone(pool);
        let shared = Arc::clone(shared);
        pool.active_workers.fetch_add(1, Ordering::Relaxed);
        workers.spawn(async move {
            worker_pool.worker(&shared).await;
            worker_pool.active_workers.fetch_sub(1, Ordering::Relaxed);
        });
    }

    async fn worker(&self, shared: &FetchShared) {
        loop {
            if shared.shutdown.is_cancelled() {
                return;
            }

            let item_start = shared.next.fetch_add(self.batch_size, Ordering::Relaxed);
            if item_start >= shared.end {
                return;
            }
            // Inclusive end of this work item; the final item may be short.
            let item_end = (item_start + self.batch_size).min(shared.end) - 1;

            self.fetch_item(shared, item_start, item_end).await;
        }
    }

    /// Fetch one work item, re-issuing after short reads until the item is
    /// covered. A failed fetch drops the remainder of the item and moves on;
    /// at corpus scale a handful of unfetchable batches must not abort the
    /// whole scrape.
    async fn fetch_item(&self, shared: &FetchShared, start: u64, end: u64) {
        let mut current = start;
        while current <= end {
            if shared.shutdown.is_cancelled() {
                return;
            }

            // Every outbound fetch takes a token, so the aggregate rate
            // across workers stays at or below the configured limit.
            if let Some(limiter) = &shared.limiter {
                tokio::select! {
                    _ = shared.shutdown.cancelled() => return,
                    _ = async { limiter.lock().await.tick().await; } => {}
                }
            }

            match self
                .client
                .get_raw_entries(&shared.shutdown, current, end)
                .await
            {
                Err(CtError::Cancelled) => return,
                Err(e) => {
                    self.err_count.fetch_add(1, Ordering::Relaxed);
                    let dropped = end - current + 1;
                    self.dropped_entries.fetch_add(dropped, Ordering::Relaxed);
                    debug!(
                        "batch [{}-{}] failed, dropping {} entries: {}",
                        current, end, dropped, e
                    );
                    return;
                }
                Ok(resp) => {
                    self.success_count.fetch_add(1, Ordering::Relaxed);
                    let fetched = resp.entries.len() as u64;
                    if fetched == 0 {
                        return;
                    }
                    debug!(
                        "batch [{}-{}] fetched {} entries",
                        current,
                        current + fetched - 1,
                        fetched
                    );
                    let batch = EntryBatch {
                        start_index: current,
                        entries: resp.entries,
                    };
                    tokio::select! {
                        _ = shared.shutdown.cancelled() => return,
                        sent = shared.tx.send(batch) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                    current += fetched;
                }
            }
        }
    }
}
