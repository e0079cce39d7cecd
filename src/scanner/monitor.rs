// Monitor loop
//
// Polls each log's STH on a fixed tick and dispatches only the new delta
// range through the same pool -> parser -> writer path as a scrape. A
// failing poll for one log never affects the others; nothing is persisted
// in monitor mode.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{parse_batch, parse_worker_count, truncate, Runner};
use crate::certificates::LeafParser;
use crate::cli::Args;
use crate::ct_logs::types::EntryBatch;
use crate::ct_logs::{CtClient, WorkerPool};
use crate::error::CtError;
use crate::output::Writer;
use crate::shutdown::Shutdown;
use crate::Result;

impl Runner {
    pub(super) async fn monitor(&self, shutdown: &Shutdown) -> Result<()> {
        let domains = self.collect_domains();
        let log_urls = self.resolve_log_urls(shutdown).await?;
        if log_urls.is_empty() {
            return Err(CtError::config(
                "no CT logs to monitor - use -u <url> to specify a log or omit to auto-discover",
            ));
        }

        let writer = Arc::new(Writer::new(
            self.args.output.as_deref(),
            self.args.output_mode(),
        )?);
        let parser = Arc::new(LeafParser::new(&domains));

        if !domains.is_empty() {
            info!("monitoring for domains: {}", domains.join(", "));
        }

        let timeout = Duration::from_secs(self.args.timeout);
        let retries = self.args.retries;

        // Record the starting tree size of every reachable log, in parallel.
        let mut init = JoinSet::new();
        for log_url in log_urls {
            let shutdown = shutdown.clone();
            init.spawn(async move {
                let client = match CtClient::new(&log_url, timeout, retries) {
                    Ok(client) => Arc::new(client),
                    Err(e) => {
                        warn!("skipping {}: {}", log_url, e);
                        return None;
                    }
                };
                match client.get_sth(&shutdown).await {
                    Ok(sth) => {
                        debug!(
                            "[{}] starting at tree size {}",
                            truncate(&log_url, 50),
                            sth.tree_size
                        );
                        Some((log_url, client, sth.tree_size))
                    }
                    Err(e) => {
                        warn!("skipping {}: {}", log_url, e);
                        None
                    }
                }
            });
        }

        let mut clients: HashMap<String, Arc<CtClient>> = HashMap::new();
        let tree_sizes: Arc<Mutex<HashMap<String, u64>>> = Arc::new(Mutex::new(HashMap::new()));
        while let Some(joined) = init.join_next().await {
            if let Ok(Some((log_url, client, size))) = joined {
                clients.insert(log_url.clone(), client);
                tree_sizes
                    .lock()
                    .expect("tree size map poisoned")
                    .insert(log_url, size);
            }
        }

        if clients.is_empty() {
            return Err(CtError::Other(
                "could not connect to any CT logs".to_string(),
            ));
        }

        info!(
            "connected to {} log(s), polling every {}s (Ctrl+C to stop)",
            clients.len(),
            self.args.poll_interval
        );

        let clients = Arc::new(clients);
        let poll_sem = Arc::new(Semaphore::new(self.args.workers as usize));

        let mut ticker = interval(Duration::from_secs(self.args.poll_interval));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        self.poll_logs(shutdown, &clients, &tree_sizes, &poll_sem, &parser, &writer)
            .await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    self.poll_logs(shutdown, &clients, &tree_sizes, &poll_sem, &parser, &writer)
                        .await;
                }
            }
        }

        writer.close()?;
        info!("monitor stopped - {} unique results written", writer.stats());
        Ok(())
    }

    async fn poll_logs(
        &self,
        shutdown: &Shutdown,
        clients: &Arc<HashMap<String, Arc<CtClient>>>,
        tree_sizes: &Arc<Mutex<HashMap<String, u64>>>,
        poll_sem: &Arc<Semaphore>,
        parser: &Arc<LeafParser>,
        writer: &Arc<Writer>,
    ) {
        if shutdown.is_cancelled() {
            return;
        }

        // Snapshot under lock; in-flight completions update the live map
        // without shifting this poll's baseline.
        let snapshot: Vec<(String, u64)> = {
            let sizes = tree_sizes.lock().expect("tree size map poisoned");
            sizes.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };

        let mut tasks = JoinSet::new();
        for (log_url, prev_size) in snapshot {
            let Some(client) = clients.get(&log_url).cloned() else {
                continue;
            };
            let Ok(permit) = Arc::clone(poll_sem).acquire_owned().await else {
                return;
            };
            let args = self.args.clone();
            let shutdown = shutdown.clone();
            let parser = Arc::clone(parser);
            let writer = Arc::clone(writer);
            let tree_sizes = Arc::clone(tree_sizes);

            tasks.spawn(async move {
                let _permit = permit;
                let sth = match client.get_sth(&shutdown).await {
                    Ok(sth) => sth,
                    Err(e) => {
                        debug!("poll error for {}: {}", log_url, e);
                        return;
                    }
                };
                if sth.tree_size <= prev_size {
                    return;
                }

                info!(
                    "[{}] {} new entries (tree {} -> {})",
                    truncate(&log_url, 40),
                    sth.tree_size - prev_size,
                    prev_size,
                    sth.tree_size
                );

                fetch_and_process(
                    &args,
                    client,
                    &log_url,
                    prev_size,
                    sth.tree_size,
                    &parser,
                    &writer,
                    &shutdown,
                )
                .await;
                if let Err(e) = writer.flush() {
                    debug!("flush error for {}: {}", log_url, e);
                }
                tree_sizes
                    .lock()
                    .expect("tree size map poisoned")
                    .insert(log_url, sth.tree_size);
            });
        }
        while tasks.join_next().await.is_some() {}
    }
}

#[allow(clippy::too_many_arguments)]
async fn fetch_and_process(
    args: &Args,
    client: Arc<CtClient>,
    log_url: &str,
    start: u64,
    end: u64,
    parser: &Arc<LeafParser>,
    writer: &Arc<Writer>,
    shutdown: &Shutdown,
) {
    let pool = WorkerPool::new(
        client,
        args.batch_size,
        args.workers as usize,
        args.rate_limit,
    );
    let (tx, mut rx) = mpsc::channel::<EntryBatch>(args.workers as usize * 2);

    let fetch_task = tokio::spawn(Arc::clone(&pool).fetch_range(shutdown.clone(), start, end, tx));

    let parse_sem = Arc::new(Semaphore::new(parse_worker_count(args)));
    let processed = Arc::new(AtomicU64::new(0));

    while let Some(batch) = rx.recv().await {
        parse_batch(batch, parser, writer, log_url, &parse_sem, &processed).await;
    }

    match fetch_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            if !e.is_cancelled() {
                debug!("fetch error for {}: {}", log_url, e);
            }
        }
        Err(e) => debug!("fetch task for {} failed: {}", log_url, e),
    }
}
