// Integration tests for the scrape pipeline against a local CT log server.
// Real HTTP end to end: axum serves get-sth/get-entries, the production
// client, pool, parser, and writer consume it.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use ctrecon::certificates::LeafParser;
use ctrecon::ct_logs::types::EntryBatch;
use ctrecon::ct_logs::{CtClient, WorkerPool};
use ctrecon::output::{OutputMode, Writer};
use ctrecon::CtError;
use ctrecon::Shutdown;

// Self-signed test certificate: CN=example.com, serial 0xabc123,
// SAN = DNS:example.com, DNS:www.example.com, IP:192.0.2.10,
// email:admin@example.com
const CERT_EXAMPLE: &str = "MIIBgjCCASegAwIBAgIEAKvBIzAKBggqhkjOPQQDAjAWMRQwEgYDVQQDDAtleGFtcGxlLmNvbTAeFw0yNjA4MDIwNjM3NTBaFw0zNjA3MzAwNjM3NTBaMBYxFDASBgNVBAMMC2V4YW1wbGUuY29tMFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEM9gdXbPnalQ/xr3Rg4A1GyoeS9yaXsMh0+/lD00Y4O0iTpuR8NcNNIHhHCT7QCYMzmCgu43M1brbDkSSeFcxYaNjMGEwQAYDVR0RBDkwN4ILZXhhbXBsZS5jb22CD3d3dy5leGFtcGxlLmNvbYcEwAACCoERYWRtaW5AZXhhbXBsZS5jb20wHQYDVR0OBBYEFD22HqFYA9hrfDro36KvOizswXkeMAoGCCqGSM49BAMCA0kAMEYCIQCiDq+c8QSy0eIvm5u2F4MisHQHASVP9cNPZT+OYWz+6wIhAL+PKGB/kwY2yNZTHwg1ZjbmQJo2DNohdT3HcQRctAVZ";

// CN carrying a terminal escape sequence: ESC ] 0 ; p w n BEL evil.example.com
const CERT_ESCAPED_CN: &str = "MIIBdDCCARqgAwIBAgICDlwwCgYIKoZIzj0EAwIwIzEhMB8GA1UEAwwYG10wO3B3bgdldmlsLmV4YW1wbGUuY29tMB4XDTI2MDgwMjA2Mzc1N1oXDTM2MDczMDA2Mzc1N1owIzEhMB8GA1UEAwwYG10wO3B3bgdldmlsLmV4YW1wbGUuY29tMFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAENG7xYx3XWM6xWCJreMVdE1kuLezOxpdRlDesmOVsuly+45AZqkUotRAZgCMk4WXr6YgL07cKoKqqn7fYWEJhrqM+MDwwGwYDVR0RBBQwEoIQZXZpbC5leGFtcGxlLmNvbTAdBgNVHQ4EFgQUIlNFSHZPt2Ha2huW6Of72Z4OyhcwCgYIKoZIzj0EAwIDSAAwRQIgXDcPZvm9dGc1yn5tQZ279ve/DYeCu8bgaBCjZ/GgnYECIQCEN/k4wVcZJ3daRtqt/XldoXtulOKTSCVT3lC4esmeFQ==";

// TBS of CERT_EXAMPLE (for precert entries)
const TBS_EXAMPLE: &str = "MIIBJ6ADAgECAgQAq8EjMAoGCCqGSM49BAMCMBYxFDASBgNVBAMMC2V4YW1wbGUuY29tMB4XDTI2MDgwMjA2Mzc1MFoXDTM2MDczMDA2Mzc1MFowFjEUMBIGA1UEAwwLZXhhbXBsZS5jb20wWTATBgcqhkjOPQIBBggqhkjOPQMBBwNCAAQz2B1ds+dqVD/GvdGDgDUbKh5L3JpewyHT7+UPTRjg7SJOm5Hw1w00geEcJPtAJgzOYKC7jczVutsORJJ4VzFho2MwYTBABgNVHREEOTA3ggtleGFtcGxlLmNvbYIPd3d3LmV4YW1wbGUuY29thwTAAAIKgRFhZG1pbkBleGFtcGxlLmNvbTAdBgNVHQ4EFgQUPbYeoVgD2Gt8Oujfoq86LOzBeR4=";

fn b64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn decode(b64: &str) -> Vec<u8> {
    base64::engine::general_purpose::STANDARD
        .decode(b64)
        .unwrap()
}

fn u24(len: usize) -> [u8; 3] {
    [(len >> 16) as u8, (len >> 8) as u8, len as u8]
}

fn x509_leaf(der: &[u8]) -> String {
    let mut leaf = vec![0u8, 0u8];
    leaf.extend_from_slice(&1_700_000_000_000u64.to_be_bytes());
    leaf.extend_from_slice(&0u16.to_be_bytes());
    leaf.extend_from_slice(&u24(der.len()));
    leaf.extend_from_slice(der);
    b64(&leaf)
}

fn precert_leaf(tbs: &[u8]) -> String {
    let mut leaf = vec![0u8, 0u8];
    leaf.extend_from_slice(&1_700_000_000_000u64.to_be_bytes());
    leaf.extend_from_slice(&1u16.to_be_bytes());
    leaf.extend_from_slice(&[0xAA; 32]);
    leaf.extend_from_slice(&u24(tbs.len()));
    leaf.extend_from_slice(tbs);
    b64(&leaf)
}

/// In-memory CT log served over real HTTP.
#[derive(Clone)]
struct MockLog {
    entries: Arc<Vec<String>>,
    /// Upper bound on entries returned per get-entries call (short reads)
    max_per_response: usize,
    /// Serve this many 503s before answering get-entries normally
    fail_first: Arc<AtomicU32>,
    entry_calls: Arc<AtomicU32>,
    /// Artificial delay before answering get-entries
    delay: Duration,
}

impl MockLog {
    fn new(entries: Vec<String>) -> Self {
        Self {
            entries: Arc::new(entries),
            max_per_response: usize::MAX,
            fail_first: Arc::new(AtomicU32::new(0)),
            entry_calls: Arc::new(AtomicU32::new(0)),
            delay: Duration::ZERO,
        }
    }
}

#[derive(Deserialize)]
struct RangeParams {
    start: u64,
    end: u64,
}

async fn get_sth(State(log): State<MockLog>) -> Json<serde_json::Value> {
    Json(json!({
        "tree_size": log.entries.len() as u64,
        "timestamp": 1_700_000_000_000u64,
        "sha256_root_hash": "",
        "tree_head_signature": "",
    }))
}

async fn get_entries(State(log): State<MockLog>, Query(params): Query<RangeParams>) -> Response {
    log.entry_calls.fetch_add(1, Ordering::SeqCst);

    if !log.delay.is_zero() {
        tokio::time::sleep(log.delay).await;
    }

    if log
        .fail_first
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let start = params.start as usize;
    if start >= log.entries.len() {
        return Json(json!({ "entries": [] })).into_response();
    }
    let end = (params.end as usize).min(log.entries.len() - 1);
    let take = (end - start + 1).min(log.max_per_response);

    let entries: Vec<_> = log.entries[start..start + take]
        .iter()
        .map(|leaf| json!({ "leaf_input": leaf, "extra_data": "" }))
        .collect();
    Json(json!({ "entries": entries })).into_response()
}

async fn serve(log: MockLog) -> String {
    let app = Router::new()
        .route("/ct/v1/get-sth", get(get_sth))
        .route("/ct/v1/get-entries", get(get_entries))
        .with_state(log);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

/// Drive the production pipeline (client -> pool -> parser -> writer) over
/// the whole mock log and return the pool for counter inspection.
async fn scrape_all(
    base_url: &str,
    domains: &[&str],
    mode: OutputMode,
    out_path: &Path,
    batch_size: u64,
    retries: u32,
) -> Arc<WorkerPool> {
    let shutdown = Shutdown::new();
    let client = Arc::new(CtClient::new(base_url, Duration::from_secs(5), retries).unwrap());
    let sth = client.get_sth(&shutdown).await.unwrap();

    let pool = WorkerPool::new(Arc::clone(&client), batch_size, 2, 0);
    let (tx, mut rx) = mpsc::channel::<EntryBatch>(4);
    let fetch = tokio::spawn(Arc::clone(&pool).fetch_range(
        shutdown.clone(),
        0,
        sth.tree_size,
        tx,
    ));

    let domains: Vec<String> = domains.iter().map(|d| d.to_string()).collect();
    let parser = LeafParser::new(&domains);
    let writer = Writer::new(Some(out_path), mode).unwrap();

    while let Some(batch) = rx.recv().await {
        for (i, entry) in batch.entries.iter().enumerate() {
            let idx = batch.start_index + i as u64;
            if let Ok(Some(result)) = parser.parse_entry(entry, idx, base_url) {
                writer.write_result(&result).unwrap();
            }
        }
    }
    writer.close().unwrap();

    fetch.await.unwrap().unwrap();
    pool
}

#[tokio::test]
async fn test_replay_small_range_deduplicates_domains() {
    let leaf = x509_leaf(&decode(CERT_EXAMPLE));
    let url = serve(MockLog::new(vec![leaf; 5])).await;

    let out = tempfile::NamedTempFile::new().unwrap();
    let pool = scrape_all(
        &url,
        &["example.com"],
        OutputMode::Domains,
        out.path(),
        10,
        0,
    )
    .await;

    let written = std::fs::read_to_string(out.path()).unwrap();
    assert_eq!(written, "example.com\nwww.example.com\n");
    assert_eq!(pool.dropped_entries(), 0);
}

#[tokio::test]
async fn test_short_reads_cover_whole_range_without_duplicates() {
    let leaf = x509_leaf(&decode(CERT_EXAMPLE));
    let mut log = MockLog::new(vec![leaf; 10]);
    log.max_per_response = 4;
    let calls = Arc::clone(&log.entry_calls);
    let url = serve(log).await;

    let shutdown = Shutdown::new();
    let client = Arc::new(CtClient::new(&url, Duration::from_secs(5), 0).unwrap());
    let pool = WorkerPool::new(client, 10, 1, 0);
    let (tx, mut rx) = mpsc::channel::<EntryBatch>(4);
    let fetch = tokio::spawn(Arc::clone(&pool).fetch_range(shutdown, 0, 10, tx));

    let mut seen = std::collections::BTreeSet::new();
    while let Some(batch) = rx.recv().await {
        for i in 0..batch.entries.len() as u64 {
            assert!(
                seen.insert(batch.start_index + i),
                "duplicate index {}",
                batch.start_index + i
            );
        }
    }
    fetch.await.unwrap().unwrap();

    let expected: std::collections::BTreeSet<u64> = (0..10).collect();
    assert_eq!(seen, expected);
    // 4 + 4 + 2 entries: the worker re-issued for the remainder.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(pool.dropped_entries(), 0);
}

#[tokio::test]
async fn test_retries_recover_from_transient_errors() {
    let leaf = x509_leaf(&decode(CERT_EXAMPLE));
    let log = MockLog::new(vec![leaf; 5]);
    log.fail_first.store(2, Ordering::SeqCst);
    let url = serve(log).await;

    let out = tempfile::NamedTempFile::new().unwrap();
    let pool = scrape_all(
        &url,
        &["example.com"],
        OutputMode::Domains,
        out.path(),
        10,
        3,
    )
    .await;

    assert_eq!(pool.dropped_entries(), 0);
    let written = std::fs::read_to_string(out.path()).unwrap();
    assert!(written.contains("example.com"));
}

#[tokio::test]
async fn test_exhausted_retries_count_dropped_entries() {
    let leaf = x509_leaf(&decode(CERT_EXAMPLE));
    let log = MockLog::new(vec![leaf; 5]);
    log.fail_first.store(10, Ordering::SeqCst);
    let url = serve(log).await;

    let shutdown = Shutdown::new();
    let client = Arc::new(CtClient::new(&url, Duration::from_secs(5), 1).unwrap());
    let pool = WorkerPool::new(client, 10, 1, 0);
    let (tx, mut rx) = mpsc::channel::<EntryBatch>(4);
    let fetch = tokio::spawn(Arc::clone(&pool).fetch_range(shutdown, 0, 5, tx));

    assert!(rx.recv().await.is_none(), "no batch should be emitted");
    fetch.await.unwrap().unwrap();
    assert_eq!(pool.dropped_entries(), 5);
}

#[tokio::test]
async fn test_precert_flows_through_pipeline() {
    let leaf = precert_leaf(&decode(TBS_EXAMPLE));
    let url = serve(MockLog::new(vec![leaf])).await;

    let out = tempfile::NamedTempFile::new().unwrap();
    scrape_all(&url, &[], OutputMode::Json, out.path(), 10, 0).await;

    let written = std::fs::read_to_string(out.path()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(written.trim()).unwrap();
    assert_eq!(parsed["is_precert"], true);
    assert_eq!(parsed["cn"], "example.com");
    assert_eq!(parsed["serial"], "abc123");
    assert_eq!(parsed["index"], 0);
}

#[tokio::test]
async fn test_escaped_cn_is_sanitized_in_output() {
    let leaf = x509_leaf(&decode(CERT_ESCAPED_CN));
    let url = serve(MockLog::new(vec![leaf])).await;

    let out = tempfile::NamedTempFile::new().unwrap();
    scrape_all(
        &url,
        &["example.com"],
        OutputMode::Domains,
        out.path(),
        10,
        0,
    )
    .await;

    let written = std::fs::read_to_string(out.path()).unwrap();
    assert!(written.contains("evil.example.com\n"));
    assert!(
        !written.contains('\x1b') && !written.contains('\x07'),
        "escape bytes leaked into output: {written:?}"
    );
}

#[tokio::test]
async fn test_empty_get_entries_response_terminates() {
    // tree_size claims 10 but the log hands out nothing; the worker must
    // treat the item as complete instead of looping forever.
    let mut log = MockLog::new(vec![x509_leaf(&decode(CERT_EXAMPLE)); 10]);
    log.max_per_response = 0;
    let url = serve(log).await;

    let shutdown = Shutdown::new();
    let client = Arc::new(CtClient::new(&url, Duration::from_secs(5), 0).unwrap());
    let pool = WorkerPool::new(client, 10, 1, 0);
    let (tx, mut rx) = mpsc::channel::<EntryBatch>(4);

    let fetch = tokio::spawn(Arc::clone(&pool).fetch_range(shutdown, 0, 10, tx));
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while rx.recv().await.is_some() {}
    })
    .await;
    assert!(drained.is_ok(), "pool hung on empty responses");
    fetch.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cancellation_unwinds_fetch() {
    let mut log = MockLog::new(vec![x509_leaf(&decode(CERT_EXAMPLE)); 1000]);
    log.delay = Duration::from_secs(30);
    let url = serve(log).await;

    let shutdown = Shutdown::new();
    let client = Arc::new(CtClient::new(&url, Duration::from_secs(60), 0).unwrap());
    let pool = WorkerPool::new(client, 10, 4, 0);
    let (tx, mut rx) = mpsc::channel::<EntryBatch>(8);

    let fetch = tokio::spawn(Arc::clone(&pool).fetch_range(
        shutdown.clone(),
        0,
        1000,
        tx,
    ));

    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), fetch)
        .await
        .expect("pool did not unwind after cancellation")
        .unwrap();
    assert!(matches!(result, Err(CtError::Cancelled)));

    // Channel must be closed so parse loops terminate.
    let drained = tokio::time::timeout(Duration::from_secs(1), async {
        while rx.recv().await.is_some() {}
    })
    .await;
    assert!(drained.is_ok());
}

#[tokio::test]
async fn test_rate_limited_fetch_completes() {
    let leaf = x509_leaf(&decode(CERT_EXAMPLE));
    let url = serve(MockLog::new(vec![leaf; 6])).await;

    let shutdown = Shutdown::new();
    let client = Arc::new(CtClient::new(&url, Duration::from_secs(5), 0).unwrap());
    // 2 entries per request at 100 req/s: the limiter must not stall the run.
    let pool = WorkerPool::new(client, 2, 1, 100);
    let (tx, mut rx) = mpsc::channel::<EntryBatch>(4);
    let fetch = tokio::spawn(Arc::clone(&pool).fetch_range(shutdown, 0, 6, tx));

    let mut total = 0;
    while let Some(batch) = rx.recv().await {
        total += batch.entries.len();
    }
    fetch.await.unwrap().unwrap();
    assert_eq!(total, 6);
}

#[tokio::test]
async fn test_zero_tree_size_is_a_noop() {
    let url = serve(MockLog::new(vec![])).await;

    let shutdown = Shutdown::new();
    let client = Arc::new(CtClient::new(&url, Duration::from_secs(5), 0).unwrap());
    let sth = client.get_sth(&shutdown).await.unwrap();
    assert_eq!(sth.tree_size, 0);

    let pool = WorkerPool::new(client, 10, 1, 0);
    let (tx, mut rx) = mpsc::channel::<EntryBatch>(4);
    Arc::clone(&pool)
        .fetch_range(shutdown, 0, sth.tree_size, tx)
        .await
        .unwrap();
    assert!(rx.recv().await.is_none());
    assert_eq!(pool.dropped_entries(), 0);
}
