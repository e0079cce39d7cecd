// Wire types for the RFC 6962 get-sth / get-entries endpoints

use serde::{Deserialize, Serialize};

/// Signed Tree Head as returned by `get-sth`.
///
/// Only `tree_size` is consumed by the scraper; the root hash and signature
/// pass through opaquely (no STH signature verification, this is a
/// reconnaissance tool, not an auditor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sth {
    pub tree_size: u64,
    pub timestamp: u64,
    #[serde(default)]
    pub sha256_root_hash: String,
    #[serde(default)]
    pub tree_head_signature: String,
}

/// One entry as returned by `get-entries`, base64 payloads untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEntry {
    pub leaf_input: String,
    #[serde(default)]
    pub extra_data: String,
}

/// `get-entries` response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetEntriesResponse {
    pub entries: Vec<RawEntry>,
}

/// A run of consecutive entries fetched from one log.
///
/// `entries[i]` corresponds to log index `start_index + i`. Batches are not
/// ordered across workers; `start_index` is authoritative for indexing.
#[derive(Debug, Clone)]
pub struct EntryBatch {
    pub start_index: u64,
    pub entries: Vec<RawEntry>,
}
