// Certificate Transparency log access
//
// RFC 6962 client, wire types, and the adaptive fetch pool that harvests
// entry batches from a log's index range.

pub mod client;
pub mod pool;
pub mod sources;
pub mod types;

pub use client::CtClient;
pub use pool::WorkerPool;
pub use sources::{LogListFetcher, LogWithOperator};
pub use types::{EntryBatch, RawEntry, Sth};
