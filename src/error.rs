// Error types for ctrecon
//
// Structured error types using thiserror so callers can match on failure
// classes (configuration, network, protocol, cancellation) instead of
// string-typed errors.

use std::io;
use thiserror::Error;

/// Main error type for ctrecon operations
#[derive(Debug, Error)]
pub enum CtError {
    /// Invalid flag combinations or out-of-range values. Fatal at startup.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// Non-2xx response from a log or directory server. Retryable: CT logs
    /// do not reliably distinguish transient from terminal via status codes.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Transport-level failure from the HTTP client
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// All retry attempts for one request were consumed
    #[error("all {attempts} attempts exhausted: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<CtError>,
    },

    /// Response body could not be decoded as the expected shape
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Leaf shorter than the fixed MerkleTreeLeaf header
    #[error("malformed leaf: {message}")]
    MalformedLeaf { message: String },

    /// A length prefix pointed past the end of the leaf
    #[error("truncated leaf: {message}")]
    TruncatedLeaf { message: String },

    /// Leaf entry type other than x509_entry (0) or precert_entry (1)
    #[error("unknown entry type: {0}")]
    UnknownEntryType(u16),

    /// The shutdown token fired; propagated unchanged
    #[error("operation cancelled")]
    Cancelled,

    /// Generic I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl CtError {
    pub fn protocol(message: impl Into<String>) -> Self {
        CtError::Protocol {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        CtError::Config {
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CtError::Cancelled)
    }
}
