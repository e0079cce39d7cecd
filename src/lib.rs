//! ctrecon speaks RFC 6962 directly to Certificate Transparency log
//! servers to enumerate TLS certificates and extract identifiers (DNS
//! names, IP addresses, e-mail addresses) matching a domain filter, for
//! passive subdomain and certificate reconnaissance.

pub mod certificates;
pub mod cli;
pub mod ct_logs;
pub mod error;
pub mod output;
pub mod scanner;
pub mod shutdown;
pub mod updater;

// Re-export commonly used types
pub use crate::cli::Args;
pub use crate::error::CtError;
pub use crate::scanner::Runner;
pub use crate::shutdown::Shutdown;

/// Result type for ctrecon operations
pub type Result<T> = std::result::Result<T, CtError>;
