// Certificate extraction from CT log leaves
//
// Decodes RFC 6962 MerkleTreeLeaf envelopes, parses the embedded X.509
// certificate (or precert TBS), and applies the caller's domain filter.

pub mod matcher;
pub mod parser;

pub use matcher::DomainFilter;
pub use parser::{CertResult, LeafParser};
