// Result output
//
// Deduplicated streaming of scrape results to stdout (optionally teed to a
// file), with terminal-escape sanitization of certificate-controlled
// strings.

pub mod sanitize;
pub mod writer;

pub use sanitize::sanitize;
pub use writer::{OutputMode, Writer};
