// Deduplicating result writer
//
// A mutex-guarded writer serializing records to stdout, optionally teed to
// a file. Every record passes a keyed dedup table capped at one million
// entries; on overflow new keys stop being inserted, so late duplicates may
// re-print but nothing is silently dropped.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

use crate::certificates::parser::CertResult;
use crate::output::sanitize::sanitize;
use crate::Result;

/// Dedup table bound; past this, keys are no longer inserted and duplicate
/// lines may appear again.
const MAX_DEDUP_KEYS: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Domains,
    Ips,
    Emails,
    Certs,
    All,
    Json,
}

pub struct Writer {
    mode: OutputMode,
    inner: Mutex<Inner>,
}

struct Inner {
    out: BufWriter<Box<dyn Write + Send>>,
    seen: HashSet<String>,
    closed: bool,
}

/// Mirrors every write to a file and stdout, like `tee`.
struct TeeWriter {
    file: File,
    stdout: io::Stdout,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        self.stdout.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.stdout.flush()
    }
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    domains: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ips: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    emails: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    cn: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    issuer: String,
    not_before: String,
    not_after: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    serial: String,
    is_precert: bool,
    log_url: &'a str,
    index: u64,
}

impl Writer {
    pub fn new(output_path: Option<&Path>, mode: OutputMode) -> Result<Self> {
        let sink: Box<dyn Write + Send> = match output_path {
            Some(path) => Box::new(TeeWriter {
                file: File::create(path)?,
                stdout: io::stdout(),
            }),
            None => Box::new(io::stdout()),
        };
        Ok(Self::from_sink(sink, mode))
    }

    fn from_sink(sink: Box<dyn Write + Send>, mode: OutputMode) -> Self {
        Self {
            mode,
            inner: Mutex::new(Inner {
                out: BufWriter::new(sink),
                seen: HashSet::new(),
                closed: false,
            }),
        }
    }

    pub fn write_result(&self, result: &CertResult) -> Result<()> {
        let mut inner = self.inner.lock().expect("writer mutex poisoned");
        match self.mode {
            OutputMode::Domains => inner.write_unique("d:", &result.domains, true)?,
            OutputMode::Ips => inner.write_unique("i:", &result.ips, false)?,
            OutputMode::Emails => inner.write_unique("e:", &result.emails, true)?,
            OutputMode::Certs => inner.write_cert_line(result)?,
            OutputMode::All => {
                inner.write_unique("d:", &result.domains, true)?;
                inner.write_unique("i:", &result.ips, false)?;
                inner.write_unique("e:", &result.emails, true)?;
            }
            OutputMode::Json => inner.write_json(result)?,
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("writer mutex poisoned");
        inner.out.flush()?;
        Ok(())
    }

    /// Flush and mark closed. Safe to call more than once and in any order
    /// with respect to `flush`.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("writer mutex poisoned");
        if inner.closed {
            return Ok(());
        }
        inner.out.flush()?;
        inner.closed = true;
        Ok(())
    }

    /// Number of unique keys written so far.
    pub fn stats(&self) -> usize {
        let inner = self.inner.lock().expect("writer mutex poisoned");
        inner.seen.len()
    }
}

impl Inner {
    /// True when the line keyed by `key` should be written now. Inserts the
    /// key unless the table hit its cap.
    fn should_write(&mut self, key: &str) -> bool {
        if self.seen.contains(key) {
            return false;
        }
        if self.seen.len() >= MAX_DEDUP_KEYS {
            return true;
        }
        self.seen.insert(key.to_string());
        true
    }

    fn write_unique(&mut self, prefix: &str, items: &[String], sanitized: bool) -> Result<()> {
        for item in items {
            let key = format!("{prefix}{item}");
            if !self.should_write(&key) {
                continue;
            }
            if sanitized {
                writeln!(self.out, "{}", sanitize(item))?;
            } else {
                writeln!(self.out, "{item}")?;
            }
        }
        Ok(())
    }

    fn write_cert_line(&mut self, result: &CertResult) -> Result<()> {
        let key = format!("c:{}:{}", result.log_url, result.index);
        if !self.should_write(&key) {
            return Ok(());
        }
        writeln!(
            self.out,
            "[{}] {} issuer={} domains={}",
            result.not_after.format("%Y-%m-%d"),
            sanitize(&result.common_name),
            sanitize(&result.issuer),
            sanitize(&result.domains.join(","))
        )?;
        Ok(())
    }

    fn write_json(&mut self, result: &CertResult) -> Result<()> {
        let id = if result.serial.is_empty() {
            format!("idx:{}", result.index)
        } else {
            result.serial.clone()
        };
        let key = format!("j:{}:{}", id, result.log_url);
        if !self.should_write(&key) {
            return Ok(());
        }

        let record = JsonRecord {
            domains: result.domains.iter().map(|d| sanitize(d)).collect(),
            ips: result.ips.clone(),
            emails: result.emails.iter().map(|e| sanitize(e)).collect(),
            cn: sanitize(&result.common_name),
            issuer: sanitize(&result.issuer),
            not_before: result.not_before.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            not_after: result.not_after.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            serial: result.serial.clone(),
            is_precert: result.is_precert,
            log_url: &result.log_url,
            index: result.index,
        };

        let line = serde_json::to_string(&record)?;
        writeln!(self.out, "{line}")?;
        Ok(())
    }
}
