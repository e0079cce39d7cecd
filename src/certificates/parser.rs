// MerkleTreeLeaf decoding and X.509 identifier extraction
//
// Parses the RFC 6962 leaf envelope:
//   Version(1) | LeafType(1) | Timestamp(8, BE ms) | EntryType(2) | body
// where the body is a 24-bit length-prefixed DER certificate (x509_entry)
// or a 32-byte issuer key hash followed by a length-prefixed TBS
// (precert_entry).

use std::collections::BTreeSet;
use std::net::IpAddr;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use x509_parser::prelude::*;

use crate::certificates::matcher::DomainFilter;
use crate::ct_logs::types::RawEntry;
use crate::error::CtError;
use crate::Result;

/// Fixed leaf header: version(1) + leaf_type(1) + timestamp(8) + entry_type(2)
const LEAF_HEADER_LEN: usize = 12;
const ISSUER_KEY_HASH_LEN: usize = 32;

/// The public record built from one logged certificate.
#[derive(Debug, Clone, Serialize)]
pub struct CertResult {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub domains: Vec<String>,
    pub ips: Vec<String>,
    pub emails: Vec<String>,
    pub common_name: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub is_precert: bool,
    pub log_url: String,
    pub serial: String,
}

/// Identifier fields pulled out of one parsed certificate
struct ExtractedCert {
    domains: Vec<String>,
    ips: Vec<String>,
    emails: Vec<String>,
    common_name: String,
    issuer: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    serial: String,
}

pub struct LeafParser {
    filter: DomainFilter,
}

impl LeafParser {
    pub fn new(domains: &[String]) -> Self {
        Self {
            filter: DomainFilter::new(domains),
        }
    }

    pub fn filter(&self) -> &DomainFilter {
        &self.filter
    }

    /// Parse one raw entry into an optional result.
    ///
    /// `Ok(None)` means filtered out, an unparseable certificate, or a
    /// certificate with no identifiers at all; a single bad certificate
    /// never aborts a batch (CT logs contain historical curiosities).
    /// Errors are reserved for leaves that violate the envelope format.
    pub fn parse_entry(
        &self,
        entry: &RawEntry,
        index: u64,
        log_url: &str,
    ) -> Result<Option<CertResult>> {
        let leaf = base64::engine::general_purpose::STANDARD
            .decode(&entry.leaf_input)
            .map_err(|e| CtError::protocol(format!("decoding leaf_input: {e}")))?;

        // Fast path: reject before any ASN.1 work when no filter string
        // occurs in the raw bytes.
        if !self.filter.is_empty() && !self.filter.matches_raw(&leaf) {
            return Ok(None);
        }

        let Some((cert, is_precert, timestamp)) = self.parse_merkle_tree_leaf(&leaf)? else {
            return Ok(None);
        };

        let result = CertResult {
            index,
            timestamp,
            domains: cert.domains,
            ips: cert.ips,
            emails: cert.emails,
            common_name: cert.common_name,
            issuer: cert.issuer,
            not_before: cert.not_before,
            not_after: cert.not_after,
            is_precert,
            log_url: log_url.to_string(),
            serial: cert.serial,
        };

        if result.common_name.is_empty()
            && result.domains.is_empty()
            && result.ips.is_empty()
            && result.emails.is_empty()
        {
            return Ok(None);
        }

        // The byte scan can match inside unrelated fields; only the
        // structured identifiers decide.
        if !self.filter.is_empty() && !self.filter.matches_result(&result) {
            return Ok(None);
        }

        Ok(Some(result))
    }

    fn parse_merkle_tree_leaf(
        &self,
        data: &[u8],
    ) -> Result<Option<(ExtractedCert, bool, DateTime<Utc>)>> {
        if data.len() < LEAF_HEADER_LEN {
            return Err(CtError::MalformedLeaf {
                message: format!("leaf data too short: {} bytes", data.len()),
            });
        }

        let timestamp_ms = u64::from_be_bytes([
            data[2], data[3], data[4], data[5], data[6], data[7], data[8], data[9],
        ]);
        let timestamp_ms = i64::try_from(timestamp_ms).map_err(|_| CtError::MalformedLeaf {
            message: format!("timestamp overflow: {timestamp_ms}"),
        })?;
        let timestamp = DateTime::from_timestamp_millis(timestamp_ms).unwrap_or_else(Utc::now);

        let entry_type = u16::from_be_bytes([data[10], data[11]]);
        let body = &data[LEAF_HEADER_LEN..];

        match entry_type {
            0 => Ok(self
                .parse_x509_entry(body)?
                .map(|cert| (cert, false, timestamp))),
            1 => Ok(self
                .parse_precert_entry(body)?
                .map(|cert| (cert, true, timestamp))),
            other => Err(CtError::UnknownEntryType(other)),
        }
    }

    fn parse_x509_entry(&self, body: &[u8]) -> Result<Option<ExtractedCert>> {
        let der = length_prefixed(body, "certificate")?;
        match X509Certificate::from_der(der) {
            Ok((_, cert)) => Ok(Some(extract(&cert.tbs_certificate))),
            Err(_) => Ok(None),
        }
    }

    fn parse_precert_entry(&self, body: &[u8]) -> Result<Option<ExtractedCert>> {
        if body.len() < ISSUER_KEY_HASH_LEN + 3 {
            return Err(CtError::TruncatedLeaf {
                message: format!("precert entry too short: {} bytes", body.len()),
            });
        }
        // skip issuer_key_hash (32 bytes)
        let tbs = length_prefixed(&body[ISSUER_KEY_HASH_LEN..], "TBS certificate")?;
        match TbsCertificate::from_der(tbs) {
            Ok((_, tbs)) => Ok(Some(extract(&tbs))),
            Err(_) => Ok(None),
        }
    }
}

/// Slice out a 24-bit big-endian length-prefixed payload.
fn length_prefixed<'a>(body: &'a [u8], what: &str) -> Result<&'a [u8]> {
    if body.len() < 3 {
        return Err(CtError::TruncatedLeaf {
            message: format!("{what} missing length prefix"),
        });
    }
    let len = ((body[0] as usize) << 16) | ((body[1] as usize) << 8) | (body[2] as usize);
    let payload = &body[3..];
    if payload.len() < len {
        return Err(CtError::TruncatedLeaf {
            message: format!("{what} needs {len} bytes, {} available", payload.len()),
        });
    }
    Ok(&payload[..len])
}

fn extract(tbs: &TbsCertificate) -> ExtractedCert {
    let common_name = tbs
        .subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or("")
        .to_string();

    let mut domains = BTreeSet::new();
    if !common_name.is_empty() {
        domains.insert(common_name.to_lowercase());
    }

    let mut ips = BTreeSet::new();
    let mut emails = BTreeSet::new();
    if let Ok(Some(san)) = tbs.subject_alternative_name() {
        for name in &san.value.general_names {
            match name {
                GeneralName::DNSName(dns) => {
                    domains.insert(dns.to_lowercase());
                }
                GeneralName::IPAddress(bytes) => {
                    if let Some(ip) = ip_from_bytes(bytes) {
                        ips.insert(ip.to_string());
                    }
                }
                GeneralName::RFC822Name(mail) => {
                    emails.insert(mail.to_lowercase());
                }
                _ => {}
            }
        }
    }

    let issuer = tbs
        .issuer
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
        .or_else(|| {
            tbs.issuer
                .iter_organization()
                .next()
                .and_then(|org| org.as_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_default();

    let not_before = DateTime::from_timestamp(tbs.validity.not_before.timestamp(), 0)
        .unwrap_or_else(Utc::now);
    let not_after =
        DateTime::from_timestamp(tbs.validity.not_after.timestamp(), 0).unwrap_or_else(Utc::now);

    ExtractedCert {
        domains: domains.into_iter().collect(),
        ips: ips.into_iter().collect(),
        emails: emails.into_iter().collect(),
        common_name,
        issuer,
        not_before,
        not_after,
        serial: tbs.serial.to_str_radix(16),
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        _ => None,
    }
}
