// Domain filter matching
//
// Two layers: a byte-level pre-filter over the raw leaf (DNS names appear
// verbatim as ASCII runs inside DER, so a non-match is a reliable reject)
// and a structured post-filter over the parsed identifiers that removes the
// pre-filter's false positives. A result is never emitted on the pre-filter
// alone.

use crate::certificates::parser::CertResult;

const PRIME_RK: u32 = 16_777_619;

#[derive(Debug, Clone, Default)]
pub struct DomainFilter {
    filters: Vec<String>,
    filter_bytes: Vec<Vec<u8>>,
}

impl DomainFilter {
    /// Normalizes each filter by lowercasing and trimming a single leading
    /// dot (".example.com" and "example.com" are the same filter).
    pub fn new(domains: &[String]) -> Self {
        let filters: Vec<String> = domains
            .iter()
            .map(|d| {
                let d = d.strip_prefix('.').unwrap_or(d);
                d.to_lowercase()
            })
            .collect();
        let filter_bytes = filters.iter().map(|f| f.as_bytes().to_vec()).collect();
        Self {
            filters,
            filter_bytes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    /// Fast-path scan of undecoded leaf bytes. May report false positives
    /// (the pattern can occur inside an unrelated field); never false
    /// negatives for ASCII DNS names.
    pub fn matches_raw(&self, data: &[u8]) -> bool {
        self.filter_bytes
            .iter()
            .any(|pattern| contains_fold_ascii(data, pattern))
    }

    /// Structured post-filter: some domain matches some filter, or an IP
    /// SAN equals a filter entry exactly. Any match wins.
    pub fn matches_result(&self, result: &CertResult) -> bool {
        for domain in &result.domains {
            if self.filters.iter().any(|f| matches_domain(domain, f)) {
                return true;
            }
        }
        for ip in &result.ips {
            if self.filters.iter().any(|f| ip == f) {
                return true;
            }
        }
        false
    }
}

/// Domain-to-filter match: exact, subdomain (`sub.filter`), or wildcard
/// (`*.base` where the base or a dotted suffix of it matches).
fn matches_domain(domain: &str, filter: &str) -> bool {
    if domain == filter {
        return true;
    }
    if has_dot_suffix(domain, filter) {
        return true;
    }
    if let Some(base) = domain.strip_prefix("*.") {
        if base == filter || has_dot_suffix(base, filter) {
            return true;
        }
    }
    false
}

fn has_dot_suffix(domain: &str, filter: &str) -> bool {
    domain
        .strip_suffix(filter)
        .is_some_and(|rest| rest.ends_with('.'))
}

/// Case-insensitive ASCII substring search via rolling-hash Rabin-Karp.
/// Linear worst-case cost: a megabyte leaf matched against a near-miss
/// pattern must not degrade to quadratic scanning.
pub(crate) fn contains_fold_ascii(data: &[u8], pattern: &[u8]) -> bool {
    let n = pattern.len();
    if n == 0 {
        return true;
    }
    if data.len() < n {
        return false;
    }

    let mut hash_pat: u32 = 0;
    let mut hash_data: u32 = 0;
    let mut pow: u32 = 1;
    for i in 0..n {
        pow = pow.wrapping_mul(PRIME_RK);
        hash_pat = hash_pat
            .wrapping_mul(PRIME_RK)
            .wrapping_add(fold(pattern[i]) as u32);
        hash_data = hash_data
            .wrapping_mul(PRIME_RK)
            .wrapping_add(fold(data[i]) as u32);
    }

    let limit = data.len() - n;
    for i in 0..=limit {
        if hash_data == hash_pat
            && data[i..i + n]
                .iter()
                .zip(pattern)
                .all(|(&d, &p)| fold(d) == fold(p))
        {
            return true;
        }
        if i < limit {
            hash_data = hash_data
                .wrapping_mul(PRIME_RK)
                .wrapping_add(fold(data[i + n]) as u32)
                .wrapping_sub(pow.wrapping_mul(fold(data[i]) as u32));
        }
    }
    false
}

#[inline]
fn fold(b: u8) -> u8 {
    if b.is_ascii_uppercase() {
        b + 0x20
    } else {
        b
    }
}
