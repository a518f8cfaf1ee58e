//! Hosts and DOI prefixes that refused service during a run.
//!
//! Once a landing page comes back as a challenge (or a transfer is answered
//! with 403), every further request to that host only trips the protection
//! again. [`Postponement`] remembers the host and, for DOIs, the registrant
//! prefix, so the remaining identifiers are reported without any traffic.
//! It is shared by every worker through the [`Fetcher`](super::Fetcher).

use dashmap::DashSet;
use tracing::{info, warn};

/// Leading labels that name a service of a publisher rather than a distinct
/// site, e.g. `link.aps.org` and `aps.org` are the same publisher.
const SERVICE_SUBDOMAINS: &[&str] = &["link", "www", "pubs", "onlinelibrary"];

/// Domains and DOI prefixes to skip for the rest of a run.
#[derive(Debug, Default)]
pub struct Postponement {
    domains: DashSet<String>,
    doi_prefixes: DashSet<String>,
}

impl Postponement {
    /// Starts with known-bad domains and DOI prefixes (e.g. from a previous run).
    #[must_use]
    pub fn seeded<D, P>(domains: D, doi_prefixes: P) -> Self
    where
        D: IntoIterator<Item = String>,
        P: IntoIterator<Item = String>,
    {
        let this = Self::default();
        for domain in domains {
            this.domains.insert(normalize_domain(&domain));
        }
        for prefix in doi_prefixes {
            this.doi_prefixes.insert(prefix.trim().to_string());
        }
        this
    }

    /// Why a request for `doi` / `host` should be skipped, if it should.
    ///
    /// The DOI prefix is checked first as it is the more specific match.
    #[must_use]
    pub fn check(&self, doi: Option<&str>, host: Option<&str>) -> Option<String> {
        if let Some(prefix) = doi.and_then(doi_prefix)
            && self.doi_prefixes.contains(prefix)
        {
            return Some(format!("DOI prefix '{prefix}' refused service earlier in this run"));
        }
        let host = host?;
        self.domains
            .iter()
            .find(|blocked| domains_match(host, blocked.as_str()))
            .map(|blocked| {
                format!(
                    "domain '{host}' matches '{}', which refused service earlier in this run",
                    blocked.key()
                )
            })
    }

    /// Records that `hosts` (and `doi`'s prefix) refused service.
    pub fn mark(&self, doi: Option<&str>, hosts: &[&str]) {
        for host in hosts {
            if self.domains.insert(normalize_domain(host)) {
                warn!(domain = %host, "domain refused service, postponing its remaining identifiers");
            }
        }
        if let Some(prefix) = doi.and_then(doi_prefix)
            && self.doi_prefixes.insert(prefix.to_string())
        {
            warn!(doi_prefix = %prefix, "DOI prefix refused service, postponing its remaining identifiers");
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty() && self.doi_prefixes.is_empty()
    }

    /// Sorted postponed domains.
    #[must_use]
    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.domains.iter().map(|d| d.key().clone()).collect();
        domains.sort();
        domains
    }

    /// Sorted postponed DOI prefixes.
    #[must_use]
    pub fn doi_prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = self.doi_prefixes.iter().map(|p| p.key().clone()).collect();
        prefixes.sort();
        prefixes
    }

    pub(crate) fn log_summary(&self) {
        if !self.is_empty() {
            info!(
                domains = ?self.domains(),
                doi_prefixes = ?self.doi_prefixes(),
                "postponed during this run"
            );
        }
    }
}

/// The registrant part of a DOI: `10.1103` for `10.1103/PhysRev.4.1`.
#[must_use]
pub fn doi_prefix(doi: &str) -> Option<&str> {
    let prefix = doi.split('/').next()?.trim();
    (prefix.starts_with("10.") && prefix.len() > 3).then_some(prefix)
}

/// Lowercases, strips `www.` and a leading service label (`link.`, `pubs.`...).
#[must_use]
pub fn normalize_domain(domain: &str) -> String {
    let domain = domain.trim().to_ascii_lowercase();
    let domain = domain.strip_prefix("www.").unwrap_or(&domain).to_string();
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() >= 3 && SERVICE_SUBDOMAINS.contains(&labels[0]) {
        return labels[1..].join(".");
    }
    domain
}

/// Same site after normalization, or one is a subdomain of the other.
#[must_use]
pub fn domains_match(a: &str, b: &str) -> bool {
    let (a, b) = (a.to_ascii_lowercase(), b.to_ascii_lowercase());
    let (norm_a, norm_b) = (normalize_domain(&a), normalize_domain(&b));
    norm_a == norm_b || a.ends_with(&format!(".{norm_b}")) || b.ends_with(&format!(".{norm_a}"))
}
