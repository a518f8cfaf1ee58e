//! Publisher detection and target-domain prediction.
//!
//! [`detect`] maps a landing-page URL to a [`Publisher`] tag so that link
//! discovery can try a publisher-specific construction first. It is an
//! optimization only; every publisher also goes through the generic
//! strategies.
//!
//! [`predict_domain`] guesses which host an identifier will end up on *before*
//! any network traffic, so batches can be partitioned per domain.

use std::fmt;

use crate::identifier::{Identifier, IdentifierKind};
use crate::resolver::utils::{canonical_host, host_of};

/// Known publisher families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Publisher {
    Elsevier,
    Springer,
    Nature,
    Wiley,
    Arxiv,
    Ieee,
    Plos,
    Acs,
}

/// Host markers per publisher, checked in order. A host matches when it
/// contains any of the markers.
const PUBLISHER_DOMAINS: &[(Publisher, &[&str])] = &[
    (Publisher::Elsevier, &["sciencedirect.com", "elsevier.com"]),
    (
        Publisher::Springer,
        &["springer.com", "link.springer.com", "springerlink.com"],
    ),
    (Publisher::Nature, &["nature.com", "springernature.com"]),
    (Publisher::Wiley, &["wiley.com", "onlinelibrary.wiley.com"]),
    (Publisher::Arxiv, &["arxiv.org"]),
    (Publisher::Ieee, &["ieee.org", "ieeexplore.ieee.org"]),
    (Publisher::Plos, &["plos.org", "journals.plos.org"]),
    (Publisher::Acs, &["acs.org", "pubs.acs.org"]),
];

/// DOI registrant prefix to the host that usually serves its landing pages.
const DOI_PREFIX_DOMAINS: &[(&str, &str)] = &[
    ("10.1016", "sciencedirect.com"),
    ("10.1038", "nature.com"),
    ("10.1371", "plos.org"),
    ("10.1126", "science.org"),
    ("10.2138", "pubs.geoscienceworld.org"),
    ("10.1007", "link.springer.com"),
    ("10.1111", "onlinelibrary.wiley.com"),
    ("10.1002", "onlinelibrary.wiley.com"),
    ("10.1093", "academic.oup.com"),
    ("10.1103", "link.aps.org"),
    ("10.1021", "pubs.acs.org"),
    ("10.1109", "ieeexplore.ieee.org"),
    ("10.48550", "arxiv.org"),
];

/// Group for DOIs whose registrant is not in the prefix table.
pub const UNKNOWN_DOI_DOMAIN: &str = "doi.org";

/// Group for inputs that cannot be classified at all.
pub const UNKNOWN_DOMAIN: &str = "unknown";

impl Publisher {
    /// Returns the stable lowercase tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Elsevier => "elsevier",
            Self::Springer => "springer",
            Self::Nature => "nature",
            Self::Wiley => "wiley",
            Self::Arxiv => "arxiv",
            Self::Ieee => "ieee",
            Self::Plos => "plos",
            Self::Acs => "acs",
        }
    }
}

impl fmt::Display for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a URL's host to a publisher tag.
#[must_use]
pub fn detect(url: &str) -> Option<Publisher> {
    let host = host_of(url)?;
    PUBLISHER_DOMAINS
        .iter()
        .find(|(_, markers)| markers.iter().any(|marker| host.contains(marker)))
        .map(|(publisher, _)| *publisher)
}

/// Predicts the host an identifier will be served from.
///
/// Resource URLs use their own host. DOIs use the registrant prefix table and
/// fall back to [`UNKNOWN_DOI_DOMAIN`]. Unparseable input maps to
/// [`UNKNOWN_DOMAIN`].
#[must_use]
pub fn predict_domain(raw: &str) -> String {
    let Ok(identifier) = Identifier::parse(raw) else {
        return UNKNOWN_DOMAIN.to_string();
    };

    match (identifier.kind(), identifier.doi()) {
        (IdentifierKind::ResourceUrl, _) => {
            host_of(identifier.navigation_url())
                .map_or_else(|| UNKNOWN_DOMAIN.to_string(), |host| canonical_host(&host))
        }
        (_, Some(doi)) => domain_for_doi(doi).to_string(),
        (_, None) => {
            host_of(identifier.navigation_url()).unwrap_or_else(|| UNKNOWN_DOI_DOMAIN.to_string())
        }
    }
}

fn domain_for_doi(doi: &str) -> &'static str {
    let prefix = doi.split('/').next().unwrap_or(doi);
    DOI_PREFIX_DOMAINS
        .iter()
        .find(|(known, _)| *known == prefix)
        .map_or(UNKNOWN_DOI_DOMAIN, |(_, domain)| *domain)
}
