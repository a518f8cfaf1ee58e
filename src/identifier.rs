//! Identifier classification and filename derivation.
//!
//! Every input accepted by the fetcher is one of three kinds:
//!
//! - a bare DOI (`10.1234/example`)
//! - a DOI-resolver URL (`https://doi.org/10.1234/example`)
//! - any other `http(s)` resource URL
//!
//! [`Identifier::parse`] classifies the raw string and derives the DOI (when
//! one is known) and the URL used for the first network hop.
//! [`Identifier::sanitized_filename`] maps the identifier to a stable file name
//! so that repeated runs land on the same file.
//!
//! # Example
//!
//! ```
//! use pdf_fetcher::identifier::{Identifier, IdentifierKind};
//!
//! let id = Identifier::parse("10.1234/example.").unwrap();
//! assert_eq!(id.kind(), IdentifierKind::Doi);
//! assert_eq!(id.doi(), Some("10.1234/example"));
//! assert_eq!(id.navigation_url(), "https://doi.org/10.1234/example");
//! assert_eq!(id.sanitized_filename(), "10.1234_example.pdf");
//! ```

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::resolver::utils::compile_static_regex;

/// DOI embedded in a resolver URL.
static DOI_IN_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"doi\.org/(10\.[^/\s?#]+/[^\s?#]+|10\.[^/\s?#]+)"));

const DOI_LEADING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', '(', '['];
const DOI_TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '/'];

/// Number of hex characters of the URL digest used for hashed filenames.
const URL_HASH_HEX_LEN: usize = 16;

/// The raw input was not a DOI or an `http(s)` URL.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid identifier '{input}': expected a DOI (10.xxxx/...) or an http(s) URL")]
pub struct InvalidIdentifier {
    /// The offending input, trimmed.
    pub input: String,
}

/// Classification of a normalized identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    /// Bare DOI string.
    Doi,
    /// `https://doi.org/...` style URL.
    DoiUrl,
    /// Any other web resource.
    ResourceUrl,
}

impl IdentifierKind {
    /// Returns the stable lowercase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Doi => "doi",
            Self::DoiUrl => "doi_url",
            Self::ResourceUrl => "resource_url",
        }
    }

    /// Whether the identifier goes through DOI resolution before landing.
    #[must_use]
    pub fn needs_resolution(self) -> bool {
        matches!(self, Self::Doi | Self::DoiUrl)
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified identifier. The original input is kept verbatim as the
/// metadata key; everything else is derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    raw: String,
    kind: IdentifierKind,
    doi: Option<String>,
    navigation_url: String,
}

impl Identifier {
    /// Classifies and cleans `raw`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidIdentifier`] when the trimmed input starts with neither
    /// `10.` nor `http`.
    pub fn parse(raw: &str) -> Result<Self, InvalidIdentifier> {
        let (kind, doi, navigation_url) = normalize(raw)?;
        Ok(Self {
            raw: raw.to_string(),
            kind,
            doi,
            navigation_url,
        })
    }

    /// The input exactly as supplied.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn kind(&self) -> IdentifierKind {
        self.kind
    }

    /// Cleaned DOI, when one is known.
    #[must_use]
    pub fn doi(&self) -> Option<&str> {
        self.doi.as_deref()
    }

    /// URL used for the first network hop.
    #[must_use]
    pub fn navigation_url(&self) -> &str {
        &self.navigation_url
    }

    /// Deterministic output file name (including the `.pdf` suffix).
    #[must_use]
    pub fn sanitized_filename(&self) -> String {
        let stem = match &self.doi {
            Some(doi) => sanitize_for_filename(doi),
            None => url_hash(&self.navigation_url),
        };
        format!("{stem}.pdf")
    }
}

/// Classifies `raw` into `(kind, doi, navigation_url)`.
///
/// # Errors
///
/// Returns [`InvalidIdentifier`] for inputs that are neither DOIs nor URLs.
pub fn normalize(raw: &str) -> Result<(IdentifierKind, Option<String>, String), InvalidIdentifier> {
    let input = raw.trim();

    if input.starts_with("10.") {
        let doi = clean_doi(input);
        let url = format!("https://doi.org/{doi}");
        return Ok((IdentifierKind::Doi, Some(doi), url));
    }

    if input.starts_with("http") {
        if input.contains("doi.org/") {
            let doi = DOI_IN_URL_RE
                .captures(input)
                .and_then(|caps| caps.get(1))
                .map(|m| clean_doi(m.as_str()))
                .filter(|doi| !doi.is_empty());
            return Ok((IdentifierKind::DoiUrl, doi, input.to_string()));
        }
        return Ok((IdentifierKind::ResourceUrl, None, input.to_string()));
    }

    Err(InvalidIdentifier {
        input: input.to_string(),
    })
}

/// Strips surrounding punctuation picked up from prose or citation lists.
#[must_use]
pub fn clean_doi(doi: &str) -> String {
    doi.trim()
        .trim_end_matches(DOI_TRAILING_PUNCTUATION)
        .trim_start_matches(DOI_LEADING_PUNCTUATION)
        .to_string()
}

/// Replaces path separators and characters that are invalid on common
/// filesystems with `_`.
#[must_use]
pub fn sanitize_for_filename(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c if c.is_ascii_control() => '_',
            c => c,
        })
        .collect()
}

fn url_hash(url: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(url.as_bytes()));
    digest[..URL_HASH_HEX_LEN].to_string()
}
