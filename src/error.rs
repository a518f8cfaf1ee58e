//! The per-identifier failure taxonomy.
//!
//! Every stage of the pipeline reports its failure as a [`FetchError`]; the
//! fetcher converts it into a `DownloadResult` at the identifier boundary, so
//! these never escape a `download` call.

use thiserror::Error;

use crate::challenge::ChallengeKind;
use crate::download::DownloadError;
use crate::fetcher::DownloadStatus;
use crate::identifier::InvalidIdentifier;
use crate::metadata::MetadataError;
use crate::resolver::ResolveError;

/// Why a single identifier did not produce a PDF.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Malformed input; never retried.
    #[error(transparent)]
    InvalidIdentifier(#[from] InvalidIdentifier),

    /// The DOI could not be turned into a landing URL.
    #[error(transparent)]
    Resolution(#[from] ResolveError),

    /// An anti-bot interstitial blocked the landing page.
    #[error("{kind} challenge detected - resource URL: {url}, publisher: {publisher}")]
    ChallengeDetected {
        kind: ChallengeKind,
        url: String,
        publisher: String,
    },

    /// The host or DOI prefix already refused service earlier in this run.
    #[error("postponed: {reason}")]
    Postponed { reason: String },

    /// The landing page asks for payment or institutional access.
    #[error("paywall detected at {url}")]
    PaywallDetected { url: String },

    /// Every link discovery strategy came up empty.
    #[error("no PDF link found on {url}")]
    PdfNotFound { url: String },

    /// Transfer or validation failed.
    #[error("download failed: {0}")]
    DownloadFailure(#[source] DownloadError),

    /// Timeouts and connection errors on the HTTP path.
    #[error("network error: {0}")]
    Network(#[source] DownloadError),

    /// The browser could not be launched or driven.
    #[error("browser error: {0}")]
    Browser(String),

    /// Metadata persistence failed.
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

impl FetchError {
    /// Creates a `ChallengeDetected` error; a missing publisher reads "unknown".
    #[must_use]
    pub fn challenge(kind: ChallengeKind, url: &str, publisher: Option<&str>) -> Self {
        Self::ChallengeDetected {
            kind,
            url: url.to_string(),
            publisher: publisher.unwrap_or("unknown").to_string(),
        }
    }

    /// Splits transport errors into `Network` (timeouts, connection) and
    /// `DownloadFailure` (everything else).
    #[must_use]
    pub fn from_download(error: DownloadError) -> Self {
        if error.is_network() {
            Self::Network(error)
        } else {
            Self::DownloadFailure(error)
        }
    }

    /// Whether the host refused service outright (a challenge page or HTTP
    /// 403), so further requests to it in this run are pointless.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        match self {
            Self::ChallengeDetected { .. } => true,
            Self::DownloadFailure(error) | Self::Network(error) => error.status() == Some(403),
            _ => false,
        }
    }

    /// The result status this error maps to.
    #[must_use]
    pub fn status(&self) -> DownloadStatus {
        match self {
            Self::InvalidIdentifier(_) | Self::Resolution(_) => DownloadStatus::InvalidIdentifier,
            Self::PaywallDetected { .. } => DownloadStatus::Paywall,
            Self::PdfNotFound { .. } => DownloadStatus::PdfNotFound,
            Self::Network(_) => DownloadStatus::NetworkError,
            Self::ChallengeDetected { .. }
            | Self::Postponed { .. }
            | Self::DownloadFailure(_)
            | Self::Browser(_)
            | Self::Metadata(_) => DownloadStatus::Failure,
        }
    }
}
