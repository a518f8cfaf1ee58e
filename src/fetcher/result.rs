//! Per-identifier outcomes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal status of one download attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Success,
    Failure,
    Paywall,
    AlreadyExists,
    PdfNotFound,
    NetworkError,
    InvalidIdentifier,
}

impl DownloadStatus {
    /// Every status, in display order.
    pub const ALL: [Self; 7] = [
        Self::Success,
        Self::AlreadyExists,
        Self::Failure,
        Self::NetworkError,
        Self::PdfNotFound,
        Self::Paywall,
        Self::InvalidIdentifier,
    ];

    /// Returns the persisted string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Paywall => "paywall",
            Self::AlreadyExists => "already_exists",
            Self::PdfNotFound => "pdf_not_found",
            Self::NetworkError => "network_error",
            Self::InvalidIdentifier => "invalid_identifier",
        }
    }

    /// Whether the outcome left a PDF on disk.
    #[must_use]
    pub fn has_pdf(self) -> bool {
        matches!(self, Self::Success | Self::AlreadyExists)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown download status: {s}"))
    }
}

/// The outcome of one `download` call.
///
/// `pdf_path` is set exactly when `status` is `success` or `already_exists`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResult {
    pub identifier: String,
    pub sanitized_filename: String,
    pub landing_url: Option<String>,
    pub pdf_url: Option<String>,
    pub publisher: Option<String>,
    pub status: DownloadStatus,
    pub error_reason: Option<String>,
    pub pdf_path: Option<PathBuf>,
    pub first_attempted: DateTime<Utc>,
    pub last_attempted: DateTime<Utc>,
    pub last_successful: Option<DateTime<Utc>>,
}

impl DownloadResult {
    /// Starts a result for `identifier`; every field but the name is empty.
    #[must_use]
    pub fn begin(identifier: &str, sanitized_filename: &str) -> Self {
        let now = Utc::now();
        Self {
            identifier: identifier.to_string(),
            sanitized_filename: sanitized_filename.to_string(),
            landing_url: None,
            pdf_url: None,
            publisher: None,
            status: DownloadStatus::Failure,
            error_reason: None,
            pdf_path: None,
            first_attempted: now,
            last_attempted: now,
            last_successful: None,
        }
    }

    /// Marks a fresh download into `path`.
    #[must_use]
    pub fn succeeded(mut self, path: &Path) -> Self {
        let now = Utc::now();
        self.status = DownloadStatus::Success;
        self.error_reason = None;
        self.pdf_path = Some(path.to_path_buf());
        self.last_attempted = now;
        self.last_successful = Some(now);
        self
    }

    /// Marks a PDF that was already on disk.
    #[must_use]
    pub fn already_exists(mut self, path: &Path) -> Self {
        self.status = DownloadStatus::AlreadyExists;
        self.error_reason = None;
        self.pdf_path = Some(path.to_path_buf());
        self.last_attempted = Utc::now();
        self
    }

    /// Marks a failed attempt.
    #[must_use]
    pub fn failed(mut self, status: DownloadStatus, reason: impl Into<String>) -> Self {
        debug_assert!(!status.has_pdf());
        self.status = status;
        self.error_reason = Some(reason.into());
        self.pdf_path = None;
        self.last_attempted = Utc::now();
        self
    }

    /// True when the failure was an anti-bot challenge (Cloudflare or captcha).
    #[must_use]
    pub fn is_challenge(&self) -> bool {
        self.reason_lowercase()
            .is_some_and(|reason| reason.contains("challenge detected"))
    }

    #[must_use]
    pub fn is_cloudflare_challenge(&self) -> bool {
        self.reason_lowercase()
            .is_some_and(|reason| reason.starts_with("cloudflare challenge"))
    }

    /// True when the identifier was skipped because its host or DOI prefix
    /// had already refused service in this run.
    #[must_use]
    pub fn is_postponed(&self) -> bool {
        self.reason_lowercase()
            .is_some_and(|reason| reason.starts_with("postponed:"))
    }

    /// Transient failures worth a second attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.status, DownloadStatus::Failure | DownloadStatus::NetworkError)
            && !self.is_challenge()
            && !self.is_postponed()
    }

    fn reason_lowercase(&self) -> Option<String> {
        self.error_reason.as_deref().map(str::to_lowercase)
    }
}
