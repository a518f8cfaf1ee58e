//! Error types for the download module.
//!
//! These are transport-level failures of a single transfer attempt. The
//! fetcher folds them into a `DownloadResult`; they never escape a batch.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while transferring a PDF.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response whose body was not a PDF.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429 responses).
        retry_after: Option<String>,
    },

    /// File system error during download (create file, write, rename, etc.)
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The transfer completed but the body does not start with `%PDF`.
    #[error("response from {url} is not a PDF")]
    NotPdf {
        /// The URL whose body failed validation.
        url: String,
    },

    /// Browser-driven download failed.
    #[error("browser download of {url} failed: {message}")]
    Browser {
        /// The URL the browser was sent to.
        url: String,
        /// What went wrong.
        message: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error, mapping timeouts to [`DownloadError::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::Timeout { url: url.into() };
        }
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a failed-signature error.
    pub fn not_pdf(url: impl Into<String>) -> Self {
        Self::NotPdf { url: url.into() }
    }

    /// Creates a browser download error.
    pub fn browser(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Browser {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Returns the HTTP status for [`DownloadError::HttpStatus`].
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for connection-level failures (no usable response at all).
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_download_error_timeout_display() {
        let error = DownloadError::timeout("https://example.com/file.pdf");
        assert!(error.to_string().contains("timeout"));
        assert!(error.to_string().contains("https://example.com/file.pdf"));
        assert!(error.is_network());
    }

    #[test]
    fn test_download_error_http_status_display() {
        let error = DownloadError::http_status("https://example.com/file.pdf", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(msg.contains("https://example.com/file.pdf"), "Expected URL in: {msg}");
        assert_eq!(error.status(), Some(404));
        assert!(!error.is_network());
    }

    #[test]
    fn test_download_error_not_pdf_display() {
        let error = DownloadError::not_pdf("https://example.com/landing");
        assert_eq!(
            error.to_string(),
            "response from https://example.com/landing is not a PDF"
        );
    }

    #[test]
    fn test_download_error_io_has_source() {
        use std::error::Error as _;
        let error = DownloadError::io(
            "/tmp/x.pdf",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(error.to_string().contains("/tmp/x.pdf"));
        assert!(error.source().is_some());
    }

    #[test]
    fn test_download_error_browser_display() {
        let error = DownloadError::browser("https://a.org/x.pdf", "no file appeared");
        assert!(error.to_string().contains("no file appeared"));
    }
}
