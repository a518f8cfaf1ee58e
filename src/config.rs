//! Fetcher configuration.
//!
//! Every field has a default, so a JSON config file only needs the keys it
//! changes. Command-line flags are applied on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::download::DEFAULT_MAX_RETRIES;
use crate::download::constants::{
    CONNECT_TIMEOUT_SECS, DOWNLOAD_TIMEOUT_SECS, RESOLVE_TIMEOUT_SECS,
};
use crate::user_agent::BROWSER_USER_AGENT;

/// Configuration loading or validation failed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config value for `{field}`: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Knobs for a fetcher and its batch runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Where PDFs are written.
    pub pdf_dir: PathBuf,
    /// JSON metadata document.
    pub metadata_path: PathBuf,
    /// Optional SQLite attempt log.
    pub history_db: Option<PathBuf>,
    pub headless: bool,
    /// Per-domain request rate.
    pub requests_per_second: f64,
    /// Extra random delay range, in seconds, added when the limiter holds a request.
    pub jitter_secs: (f64, f64),
    /// Transport-level attempts per HTTP transfer.
    pub max_retries: u32,
    pub delay_between_requests_secs: f64,
    pub delay_between_batches_secs: f64,
    pub max_workers: usize,
    pub user_agent: String,
    /// Root for per-worker browser download directories.
    pub browser_download_dir: PathBuf,
    pub resolve_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub download_poll_timeout_secs: u64,
    pub download_poll_interval_ms: u64,
    /// Pause after loading a landing page so JS redirects can finish.
    pub landing_settle_ms: u64,
    pub challenge_wait_secs: u64,
    /// Enables the Crossref lookup when set.
    pub crossref_mailto: Option<String>,
    /// Run the sequential retry pass after a batch.
    pub retry_failures: bool,
    /// Hosts known to refuse service; their identifiers are skipped.
    pub postponed_domains: Vec<String>,
    /// DOI registrant prefixes (`10.1021`) known to refuse service.
    pub postponed_doi_prefixes: Vec<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            pdf_dir: PathBuf::from("./pdfs"),
            metadata_path: PathBuf::from("./pdfs/metadata.json"),
            history_db: None,
            headless: true,
            requests_per_second: 1.0,
            jitter_secs: (0.5, 1.5),
            max_retries: DEFAULT_MAX_RETRIES,
            delay_between_requests_secs: 2.0,
            delay_between_batches_secs: 10.0,
            max_workers: 5,
            user_agent: BROWSER_USER_AGENT.to_string(),
            browser_download_dir: std::env::temp_dir().join("pdf-fetcher-downloads"),
            resolve_timeout_secs: RESOLVE_TIMEOUT_SECS,
            download_timeout_secs: DOWNLOAD_TIMEOUT_SECS,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            download_poll_timeout_secs: 30,
            download_poll_interval_ms: 500,
            landing_settle_ms: 2000,
            challenge_wait_secs: 30,
            crossref_mailto: None,
            retry_failures: true,
            postponed_domains: Vec::new(),
            postponed_doi_prefixes: Vec::new(),
        }
    }
}

impl FetcherConfig {
    /// Reads a JSON config file; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings no run could succeed with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.requests_per_second.is_finite() && self.requests_per_second > 0.0) {
            return Err(ConfigError::invalid(
                "requests_per_second",
                format!("{}. Expected a positive number", self.requests_per_second),
            ));
        }
        let (low, high) = self.jitter_secs;
        if !(low.is_finite() && high.is_finite() && low >= 0.0 && low <= high) {
            return Err(ConfigError::invalid(
                "jitter_secs",
                format!("({low}, {high}). Expected 0 <= low <= high"),
            ));
        }
        if !(1..=64).contains(&self.max_workers) {
            return Err(ConfigError::invalid(
                "max_workers",
                format!("{}. Expected range: 1..=64", self.max_workers),
            ));
        }
        for (field, value) in [
            ("delay_between_requests_secs", self.delay_between_requests_secs),
            ("delay_between_batches_secs", self.delay_between_batches_secs),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::invalid(field, format!("{value}. Expected >= 0")));
            }
        }
        for (field, value) in [
            ("resolve_timeout_secs", self.resolve_timeout_secs),
            ("download_timeout_secs", self.download_timeout_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("download_poll_timeout_secs", self.download_poll_timeout_secs),
            ("download_poll_interval_ms", self.download_poll_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "0. Expected a non-zero value"));
            }
        }
        if self.max_retries == 0 {
            return Err(ConfigError::invalid("max_retries", "0. Expected at least 1"));
        }
        Ok(())
    }

    /// Jitter as a duration range.
    #[must_use]
    pub fn jitter(&self) -> std::ops::RangeInclusive<Duration> {
        secs(self.jitter_secs.0)..=secs(self.jitter_secs.1)
    }

    #[must_use]
    pub fn delay_between_requests(&self) -> Duration {
        secs(self.delay_between_requests_secs)
    }

    #[must_use]
    pub fn delay_between_batches(&self) -> Duration {
        secs(self.delay_between_batches_secs)
    }

    #[must_use]
    pub fn landing_settle(&self) -> Duration {
        Duration::from_millis(self.landing_settle_ms)
    }

    #[must_use]
    pub fn download_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.download_poll_timeout_secs)
    }

    #[must_use]
    pub fn download_poll_interval(&self) -> Duration {
        Duration::from_millis(self.download_poll_interval_ms)
    }

    #[must_use]
    pub fn challenge_wait(&self) -> Duration {
        Duration::from_secs(self.challenge_wait_secs)
    }
}

/// Converts non-negative seconds; invalid values become zero.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FetcherConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_workers, 5);
        assert!((config.requests_per_second - 1.0).abs() < f64::EPSILON);
        assert_eq!(
            config.jitter(),
            Duration::from_millis(500)..=Duration::from_millis(1500)
        );
        assert!(config.retry_failures);
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"max_workers": 2, "pdf_dir": "/data/pdfs"}"#).unwrap();

        let config = FetcherConfig::load(&path).unwrap();
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.pdf_dir, PathBuf::from("/data/pdfs"));
        assert_eq!(config.download_timeout_secs, DOWNLOAD_TIMEOUT_SECS);
    }

    #[test]
    fn test_load_postponed_lists() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"postponed_domains": ["pubs.acs.org"], "postponed_doi_prefixes": ["10.1088"]}"#,
        )
        .unwrap();

        let config = FetcherConfig::load(&path).unwrap();
        assert_eq!(config.postponed_domains, ["pubs.acs.org"]);
        assert_eq!(config.postponed_doi_prefixes, ["10.1088"]);
        assert!(FetcherConfig::default().postponed_domains.is_empty());
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"max_workers": 0}"#).unwrap();
        let err = FetcherConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "max_workers", .. }));
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{").unwrap();
        assert!(matches!(
            FetcherConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            FetcherConfig::load(&dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_rate_and_jitter() {
        let config = FetcherConfig {
            requests_per_second: 0.0,
            ..FetcherConfig::default()
        };
        assert!(config.validate().is_err());

        let config = FetcherConfig {
            jitter_secs: (2.0, 1.0),
            ..FetcherConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let config = FetcherConfig {
            download_timeout_secs: 0,
            ..FetcherConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("download_timeout_secs"));
    }
}
