//! Durable per-identifier outcome records.
//!
//! [`MetadataStore`] keeps one [`MetadataRecord`] per identifier in a single
//! JSON document. Every update rewrites the document through a temp file and
//! rename, so a crash mid-batch leaves either the old or the new state and a
//! rerun picks up where it stopped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::fetcher::{DownloadResult, DownloadStatus};

/// Errors reading or writing the metadata document.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("IO error on metadata file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("metadata file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl MetadataError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The persisted projection of the latest result for an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
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
    pub cloudflare_detected: bool,
}

/// JSON-backed record store with a single writer.
#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, MetadataRecord>>,
}

impl MetadataStore {
    /// Opens the store at `path`, loading existing records if the file exists.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError`] if the file exists but cannot be read or parsed.
    #[instrument(fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self, MetadataError> {
        let records = match tokio::fs::read(path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| MetadataError::Json {
                path: path.to_path_buf(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(MetadataError::io(path, e)),
        };
        debug!(records = records.len(), "metadata loaded");
        Ok(Self {
            path: path.to_path_buf(),
            records: Mutex::new(records),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, identifier: &str) -> Option<MetadataRecord> {
        self.records.lock().await.get(identifier).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Folds `result` into the identifier's record and flushes to disk.
    ///
    /// `first_attempted` is kept from the existing record; `last_successful`
    /// and `pdf_path` only change on success (or, for the path, when the file
    /// was found already on disk).
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError`] if the document cannot be written.
    #[instrument(skip(self, result), fields(identifier = %result.identifier, status = %result.status))]
    pub async fn update(&self, result: &DownloadResult) -> Result<MetadataRecord, MetadataError> {
        let mut records = self.records.lock().await;
        let previous = records.get(&result.identifier);

        let record = MetadataRecord {
            identifier: result.identifier.clone(),
            sanitized_filename: result.sanitized_filename.clone(),
            landing_url: result.landing_url.clone(),
            pdf_url: result.pdf_url.clone(),
            publisher: result.publisher.clone(),
            status: result.status,
            error_reason: result.error_reason.clone(),
            pdf_path: if result.status.has_pdf() {
                result.pdf_path.clone()
            } else {
                previous.and_then(|p| p.pdf_path.clone())
            },
            first_attempted: previous.map_or(result.first_attempted, |p| p.first_attempted),
            last_attempted: result.last_attempted,
            last_successful: if result.status == DownloadStatus::Success {
                result.last_successful.or(Some(result.last_attempted))
            } else {
                previous.and_then(|p| p.last_successful)
            },
            cloudflare_detected: result.is_cloudflare_challenge(),
        };
        let replaced = records.insert(record.identifier.clone(), record.clone());
        if let Err(error) = self.flush(&records).await {
            // Memory must keep matching what is on disk.
            match replaced {
                Some(old) => records.insert(old.identifier.clone(), old),
                None => records.remove(&record.identifier),
            };
            return Err(error);
        }
        Ok(record)
    }

    async fn flush(&self, records: &BTreeMap<String, MetadataRecord>) -> Result<(), MetadataError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MetadataError::io(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(records).map_err(|source| MetadataError::Json {
            path: self.path.clone(),
            source,
        })?;

        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| MetadataError::io(&tmp, e))?;
        file.write_all(&json)
            .await
            .map_err(|e| MetadataError::io(&tmp, e))?;
        file.sync_all().await.map_err(|e| MetadataError::io(&tmp, e))?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| MetadataError::io(&self.path, e))
    }
}
