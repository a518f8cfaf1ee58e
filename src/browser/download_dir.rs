//! Watching a browser download directory for a finished PDF.
//!
//! Browsers write downloads under a temporary name (`.crdownload`, `.part`)
//! and rename on completion, and some servers send PDFs without an extension.
//! [`DownloadWatch`] snapshots the directory before a navigation and then
//! polls for a *new* file that is a PDF and has stopped growing.
//!
//! The snapshot records each entry's size and modification time, so a file
//! rewritten under an existing name counts as new, and a partial file left
//! behind by an abandoned download does not hold up later waits.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::download::signature::file_has_pdf_signature;

/// Suffixes of in-flight downloads.
const PARTIAL_SUFFIXES: &[&str] = &[".crdownload", ".part", ".tmp", ".download"];

/// Size and modification time of a directory entry.
type Stamp = (u64, SystemTime);

/// A baseline of the download directory taken before a download starts.
#[derive(Debug, Clone)]
pub struct DownloadWatch {
    dir: PathBuf,
    baseline: HashMap<OsString, Stamp>,
}

#[derive(Debug)]
struct Candidate {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

impl DownloadWatch {
    /// Records the files currently in `dir` (creating it if needed).
    ///
    /// # Errors
    ///
    /// Returns the IO error if the directory cannot be created or listed.
    pub async fn begin(dir: &Path) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let mut baseline = HashMap::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Ok(metadata) = entry.metadata().await {
                baseline.insert(entry.file_name(), stamp(&metadata));
            }
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            baseline,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Polls until a new, complete PDF appears or `timeout` elapses.
    ///
    /// A candidate is complete when no partial files are present and its size
    /// was unchanged since the previous poll. If several are complete, the most
    /// recently modified wins.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn wait(&self, timeout: Duration, interval: Duration) -> Option<PathBuf> {
        let deadline = Instant::now() + timeout;
        let mut last_sizes: HashMap<PathBuf, u64> = HashMap::new();

        loop {
            match self.scan().await {
                Ok(Scan::InProgress) => debug!("partial download present"),
                Ok(Scan::Candidates(candidates)) => {
                    let stable = candidates
                        .iter()
                        .filter(|c| c.size > 0 && last_sizes.get(&c.path) == Some(&c.size))
                        .max_by_key(|c| c.modified);
                    if let Some(found) = stable {
                        debug!(path = %found.path.display(), size = found.size, "download complete");
                        return Some(found.path.clone());
                    }
                    last_sizes = candidates.into_iter().map(|c| (c.path, c.size)).collect();
                }
                Err(error) => debug!(%error, "download directory scan failed"),
            }

            if Instant::now() >= deadline {
                debug!("no download appeared before timeout");
                return None;
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Deletes every file that appeared or changed since the baseline.
    ///
    /// Returns how many files were removed.
    ///
    /// # Errors
    ///
    /// Returns the IO error if the directory cannot be listed.
    pub async fn discard_new(&self) -> std::io::Result<usize> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() || self.in_baseline(&entry.file_name(), &metadata) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(error) => debug!(path = %entry.path().display(), %error, "could not remove download"),
            }
        }
        Ok(removed)
    }

    fn in_baseline(&self, name: &OsString, metadata: &std::fs::Metadata) -> bool {
        self.baseline.get(name) == Some(&stamp(metadata))
    }

    async fn scan(&self) -> std::io::Result<Scan> {
        let mut candidates = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            // Entries can vanish between listing and stat (a rename on completion).
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if self.in_baseline(&name, &metadata) {
                continue;
            }
            let lower = name.to_string_lossy().to_lowercase();
            if PARTIAL_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix)) {
                return Ok(Scan::InProgress);
            }
            if !metadata.is_file() {
                continue;
            }
            let path = entry.path();
            let is_pdf_name = lower.ends_with(".pdf");
            let extensionless = path.extension().is_none();
            if !is_pdf_name && !(extensionless && file_has_pdf_signature(&path).await) {
                continue;
            }
            candidates.push(Candidate {
                path,
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        Ok(Scan::Candidates(candidates))
    }
}

enum Scan {
    InProgress,
    Candidates(Vec<Candidate>),
}

fn stamp(metadata: &std::fs::Metadata) -> Stamp {
    (
        metadata.len(),
        metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FAST: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn test_ignores_files_present_before_watch() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("old.pdf"), b"%PDF-1.4").await.unwrap();
        let watch = DownloadWatch::begin(dir.path()).await.unwrap();
        assert_eq!(watch.wait(Duration::from_millis(100), FAST).await, None);
    }

    #[tokio::test]
    async fn test_finds_new_pdf() {
        let dir = TempDir::new().unwrap();
        let watch = DownloadWatch::begin(dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join("paper.pdf"), b"%PDF-1.4 body").await.unwrap();
        let found = watch.wait(Duration::from_secs(2), FAST).await.unwrap();
        assert_eq!(found.file_name().unwrap(), "paper.pdf");
    }

    #[tokio::test]
    async fn test_finds_extensionless_pdf_by_header() {
        let dir = TempDir::new().unwrap();
        let watch = DownloadWatch::begin(dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join("download"), b"%PDF-1.7").await.unwrap();
        tokio::fs::write(dir.path().join("notes"), b"hello").await.unwrap();
        let found = watch.wait(Duration::from_secs(2), FAST).await.unwrap();
        assert_eq!(found.file_name().unwrap(), "download");
    }

    #[tokio::test]
    async fn test_waits_while_partial_download_exists() {
        let dir = TempDir::new().unwrap();
        let watch = DownloadWatch::begin(dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join("paper.pdf"), b"%PDF-1.4").await.unwrap();
        tokio::fs::write(dir.path().join("other.pdf.crdownload"), b"%PD").await.unwrap();
        assert_eq!(watch.wait(Duration::from_millis(150), FAST).await, None);
    }

    #[tokio::test]
    async fn test_stale_partial_from_earlier_download_is_ignored() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("abandoned.pdf.crdownload"), b"%PD").await.unwrap();
        let watch = DownloadWatch::begin(dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join("paper.pdf"), b"%PDF-1.4 body").await.unwrap();
        let found = watch.wait(Duration::from_millis(500), FAST).await.unwrap();
        assert_eq!(found.file_name().unwrap(), "paper.pdf");
    }

    #[tokio::test]
    async fn test_overwritten_baseline_file_counts_as_new() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pdfft.pdf");
        tokio::fs::write(&path, b"%PDF-1.4 first").await.unwrap();
        let watch = DownloadWatch::begin(dir.path()).await.unwrap();
        tokio::fs::write(&path, b"%PDF-1.7 second download, longer").await.unwrap();
        let found = watch.wait(Duration::from_millis(500), FAST).await.unwrap();
        assert_eq!(found, path);
    }

    #[tokio::test]
    async fn test_discard_new_keeps_baseline_files() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("kept.pdf"), b"%PDF-1.4").await.unwrap();
        let watch = DownloadWatch::begin(dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join("fresh.pdf"), b"%PDF-1.4").await.unwrap();
        tokio::fs::write(dir.path().join("fresh.pdf.part"), b"%P").await.unwrap();

        assert_eq!(watch.discard_new().await.unwrap(), 2);
        let mut left: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        left.sort();
        assert_eq!(left, ["kept.pdf"]);
    }

    #[tokio::test]
    async fn test_ignores_non_pdf_extension() {
        let dir = TempDir::new().unwrap();
        let watch = DownloadWatch::begin(dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join("page.html"), b"%PDF").await.unwrap();
        assert_eq!(watch.wait(Duration::from_millis(100), FAST).await, None);
    }

    #[tokio::test]
    async fn test_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let watch = DownloadWatch::begin(&nested).await.unwrap();
        assert!(watch.dir().is_dir());
    }
}
