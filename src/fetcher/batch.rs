//! Domain-partitioned batch downloads.
//!
//! Identifiers are grouped by the domain they are expected to land on and
//! every group is handled by exactly one worker, so no two workers ever hit
//! the same publisher at once. Each worker owns one lazily launched browser.
//!
//! Once a host answers with a challenge or a 403, the fetcher postpones it:
//! the rest of its group (and any DOI sharing the registrant prefix) is
//! reported as failed without further requests, and the retry pass skips it.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{DownloadResult, DownloadStatus, Fetcher, result_filename};
use crate::publisher::predict_domain;

/// Consecutive identifiers sharing a predicted domain.
#[derive(Debug)]
struct DomainGroup {
    domain: String,
    /// `(position in input, raw identifier)`
    items: Vec<(usize, String)>,
}

/// Counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub counts: BTreeMap<DownloadStatus, usize>,
    pub total: usize,
}

impl BatchSummary {
    #[must_use]
    pub fn from_results(results: &[DownloadResult]) -> Self {
        let mut counts = BTreeMap::new();
        for result in results {
            *counts.entry(result.status).or_insert(0) += 1;
        }
        Self {
            counts,
            total: results.len(),
        }
    }

    #[must_use]
    pub fn count(&self, status: DownloadStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    /// Identifiers that ended with a PDF on disk.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(DownloadStatus::Success) + self.count(DownloadStatus::AlreadyExists)
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} with PDF", self.succeeded(), self.total)?;
        for status in DownloadStatus::ALL {
            let count = self.count(status);
            if count > 0 {
                write!(f, ", {status}: {count}")?;
            }
        }
        Ok(())
    }
}

/// Results in input order plus their summary.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub results: Vec<DownloadResult>,
    pub summary: BatchSummary,
}

/// Runs many identifiers through a shared [`Fetcher`].
#[derive(Debug, Clone)]
pub struct BatchRunner {
    fetcher: Arc<Fetcher>,
}

impl BatchRunner {
    #[must_use]
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Downloads every identifier and returns one result per input, in input
    /// order.
    #[instrument(skip(self, identifiers), fields(total = identifiers.len()))]
    pub async fn run(&self, identifiers: &[String]) -> BatchReport {
        let mut slots: Vec<Option<DownloadResult>> = vec![None; identifiers.len()];

        // Invalid or already-downloaded inputs never need a worker.
        let mut pending = Vec::new();
        let mut offline = self.fetcher.new_browser();
        for (index, raw) in identifiers.iter().enumerate() {
            if self.fetcher.is_settled_offline(raw).await {
                slots[index] = Some(self.fetcher.download(raw, &mut offline).await);
            } else {
                pending.push((index, raw.clone()));
            }
        }
        offline.close().await;

        let groups = group_by_domain(pending);
        info!(
            groups = groups.len(),
            prefiltered = slots.iter().filter(|slot| slot.is_some()).count(),
            "batch planned"
        );
        for (index, result) in self.run_groups(groups).await {
            slots[index] = Some(result);
        }

        let mut results: Vec<DownloadResult> = slots
            .into_iter()
            .zip(identifiers)
            .map(|(slot, raw)| {
                slot.unwrap_or_else(|| {
                    DownloadResult::begin(raw, &result_filename(raw))
                        .failed(DownloadStatus::Failure, "worker terminated unexpectedly")
                })
            })
            .collect();

        if self.fetcher.config().retry_failures {
            self.retry_failures(&mut results).await;
        }
        self.fetcher.postponed().log_summary();

        let summary = BatchSummary::from_results(&results);
        info!(%summary, "batch finished");
        BatchReport { results, summary }
    }

    async fn run_groups(&self, groups: Vec<DomainGroup>) -> Vec<(usize, DownloadResult)> {
        if groups.is_empty() {
            return Vec::new();
        }
        let workers = self.fetcher.config().max_workers.min(groups.len());
        let queue = Arc::new(Mutex::new(groups.into_iter().collect::<VecDeque<_>>()));

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let fetcher = Arc::clone(&self.fetcher);
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                run_worker(worker, &fetcher, &queue).await
            }));
        }

        let mut collected = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(results) => collected.extend(results),
                Err(error) => warn!(%error, "batch worker failed"),
            }
        }
        collected
    }

    /// Retries transient failures one at a time with doubled pacing.
    /// Challenges and postponed identifiers are left alone.
    async fn retry_failures(&self, results: &mut [DownloadResult]) {
        let retryable: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, result)| result.is_retryable())
            .map(|(index, _)| index)
            .collect();
        if retryable.is_empty() {
            return;
        }

        let config = self.fetcher.config();
        info!(count = retryable.len(), "retrying failed identifiers");
        tokio::time::sleep(config.delay_between_batches() * 2).await;

        let mut browser = self.fetcher.new_browser();
        for (n, index) in retryable.into_iter().enumerate() {
            if n > 0 {
                tokio::time::sleep(config.delay_between_requests() * 2).await;
            }
            let raw = results[index].identifier.clone();
            results[index] = self.fetcher.download(&raw, &mut browser).await;
        }
        browser.close().await;
    }
}

/// Drains groups from the shared queue until it is empty.
async fn run_worker(
    worker: usize,
    fetcher: &Fetcher,
    queue: &Mutex<VecDeque<DomainGroup>>,
) -> Vec<(usize, DownloadResult)> {
    let mut browser = fetcher.new_browser();
    let mut results = Vec::new();
    loop {
        let Some(group) = queue.lock().await.pop_front() else {
            break;
        };
        debug!(worker, domain = %group.domain, items = group.items.len(), "worker took group");
        for (n, (index, raw)) in group.items.into_iter().enumerate() {
            if n > 0 {
                tokio::time::sleep(fetcher.config().delay_between_requests()).await;
            }
            results.push((index, fetcher.download(&raw, &mut browser).await));
        }
    }
    browser.close().await;
    results
}

/// Groups by predicted domain, keeping first-appearance order for both the
/// groups and the items inside them.
fn group_by_domain(items: Vec<(usize, String)>) -> Vec<DomainGroup> {
    let mut groups: Vec<DomainGroup> = Vec::new();
    let mut positions: BTreeMap<String, usize> = BTreeMap::new();
    for (index, raw) in items {
        let domain = predict_domain(&raw);
        let slot = *positions.entry(domain.clone()).or_insert_with(|| {
            groups.push(DomainGroup {
                domain,
                items: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].items.push((index, raw));
    }
    groups
}
