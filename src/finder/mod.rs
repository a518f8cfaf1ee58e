//! PDF link discovery on a rendered landing page.
//!
//! [`PdfLinkFinder`] runs an ordered list of [`LinkStrategy`] implementations
//! and returns the first candidate URL. The default order is:
//!
//! 1. [`PublisherConstruction`] - build the URL from the landing URL for
//!    publishers with a known scheme (ScienceDirect PII).
//! 2. [`DirectLinkScan`] - anchors pointing at `.pdf`, `/pdf/`, `/pdfft`.
//! 3. [`ButtonClick`] - "Download PDF"-style buttons; data attributes first,
//!    then a real click while watching for new tabs and navigations.
//! 4. [`InlinePdf`] - the browser is already showing a PDF.
//! 5. [`SourceScan`] - regex over the raw page source.
//!
//! Strategies only read the page except for [`ButtonClick`], which drives the
//! browser and returns it to the landing page afterwards.

mod strategies;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::browser::{BrowserSession, PageSnapshot};
use crate::publisher::Publisher;

pub use strategies::{
    ButtonClick, DirectLinkScan, ElsevierPii, InlinePdf, PublisherConstruction, PublisherPdfRule,
    SourceScan, DEFAULT_SCIENCEDIRECT_BASE,
};

/// A rendered landing page plus what is known about it.
#[derive(Debug, Clone)]
pub struct LandingPage {
    pub snapshot: PageSnapshot,
    pub publisher: Option<Publisher>,
}

impl LandingPage {
    #[must_use]
    pub fn url(&self) -> &str {
        &self.snapshot.url
    }
}

/// One discovery heuristic.
#[async_trait]
pub trait LinkStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Returns a candidate PDF URL, or `None` to defer to the next strategy.
    async fn find(&self, page: &LandingPage, browser: &mut dyn BrowserSession) -> Option<String>;
}

/// A discovered link and the strategy that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundLink {
    pub url: String,
    pub strategy: &'static str,
}

/// Ordered strategy runner.
pub struct PdfLinkFinder {
    strategies: Vec<Box<dyn LinkStrategy>>,
}

impl std::fmt::Debug for PdfLinkFinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.strategies.iter().map(|s| s.name()).collect();
        f.debug_struct("PdfLinkFinder")
            .field("strategies", &names)
            .finish()
    }
}

impl Default for PdfLinkFinder {
    fn default() -> Self {
        Self::with_sciencedirect_base(DEFAULT_SCIENCEDIRECT_BASE)
    }
}

impl PdfLinkFinder {
    /// Default strategies, with ScienceDirect URLs built against `base` (for testing with wiremock).
    #[must_use]
    pub fn with_sciencedirect_base(base: &str) -> Self {
        let pii = ElsevierPii::with_base_url(base);
        Self::with_strategies(vec![
            Box::new(PublisherConstruction::new(vec![Box::new(pii.clone())])),
            Box::new(DirectLinkScan),
            Box::new(ButtonClick::default()),
            Box::new(InlinePdf),
            Box::new(SourceScan::new(pii)),
        ])
    }

    /// Custom strategy order.
    #[must_use]
    pub fn with_strategies(strategies: Vec<Box<dyn LinkStrategy>>) -> Self {
        Self { strategies }
    }

    /// Runs strategies in order; first hit wins.
    #[instrument(skip_all, fields(landing = %page.url(), publisher = ?page.publisher))]
    pub async fn find_pdf_url(
        &self,
        page: &LandingPage,
        browser: &mut dyn BrowserSession,
    ) -> Option<FoundLink> {
        for strategy in &self.strategies {
            if let Some(url) = strategy.find(page, browser).await {
                debug!(strategy = strategy.name(), %url, "found PDF link");
                return Some(FoundLink {
                    url,
                    strategy: strategy.name(),
                });
            }
            debug!(strategy = strategy.name(), "no PDF link");
        }
        None
    }
}

/// Heuristic for "this URL serves a PDF".
///
/// Rejects bare homepages (`https://host/`) and accepts URLs ending in `.pdf`,
/// containing `.pdf?`, `/pdf`, or `/pdfft`.
#[must_use]
pub fn is_valid_pdf_url(url: &str) -> bool {
    let url = url.to_lowercase();
    if url.ends_with('/') && url.matches('/').count() <= 4 {
        return false;
    }
    url.ends_with(".pdf")
        || url.contains(".pdf?")
        || url.contains("/pdf")
        || (url.contains("sciencedirect.com") && url.contains("/pii/") && url.contains("/pdfft"))
}
