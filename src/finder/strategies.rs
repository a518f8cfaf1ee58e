//! The built-in link discovery strategies.

use std::fmt::Debug;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::Html;
use scraper::Selector;
use tracing::debug;

use super::{LandingPage, LinkStrategy, is_valid_pdf_url};
use crate::browser::BrowserSession;
use crate::browser::http::parse_static_selector;
use crate::publisher::Publisher;
use crate::resolver::utils::{compile_static_regex, join_url};

/// Production ScienceDirect origin.
pub const DEFAULT_SCIENCEDIRECT_BASE: &str = "https://www.sciencedirect.com";

/// Matches ScienceDirect PII paths, including `/abs/` and `/am/` variants.
static PII_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?i)/(?:science/article/(?:abs/|am/)?pii|pii)/([A-Z0-9]{8,32})")
});

/// Absolute URLs ending in (or containing) `.pdf`.
static PDF_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?i)https?://[^\s"'<>]+\.pdf[^\s"'<>]*"#));

static DIRECT_LINK_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        r#"a[href*=".pdf"]"#,
        "a[data-pdf-url]",
        "a[pdfurl]",
        r#"a[href*="/pdf/"]"#,
        r#"a[href*="/pdfft"]"#,
    ]
    .into_iter()
    .map(parse_static_selector)
    .collect()
});

// ==================== Publisher construction ====================

/// Builds a PDF URL for one publisher from its landing URL alone.
pub trait PublisherPdfRule: Send + Sync + Debug {
    fn publisher(&self) -> Publisher;

    fn build(&self, landing_url: &str) -> Option<String>;
}

/// ScienceDirect: `/science/article/pii/{PII}` becomes the `pdfft` download endpoint.
#[derive(Debug, Clone)]
pub struct ElsevierPii {
    base_url: String,
}

impl Default for ElsevierPii {
    fn default() -> Self {
        Self::with_base_url(DEFAULT_SCIENCEDIRECT_BASE)
    }
}

impl ElsevierPii {
    #[must_use]
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Extracts the PII token from any text containing a PII path.
    #[must_use]
    pub fn extract_pii(text: &str) -> Option<String> {
        PII_PATH_RE
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_ascii_uppercase())
    }

    #[must_use]
    pub fn pdf_url_for(&self, pii: &str) -> String {
        format!(
            "{}/science/article/pii/{pii}/pdfft?isDTMRedir=true&download=true",
            self.base_url
        )
    }
}

impl PublisherPdfRule for ElsevierPii {
    fn publisher(&self) -> Publisher {
        Publisher::Elsevier
    }

    fn build(&self, landing_url: &str) -> Option<String> {
        Self::extract_pii(landing_url).map(|pii| self.pdf_url_for(&pii))
    }
}

/// Strategy 1: publisher-specific URL construction without page inspection.
#[derive(Debug)]
pub struct PublisherConstruction {
    rules: Vec<Box<dyn PublisherPdfRule>>,
}

impl PublisherConstruction {
    #[must_use]
    pub fn new(rules: Vec<Box<dyn PublisherPdfRule>>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl LinkStrategy for PublisherConstruction {
    fn name(&self) -> &'static str {
        "publisher"
    }

    async fn find(&self, page: &LandingPage, _browser: &mut dyn BrowserSession) -> Option<String> {
        let publisher = page.publisher?;
        self.rules
            .iter()
            .filter(|rule| rule.publisher() == publisher)
            .find_map(|rule| rule.build(page.url()))
    }
}

// ==================== Direct links ====================

/// Strategy 2: anchors whose `href` or data attributes point at a PDF.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectLinkScan;

impl DirectLinkScan {
    /// Candidate URLs in selector priority order, already absolutized.
    #[must_use]
    pub fn candidates(base_url: &str, source: &str) -> Vec<String> {
        let document = Html::parse_document(source);
        let mut out = Vec::new();
        for selector in DIRECT_LINK_SELECTORS.iter() {
            for element in document.select(selector) {
                let attrs = element.value();
                let raw = attrs
                    .attr("href")
                    .or_else(|| attrs.attr("data-pdf-url"))
                    .or_else(|| attrs.attr("pdfurl"));
                if let Some(url) = raw.and_then(|raw| join_url(base_url, raw))
                    && !out.contains(&url)
                {
                    out.push(url);
                }
            }
        }
        out
    }
}

#[async_trait]
impl LinkStrategy for DirectLinkScan {
    fn name(&self) -> &'static str {
        "direct_links"
    }

    async fn find(&self, page: &LandingPage, _browser: &mut dyn BrowserSession) -> Option<String> {
        Self::candidates(page.url(), &page.snapshot.source)
            .into_iter()
            .find(|url| is_valid_pdf_url(url))
    }
}

// ==================== Buttons ====================

/// Strategy 3: "Download PDF"-style buttons and links.
#[derive(Debug, Clone)]
pub struct ButtonClick {
    max_clicks: usize,
}

impl Default for ButtonClick {
    fn default() -> Self {
        Self { max_clicks: 5 }
    }
}

impl ButtonClick {
    /// Whether an element label looks like a PDF download control.
    #[must_use]
    pub fn label_matches(label: &str) -> bool {
        label.contains("pdf") || label == "download"
    }

    async fn click_and_detect(
        &self,
        landing_url: &str,
        index: usize,
        browser: &mut dyn BrowserSession,
    ) -> Option<String> {
        let before = browser.current_url().await.ok()?;
        let outcome = match browser.click(index).await {
            Ok(outcome) => outcome,
            Err(error) => {
                debug!(index, %error, "click failed");
                return None;
            }
        };

        if let Some(tab_url) = outcome.new_tab_url
            && (outcome.new_tab_is_pdf || is_valid_pdf_url(&tab_url))
        {
            return Some(tab_url);
        }

        let after = browser.snapshot().await.ok()?;
        if after.is_pdf() || (after.url != before && is_valid_pdf_url(&after.url)) {
            return Some(after.url);
        }

        if after.url != landing_url
            && let Err(error) = browser.navigate(landing_url).await
        {
            debug!(%error, "could not return to landing page after click");
        }
        None
    }
}

#[async_trait]
impl LinkStrategy for ButtonClick {
    fn name(&self) -> &'static str {
        "buttons"
    }

    async fn find(&self, page: &LandingPage, browser: &mut dyn BrowserSession) -> Option<String> {
        let clickables = match browser.find_clickable().await {
            Ok(clickables) => clickables,
            Err(error) => {
                debug!(%error, "could not list clickable elements");
                return None;
            }
        };

        let mut clicks = 0;
        for element in clickables
            .iter()
            .filter(|el| Self::label_matches(&el.label()))
        {
            if let Some(url) = element
                .data_target()
                .and_then(|target| join_url(page.url(), target))
                .filter(|url| is_valid_pdf_url(url))
            {
                return Some(url);
            }

            if element.tag == "a"
                && let Some(url) = element
                    .href
                    .as_deref()
                    .and_then(|href| join_url(page.url(), href))
                    .filter(|url| is_valid_pdf_url(url))
            {
                return Some(url);
            }

            if clicks >= self.max_clicks {
                break;
            }
            clicks += 1;
            if let Some(url) = self.click_and_detect(page.url(), element.index, browser).await {
                return Some(url);
            }
        }
        None
    }
}

// ==================== Inline PDF ====================

/// Strategy 4: the landing page itself is a PDF.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlinePdf;

#[async_trait]
impl LinkStrategy for InlinePdf {
    fn name(&self) -> &'static str {
        "inline_pdf"
    }

    async fn find(&self, page: &LandingPage, _browser: &mut dyn BrowserSession) -> Option<String> {
        page.snapshot.is_pdf().then(|| page.url().to_string())
    }
}

// ==================== Source scan ====================

/// Strategy 5: regex over the raw page source.
#[derive(Debug, Clone, Default)]
pub struct SourceScan {
    pii: ElsevierPii,
}

impl SourceScan {
    #[must_use]
    pub fn new(pii: ElsevierPii) -> Self {
        Self { pii }
    }

    #[must_use]
    pub fn scan(&self, source: &str) -> Option<String> {
        PDF_URL_RE
            .find_iter(source)
            .map(|m| m.as_str().replace("&amp;", "&"))
            .find(|url| is_valid_pdf_url(url))
            .or_else(|| ElsevierPii::extract_pii(source).map(|pii| self.pii.pdf_url_for(&pii)))
    }
}

#[async_trait]
impl LinkStrategy for SourceScan {
    fn name(&self) -> &'static str {
        "source_scan"
    }

    async fn find(&self, page: &LandingPage, _browser: &mut dyn BrowserSession) -> Option<String> {
        self.scan(&page.snapshot.source)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::*;
    use crate::browser::http::parse_clickables;
    use crate::browser::{BrowserCookie, BrowserError, ClickOutcome, Clickable, PageSnapshot};

    /// Serves a fixed set of pages; clicking an element jumps to its configured target.
    struct ScriptedBrowser {
        current: PageSnapshot,
        landing: PageSnapshot,
        on_click: Vec<(usize, PageSnapshot, ClickOutcome)>,
        clicks: Vec<usize>,
        download_dir: PathBuf,
    }

    impl ScriptedBrowser {
        fn new(landing: PageSnapshot) -> Self {
            Self {
                current: landing.clone(),
                landing,
                on_click: Vec::new(),
                clicks: Vec::new(),
                download_dir: PathBuf::from("/nonexistent"),
            }
        }
    }

    #[async_trait]
    impl BrowserSession for ScriptedBrowser {
        async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
            if url == self.landing.url {
                self.current = self.landing.clone();
            }
            Ok(())
        }
        async fn current_url(&mut self) -> Result<String, BrowserError> {
            Ok(self.current.url.clone())
        }
        async fn title(&mut self) -> Result<String, BrowserError> {
            Ok(self.current.title.clone())
        }
        async fn page_source(&mut self) -> Result<String, BrowserError> {
            Ok(self.current.source.clone())
        }
        async fn content_type(&mut self) -> Result<String, BrowserError> {
            Ok(self.current.content_type.clone())
        }
        async fn find_clickable(&mut self) -> Result<Vec<Clickable>, BrowserError> {
            Ok(parse_clickables(&self.current.source))
        }
        async fn click(&mut self, index: usize) -> Result<ClickOutcome, BrowserError> {
            self.clicks.push(index);
            let hit = self.on_click.iter().find(|(i, _, _)| *i == index).cloned();
            match hit {
                Some((_, page, outcome)) => {
                    self.current = page;
                    Ok(outcome)
                }
                None => Ok(ClickOutcome::default()),
            }
        }
        async fn cookies(&mut self) -> Result<Vec<BrowserCookie>, BrowserError> {
            Ok(Vec::new())
        }
        fn user_agent(&self) -> &str {
            "test"
        }
        fn download_dir(&self) -> &Path {
            &self.download_dir
        }
    }

    fn html_page(url: &str, body: &str) -> PageSnapshot {
        PageSnapshot {
            url: url.to_string(),
            title: "Article".to_string(),
            source: format!("<html><head><title>Article</title></head><body>{body}</body></html>"),
            content_type: "text/html".to_string(),
        }
    }

    fn landing(snapshot: PageSnapshot, publisher: Option<Publisher>) -> LandingPage {
        LandingPage {
            snapshot,
            publisher,
        }
    }

    // ==================== Publisher construction ====================

    #[tokio::test]
    async fn test_elsevier_pii_construction() {
        let page = landing(
            html_page("https://www.sciencedirect.com/science/article/pii/S0092867420300015", ""),
            Some(Publisher::Elsevier),
        );
        let mut browser = ScriptedBrowser::new(page.snapshot.clone());
        let strategy = PublisherConstruction::new(vec![Box::new(ElsevierPii::default())]);
        assert_eq!(
            strategy.find(&page, &mut browser).await.as_deref(),
            Some(
                "https://www.sciencedirect.com/science/article/pii/S0092867420300015/pdfft?isDTMRedir=true&download=true"
            )
        );
    }

    #[tokio::test]
    async fn test_publisher_construction_requires_matching_publisher() {
        let page = landing(
            html_page("https://www.sciencedirect.com/science/article/pii/S0092867420300015", ""),
            None,
        );
        let mut browser = ScriptedBrowser::new(page.snapshot.clone());
        let strategy = PublisherConstruction::new(vec![Box::new(ElsevierPii::default())]);
        assert_eq!(strategy.find(&page, &mut browser).await, None);
    }

    #[test]
    fn test_extract_pii_variants() {
        assert_eq!(
            ElsevierPii::extract_pii("/science/article/abs/pii/s0092867420300015").as_deref(),
            Some("S0092867420300015")
        );
        assert_eq!(ElsevierPii::extract_pii("/science/article/pii/short"), None);
    }

    // ==================== Direct links ====================

    #[test]
    fn test_direct_link_candidates_are_absolute_and_ordered() {
        let source = r#"
            <a href="/doi/pdf/10.1/x">PDF</a>
            <a href="files/paper.pdf">paper</a>
            <a data-pdf-url="/data/1.pdf">data</a>
        "#;
        let candidates = DirectLinkScan::candidates("https://example.org/article/1", source);
        assert_eq!(
            candidates,
            [
                "https://example.org/article/files/paper.pdf",
                "https://example.org/data/1.pdf",
                "https://example.org/doi/pdf/10.1/x",
            ]
        );
    }

    #[tokio::test]
    async fn test_direct_link_scan_skips_invalid() {
        let page = landing(
            html_page("https://example.org/a", r#"<a href="https://example.org/pdf/">x</a><a href="/pdf/2">y</a>"#),
            None,
        );
        let mut browser = ScriptedBrowser::new(page.snapshot.clone());
        assert_eq!(
            DirectLinkScan.find(&page, &mut browser).await.as_deref(),
            Some("https://example.org/pdf/2")
        );
    }

    // ==================== Buttons ====================

    #[test]
    fn test_label_matches_vocabulary() {
        assert!(ButtonClick::label_matches("download pdf"));
        assert!(ButtonClick::label_matches("view pdf"));
        assert!(ButtonClick::label_matches("download"));
        assert!(!ButtonClick::label_matches("download citation"));
        assert!(!ButtonClick::label_matches("abstract"));
    }

    #[tokio::test]
    async fn test_button_prefers_data_attribute() {
        let page = landing(
            html_page("https://example.org/a", r#"<button data-href="/pdf/123">Download PDF</button>"#),
            None,
        );
        let mut browser = ScriptedBrowser::new(page.snapshot.clone());
        let found = ButtonClick::default().find(&page, &mut browser).await;
        assert_eq!(found.as_deref(), Some("https://example.org/pdf/123"));
        assert!(browser.clicks.is_empty());
    }

    #[tokio::test]
    async fn test_button_ignores_data_attribute_that_is_not_a_pdf_url() {
        let page = landing(
            html_page("https://example.org/a", r#"<button data-url="/share/123">Download PDF</button>"#),
            None,
        );
        let mut browser = ScriptedBrowser::new(page.snapshot.clone());
        let found = ButtonClick::default().find(&page, &mut browser).await;
        assert_eq!(found, None);
        assert_eq!(browser.clicks, [0]);
    }

    #[tokio::test]
    async fn test_button_click_detects_new_tab() {
        let page = landing(html_page("https://example.org/a", "<button>View PDF</button>"), None);
        let mut browser = ScriptedBrowser::new(page.snapshot.clone());
        browser.on_click.push((
            0,
            page.snapshot.clone(),
            ClickOutcome {
                new_tab_url: Some("https://cdn.example.org/blob/77".to_string()),
                new_tab_is_pdf: true,
            },
        ));
        let found = ButtonClick::default().find(&page, &mut browser).await;
        assert_eq!(found.as_deref(), Some("https://cdn.example.org/blob/77"));
    }

    #[tokio::test]
    async fn test_button_click_detects_inline_pdf_navigation() {
        let page = landing(html_page("https://example.org/a", "<button>Get PDF</button>"), None);
        let mut browser = ScriptedBrowser::new(page.snapshot.clone());
        let pdf = PageSnapshot {
            url: "https://example.org/render?id=1".to_string(),
            content_type: "application/pdf".to_string(),
            ..PageSnapshot::default()
        };
        browser.on_click.push((0, pdf, ClickOutcome::default()));
        let found = ButtonClick::default().find(&page, &mut browser).await;
        assert_eq!(found.as_deref(), Some("https://example.org/render?id=1"));
    }

    #[tokio::test]
    async fn test_button_click_returns_to_landing_on_miss() {
        let page = landing(
            html_page("https://example.org/a", "<button>PDF</button><button>Download PDF</button>"),
            None,
        );
        let mut browser = ScriptedBrowser::new(page.snapshot.clone());
        browser
            .on_click
            .push((0, html_page("https://example.org/login", "sign in"), ClickOutcome::default()));
        let found = ButtonClick::default().find(&page, &mut browser).await;
        assert_eq!(found, None);
        assert_eq!(browser.clicks, [0, 1]);
        assert_eq!(browser.current.url, "https://example.org/a");
    }

    // ==================== Inline + source scan ====================

    #[tokio::test]
    async fn test_inline_pdf() {
        let page = landing(
            PageSnapshot {
                url: "https://example.org/x".to_string(),
                content_type: "application/pdf".to_string(),
                ..PageSnapshot::default()
            },
            None,
        );
        let mut browser = ScriptedBrowser::new(page.snapshot.clone());
        assert_eq!(
            InlinePdf.find(&page, &mut browser).await.as_deref(),
            Some("https://example.org/x")
        );
    }

    #[test]
    fn test_source_scan_finds_absolute_pdf() {
        let scan = SourceScan::default();
        let source = r#"<script>var u = "https://cdn.example.org/a/paper.pdf?x=1&amp;y=2";</script>"#;
        assert_eq!(
            scan.scan(source).as_deref(),
            Some("https://cdn.example.org/a/paper.pdf?x=1&y=2")
        );
    }

    #[test]
    fn test_source_scan_falls_back_to_pii() {
        let scan = SourceScan::new(ElsevierPii::with_base_url("http://127.0.0.1:9/"));
        let source = r#"<link rel="canonical" href="/science/article/pii/S0092867420300015">"#;
        assert_eq!(
            scan.scan(source).as_deref(),
            Some("http://127.0.0.1:9/science/article/pii/S0092867420300015/pdfft?isDTMRedir=true&download=true")
        );
        assert_eq!(scan.scan("<html>nothing</html>"), None);
    }
}
