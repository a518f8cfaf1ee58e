//! The identifier-to-PDF pipeline.
//!
//! [`Fetcher::download`] runs one identifier through
//!
//! ```text
//! parse -> (already on disk?) -> resolve -> detect publisher
//!       -> [metadata shortcut] -> render landing -> challenge / paywall
//!       -> find PDF link -> download -> persist
//! ```
//!
//! and always returns a [`DownloadResult`]; failures (and panics) become a
//! status plus reason. [`BatchRunner`] spreads a list of identifiers over
//! workers partitioned by target domain.

mod batch;
mod postpone;
mod result;

pub use batch::{BatchReport, BatchRunner, BatchSummary};
pub use postpone::{Postponement, doi_prefix, domains_match};
pub use result::{DownloadResult, DownloadStatus};

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::browser::{BrowserFactory, DownloadWatch, LazyBrowser};
use crate::challenge::{detect_challenge, is_paywall_page};
use crate::config::{ConfigError, FetcherConfig};
use crate::db::{Database, DbError};
use crate::download::signature::file_has_pdf_signature;
use crate::download::{
    DownloadManager, DownloadRequest, RateLimiter, RetryPolicy, Throttle, WatermarkService,
};
use crate::error::FetchError;
use crate::finder::{LandingPage, PdfLinkFinder};
use crate::http_client::{ClientBuildError, HttpClientOptions};
use crate::identifier::{Identifier, sanitize_for_filename};
use crate::metadata::{MetadataError, MetadataStore};
use crate::publisher;
use crate::resolver::utils::host_of;
use crate::resolver::{CrossrefClient, DoiResolver, MetadataClient, ResolveError};

/// A fetcher could not be assembled. These are configuration problems and are
/// raised instead of being folded into a result.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientBuildError),

    #[error(transparent)]
    Resolver(#[from] ResolveError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    History(#[from] DbError),
}

/// Assembles a [`Fetcher`]; unset collaborators are built from the config.
pub struct FetcherBuilder {
    config: FetcherConfig,
    throttle: Option<Arc<dyn Throttle>>,
    browser_factory: Option<Arc<dyn BrowserFactory>>,
    metadata_client: Option<Arc<dyn MetadataClient>>,
    metadata: Option<Arc<MetadataStore>>,
    history: Option<Database>,
    finder: Option<PdfLinkFinder>,
    watermarks: Option<Vec<Box<dyn WatermarkService>>>,
}

impl FetcherBuilder {
    #[must_use]
    pub fn throttle(mut self, throttle: Arc<dyn Throttle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    #[must_use]
    pub fn browser_factory(mut self, factory: Arc<dyn BrowserFactory>) -> Self {
        self.browser_factory = Some(factory);
        self
    }

    #[must_use]
    pub fn metadata_client(mut self, client: Arc<dyn MetadataClient>) -> Self {
        self.metadata_client = Some(client);
        self
    }

    #[must_use]
    pub fn metadata_store(mut self, store: Arc<MetadataStore>) -> Self {
        self.metadata = Some(store);
        self
    }

    #[must_use]
    pub fn history(mut self, db: Database) -> Self {
        self.history = Some(db);
        self
    }

    #[must_use]
    pub fn finder(mut self, finder: PdfLinkFinder) -> Self {
        self.finder = Some(finder);
        self
    }

    /// Replaces the default watermarking-service matchers.
    #[must_use]
    pub fn watermark_services(mut self, services: Vec<Box<dyn WatermarkService>>) -> Self {
        self.watermarks = Some(services);
        self
    }

    /// Validates the config and builds every missing collaborator.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] for invalid configuration or when a client,
    /// the metadata document, or the history database cannot be opened.
    pub async fn build(self) -> Result<Fetcher, SetupError> {
        let config = self.config;
        config.validate()?;

        let throttle = match self.throttle {
            Some(throttle) => throttle,
            None => Arc::new(RateLimiter::new(config.requests_per_second, config.jitter())),
        };

        let download_options = HttpClientOptions {
            user_agent: config.user_agent.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            timeout: Duration::from_secs(config.download_timeout_secs),
            cookie_jar: None,
        };
        let resolve_options = download_options
            .clone()
            .with_timeout(Duration::from_secs(config.resolve_timeout_secs));

        let browser_factory = match self.browser_factory {
            Some(factory) => factory,
            None => default_browser_factory(&config, &download_options),
        };

        let metadata_client = match (self.metadata_client, &config.crossref_mailto) {
            (Some(client), _) => Some(client),
            (None, Some(mailto)) => {
                let client = CrossrefClient::new(mailto.clone())?.with_throttle(Arc::clone(&throttle));
                Some(Arc::new(client) as Arc<dyn MetadataClient>)
            }
            (None, None) => None,
        };

        let metadata = match self.metadata {
            Some(store) => store,
            None => Arc::new(MetadataStore::open(&config.metadata_path).await?),
        };

        let history = match (self.history, &config.history_db) {
            (Some(db), _) => Some(db),
            (None, Some(path)) => Some(Database::new(path).await?),
            (None, None) => None,
        };

        let mut downloads = DownloadManager::new(&download_options, Arc::clone(&throttle))?
            .with_retry_policy(RetryPolicy::with_max_attempts(config.max_retries))
            .with_poll_timeout(config.download_poll_timeout())
            .with_poll_interval(config.download_poll_interval())
            .with_challenge_wait(config.challenge_wait());
        if let Some(services) = self.watermarks {
            downloads = downloads.with_watermark_services(services);
        }

        Ok(Fetcher {
            resolver: DoiResolver::new(&resolve_options, config.landing_settle())?,
            finder: self.finder.unwrap_or_default(),
            downloads,
            throttle,
            browser_factory,
            metadata_client,
            metadata,
            history,
            postponed: Postponement::seeded(
                config.postponed_domains.iter().cloned(),
                config.postponed_doi_prefixes.iter().cloned(),
            ),
            browser_seq: AtomicUsize::new(0),
            config,
        })
    }
}

/// The PDF filename recorded for `raw`, valid identifier or not.
pub(crate) fn result_filename(raw: &str) -> String {
    match Identifier::parse(raw) {
        Ok(identifier) => identifier.sanitized_filename(),
        Err(_) => format!("{}.pdf", sanitize_for_filename(raw.trim())),
    }
}

#[cfg(feature = "chrome")]
fn default_browser_factory(
    config: &FetcherConfig,
    _options: &HttpClientOptions,
) -> Arc<dyn BrowserFactory> {
    Arc::new(crate::browser::chrome::ChromeFactory::new(
        config.headless,
        config.user_agent.clone(),
    ))
}

#[cfg(not(feature = "chrome"))]
fn default_browser_factory(
    _config: &FetcherConfig,
    options: &HttpClientOptions,
) -> Arc<dyn BrowserFactory> {
    Arc::new(crate::browser::http::HttpBrowserFactory::new(options.clone()))
}

/// Runs identifiers through the pipeline. Share it behind an `Arc`; each
/// concurrent caller brings its own [`LazyBrowser`].
pub struct Fetcher {
    config: FetcherConfig,
    resolver: DoiResolver,
    finder: PdfLinkFinder,
    downloads: DownloadManager,
    throttle: Arc<dyn Throttle>,
    browser_factory: Arc<dyn BrowserFactory>,
    metadata_client: Option<Arc<dyn MetadataClient>>,
    metadata: Arc<MetadataStore>,
    history: Option<Database>,
    postponed: Postponement,
    browser_seq: AtomicUsize,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("config", &self.config)
            .field("finder", &self.finder)
            .field("metadata", &self.metadata.path())
            .field("history", &self.history.is_some())
            .field("metadata_client", &self.metadata_client.is_some())
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    #[must_use]
    pub fn builder(config: FetcherConfig) -> FetcherBuilder {
        FetcherBuilder {
            config,
            throttle: None,
            browser_factory: None,
            metadata_client: None,
            metadata: None,
            history: None,
            finder: None,
            watermarks: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    #[must_use]
    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Hosts and DOI prefixes skipped for the rest of this fetcher's life.
    #[must_use]
    pub fn postponed(&self) -> &Postponement {
        &self.postponed
    }

    /// A not-yet-launched browser with its own download directory.
    #[must_use]
    pub fn new_browser(&self) -> LazyBrowser {
        let seq = self.browser_seq.fetch_add(1, Ordering::SeqCst);
        let dir = self
            .config
            .browser_download_dir
            .join(format!("{}-{seq}", std::process::id()));
        LazyBrowser::new(Arc::clone(&self.browser_factory), dir)
    }

    /// Where `identifier`'s PDF lives.
    #[must_use]
    pub fn output_path(&self, identifier: &Identifier) -> PathBuf {
        self.config.pdf_dir.join(identifier.sanitized_filename())
    }

    /// Whether `raw` can be settled without touching the network: it is
    /// malformed, or its PDF is already on disk.
    pub async fn is_settled_offline(&self, raw: &str) -> bool {
        match Identifier::parse(raw) {
            Ok(identifier) => file_has_pdf_signature(&self.output_path(&identifier)).await,
            Err(_) => true,
        }
    }

    /// Downloads one identifier with a browser launched (if needed) just for it.
    pub async fn download_one(&self, raw: &str) -> DownloadResult {
        let mut browser = self.new_browser();
        let result = self.download(raw, &mut browser).await;
        browser.close().await;
        result
    }

    /// Runs the full pipeline for `raw`, reusing `browser`.
    ///
    /// Never fails: every error, including a panic inside the pipeline, is
    /// reported through the returned result, which is also persisted.
    #[instrument(skip(self, browser), fields(identifier = %raw))]
    pub async fn download(&self, raw: &str, browser: &mut LazyBrowser) -> DownloadResult {
        let result = match Identifier::parse(raw) {
            Err(error) => {
                DownloadResult::begin(raw, &result_filename(raw))
                    .failed(DownloadStatus::InvalidIdentifier, FetchError::from(error).to_string())
            }
            Ok(identifier) => self.download_identifier(raw, &identifier, browser).await,
        };

        info!(
            status = %result.status,
            reason = result.error_reason.as_deref().unwrap_or(""),
            "download finished"
        );
        self.persist(&result).await;
        result
    }

    async fn download_identifier(
        &self,
        raw: &str,
        identifier: &Identifier,
        browser: &mut LazyBrowser,
    ) -> DownloadResult {
        let output = self.output_path(identifier);
        let mut result = DownloadResult::begin(raw, &identifier.sanitized_filename());

        if file_has_pdf_signature(&output).await {
            debug!(path = %output.display(), "PDF already on disk");
            return result.already_exists(&output);
        }

        // Pages the browser saved while navigating are only needed during this run.
        let leftovers = DownloadWatch::begin(browser.download_dir()).await.ok();

        let outcome = AssertUnwindSafe(self.run_pipeline(identifier, &output, &mut result, browser))
            .catch_unwind()
            .await;

        if let Some(watch) = leftovers {
            match watch.discard_new().await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "cleared browser download directory"),
                Err(error) => debug!(%error, "could not clear browser download directory"),
            }
        }

        match outcome {
            Ok(Ok(())) => result.succeeded(&output),
            Ok(Err(error)) => {
                if error.is_blocking() {
                    let hosts: Vec<String> = [result.landing_url.as_deref(), result.pdf_url.as_deref()]
                        .into_iter()
                        .flatten()
                        .filter_map(host_of)
                        .collect();
                    let hosts: Vec<&str> = hosts.iter().map(String::as_str).collect();
                    self.postponed.mark(identifier.doi(), &hosts);
                }
                let status = error.status();
                result.failed(status, error.to_string())
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(%message, "pipeline panicked");
                result.failed(DownloadStatus::Failure, format!("internal error: {message}"))
            }
        }
    }

    /// Resolve, inspect and download. Fills in the URL and publisher fields of
    /// `result` as they become known.
    async fn run_pipeline(
        &self,
        identifier: &Identifier,
        output: &Path,
        result: &mut DownloadResult,
        browser: &mut LazyBrowser,
    ) -> Result<(), FetchError> {
        let direct_host = (!identifier.kind().needs_resolution())
            .then(|| host_of(identifier.navigation_url()))
            .flatten();
        if let Some(reason) = self.postponed.check(identifier.doi(), direct_host.as_deref()) {
            return Err(FetchError::Postponed { reason });
        }

        let landing_url = self.resolve_landing(identifier, browser).await?;
        result.landing_url = Some(landing_url.clone());
        if let Some(reason) = self.postponed.check(None, host_of(&landing_url).as_deref()) {
            return Err(FetchError::Postponed { reason });
        }
        let mut detected = publisher::detect(&landing_url);
        result.publisher = detected.map(|p| p.as_str().to_string());

        if let (Some(client), Some(doi)) = (&self.metadata_client, identifier.doi())
            && let Some(pdf_url) = client.lookup_pdf_url_for_doi(doi).await
        {
            info!(%pdf_url, "metadata lookup supplied a PDF URL");
            result.pdf_url = Some(pdf_url.clone());
            let request = DownloadRequest::new(&pdf_url, output).with_referer(Some(&landing_url));
            match self.downloads.download(&request, Some(&mut *browser)).await {
                Ok(()) => return Ok(()),
                Err(error) => {
                    warn!(%error, "metadata PDF URL failed, falling back to landing page");
                    result.pdf_url = None;
                }
            }
        }

        let session = browser.session().await.map_err(|e| FetchError::Browser(e.to_string()))?;
        self.throttle.acquire(&landing_url).await;
        session
            .navigate(&landing_url)
            .await
            .map_err(|e| FetchError::Browser(e.to_string()))?;
        tokio::time::sleep(self.config.landing_settle()).await;
        let snapshot = session
            .snapshot()
            .await
            .map_err(|e| FetchError::Browser(e.to_string()))?;

        if detected.is_none() {
            detected = publisher::detect(&snapshot.url);
            result.publisher = detected.map(|p| p.as_str().to_string());
        }

        if let Some(kind) = detect_challenge(&snapshot.url, &snapshot.title, &snapshot.source) {
            warn!(url = %landing_url, %kind, "challenge page detected");
            return Err(FetchError::challenge(kind, &landing_url, result.publisher.as_deref()));
        }
        if is_paywall_page(&snapshot.source) {
            return Err(FetchError::PaywallDetected { url: landing_url });
        }

        let page = LandingPage {
            snapshot,
            publisher: detected,
        };
        let found = self
            .finder
            .find_pdf_url(&page, &mut *session)
            .await
            .ok_or_else(|| FetchError::PdfNotFound {
                url: landing_url.clone(),
            })?;
        info!(pdf_url = %found.url, strategy = found.strategy, "PDF link found");
        result.pdf_url = Some(found.url.clone());

        let cookies = session.cookies().await.unwrap_or_default();
        let request = DownloadRequest::new(&found.url, output)
            .with_referer(Some(page.url()))
            .with_cookies(&cookies);
        self.downloads
            .download(&request, Some(browser))
            .await
            .map_err(FetchError::from_download)
    }

    async fn resolve_landing(
        &self,
        identifier: &Identifier,
        browser: &mut LazyBrowser,
    ) -> Result<String, FetchError> {
        let url = identifier.navigation_url();
        if !identifier.kind().needs_resolution() {
            return Ok(url.to_string());
        }

        self.throttle.acquire(url).await;
        Ok(self.resolver.resolve(url, Some(browser)).await?)
    }

    async fn persist(&self, result: &DownloadResult) {
        if let Err(error) = self.metadata.update(result).await {
            warn!(%error, "failed to persist metadata");
        }
        if let Some(history) = &self.history
            && let Err(error) = history.record_attempt(result).await
        {
            warn!(%error, "failed to record attempt history");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn fetcher(dir: &Path) -> Fetcher {
        let config = FetcherConfig {
            pdf_dir: dir.join("pdfs"),
            metadata_path: dir.join("pdfs").join("metadata.json"),
            browser_download_dir: dir.join("browser"),
            landing_settle_ms: 0,
            ..FetcherConfig::default()
        };
        Fetcher::builder(config)
            .throttle(Arc::new(RateLimiter::disabled()))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_identifier_is_reported_and_persisted() {
        let dir = tempfile::TempDir::new().unwrap();
        let fetcher = fetcher(dir.path()).await;
        let result = fetcher.download_one("not-an-identifier").await;
        assert_eq!(result.status, DownloadStatus::InvalidIdentifier);
        assert!(result.pdf_path.is_none());
        let record = fetcher.metadata().get("not-an-identifier").await.unwrap();
        assert_eq!(record.status, DownloadStatus::InvalidIdentifier);
    }

    #[tokio::test]
    async fn test_existing_pdf_short_circuits() {
        let dir = tempfile::TempDir::new().unwrap();
        let fetcher = fetcher(dir.path()).await;
        let pdfs = dir.path().join("pdfs");
        std::fs::create_dir_all(&pdfs).unwrap();
        std::fs::write(pdfs.join("10.1234_example.pdf"), b"%PDF-1.4 cached").unwrap();

        let mut browser = fetcher.new_browser();
        let result = fetcher.download("10.1234/example", &mut browser).await;
        assert_eq!(result.status, DownloadStatus::AlreadyExists);
        assert_eq!(result.pdf_path, Some(pdfs.join("10.1234_example.pdf")));
        assert!(!browser.is_launched());
    }

    #[tokio::test]
    async fn test_existing_non_pdf_does_not_short_circuit() {
        let dir = tempfile::TempDir::new().unwrap();
        let fetcher = fetcher(dir.path()).await;
        let id = Identifier::parse("http://127.0.0.1:1/a.pdf").unwrap();
        let output = fetcher.output_path(&id);
        std::fs::create_dir_all(output.parent().unwrap()).unwrap();
        std::fs::write(&output, b"<html>").unwrap();
        assert!(!fetcher.is_settled_offline("http://127.0.0.1:1/a.pdf").await);
        assert!(fetcher.is_settled_offline("garbage").await);
    }

    #[test]
    fn test_result_filename_is_never_empty() {
        assert_eq!(result_filename("10.1234/abc"), "10.1234_abc.pdf");
        assert_eq!(result_filename("ftp://x/y"), "ftp___x_y.pdf");
        assert!(!result_filename("not a doi").trim_end_matches(".pdf").is_empty());
    }

    #[tokio::test]
    async fn test_builder_rejects_invalid_config() {
        let config = FetcherConfig {
            max_workers: 0,
            ..FetcherConfig::default()
        };
        assert!(matches!(
            Fetcher::builder(config).build().await,
            Err(SetupError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_new_browser_dirs_are_distinct() {
        let dir = tempfile::TempDir::new().unwrap();
        let fetcher = fetcher(dir.path()).await;
        let a = format!("{:?}", fetcher.new_browser());
        let b = format!("{:?}", fetcher.new_browser());
        assert_ne!(a, b);
    }
}
