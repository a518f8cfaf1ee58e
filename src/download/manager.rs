//! PDF transfer with validation.
//!
//! [`DownloadManager::download`] tries a streaming HTTP GET first. Bodies that
//! start with `%PDF` are accepted whatever the status code. A 401/403 hands the
//! URL to the browser, which either drops a file into its download directory
//! or leaves cookies behind that let the request be replayed over HTTP.
//! Watermarking services go to the browser straight away.
//!
//! Every path stages into the output directory and renames into place, and
//! nothing that fails the signature check survives on disk.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{ACCEPT, COOKIE, REFERER, RETRY_AFTER, USER_AGENT};
use scraper::{Html, Selector};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::constants::{
    CHALLENGE_POLL_INTERVAL, CHALLENGE_WAIT, DOWNLOAD_POLL_INTERVAL, DOWNLOAD_POLL_TIMEOUT,
};
use super::error::DownloadError;
use super::rate_limiter::Throttle;
use super::retry::{RetryDecision, RetryPolicy};
use super::signature::file_has_pdf_signature;
use super::watermark::{WatermarkService, default_services, find_service};
use crate::browser::http::parse_static_selector;
use crate::browser::{BrowserCookie, BrowserSession, DownloadWatch, LazyBrowser};
use crate::challenge::is_challenge_page;
use crate::http_client::{ClientBuildError, HttpClientOptions, build_http_client};
use crate::resolver::utils::join_url;

static IFRAME_SELECTOR: LazyLock<Selector> = LazyLock::new(|| parse_static_selector("iframe[src]"));

const ACCEPT_PDF: &str = "application/pdf,application/octet-stream;q=0.9,*/*;q=0.8";

/// One transfer: where from, where to, and the context to send along.
#[derive(Debug, Clone)]
pub struct DownloadRequest<'a> {
    pub url: &'a str,
    pub output: &'a Path,
    pub referer: Option<&'a str>,
    pub cookies: &'a [BrowserCookie],
}

impl<'a> DownloadRequest<'a> {
    #[must_use]
    pub fn new(url: &'a str, output: &'a Path) -> Self {
        Self {
            url,
            output,
            referer: None,
            cookies: &[],
        }
    }

    #[must_use]
    pub fn with_referer(mut self, referer: Option<&'a str>) -> Self {
        self.referer = referer;
        self
    }

    #[must_use]
    pub fn with_cookies(mut self, cookies: &'a [BrowserCookie]) -> Self {
        self.cookies = cookies;
        self
    }
}

/// Headers for a single HTTP attempt.
#[derive(Debug)]
struct RequestContext<'a> {
    referer: Option<&'a str>,
    cookie_header: Option<String>,
    user_agent: Option<&'a str>,
}

/// Moves PDF bytes from the network (or a browser) onto disk.
pub struct DownloadManager {
    client: Client,
    throttle: Arc<dyn Throttle>,
    retry: RetryPolicy,
    watermarks: Vec<Box<dyn WatermarkService>>,
    poll_timeout: Duration,
    poll_interval: Duration,
    challenge_wait: Duration,
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("retry", &self.retry)
            .field("watermarks", &self.watermarks)
            .field("poll_timeout", &self.poll_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("challenge_wait", &self.challenge_wait)
            .finish_non_exhaustive()
    }
}

impl DownloadManager {
    /// Creates a manager whose HTTP requests all pass through `throttle`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError`] if the HTTP client cannot be built.
    pub fn new(
        options: &HttpClientOptions,
        throttle: Arc<dyn Throttle>,
    ) -> Result<Self, ClientBuildError> {
        Ok(Self {
            client: build_http_client("pdf-download", options)?,
            throttle,
            retry: RetryPolicy::default(),
            watermarks: default_services(),
            poll_timeout: DOWNLOAD_POLL_TIMEOUT,
            poll_interval: DOWNLOAD_POLL_INTERVAL,
            challenge_wait: CHALLENGE_WAIT,
        })
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_watermark_services(mut self, services: Vec<Box<dyn WatermarkService>>) -> Self {
        self.watermarks = services;
        self
    }

    /// Bound on waiting for a browser download to appear.
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Bound on waiting for a challenge page to clear in the browser.
    #[must_use]
    pub fn with_challenge_wait(mut self, wait: Duration) -> Self {
        self.challenge_wait = wait;
        self
    }

    /// Downloads `request.url` to `request.output`.
    ///
    /// `browser` enables the browser path for watermark services and 401/403
    /// responses; without it those cases fail over HTTP alone.
    ///
    /// # Errors
    ///
    /// Returns the last [`DownloadError`] when no path produced a valid PDF.
    #[instrument(skip_all, fields(url = %request.url, output = %request.output.display()))]
    pub async fn download(
        &self,
        request: &DownloadRequest<'_>,
        browser: Option<&mut LazyBrowser>,
    ) -> Result<(), DownloadError> {
        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }

        let mut browser = browser;
        if let Some(service) = find_service(&self.watermarks, request.url)
            && let Some(browser) = browser.as_deref_mut()
        {
            info!(service = service.name(), "watermark service, using browser download");
            return self.download_with_browser(request.url, request.output, browser).await;
        }

        let context = RequestContext {
            referer: request.referer,
            cookie_header: cookie_header(request.cookies),
            user_agent: None,
        };
        match self.fetch_with_retry(request.url, request.output, &context).await {
            Ok(()) => Ok(()),
            Err(error) if matches!(error.status(), Some(401 | 403)) => match browser {
                Some(browser) => {
                    info!(status = ?error.status(), "access denied over HTTP, trying browser");
                    self.download_with_browser(request.url, request.output, browser)
                        .await
                }
                None => Err(error),
            },
            Err(error) => Err(error),
        }
    }

    async fn fetch_with_retry(
        &self,
        url: &str,
        output: &Path,
        context: &RequestContext<'_>,
    ) -> Result<(), DownloadError> {
        let mut attempt = 1;
        loop {
            match self.fetch_once(url, output, context).await {
                Ok(()) => return Ok(()),
                Err(error) => match self.retry.decide(&error, attempt) {
                    RetryDecision::Retry {
                        delay,
                        attempt: next_attempt,
                    } => {
                        info!(
                            attempt = next_attempt,
                            max_attempts = self.retry.max_attempts(),
                            delay_ms = delay.as_millis(),
                            error = %error,
                            "retrying download"
                        );
                        tokio::time::sleep(delay).await;
                        attempt = next_attempt;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        debug!(%reason, error = %error, "not retrying");
                        return Err(error);
                    }
                },
            }
        }
    }

    /// One throttled GET, streamed into a staging file next to `output`.
    async fn fetch_once(
        &self,
        url: &str,
        output: &Path,
        context: &RequestContext<'_>,
    ) -> Result<(), DownloadError> {
        if url::Url::parse(url).is_err() {
            return Err(DownloadError::invalid_url(url));
        }
        self.throttle.acquire(url).await;

        let mut request = self.client.get(url).header(ACCEPT, ACCEPT_PDF);
        if let Some(referer) = context.referer {
            request = request.header(REFERER, referer);
        }
        if let Some(cookies) = &context.cookie_header {
            request = request.header(COOKIE, cookies);
        }
        if let Some(user_agent) = context.user_agent {
            request = request.header(USER_AGENT, user_agent);
        }
        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let staging = staging_path(output);
        let streamed = stream_to_file(response, url, &staging).await;
        if let Err(error) = streamed {
            remove_quietly(&staging).await;
            return Err(error);
        }

        if file_has_pdf_signature(&staging).await {
            if !status.is_success() {
                warn!(status = status.as_u16(), "accepting PDF body despite error status");
            }
            tokio::fs::rename(&staging, output)
                .await
                .map_err(|e| DownloadError::io(output, e))?;
            info!(path = %output.display(), "download complete");
            return Ok(());
        }

        remove_quietly(&staging).await;
        if status.is_success() {
            Err(DownloadError::not_pdf(url))
        } else {
            Err(DownloadError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ))
        }
    }

    /// Lets the browser fetch `url`, then falls back to replaying it over HTTP
    /// with the browser's identity.
    #[instrument(skip(self, browser), fields(url = %url))]
    async fn download_with_browser(
        &self,
        url: &str,
        output: &Path,
        browser: &mut LazyBrowser,
    ) -> Result<(), DownloadError> {
        let session = browser
            .session()
            .await
            .map_err(|e| DownloadError::browser(url, e.to_string()))?;

        let watch = DownloadWatch::begin(session.download_dir())
            .await
            .map_err(|e| DownloadError::io(session.download_dir(), e))?;

        self.throttle.acquire(url).await;
        if let Err(error) = session.navigate(url).await {
            warn!(%error, "browser navigation failed");
        }
        if !self.wait_for_challenge(session).await {
            return Err(DownloadError::browser(url, "challenge page did not clear"));
        }

        let current = session.current_url().await.unwrap_or_else(|_| url.to_string());
        if let Some(service) = find_service(&self.watermarks, &current) {
            click_download_link(service, session).await;
        }

        let downloaded = session
            .wait_for_download(&watch, self.poll_timeout, self.poll_interval)
            .await;
        if let Some(path) = downloaded {
            if file_has_pdf_signature(&path).await {
                move_into_place(&path, output).await?;
                info!(path = %output.display(), "browser download complete");
                return Ok(());
            }
            warn!(path = %path.display(), "browser download is not a PDF, deleting");
            remove_quietly(&path).await;
        } else {
            debug!("no browser download appeared");
        }

        self.replay_over_http(url, output, session).await
    }

    /// Polls until the current page stops looking like a challenge.
    async fn wait_for_challenge(&self, session: &mut dyn BrowserSession) -> bool {
        let deadline = Instant::now() + self.challenge_wait;
        loop {
            let title = session.title().await.unwrap_or_default();
            let source = session.page_source().await.unwrap_or_default();
            if !is_challenge_page(&title, &source) {
                return true;
            }
            if Instant::now() >= deadline {
                warn!("challenge page still present after waiting");
                return false;
            }
            debug!("waiting for challenge to clear");
            tokio::time::sleep(CHALLENGE_POLL_INTERVAL).await;
        }
    }

    async fn replay_over_http(
        &self,
        url: &str,
        output: &Path,
        session: &mut dyn BrowserSession,
    ) -> Result<(), DownloadError> {
        let snapshot = session
            .snapshot()
            .await
            .map_err(|e| DownloadError::browser(url, e.to_string()))?;
        let cookies = session.cookies().await.unwrap_or_default();

        let target = embedded_pdf_url(&snapshot.url, &snapshot.source)
            .or_else(|| {
                find_service(&self.watermarks, &snapshot.url)
                    .and_then(|service| service.extract_pdf_url(&snapshot.source))
            })
            .unwrap_or_else(|| url.to_string());
        debug!(target = %target, cookies = cookies.len(), "replaying over HTTP with browser cookies");

        let referer = snapshot.url.starts_with("http").then_some(snapshot.url.as_str());
        let context = RequestContext {
            referer,
            cookie_header: cookie_header(&cookies),
            user_agent: Some(session.user_agent()),
        };
        self.fetch_with_retry(&target, output, &context).await
    }
}

/// First `iframe[src]` on the page, absolutized.
fn embedded_pdf_url(page_url: &str, source: &str) -> Option<String> {
    let document = Html::parse_document(source);
    document
        .select(&IFRAME_SELECTOR)
        .filter_map(|el| el.value().attr("src"))
        .find_map(|src| join_url(page_url, src))
}

/// Clicks the first element on a watermark page that looks like the download link.
async fn click_download_link(service: &dyn WatermarkService, session: &mut dyn BrowserSession) {
    let Ok(clickables) = session.find_clickable().await else {
        return;
    };
    let target = clickables.iter().find(|el| {
        el.href
            .as_deref()
            .is_some_and(|href| href.to_lowercase().contains(".pdf"))
            || el.label().contains("download")
    });
    if let Some(el) = target {
        debug!(service = service.name(), index = el.index, "clicking watermark download link");
        if let Err(error) = session.click(el.index).await {
            debug!(%error, "watermark download click failed");
        }
    }
}

fn cookie_header(cookies: &[BrowserCookie]) -> Option<String> {
    (!cookies.is_empty()).then(|| {
        cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    })
}

fn staging_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map_or_else(|| "download".into(), |n| n.to_string_lossy().into_owned());
    output.with_file_name(format!(".{name}.{}.part", std::process::id()))
}

async fn stream_to_file(
    response: reqwest::Response,
    url: &str,
    path: &Path,
) -> Result<u64, DownloadError> {
    let file = File::create(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DownloadError::network(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        bytes_written += chunk.len() as u64;
    }
    writer.flush().await.map_err(|e| DownloadError::io(path, e))?;
    Ok(bytes_written)
}

/// Renames `from` to `to`; across file systems, copies into a staging file
/// beside `to` first so the final rename stays atomic.
async fn move_into_place(from: &Path, to: &Path) -> Result<(), DownloadError> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    let staging = staging_path(to);
    if let Err(e) = tokio::fs::copy(from, &staging).await {
        remove_quietly(&staging).await;
        return Err(DownloadError::io(to, e));
    }
    tokio::fs::rename(&staging, to)
        .await
        .map_err(|e| DownloadError::io(to, e))?;
    remove_quietly(from).await;
    Ok(())
}

async fn remove_quietly(path: &Path) {
    if let Err(error) = tokio::fs::remove_file(path).await
        && error.kind() != std::io::ErrorKind::NotFound
    {
        debug!(path = %path.display(), %error, "failed to remove file");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::browser::BrowserFactory;
    use crate::browser::http::HttpBrowserFactory;
    use crate::download::rate_limiter::RateLimiter;
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, ResponseTemplate};

    const PDF_BODY: &[u8] = b"%PDF-1.7\n1 0 obj\n<<>>\nendobj\n%%EOF\n";

    fn manager() -> DownloadManager {
        DownloadManager::new(&HttpClientOptions::default(), Arc::new(RateLimiter::disabled()))
            .unwrap()
            .with_retry_policy(RetryPolicy::no_retry())
            .with_poll_timeout(Duration::from_secs(3))
            .with_challenge_wait(Duration::ZERO)
    }

    fn lazy_browser(dir: &Path) -> LazyBrowser {
        let factory: Arc<dyn BrowserFactory> =
            Arc::new(HttpBrowserFactory::new(HttpClientOptions::default()));
        LazyBrowser::new(factory, dir.join("browser-downloads"))
    }

    #[test]
    fn test_download_rejects_invalid_url() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("x.pdf");
        let request = DownloadRequest::new("not-a-valid-url", &output);
        let result = tokio_test::block_on(manager().download(&request, None));
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
        assert!(!output.exists());
    }

    // ==================== HTTP path ====================

    #[tokio::test]
    async fn test_download_success_writes_file() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/paper.pdf"))
            .and(header("referer", "https://landing.example/article"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF_BODY))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("paper.pdf");
        let url = format!("{}/paper.pdf", server.uri());
        let request =
            DownloadRequest::new(&url, &output).with_referer(Some("https://landing.example/article"));

        manager().download(&request, None).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), PDF_BODY);
    }

    #[tokio::test]
    async fn test_download_accepts_pdf_under_error_status() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/forbidden.pdf"))
            .respond_with(ResponseTemplate::new(403).set_body_bytes(PDF_BODY))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("out.pdf");
        let url = format!("{}/forbidden.pdf", server.uri());
        manager()
            .download(&DownloadRequest::new(&url, &output), None)
            .await
            .unwrap();
        assert!(std::fs::read(&output).unwrap().starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn test_download_rejects_html_and_leaves_nothing() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>sign in</html>"))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("out.pdf");
        let url = format!("{}/login", server.uri());
        let err = manager()
            .download(&DownloadRequest::new(&url, &output), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::NotPdf { .. }));
        assert!(!output.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_download_403_without_browser_fails_with_status() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("out.pdf");
        let url = format!("{}/x.pdf", server.uri());
        let err = manager()
            .download(&DownloadRequest::new(&url, &output), None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(403));
    }

    #[tokio::test]
    async fn test_download_sends_cookie_header() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/c.pdf"))
            .and(header("cookie", "sid=abc; consent=1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF_BODY))
            .mount(&server)
            .await;

        let cookies = [
            BrowserCookie {
                name: "sid".into(),
                value: "abc".into(),
                domain: String::new(),
                path: "/".into(),
            },
            BrowserCookie {
                name: "consent".into(),
                value: "1".into(),
                domain: String::new(),
                path: "/".into(),
            },
        ];
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("c.pdf");
        let url = format!("{}/c.pdf", server.uri());
        manager()
            .download(&DownloadRequest::new(&url, &output).with_cookies(&cookies), None)
            .await
            .unwrap();
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_download_retries_server_errors() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/flaky.pdf"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF_BODY))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("flaky.pdf");
        let url = format!("{}/flaky.pdf", server.uri());
        let manager = manager().with_retry_policy(RetryPolicy::new(
            2,
            Duration::from_millis(1),
            Duration::from_millis(1),
            1.0,
        ));
        manager
            .download(&DownloadRequest::new(&url, &output), None)
            .await
            .unwrap();
        assert!(output.exists());
    }

    // ==================== Browser path ====================

    #[tokio::test]
    async fn test_403_falls_back_to_browser_download() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        // Plain HTTP is refused; the browser (with its own Accept/UA) gets the PDF.
        Mock::given(method("GET"))
            .and(path("/guarded.pdf"))
            .and(header("accept", ACCEPT_PDF))
            .respond_with(ResponseTemplate::new(403).set_body_string("no bots"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/guarded.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(PDF_BODY),
            )
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("guarded.pdf");
        let url = format!("{}/guarded.pdf", server.uri());
        let mut browser = lazy_browser(dir.path());
        manager()
            .download(&DownloadRequest::new(&url, &output), Some(&mut browser))
            .await
            .unwrap();
        assert!(browser.is_launched());
        assert_eq!(std::fs::read(&output).unwrap(), PDF_BODY);
    }

    #[tokio::test]
    async fn test_watermark_page_replays_iframe_over_http() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/watermark/view"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><body><iframe src="/watermark/file.pdf"></iframe></body></html>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/watermark/file.pdf"))
            .and(header("accept", ACCEPT_PDF))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF_BODY))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("wm.pdf");
        let url = format!("{}/watermark/view", server.uri());
        let mut browser = lazy_browser(dir.path());
        manager()
            .with_poll_timeout(Duration::from_millis(600))
            .download(&DownloadRequest::new(&url, &output), Some(&mut browser))
            .await
            .unwrap();
        assert!(std::fs::read(&output).unwrap().starts_with(b"%PDF"));
    }

    // ==================== Helpers ====================

    #[test]
    fn test_embedded_pdf_url_absolutizes() {
        let html = r#"<iframe src="viewer/1.pdf"></iframe>"#;
        assert_eq!(
            embedded_pdf_url("https://example.org/a/b", html).as_deref(),
            Some("https://example.org/a/viewer/1.pdf")
        );
        assert_eq!(embedded_pdf_url("https://example.org/", "<p>none</p>"), None);
    }

    #[test]
    fn test_cookie_header_empty_is_none() {
        assert_eq!(cookie_header(&[]), None);
    }

    #[test]
    fn test_staging_path_is_hidden_sibling() {
        let staging = staging_path(Path::new("/tmp/out/10.1_x.pdf"));
        assert_eq!(staging.parent(), Some(Path::new("/tmp/out")));
        let name = staging.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".10.1_x.pdf."));
        assert!(name.ends_with(".part"));
    }

    #[tokio::test]
    async fn test_move_into_place_renames() {
        let dir = tempfile::TempDir::new().unwrap();
        let from = dir.path().join("a.pdf");
        let to = dir.path().join("b.pdf");
        std::fs::write(&from, PDF_BODY).unwrap();
        move_into_place(&from, &to).await.unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), PDF_BODY);
    }
}
