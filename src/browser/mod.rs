//! Scriptable browser sessions.
//!
//! The fetcher needs a page renderer for landing pages (JS redirects,
//! anti-bot interstitials, download buttons) and a way to let a browser
//! perform downloads that plain HTTP clients are refused. Both sit behind the
//! [`BrowserSession`] trait so the pipeline never depends on a concrete
//! driver:
//!
//! - [`http::HttpSession`] renders pages with a plain HTTP client (no JS). It
//!   is always available and doubles as the test double for wiremock tests.
//! - `chrome::ChromeSession` (feature `chrome`) drives Chrome over CDP.
//!
//! A session is stateful (current page, tabs, cookies) and must not be shared
//! between concurrent users; the batch runner gives each worker its own.

pub mod download_dir;
pub mod http;

#[cfg(feature = "chrome")]
pub mod chrome;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::download::signature::has_pdf_signature;

pub use download_dir::DownloadWatch;

/// Errors raised by browser drivers.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// The browser process or context could not be started.
    #[error("failed to launch browser: {0}")]
    Launch(String),

    /// Loading a URL failed outright (not an HTTP error page).
    #[error("navigation to {url} failed: {message}")]
    Navigation {
        /// Target URL.
        url: String,
        /// Driver message.
        message: String,
    },

    /// Script evaluation or DOM access failed.
    #[error("browser script failed: {0}")]
    Script(String),

    /// The requested element index does not exist on the current page.
    #[error("no clickable element at index {0}")]
    NoSuchElement(usize),

    /// Local file system error (download directory).
    #[error("IO error at {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl BrowserError {
    /// Creates a navigation error.
    pub fn navigation(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Navigation {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A clickable element (`a`, `button`, or `[role=button]`) on the current page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Clickable {
    /// Position in document order; pass to [`BrowserSession::click`].
    pub index: usize,
    /// Lowercase tag name.
    pub tag: String,
    pub text: Option<String>,
    pub aria_label: Option<String>,
    pub title: Option<String>,
    pub href: Option<String>,
    pub data_pdf_url: Option<String>,
    pub data_href: Option<String>,
    pub data_url: Option<String>,
    pub class_name: Option<String>,
    /// Whether the element carries a `download` attribute.
    pub download: bool,
}

impl Clickable {
    /// Visible text, else aria-label, else title; trimmed and lowercased.
    #[must_use]
    pub fn label(&self) -> String {
        [&self.text, &self.aria_label, &self.title]
            .into_iter()
            .flatten()
            .map(|value| value.trim())
            .find(|value| !value.is_empty())
            .unwrap_or_default()
            .to_lowercase()
    }

    /// URL carried in a data attribute (`data-pdf-url`, `data-href`, `data-url`).
    #[must_use]
    pub fn data_target(&self) -> Option<&str> {
        [&self.data_pdf_url, &self.data_href, &self.data_url]
            .into_iter()
            .flatten()
            .map(|value| value.trim())
            .find(|value| !value.is_empty())
    }
}

/// What a click produced besides changes to the current page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClickOutcome {
    /// URL of a tab the click opened (the tab is closed again by the driver).
    pub new_tab_url: Option<String>,
    /// Whether that tab was rendering a PDF.
    pub new_tab_is_pdf: bool,
}

/// A cookie harvested from the browser for replay over HTTP in a `Cookie` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// The parts of a rendered page the pipeline inspects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub source: String,
    pub content_type: String,
}

impl PageSnapshot {
    /// True when the browser is showing a PDF rather than HTML.
    #[must_use]
    pub fn is_pdf(&self) -> bool {
        self.content_type.to_lowercase().contains("application/pdf")
            || has_pdf_signature(self.source.trim_start().as_bytes())
    }
}

/// One browser context (window, cookies, download directory).
#[async_trait]
pub trait BrowserSession: Send {
    /// Loads `url` in the current tab and waits for the load to finish.
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    async fn current_url(&mut self) -> Result<String, BrowserError>;

    async fn title(&mut self) -> Result<String, BrowserError>;

    /// Serialized DOM of the current page.
    async fn page_source(&mut self) -> Result<String, BrowserError>;

    /// `document.contentType` of the current page.
    async fn content_type(&mut self) -> Result<String, BrowserError>;

    /// All clickable elements on the current page, in document order.
    async fn find_clickable(&mut self) -> Result<Vec<Clickable>, BrowserError>;

    /// Clicks the element at `index` (as returned by [`find_clickable`](Self::find_clickable))
    /// and lets any navigation settle.
    async fn click(&mut self, index: usize) -> Result<ClickOutcome, BrowserError>;

    async fn cookies(&mut self) -> Result<Vec<BrowserCookie>, BrowserError>;

    /// The User-Agent the browser presents.
    fn user_agent(&self) -> &str;

    /// Directory the browser saves downloads into.
    fn download_dir(&self) -> &Path;

    /// Waits for a download started after `watch` was taken to finish,
    /// checking every `interval`.
    async fn wait_for_download(
        &mut self,
        watch: &DownloadWatch,
        timeout: Duration,
        interval: Duration,
    ) -> Option<PathBuf> {
        watch.wait(timeout, interval).await
    }

    /// Captures the current page.
    async fn snapshot(&mut self) -> Result<PageSnapshot, BrowserError> {
        Ok(PageSnapshot {
            url: self.current_url().await?,
            title: self.title().await?,
            source: self.page_source().await?,
            content_type: self.content_type().await?,
        })
    }

    /// Releases the browser. Further calls may fail.
    async fn close(&mut self) -> Result<(), BrowserError> {
        Ok(())
    }
}

/// Launches browser sessions; one per worker.
#[async_trait]
pub trait BrowserFactory: Send + Sync {
    /// Starts a session whose downloads land in `download_dir`.
    async fn launch(&self, download_dir: &Path) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

/// A worker's browser, launched on first use and reused afterwards.
pub struct LazyBrowser {
    factory: Arc<dyn BrowserFactory>,
    download_dir: PathBuf,
    session: Option<Box<dyn BrowserSession>>,
}

impl std::fmt::Debug for LazyBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyBrowser")
            .field("download_dir", &self.download_dir)
            .field("launched", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

impl LazyBrowser {
    #[must_use]
    pub fn new(factory: Arc<dyn BrowserFactory>, download_dir: PathBuf) -> Self {
        Self {
            factory,
            download_dir,
            session: None,
        }
    }

    /// Where the session saves downloads, launched or not.
    #[must_use]
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    #[must_use]
    pub fn is_launched(&self) -> bool {
        self.session.is_some()
    }

    /// Returns the session, launching it first if necessary.
    ///
    /// # Errors
    ///
    /// Returns the factory's error if the launch fails.
    pub async fn session(&mut self) -> Result<&mut dyn BrowserSession, BrowserError> {
        if self.session.is_none() {
            info!(download_dir = %self.download_dir.display(), "launching browser");
            self.session = Some(self.factory.launch(&self.download_dir).await?);
        }
        match self.session.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(BrowserError::Launch("browser session unavailable".to_string())),
        }
    }

    /// Closes the session if one was launched.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take()
            && let Err(error) = session.close().await
        {
            debug!(%error, "browser close failed");
        }
    }
}
