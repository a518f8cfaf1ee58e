//! A JavaScript-free [`BrowserSession`] backed by reqwest.
//!
//! Pages are fetched with a cookie-carrying HTTP client and parsed with
//! `scraper`. Clicking an element follows its `href`. Navigating to a PDF
//! saves it into the download directory, the way a browser with its PDF
//! viewer disabled does, so the download-polling path works unchanged.
//!
//! It cannot solve JS redirects or render client-side pages, but it keeps the
//! pipeline usable without a Chrome install.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{CONTENT_TYPE, REFERER};
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use super::{BrowserCookie, BrowserError, BrowserFactory, BrowserSession, ClickOutcome, Clickable};
use crate::download::signature::has_pdf_signature;
use crate::http_client::{HttpClientOptions, build_http_client};
use crate::identifier::sanitize_for_filename;
use crate::resolver::utils::join_url;

static TITLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| parse_static_selector("title"));
static CLICKABLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| parse_static_selector("a, button, [role=\"button\"]"));

/// Parses a selector at static init; panics on invalid syntax.
pub(crate) fn parse_static_selector(selector: &str) -> Selector {
    Selector::parse(selector).unwrap_or_else(|e| panic!("invalid static selector '{selector}': {e}"))
}

/// Launches [`HttpSession`]s.
#[derive(Debug, Clone)]
pub struct HttpBrowserFactory {
    options: HttpClientOptions,
}

impl HttpBrowserFactory {
    #[must_use]
    pub fn new(options: HttpClientOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl BrowserFactory for HttpBrowserFactory {
    async fn launch(&self, download_dir: &Path) -> Result<Box<dyn BrowserSession>, BrowserError> {
        tokio::fs::create_dir_all(download_dir)
            .await
            .map_err(|e| BrowserError::io(download_dir, e))?;
        let session = HttpSession::new(self.options.clone(), download_dir)?;
        Ok(Box::new(session))
    }
}

/// Plain-HTTP page renderer.
#[derive(Debug)]
pub struct HttpSession {
    client: Client,
    jar: Arc<Jar>,
    user_agent: String,
    download_dir: PathBuf,
    url: String,
    title: String,
    source: String,
    content_type: String,
}

impl HttpSession {
    /// Creates a session with its own cookie jar.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError::Launch`] when the HTTP client cannot be built.
    pub fn new(options: HttpClientOptions, download_dir: &Path) -> Result<Self, BrowserError> {
        let jar = Arc::new(Jar::default());
        let user_agent = options.user_agent.clone();
        let client = build_http_client("http-session", &options.with_cookie_jar(Arc::clone(&jar)))
            .map_err(|e| BrowserError::Launch(e.to_string()))?;
        Ok(Self {
            client,
            jar,
            user_agent,
            download_dir: download_dir.to_path_buf(),
            url: "about:blank".to_string(),
            title: String::new(),
            source: String::new(),
            content_type: String::new(),
        })
    }

    async fn save_download(&self, url: &Url, bytes: &[u8]) -> Result<(), BrowserError> {
        let name = url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            .map_or_else(|| "download".to_string(), sanitize_for_filename);
        let name = if name.to_lowercase().ends_with(".pdf") {
            name
        } else {
            format!("{name}.pdf")
        };
        let path = self.download_dir.join(name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| BrowserError::io(&path, e))?;
        debug!(path = %path.display(), "saved PDF navigation as download");
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for HttpSession {
    #[instrument(skip(self))]
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        let mut request = self.client.get(url);
        if self.url.starts_with("http") {
            request = request.header(REFERER, self.url.as_str());
        }
        let response = request
            .send()
            .await
            .map_err(|e| BrowserError::navigation(url, e))?;

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("text/html")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| BrowserError::navigation(url, e))?;

        self.url = final_url.to_string();
        if content_type.to_lowercase().contains("application/pdf") || has_pdf_signature(&bytes) {
            self.save_download(&final_url, &bytes).await?;
            self.title.clear();
            self.source.clear();
            self.content_type = "application/pdf".to_string();
            return Ok(());
        }

        self.source = String::from_utf8_lossy(&bytes).into_owned();
        self.title = Html::parse_document(&self.source)
            .select(&TITLE_SELECTOR)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        self.content_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, BrowserError> {
        Ok(self.url.clone())
    }

    async fn title(&mut self) -> Result<String, BrowserError> {
        Ok(self.title.clone())
    }

    async fn page_source(&mut self) -> Result<String, BrowserError> {
        Ok(self.source.clone())
    }

    async fn content_type(&mut self) -> Result<String, BrowserError> {
        Ok(self.content_type.clone())
    }

    async fn find_clickable(&mut self) -> Result<Vec<Clickable>, BrowserError> {
        Ok(parse_clickables(&self.source))
    }

    async fn click(&mut self, index: usize) -> Result<ClickOutcome, BrowserError> {
        let element = parse_clickables(&self.source)
            .into_iter()
            .nth(index)
            .ok_or(BrowserError::NoSuchElement(index))?;
        let target = element
            .href
            .as_deref()
            .and_then(|href| join_url(&self.url, href));
        if let Some(target) = target {
            self.navigate(&target).await?;
        }
        Ok(ClickOutcome::default())
    }

    async fn cookies(&mut self) -> Result<Vec<BrowserCookie>, BrowserError> {
        let Ok(url) = Url::parse(&self.url) else {
            return Ok(Vec::new());
        };
        let domain = url.host_str().unwrap_or_default().to_string();
        let header = self.jar.cookies(&url);
        let raw = header
            .as_ref()
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        Ok(raw
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .map(|(name, value)| BrowserCookie {
                name: name.to_string(),
                value: value.to_string(),
                domain: domain.clone(),
                path: "/".to_string(),
            })
            .collect())
    }

    fn user_agent(&self) -> &str {
        &self.user_agent
    }

    fn download_dir(&self) -> &Path {
        &self.download_dir
    }
}

/// Extracts clickable elements from HTML in document order.
#[must_use]
pub fn parse_clickables(source: &str) -> Vec<Clickable> {
    let document = Html::parse_document(source);
    document
        .select(&CLICKABLE_SELECTOR)
        .enumerate()
        .map(|(index, el)| {
            let attr = |name: &str| el.value().attr(name).map(str::to_string);
            let text = el.text().collect::<Vec<_>>().join(" ");
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            Clickable {
                index,
                tag: el.value().name().to_lowercase(),
                text: (!text.is_empty()).then_some(text),
                aria_label: attr("aria-label"),
                title: attr("title"),
                href: attr("href"),
                data_pdf_url: attr("data-pdf-url").or_else(|| attr("pdfurl")),
                data_href: attr("data-href"),
                data_url: attr("data-url"),
                class_name: attr("class"),
                download: el.value().attr("download").is_some(),
            }
        })
        .collect()
}
