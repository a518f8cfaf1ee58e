//! Chrome/Chromium sessions over the DevTools protocol (feature `chrome`).
//!
//! Each session is its own browser process with downloads routed into the
//! worker's download directory and the PDF viewer disabled, so navigating to a
//! PDF produces a file on disk instead of an inline viewer.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::{BrowserCookie, BrowserError, BrowserFactory, BrowserSession, ClickOutcome, Clickable};

/// Hides the most common automation fingerprints before any page script runs.
const STEALTH_JS: &str = r"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
    window.chrome = { runtime: {} };
";

/// Serializes every clickable element; the index matches `CLICK_JS`.
const CLICKABLES_JS: &str = r#"
    JSON.stringify(Array.from(document.querySelectorAll('a, button, [role="button"]')).map((el, index) => ({
        index,
        tag: el.tagName.toLowerCase(),
        text: (el.innerText || '').trim() || null,
        ariaLabel: el.getAttribute('aria-label'),
        title: el.getAttribute('title'),
        href: el.getAttribute('href'),
        dataPdfUrl: el.getAttribute('data-pdf-url') || el.getAttribute('pdfurl'),
        dataHref: el.getAttribute('data-href'),
        dataUrl: el.getAttribute('data-url'),
        className: typeof el.className === 'string' ? el.className : null,
        download: el.hasAttribute('download'),
    })))
"#;

const CLICK_SETTLE: Duration = Duration::from_secs(2);

/// Launches one Chrome process per session.
#[derive(Debug, Clone)]
pub struct ChromeFactory {
    headless: bool,
    user_agent: String,
}

impl ChromeFactory {
    #[must_use]
    pub fn new(headless: bool, user_agent: impl Into<String>) -> Self {
        Self {
            headless,
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl BrowserFactory for ChromeFactory {
    #[instrument(skip(self), fields(headless = self.headless))]
    async fn launch(&self, download_dir: &Path) -> Result<Box<dyn BrowserSession>, BrowserError> {
        tokio::fs::create_dir_all(download_dir)
            .await
            .map_err(|e| BrowserError::io(download_dir, e))?;
        let download_dir = tokio::fs::canonicalize(download_dir)
            .await
            .map_err(|e| BrowserError::io(download_dir, e))?;

        let user_agent_arg = format!("--user-agent={}", self.user_agent);
        let args = [
            "--disable-blink-features=AutomationControlled",
            "--disable-dev-shm-usage",
            "--no-sandbox",
            "--window-size=1920,1080",
            "--disable-extensions",
            "--disable-pdf-viewer",
            user_agent_arg.as_str(),
        ];
        let mut builder = BrowserConfig::builder().args(args);
        if !self.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;
        let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

        let behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(download_dir.to_string_lossy().into_owned())
            .build()
            .map_err(BrowserError::Launch)?;
        if let Err(error) = browser.execute(behavior).await {
            warn!(%error, "could not route browser downloads");
        }

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;
        if let Err(error) = page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_JS))
            .await
        {
            debug!(%error, "stealth script injection failed");
        }

        Ok(Box::new(ChromeSession {
            browser,
            handler_task,
            page,
            user_agent: self.user_agent.clone(),
            download_dir,
        }))
    }
}

/// A live Chrome process with one primary tab.
pub struct ChromeSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    page: Page,
    user_agent: String,
    download_dir: PathBuf,
}

impl ChromeSession {
    async fn evaluate_string(&self, expression: &str) -> Result<String, BrowserError> {
        self.page
            .evaluate(expression)
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?
            .into_value::<String>()
            .map_err(|e| BrowserError::Script(e.to_string()))
    }

    async fn tab_ids(&self) -> Result<HashSet<String>, BrowserError> {
        let pages = self
            .browser
            .pages()
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        Ok(pages
            .iter()
            .map(|page| page.target_id().inner().clone())
            .collect())
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    #[instrument(skip(self))]
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| BrowserError::navigation(url, e))?;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, BrowserError> {
        Ok(self
            .page
            .url()
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn title(&mut self) -> Result<String, BrowserError> {
        Ok(self
            .page
            .get_title()
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?
            .unwrap_or_default())
    }

    async fn page_source(&mut self) -> Result<String, BrowserError> {
        self.page
            .content()
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))
    }

    async fn content_type(&mut self) -> Result<String, BrowserError> {
        self.evaluate_string("document.contentType || ''").await
    }

    async fn find_clickable(&mut self) -> Result<Vec<Clickable>, BrowserError> {
        let json = self.evaluate_string(CLICKABLES_JS).await?;
        serde_json::from_str(&json).map_err(|e| BrowserError::Script(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn click(&mut self, index: usize) -> Result<ClickOutcome, BrowserError> {
        let before = self.tab_ids().await?;
        let script = format!(
            r#"(() => {{
                const el = document.querySelectorAll('a, button, [role="button"]')[{index}];
                if (!el) {{ return 'missing'; }}
                el.scrollIntoView({{block: 'center'}});
                el.click();
                return 'ok';
            }})()"#
        );
        if self.evaluate_string(&script).await? == "missing" {
            return Err(BrowserError::NoSuchElement(index));
        }
        tokio::time::sleep(CLICK_SETTLE).await;

        let mut outcome = ClickOutcome::default();
        let pages = self
            .browser
            .pages()
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        for tab in pages {
            if before.contains(tab.target_id().inner()) {
                continue;
            }
            if outcome.new_tab_url.is_none() {
                outcome.new_tab_url = tab.url().await.ok().flatten();
                outcome.new_tab_is_pdf = tab
                    .evaluate("document.contentType || ''")
                    .await
                    .ok()
                    .and_then(|value| value.into_value::<String>().ok())
                    .is_some_and(|ct| ct.to_lowercase().contains("application/pdf"));
            }
            if let Err(error) = tab.close().await {
                debug!(%error, "failed to close tab opened by click");
            }
        }
        Ok(outcome)
    }

    async fn cookies(&mut self) -> Result<Vec<BrowserCookie>, BrowserError> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        Ok(cookies
            .into_iter()
            .map(|cookie| BrowserCookie {
                name: cookie.name,
                value: cookie.value,
                domain: cookie.domain,
                path: cookie.path,
            })
            .collect())
    }

    fn user_agent(&self) -> &str {
        &self.user_agent
    }

    fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        let result = self.browser.close().await;
        self.handler_task.abort();
        result
            .map(|_| ())
            .map_err(|e| BrowserError::Script(e.to_string()))
    }
}
