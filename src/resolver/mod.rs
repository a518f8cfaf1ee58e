//! Landing-page resolution.
//!
//! - [`DoiResolver`] turns a DOI resolver URL into the publisher landing URL,
//!   first with a plain redirect-following GET and then, if allowed, by loading
//!   the URL in a [`BrowserSession`] to catch JavaScript redirects.
//! - [`crossref`] holds the optional metadata collaborator that can short-cut
//!   straight to a PDF URL.

pub mod crossref;
pub mod utils;

pub use crossref::{CrossrefClient, MetadataClient};

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::browser::{BrowserSession, LazyBrowser};
use crate::http_client::{ClientBuildError, HttpClientOptions, build_http_client};

/// Errors raised while turning an identifier into a landing URL.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Every available resolution path failed.
    #[error("resolution failed for '{input}': {reason}")]
    ResolutionFailed {
        /// The URL being resolved
        input: String,
        /// Why the last path failed
        reason: String,
    },

    /// The HTTP client could not be constructed.
    #[error(transparent)]
    Client(#[from] ClientBuildError),
}

impl ResolveError {
    /// Creates a `ResolutionFailed` error.
    #[must_use]
    pub fn resolution_failed(input: &str, reason: impl ToString) -> Self {
        Self::ResolutionFailed {
            input: input.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Follows DOI redirects to the publisher landing page.
#[derive(Debug, Clone)]
pub struct DoiResolver {
    client: Client,
    settle: Duration,
}

impl DoiResolver {
    /// Creates a resolver whose browser fallback waits `settle` for JS redirects.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Client`] if HTTP client construction fails.
    pub fn new(options: &HttpClientOptions, settle: Duration) -> Result<Self, ResolveError> {
        let client = build_http_client("doi-resolver", options)?;
        Ok(Self { client, settle })
    }

    /// Resolves `url`, falling back to `browser` when the HTTP path fails.
    /// The browser is only launched for that fallback.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::ResolutionFailed`] when both paths fail, or when
    /// the HTTP path fails and no browser is available.
    pub async fn resolve(
        &self,
        url: &str,
        browser: Option<&mut LazyBrowser>,
    ) -> Result<String, ResolveError> {
        let http_error = match self.resolve_http(url).await {
            Ok(landing) => return Ok(landing),
            Err(error) => error,
        };
        let Some(browser) = browser else {
            return Err(http_error);
        };
        match browser.session().await {
            Ok(session) => self.resolve_in_browser(url, session).await,
            Err(error) => {
                debug!(%error, "no browser for resolution fallback");
                Err(http_error)
            }
        }
    }

    /// Plain GET with redirects; the final response URL is the landing page.
    ///
    /// Error statuses still count as resolved: a publisher answering 403 has
    /// told us where the article lives.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::ResolutionFailed`] on transport errors.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn resolve_http(&self, url: &str) -> Result<String, ResolveError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            warn!(error = %e, "HTTP resolution failed");
            ResolveError::resolution_failed(url, e)
        })?;
        let landing = response.url().to_string();
        debug!(landing = %landing, status = response.status().as_u16(), "resolved over HTTP");
        Ok(landing)
    }

    /// Loads `url` in the browser and reports where it ended up.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::ResolutionFailed`] if navigation fails.
    #[instrument(skip(self, browser), fields(url = %url))]
    pub async fn resolve_in_browser(
        &self,
        url: &str,
        browser: &mut dyn BrowserSession,
    ) -> Result<String, ResolveError> {
        browser
            .navigate(url)
            .await
            .map_err(|e| ResolveError::resolution_failed(url, e))?;
        tokio::time::sleep(self.settle).await;
        let landing = browser
            .current_url()
            .await
            .map_err(|e| ResolveError::resolution_failed(url, e))?;
        debug!(landing = %landing, "resolved in browser");
        Ok(landing)
    }
}
