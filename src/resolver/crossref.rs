//! Crossref metadata lookup for direct PDF links.
//!
//! [`CrossrefClient`] queries `https://api.crossref.org/works/{doi}` and picks
//! the first `message.link` entry that points at a PDF. It is an optional
//! shortcut: when it finds nothing the fetcher renders the landing page as usual.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::ResolveError;
use crate::download::Throttle;
use crate::http_client::{HttpClientOptions, build_http_client};
use crate::user_agent::api_user_agent;

/// Default Crossref API base URL.
const DEFAULT_BASE_URL: &str = "https://api.crossref.org";

/// External source of direct PDF URLs for DOIs.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Returns a direct PDF URL for `doi`, or `None` when unknown.
    ///
    /// Lookup failures are reported as `None`.
    async fn lookup_pdf_url_for_doi(&self, doi: &str) -> Option<String>;
}

// ==================== Crossref API Response Types ====================

#[derive(Debug, Deserialize)]
struct CrossrefResponse {
    status: String,
    message: CrossrefMessage,
}

#[derive(Debug, Default, Deserialize)]
struct CrossrefMessage {
    #[serde(default)]
    link: Vec<CrossrefLink>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CrossrefLink {
    /// The URL field is uppercase in the Crossref response.
    #[serde(rename = "URL")]
    url: String,
    content_type: Option<String>,
}

// ==================== CrossrefClient ====================

/// Looks up PDF links through the Crossref REST API polite pool.
pub struct CrossrefClient {
    client: Client,
    base_url: String,
    mailto: String,
    throttle: Option<Arc<dyn Throttle>>,
}

impl CrossrefClient {
    /// Creates a client identified by `mailto` in the polite pool.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] if `mailto` contains control characters or the
    /// HTTP client cannot be built.
    pub fn new(mailto: impl Into<String>) -> Result<Self, ResolveError> {
        Self::with_base_url(mailto, DEFAULT_BASE_URL)
    }

    /// Creates a client against a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Same as [`CrossrefClient::new`].
    pub fn with_base_url(
        mailto: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ResolveError> {
        let mailto = mailto.into();
        if mailto.chars().any(|c| c == '\n' || c == '\r' || c == '\0') {
            return Err(ResolveError::resolution_failed(
                &mailto,
                "mailto contains invalid control characters",
            ));
        }
        let options = HttpClientOptions::default().with_user_agent(api_user_agent());
        let client = build_http_client("crossref", &options)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            mailto,
            throttle: None,
        })
    }

    /// Paces API calls through the same per-domain gate as every other request.
    #[must_use]
    pub fn with_throttle(mut self, throttle: Arc<dyn Throttle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    async fn fetch_links(&self, doi: &str) -> Result<Vec<CrossrefLink>, String> {
        let url = format!(
            "{}/works/{}?mailto={}",
            self.base_url,
            urlencoding::encode(doi),
            urlencoding::encode(&self.mailto)
        );
        debug!(api_url = %url, "Calling Crossref API");
        if let Some(throttle) = &self.throttle {
            throttle.acquire(&url).await;
        }

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status.as_u16()));
        }
        let body = response
            .json::<CrossrefResponse>()
            .await
            .map_err(|e| format!("unexpected response format: {e}"))?;
        if !body.status.eq_ignore_ascii_case("ok") {
            return Err(format!("response status '{}'", body.status));
        }
        Ok(body.message.link)
    }
}

impl std::fmt::Debug for CrossrefClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossrefClient")
            .field("base_url", &self.base_url)
            .field("mailto", &self.mailto)
            .field("throttled", &self.throttle.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MetadataClient for CrossrefClient {
    #[tracing::instrument(skip(self), fields(source = "crossref"))]
    async fn lookup_pdf_url_for_doi(&self, doi: &str) -> Option<String> {
        match self.fetch_links(doi).await {
            Ok(links) => {
                let found = extract_pdf_url(&links);
                debug!(found = found.is_some(), "Crossref lookup finished");
                found
            }
            Err(reason) => {
                warn!(%reason, "Crossref lookup failed");
                None
            }
        }
    }
}

/// First link whose URL or content type mentions PDF.
fn extract_pdf_url(links: &[CrossrefLink]) -> Option<String> {
    links
        .iter()
        .find(|link| {
            link.url.to_lowercase().contains("pdf")
                || link
                    .content_type
                    .as_deref()
                    .is_some_and(|ct| ct.to_lowercase().contains("pdf"))
        })
        .map(|link| link.url.clone())
}
