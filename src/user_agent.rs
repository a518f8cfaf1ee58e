//! Shared User-Agent strings for HTTP and browser traffic.
//!
//! Publisher sites serve different (often broken) pages to unknown clients,
//! so both the HTTP client and the browser present the same desktop Chrome
//! identity by default. The tool identity is still available for API traffic
//! (Crossref) where identifying ourselves earns better rate limits.

/// Project URL for User-Agent identification on API requests (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/pdf-fetcher";

/// Desktop Chrome 131 on Windows.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// User-Agent for metadata API requests (identifies the tool).
#[must_use]
pub(crate) fn api_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("pdf-fetcher/{version} (research-tool; +{PROJECT_UA_URL})")
}
