//! Shared HTTP client construction policy.
//!
//! Every reqwest client in the crate (DOI resolution, PDF transfers, the
//! plain-HTTP browser session, Crossref) is built here so timeouts,
//! compression, cookies and proxy handling stay consistent.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::{Client, ClientBuilder, Proxy};
use thiserror::Error;
use tracing::warn;

use crate::download::constants::{CONNECT_TIMEOUT_SECS, DOWNLOAD_TIMEOUT_SECS};
use crate::user_agent::BROWSER_USER_AGENT;

/// Client construction failed.
#[derive(Debug, Error)]
pub enum ClientBuildError {
    #[error("HTTP client construction for {label} failed: {source}")]
    Build {
        label: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP client construction for {label} panicked while reading system proxy settings")]
    Panic { label: String },
}

/// Knobs for [`build_http_client`].
#[derive(Debug, Clone)]
pub struct HttpClientOptions {
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// Whole-request timeout.
    pub timeout: Duration,
    pub cookie_jar: Option<Arc<Jar>>,
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self {
            user_agent: BROWSER_USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            timeout: Duration::from_secs(DOWNLOAD_TIMEOUT_SECS),
            cookie_jar: None,
        }
    }
}

impl HttpClientOptions {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn with_cookie_jar(mut self, jar: Arc<Jar>) -> Self {
        self.cookie_jar = Some(jar);
        self
    }
}

/// Builds a client using the shared policy.
///
/// `label` is only used in errors and logs.
///
/// # Errors
///
/// Returns [`ClientBuildError`] when reqwest rejects the configuration.
pub fn build_http_client(label: &str, options: &HttpClientOptions) -> Result<Client, ClientBuildError> {
    match try_build_client(options, false) {
        Ok(client) => Ok(client),
        Err(BuildClientFailure::Panic) => {
            // Some sandboxed environments panic when querying system proxy
            // settings; retry with env-proxy lookup only.
            warn!(
                client = label,
                "HTTP client hit system proxy panic; using env-proxy fallback builder"
            );
            match try_build_client(options, true) {
                Ok(client) => Ok(client),
                Err(BuildClientFailure::Panic) => Err(ClientBuildError::Panic {
                    label: label.to_string(),
                }),
                Err(BuildClientFailure::Build(source)) => Err(ClientBuildError::Build {
                    label: label.to_string(),
                    source,
                }),
            }
        }
        Err(BuildClientFailure::Build(source)) => Err(ClientBuildError::Build {
            label: label.to_string(),
            source,
        }),
    }
}

enum BuildClientFailure {
    Panic,
    Build(reqwest::Error),
}

fn try_build_client(
    options: &HttpClientOptions,
    disable_system_proxy_lookup: bool,
) -> Result<Client, BuildClientFailure> {
    let options = options.clone();
    catch_unwind(AssertUnwindSafe(move || {
        let mut builder = base_builder(options);
        if disable_system_proxy_lookup {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder.build().map_err(BuildClientFailure::Build)
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn base_builder(options: HttpClientOptions) -> ClientBuilder {
    let mut builder = Client::builder()
        .connect_timeout(options.connect_timeout)
        .timeout(options.timeout)
        .user_agent(options.user_agent)
        .gzip(true);

    if let Some(jar) = options.cookie_jar {
        builder = builder.cookie_provider(jar);
    }

    builder
}

fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(proxy) = env_proxy_for_scheme("https")
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    if let Some(proxy) = env_proxy_for_scheme("http")
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn env_proxy_for_scheme(scheme: &str) -> Option<String> {
    let names: &[&str] = match scheme {
        "https" => &["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"],
        "http" => &["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"],
        _ => return None,
    };
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_use_browser_identity() {
        let options = HttpClientOptions::default();
        assert_eq!(options.user_agent, BROWSER_USER_AGENT);
        assert_eq!(options.timeout, Duration::from_secs(DOWNLOAD_TIMEOUT_SECS));
        assert!(options.cookie_jar.is_none());
    }

    #[test]
    fn test_builder_methods() {
        let jar = Arc::new(Jar::default());
        let options = HttpClientOptions::default()
            .with_timeout(Duration::from_secs(5))
            .with_user_agent("ua")
            .with_cookie_jar(jar);
        assert_eq!(options.timeout, Duration::from_secs(5));
        assert_eq!(options.user_agent, "ua");
        assert!(options.cookie_jar.is_some());
    }

    #[test]
    fn test_build_http_client_succeeds() {
        assert!(build_http_client("test", &HttpClientOptions::default()).is_ok());
    }
}
