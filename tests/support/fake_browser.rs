//! Test doubles for the browser and throttle seams.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pdf_fetcher::browser::http::HttpBrowserFactory;
use pdf_fetcher::browser::{BrowserError, BrowserFactory, BrowserSession};
use pdf_fetcher::download::{Throttle, extract_domain};
use pdf_fetcher::http_client::HttpClientOptions;
use pdf_fetcher::resolver::MetadataClient;

/// Plain-HTTP browser factory that counts launches.
#[derive(Debug)]
pub struct CountingBrowserFactory {
    inner: HttpBrowserFactory,
    launches: AtomicUsize,
}

impl CountingBrowserFactory {
    pub fn new() -> Arc<Self> {
        let options = HttpClientOptions::default().with_timeout(Duration::from_secs(5));
        Arc::new(Self {
            inner: HttpBrowserFactory::new(options),
            launches: AtomicUsize::new(0),
        })
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserFactory for CountingBrowserFactory {
    async fn launch(&self, download_dir: &Path) -> Result<Box<dyn BrowserSession>, BrowserError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.inner.launch(download_dir).await
    }
}

/// One throttle call.
#[derive(Debug, Clone)]
pub struct ThrottleEvent {
    pub url: String,
    pub domain: String,
    pub at: Instant,
}

/// Never waits; records every request it is asked about.
#[derive(Debug, Default)]
pub struct RecordingThrottle {
    events: Mutex<Vec<ThrottleEvent>>,
}

impl RecordingThrottle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ThrottleEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.events().into_iter().map(|event| event.url).collect()
    }
}

#[async_trait]
impl Throttle for RecordingThrottle {
    async fn wait_if_needed(&self, domain: &str) {
        self.events.lock().unwrap().push(ThrottleEvent {
            url: String::new(),
            domain: domain.to_string(),
            at: Instant::now(),
        });
    }

    async fn acquire(&self, url: &str) {
        self.events.lock().unwrap().push(ThrottleEvent {
            url: url.to_string(),
            domain: extract_domain(url),
            at: Instant::now(),
        });
    }
}

/// Metadata client returning a fixed answer.
#[derive(Debug, Default)]
pub struct FixedMetadataClient {
    pub pdf_url: Option<String>,
    pub lookups: AtomicUsize,
}

#[async_trait]
impl MetadataClient for FixedMetadataClient {
    async fn lookup_pdf_url_for_doi(&self, _doi: &str) -> Option<String> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.pdf_url.clone()
    }
}
