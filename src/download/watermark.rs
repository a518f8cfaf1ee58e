//! Watermarking/redirect services that sit between a publisher and its PDF.
//!
//! These intermediaries stamp a personalized watermark into the file and only
//! hand it out to a real browser, so the download manager routes them through
//! the browser path. Vendors are recognized by pluggable [`WatermarkService`]
//! matchers; [`default_services`] covers the ones seen in the wild.

use std::fmt::Debug;
use std::sync::LazyLock;

use regex::Regex;

use crate::resolver::utils::{compile_static_regex, host_of};

/// Recognizes one watermarking vendor.
pub trait WatermarkService: Send + Sync + Debug {
    /// Short vendor name for logs.
    fn name(&self) -> &'static str;

    /// Whether `url` is served by (or redirects through) this vendor.
    fn matches(&self, url: &str) -> bool;

    /// Finds the vendor's PDF URL in a rendered page, if one is embedded.
    fn extract_pdf_url(&self, page_source: &str) -> Option<String>;
}

static SILVERCHAIR_PDF_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?i)https?://[^\s"'<>]*silverchair[^\s"'<>]*\.pdf[^\s"'<>]*"#)
});

static WATERMARK_PDF_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?i)https?://[^\s"'<>]*watermark[^\s"'<>]*\.pdf[^\s"'<>]*"#)
});

/// Silverchair-hosted journals (OUP, GeoScienceWorld, and others).
#[derive(Debug, Default, Clone, Copy)]
pub struct Silverchair;

impl WatermarkService for Silverchair {
    fn name(&self) -> &'static str {
        "silverchair"
    }

    fn matches(&self, url: &str) -> bool {
        host_of(url).is_some_and(|host| host.contains("silverchair.com"))
    }

    fn extract_pdf_url(&self, page_source: &str) -> Option<String> {
        first_match(&SILVERCHAIR_PDF_RE, page_source)
    }
}

/// Generic catch-all for vendors with `watermark` in the URL.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericWatermark;

impl WatermarkService for GenericWatermark {
    fn name(&self) -> &'static str {
        "watermark"
    }

    fn matches(&self, url: &str) -> bool {
        url.to_lowercase().contains("watermark")
    }

    fn extract_pdf_url(&self, page_source: &str) -> Option<String> {
        first_match(&WATERMARK_PDF_RE, page_source)
    }
}

/// The built-in vendor list.
#[must_use]
pub fn default_services() -> Vec<Box<dyn WatermarkService>> {
    vec![Box::new(Silverchair), Box::new(GenericWatermark)]
}

/// Returns the first service matching `url`.
#[must_use]
pub fn find_service<'a>(
    services: &'a [Box<dyn WatermarkService>],
    url: &str,
) -> Option<&'a dyn WatermarkService> {
    services
        .iter()
        .find(|service| service.matches(url))
        .map(AsRef::as_ref)
}

fn first_match(regex: &Regex, haystack: &str) -> Option<String> {
    regex
        .find(haystack)
        .map(|m| m.as_str().replace("&amp;", "&"))
}
