//! PDF transfer: throttling, retry, streaming, validation.
//!
//! # Features
//!
//! - Streaming HTTP downloads staged next to the target and renamed into place
//! - `%PDF` signature validation on every path (HTTP, browser, HTTP replay)
//! - Per-domain rate limiting with jitter ([`RateLimiter`])
//! - Exponential backoff for transient failures, honoring `Retry-After`
//! - Browser fallback for 401/403 responses and watermarking services
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use pdf_fetcher::download::{DownloadManager, DownloadRequest, RateLimiter};
//! use pdf_fetcher::http_client::HttpClientOptions;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = Arc::new(RateLimiter::new(1.0, Duration::ZERO..=Duration::ZERO));
//! let manager = DownloadManager::new(&HttpClientOptions::default(), limiter)?;
//! let request = DownloadRequest::new("https://example.com/paper.pdf", Path::new("./pdfs/paper.pdf"));
//! manager.download(&request, None).await?;
//! # Ok(())
//! # }
//! ```

pub mod constants;
mod error;
mod manager;
pub mod rate_limiter;
mod retry;
pub mod signature;
pub mod watermark;

pub use error::DownloadError;
pub use manager::{DownloadManager, DownloadRequest};
pub use rate_limiter::{RateLimiter, Throttle, extract_domain, parse_retry_after};
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error};
pub use watermark::{GenericWatermark, Silverchair, WatermarkService};
