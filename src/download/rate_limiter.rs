//! Per-domain rate limiting.
//!
//! [`RateLimiter`] enforces a minimum interval (`1 / requests_per_second`)
//! between requests to the same domain, plus a random jitter whenever it has to
//! hold a caller back. Requests to different domains never wait on each other.
//! Callers for the *same* domain are serialized: the domain lock is held while
//! sleeping, so the next caller measures its interval from the moment the
//! previous one was released.
//!
//! The limiter sits behind the [`Throttle`] trait so batch tests can swap in a
//! recording double.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use pdf_fetcher::download::{RateLimiter, Throttle};
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(2.0, Duration::ZERO..=Duration::from_millis(250));
//!
//! // First request to a domain proceeds immediately
//! limiter.wait_if_needed("example.com").await;
//!
//! // Second request to the same domain waits out the remaining 500ms (+ jitter)
//! limiter.wait_if_needed("example.com").await;
//!
//! // A different domain is unaffected
//! limiter.wait_if_needed("other.org").await;
//! # }
//! ```

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::{CUMULATIVE_DELAY_WARNING_THRESHOLD, MAX_RETRY_AFTER};

/// A per-domain gate every network request passes through.
#[async_trait]
pub trait Throttle: Send + Sync {
    /// Waits until a request to `domain` is allowed, then records it.
    async fn wait_if_needed(&self, domain: &str);

    /// Convenience wrapper that extracts the domain from `url`.
    async fn acquire(&self, url: &str) {
        self.wait_if_needed(&extract_domain(url)).await;
    }
}

/// Per-domain minimum-interval gate with jitter.
///
/// Designed to be wrapped in `Arc` and shared by every worker; it is the only
/// state workers share for a domain.
#[derive(Debug)]
pub struct RateLimiter {
    min_delay: Duration,
    jitter: RangeInclusive<Duration>,
    disabled: bool,
    /// Arc so the `DashMap` shard lock is released before awaiting the inner Mutex.
    domains: DashMap<String, Arc<DomainState>>,
}

#[derive(Debug)]
struct DomainState {
    /// `None` until the first request (which is never delayed).
    last_request: Mutex<Option<Instant>>,
    cumulative_delay_ms: AtomicU64,
}

impl DomainState {
    fn new() -> Self {
        Self {
            last_request: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(total)
    }
}

impl RateLimiter {
    /// Creates a limiter allowing `requests_per_second` per domain.
    ///
    /// Non-positive or non-finite rates disable the minimum interval but keep
    /// per-domain serialization.
    #[must_use]
    #[instrument(skip(jitter))]
    pub fn new(requests_per_second: f64, jitter: RangeInclusive<Duration>) -> Self {
        let min_delay = if requests_per_second.is_finite() && requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        Self::with_min_delay(min_delay, jitter)
    }

    /// Creates a limiter from an explicit minimum interval.
    #[must_use]
    pub fn with_min_delay(min_delay: Duration, jitter: RangeInclusive<Duration>) -> Self {
        debug!(min_delay_ms = min_delay.as_millis(), "creating rate limiter");
        let jitter = if jitter.start() <= jitter.end() {
            jitter
        } else {
            Duration::ZERO..=Duration::ZERO
        };
        Self {
            min_delay,
            jitter,
            disabled: false,
            domains: DashMap::new(),
        }
    }

    /// Creates a limiter that never delays.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            min_delay: Duration::ZERO,
            jitter: Duration::ZERO..=Duration::ZERO,
            disabled: true,
            domains: DashMap::new(),
        }
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Minimum interval between two requests to one domain.
    #[must_use]
    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    #[allow(clippy::cast_possible_truncation)]
    fn sample_jitter(&self) -> Duration {
        let low = self.jitter.start().as_millis() as u64;
        let high = self.jitter.end().as_millis() as u64;
        if high == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }
}

#[async_trait]
impl Throttle for RateLimiter {
    #[instrument(skip(self))]
    async fn wait_if_needed(&self, domain: &str) {
        if self.disabled {
            return;
        }

        let state = self
            .domains
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(DomainState::new()))
            .clone();

        let mut last_request = state.last_request.lock().await;

        if let Some(previous) = *last_request {
            let elapsed = previous.elapsed();
            if elapsed < self.min_delay {
                let delay = self.min_delay.saturating_sub(elapsed) + self.sample_jitter();
                let cumulative = state.add_cumulative_delay(delay);
                debug!(
                    domain,
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "applying rate limit delay"
                );
                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        domain,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "excessive rate limiting - consider reducing request volume to this domain"
                    );
                }
                tokio::time::sleep(delay).await;
            }
        } else {
            debug!(domain, "first request to domain - no delay");
        }

        *last_request = Some(Instant::now());
    }
}

/// Extracts the lowercased host from a URL, or `"unknown"` when it does not parse.
///
/// ```
/// use pdf_fetcher::download::extract_domain;
///
/// assert_eq!(extract_domain("http://Example.COM/Path"), "example.com");
/// assert_eq!(extract_domain("https://localhost:8080/x"), "localhost");
/// assert_eq!(extract_domain("not a url"), "unknown");
/// ```
#[must_use]
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a Retry-After header value (integer seconds or HTTP-date).
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at 1 hour.
///
/// ```
/// use std::time::Duration;
/// use pdf_fetcher::download::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        let seconds = u64::try_from(seconds).ok()?;
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }

    let datetime = httpdate::parse_http_date(header_value).ok()?;
    let delay = datetime
        .duration_since(std::time::SystemTime::now())
        .unwrap_or(Duration::ZERO);
    if delay > MAX_RETRY_AFTER {
        warn!(
            delay_secs = delay.as_secs(),
            "Retry-After date exceeds maximum, capping at 1 hour"
        );
    }
    Some(delay.min(MAX_RETRY_AFTER))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn no_jitter() -> RangeInclusive<Duration> {
        Duration::ZERO..=Duration::ZERO
    }

    // ==================== Construction ====================

    #[test]
    fn test_min_delay_from_requests_per_second() {
        let limiter = RateLimiter::new(2.0, no_jitter());
        assert_eq!(limiter.min_delay(), Duration::from_millis(500));
        assert!(!limiter.is_disabled());
    }

    #[test]
    fn test_non_positive_rate_has_no_interval() {
        assert_eq!(RateLimiter::new(0.0, no_jitter()).min_delay(), Duration::ZERO);
        assert_eq!(RateLimiter::new(f64::NAN, no_jitter()).min_delay(), Duration::ZERO);
    }

    #[test]
    fn test_inverted_jitter_range_is_ignored() {
        let limiter =
            RateLimiter::with_min_delay(Duration::ZERO, Duration::from_secs(2)..=Duration::from_secs(1));
        assert_eq!(limiter.sample_jitter(), Duration::ZERO);
    }

    // ==================== Timing ====================

    #[tokio::test]
    async fn test_first_request_is_immediate() {
        tokio::time::pause();
        let limiter = RateLimiter::new(1.0, no_jitter());
        let start = Instant::now();
        limiter.wait_if_needed("example.com").await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_second_request_waits_min_delay() {
        tokio::time::pause();
        let limiter = RateLimiter::new(1.0, no_jitter());
        limiter.wait_if_needed("example.com").await;
        let start = Instant::now();
        limiter.wait_if_needed("example.com").await;
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_spacing_never_below_min_delay_with_jitter() {
        tokio::time::pause();
        let limiter = RateLimiter::with_min_delay(
            Duration::from_millis(300),
            Duration::from_millis(50)..=Duration::from_millis(150),
        );
        let mut stamps = Vec::new();
        for _ in 0..5 {
            limiter.wait_if_needed("example.com").await;
            stamps.push(Instant::now());
        }
        for pair in stamps.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(300), "gap {gap:?} below interval");
            assert!(gap <= Duration::from_millis(450), "gap {gap:?} above interval + jitter");
        }
    }

    #[tokio::test]
    async fn test_different_domains_do_not_wait() {
        tokio::time::pause();
        let limiter = RateLimiter::new(0.5, no_jitter());
        limiter.wait_if_needed("a.org").await;
        let start = Instant::now();
        limiter.wait_if_needed("b.org").await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_concurrent_same_domain_callers_serialize() {
        tokio::time::pause();
        let limiter = Arc::new(RateLimiter::new(1.0, no_jitter()));
        let start = Instant::now();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    limiter.wait_if_needed("example.com").await;
                    Instant::now()
                })
            })
            .collect();
        let mut finished = Vec::new();
        for handle in handles {
            finished.push(handle.await.unwrap());
        }
        finished.sort();
        assert!(finished[2] - start >= Duration::from_secs(2));
        assert!(finished[1] - finished[0] >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_disabled_never_waits() {
        tokio::time::pause();
        let limiter = RateLimiter::disabled();
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire("https://example.com/x").await;
        }
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    // ==================== Helpers ====================

    #[test]
    fn test_extract_domain() {
        assert_eq!(extract_domain("https://www.Nature.com/a"), "www.nature.com");
        assert_eq!(extract_domain("::"), "unknown");
    }

    #[test]
    fn test_parse_retry_after_variants() {
        assert_eq!(parse_retry_after(" 5 "), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("-1"), None);
        assert_eq!(parse_retry_after("999999"), Some(MAX_RETRY_AFTER));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
    }
}
