//! Constants for the download module (timeouts, signatures, rate limiting).

use std::time::Duration;

/// Magic bytes every accepted file must start with.
pub const PDF_SIGNATURE: &[u8; 4] = b"%PDF";

/// Default HTTP connect timeout.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default per-request timeout for PDF transfers.
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 60;

/// Default per-request timeout for DOI resolution.
pub const RESOLVE_TIMEOUT_SECS: u64 = 30;

/// Bound on waiting for a browser-initiated download to land on disk.
pub const DOWNLOAD_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between download directory scans.
pub const DOWNLOAD_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Warning threshold for cumulative rate limit delay per domain (30 seconds).
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Interval between checks for a challenge page clearing in the browser.
pub const CHALLENGE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default bound on waiting for a challenge page to clear.
pub const CHALLENGE_WAIT: Duration = Duration::from_secs(30);
