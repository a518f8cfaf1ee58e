//! Anti-bot challenge and paywall classification of rendered pages.
//!
//! Cloudflare detection is two-tiered. Primary markers only ever appear on
//! interstitials, so any one of them is conclusive. Secondary markers are
//! challenge-platform script names that large, legitimate article pages also
//! embed; they only count when the page is small or its title says it is
//! checking the browser.
//!
//! Other captchas (reCAPTCHA, hCaptcha, publisher security checks) are gated
//! on page size the same way: a marker on a small page is enough, a larger
//! page also needs a "please complete" prompt.

use std::fmt;

/// Markers that identify a challenge page on their own (matched against the
/// lowercased page source).
const PRIMARY_SOURCE_MARKERS: &[&str] = &[
    "i am human",
    "i'm not a robot",
    "verify you are human",
    "are you a robot",
    "cf-challenge",
    "cf-chl-widget",
    "cf-turnstile",
    "turnstile",
];

/// Matched only near the top of the document, where interstitials put it.
const PRIMARY_HEAD_MARKER: &str = "checking your browser";
const HEAD_WINDOW: usize = 2000;

const TITLE_MARKER: &str = "just a moment";

const SECONDARY_SOURCE_MARKERS: &[&str] = &["challenge-platform", "cf-browser-verification"];
const SECONDARY_TITLE_MARKERS: &[&str] = &["just a moment", "checking", "verif"];

/// Pages at least this large are assumed to be real content.
pub const SMALL_PAGE_BYTES: usize = 100_000;

/// Matched against the lowercased page source.
const CAPTCHA_MARKERS: &[&str] = &[
    "captcha",
    "recaptcha",
    "hcaptcha",
    "verify you are human",
    "verify you are not a robot",
    "prove you are human",
    "security check",
];

/// Below this size any captcha marker is conclusive.
pub const CAPTCHA_SMALL_PAGE_BYTES: usize = 50_000;
/// Up to this size a captcha marker plus a completion prompt is conclusive.
pub const CAPTCHA_MEDIUM_PAGE_BYTES: usize = 200_000;

const PAYWALL_MARKERS: &[&str] = &[
    "purchase pdf",
    "subscription required",
    "sign in to access",
    "institutional access required",
    "pay per view",
];

/// Which kind of interstitial blocked a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeKind {
    Cloudflare,
    Captcha,
}

impl ChallengeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cloudflare => "cloudflare",
            Self::Captcha => "captcha",
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a rendered page; Cloudflare wins when both match.
#[must_use]
pub fn detect_challenge(url: &str, title: &str, source: &str) -> Option<ChallengeKind> {
    if is_challenge_page(title, source) {
        Some(ChallengeKind::Cloudflare)
    } else if is_captcha_page(url, title, source) {
        Some(ChallengeKind::Captcha)
    } else {
        None
    }
}

/// Returns true when the rendered page is a Cloudflare-style interstitial.
#[must_use]
pub fn is_challenge_page(title: &str, source: &str) -> bool {
    let title = title.to_lowercase();
    let source = source.to_lowercase();

    if title.contains(TITLE_MARKER) {
        return true;
    }
    if PRIMARY_SOURCE_MARKERS
        .iter()
        .any(|marker| source.contains(marker))
    {
        return true;
    }
    if head(&source).contains(PRIMARY_HEAD_MARKER) {
        return true;
    }

    let has_secondary = SECONDARY_SOURCE_MARKERS
        .iter()
        .any(|marker| source.contains(marker));
    has_secondary
        && (source.len() < SMALL_PAGE_BYTES
            || SECONDARY_TITLE_MARKERS
                .iter()
                .any(|marker| title.contains(marker)))
}

/// Returns true when the rendered page is a non-Cloudflare captcha: reCAPTCHA,
/// hCaptcha, a generic human check, or an IOP-style security page.
#[must_use]
pub fn is_captcha_page(url: &str, title: &str, source: &str) -> bool {
    let url = url.to_lowercase();
    let title = title.to_lowercase();
    let source = source.to_lowercase();

    let has_captcha = source.contains("captcha");
    let captcha_marker = CAPTCHA_MARKERS.iter().any(|marker| source.contains(marker))
        || (source.contains("access denied") && has_captcha);
    let iop_marker = (source.contains("iop")
        && source.contains("security")
        && (has_captcha || source.contains("verify")))
        || (url.contains("iop.org") && source.contains("security"))
        || (title.contains("iop") && (title.contains("verify") || title.contains("security")));

    if iop_marker {
        return true;
    }
    if !captcha_marker {
        return false;
    }
    source.len() < CAPTCHA_SMALL_PAGE_BYTES
        || (source.len() < CAPTCHA_MEDIUM_PAGE_BYTES
            && source.contains("please")
            && source.contains("complete"))
}

/// Returns true when the rendered page asks for payment or institutional access.
#[must_use]
pub fn is_paywall_page(source: &str) -> bool {
    let source = source.to_lowercase();
    PAYWALL_MARKERS.iter().any(|marker| source.contains(marker))
}

fn head(source: &str) -> &str {
    if source.len() <= HEAD_WINDOW {
        return source;
    }
    let mut end = HEAD_WINDOW;
    while !source.is_char_boundary(end) {
        end -= 1;
    }
    &source[..end]
}
