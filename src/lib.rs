//! PDF Fetcher Core Library
//!
//! Turns scholarly identifiers (DOIs, DOI URLs, publisher URLs) into
//! verified PDF files on disk, driving a browser where plain HTTP is refused.
//!
//! # Architecture
//!
//! - [`identifier`] - classification and normalization of raw input
//! - [`resolver`] - DOI to landing page resolution, Crossref lookups
//! - [`publisher`] - publisher detection and domain prediction
//! - [`challenge`] - anti-bot and paywall page detection
//! - [`finder`] - ordered PDF link discovery strategies
//! - [`browser`] - the [`browser::BrowserSession`] seam and its drivers
//! - [`download`] - rate limiting, retries, and verified file transfer
//! - [`fetcher`] - the per-identifier pipeline and the batch runner
//! - [`metadata`] - durable JSON outcome records
//! - [`db`] - optional SQLite attempt history

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod browser;
pub mod challenge;
pub mod config;
pub mod db;
pub mod download;
pub mod error;
pub mod fetcher;
pub mod finder;
pub mod http_client;
pub mod identifier;
pub mod metadata;
pub mod publisher;
pub mod resolver;
pub mod user_agent;

#[cfg(test)]
pub mod test_support;

// Re-export commonly used types
pub use config::{ConfigError, FetcherConfig};
pub use db::Database;
pub use error::FetchError;
pub use fetcher::{
    BatchReport, BatchRunner, BatchSummary, DownloadResult, DownloadStatus, Fetcher,
    FetcherBuilder, SetupError,
};
pub use identifier::{Identifier, IdentifierKind, InvalidIdentifier};
pub use metadata::{MetadataRecord, MetadataStore};
pub use publisher::Publisher;
