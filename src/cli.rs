//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use pdf_fetcher::FetcherConfig;

/// Download PDFs for DOIs and publisher URLs.
///
/// Identifiers come from positional arguments, `--input`, or stdin (one per
/// line, `#` starts a comment line). Results are recorded in a JSON metadata
/// file next to the PDFs so reruns skip what is already on disk.
#[derive(Parser, Debug)]
#[command(name = "pdf-fetcher")]
#[command(author, version, about)]
pub struct Args {
    /// DOIs, DOI URLs, or publisher URLs
    pub identifiers: Vec<String>,

    /// File with one identifier per line
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// JSON config file; flags below override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output directory for PDFs
    #[arg(short = 'o', long, value_name = "DIR")]
    pub pdf_dir: Option<PathBuf>,

    /// Metadata JSON file (default: <pdf-dir>/metadata.json)
    #[arg(long, value_name = "FILE")]
    pub metadata: Option<PathBuf>,

    /// Parallel workers, one per target domain (1-64)
    #[arg(short = 'w', long, value_parser = clap::value_parser!(u8).range(1..=64))]
    pub workers: Option<u8>,

    /// Requests per second to any single domain
    #[arg(long)]
    pub rps: Option<f64>,

    /// Show the browser window
    #[arg(long)]
    pub no_headless: bool,

    /// Skip the sequential retry pass over failures
    #[arg(long)]
    pub no_retry: bool,

    /// SQLite file recording every attempt
    #[arg(long, value_name = "FILE")]
    pub history_db: Option<PathBuf>,

    /// Contact address for Crossref; enables the Crossref PDF lookup
    #[arg(long, value_name = "EMAIL")]
    pub crossref_mailto: Option<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Layers the command-line overrides onto `config`.
    pub fn apply(&self, config: &mut FetcherConfig) {
        if let Some(dir) = &self.pdf_dir {
            config.pdf_dir.clone_from(dir);
            if self.metadata.is_none() {
                config.metadata_path = dir.join("metadata.json");
            }
        }
        if let Some(path) = &self.metadata {
            config.metadata_path.clone_from(path);
        }
        if let Some(workers) = self.workers {
            config.max_workers = usize::from(workers);
        }
        if let Some(rps) = self.rps {
            config.requests_per_second = rps;
        }
        if self.no_headless {
            config.headless = false;
        }
        if self.no_retry {
            config.retry_failures = false;
        }
        if let Some(path) = &self.history_db {
            config.history_db = Some(path.clone());
        }
        if let Some(mailto) = &self.crossref_mailto {
            config.crossref_mailto = Some(mailto.clone());
        }
    }
}

/// One identifier per non-empty line; lines starting with `#` are skipped.
pub fn parse_identifier_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
