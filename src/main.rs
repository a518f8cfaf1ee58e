//! CLI entry point for pdf-fetcher.

use std::io::{self, IsTerminal, Read};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pdf_fetcher::{BatchRunner, Fetcher, FetcherConfig};
use tracing::{debug, info};

mod cli;

use cli::{Args, parse_identifier_list};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info).
    // Dependencies stay at warn unless RUST_LOG says otherwise.
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            let deps = if args.quiet { "error" } else { "warn" };
            tracing_subscriber::EnvFilter::new(format!("{deps},pdf_fetcher={default_level}"))
        });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let mut config = match &args.config {
        Some(path) => FetcherConfig::load(path)?,
        None => FetcherConfig::default(),
    };
    args.apply(&mut config);

    let mut identifiers = args.identifiers.clone();
    if let Some(path) = &args.input {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read input file {}", path.display()))?;
        identifiers.extend(parse_identifier_list(&text));
    }
    if identifiers.is_empty() && !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        identifiers.extend(parse_identifier_list(&buffer));
    }
    if identifiers.is_empty() {
        info!("No identifiers provided. Pass them as arguments, with --input, or via stdin.");
        info!("Example: pdf-fetcher 10.1038/nature12373");
        return Ok(());
    }

    let fetcher = Arc::new(Fetcher::builder(config).build().await?);
    info!(total = identifiers.len(), "pdf-fetcher starting");

    let report = BatchRunner::new(fetcher).run(&identifiers).await;

    for result in &report.results {
        match (&result.pdf_path, &result.error_reason) {
            (Some(path), _) => {
                println!("{}\t{}\t{}", result.status, result.identifier, path.display());
            }
            (None, Some(reason)) => {
                println!("{}\t{}\t{reason}", result.status, result.identifier);
            }
            (None, None) => println!("{}\t{}", result.status, result.identifier),
        }
    }
    println!("{}", report.summary);

    Ok(())
}
