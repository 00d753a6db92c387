//! Command-line interface definitions for Leninka Digest.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Settings that also live in the YAML config file override it when given;
//! the credential and a few paths can come from environment variables.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the Leninka Digest application.
///
/// # Examples
///
/// ```sh
/// # Show the catalog's default article set
/// leninka_digest
///
/// # Search and summarize the first two hits
/// GEMINI_API_KEY=... leninka_digest "graph theory" --select 0 --select 1
///
/// # Write the finished digests to a JSON file
/// leninka_digest "graph theory" -s 0 --json-output ./digests.json
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Search query; empty shows the catalog's default set
    #[arg(default_value = "")]
    pub query: String,

    /// Index of a result row to download and summarize (repeatable)
    #[arg(short, long = "select")]
    pub select: Vec<usize>,

    /// Optional path to a config.yaml file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory fetched PDFs are written to
    #[arg(short, long, env = "LENINKA_DOWNLOAD_DIR")]
    pub download_dir: Option<PathBuf>,

    /// Catalog base URL
    #[arg(long, env = "LENINKA_BASE_URL")]
    pub base_url: Option<String>,

    /// Generation API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Generation model name
    #[arg(long)]
    pub model: Option<String>,

    /// Number of search results to request
    #[arg(long)]
    pub page_size: Option<u32>,

    /// Offset into the search results
    #[arg(long)]
    pub offset: Option<u32>,

    /// Per-stage deadline in seconds (0 disables)
    #[arg(long)]
    pub stage_timeout_secs: Option<u64>,

    /// Write completed article digests to this JSON file
    #[arg(short, long)]
    pub json_output: Option<PathBuf>,
}
