//! # Leninka Digest
//!
//! Command-line front end for the article pipeline: search the CyberLeninka
//! catalog, print the result rows, then download, extract and summarize the
//! rows picked with `--select`.
//!
//! ## Usage
//!
//! ```sh
//! GEMINI_API_KEY=... leninka_digest "graph theory" -s 0 -s 3 -j ./digests.json
//! ```
//!
//! Progress is printed by a presenter task subscribed to the pipeline's
//! notifications; the pipeline itself never writes to the terminal.

use clap::Parser;
use futures::future::join_all;
use leninka_digest::cli::Cli;
use leninka_digest::outputs::write_digests;
use leninka_digest::utils::truncate_for_log;
use leninka_digest::{ArticlePipeline, ArticleState, Config, Notification, Stage};
use std::error::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

/// Print notifications until `done` fires.
///
/// Owns the visible result list: a successful search replaces it, a failed
/// or empty one replaces it with a single placeholder row.
async fn present(mut rx: broadcast::Receiver<Notification>, done: CancellationToken) {
    loop {
        // Drain queued notifications before honoring `done`.
        let notification = tokio::select! {
            biased;
            received = rx.recv() => match received {
                Ok(n) => n,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Presenter fell behind; some updates were dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
            _ = done.cancelled() => break,
        };

        match notification {
            Notification::SearchStarted { query, .. } => {
                println!("Searching for \"{query}\"...");
            }
            Notification::SearchSucceeded { result, .. } => {
                println!("Found {} articles", result.found);
                for (i, article) in result.articles.iter().enumerate() {
                    let year = article.year.map(|y| format!(" ({y})")).unwrap_or_default();
                    println!("  [{i}] {}{year}", article.title);
                    if !article.authors.is_empty() {
                        println!("      {}", article.authors.join(", "));
                    }
                }
            }
            Notification::SearchFailed { query, failure, .. } => {
                println!("  {}", failure.placeholder(&query));
            }
            Notification::StageChanged(state) => {
                println!("[{}] {}", state.stage, state.record.title);
            }
            Notification::ArticleDone(state) => {
                println!("[done] {}", state.record.title);
                println!("{}\n", state.summary.as_deref().unwrap_or_default());
            }
            Notification::ArticleFailed { state, error } => {
                println!("[failed] {}: {error}", state.record.title);
            }
        }
    }
}

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let start_time = std::time::Instant::now();
    info!("leninka_digest starting up");

    let args = Cli::parse();
    debug!(query = %args.query, select = ?args.select, "Parsed CLI arguments");

    let config = match Config::from_cli(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    info!(
        base_url = %config.catalog_base_url,
        download_dir = %config.download_dir.display(),
        model = %config.summarizer.model,
        "Configuration loaded"
    );

    let pipeline = ArticlePipeline::from_config(&config)?;
    let done = CancellationToken::new();
    let presenter = tokio::spawn(present(pipeline.subscribe(), done.clone()));

    // ---- Search ----
    let result = match pipeline.submit_search(args.query.clone()).await? {
        Ok(result) => Some(result),
        Err(failure) => {
            warn!(placeholder = %failure.placeholder(&args.query), "Search yielded nothing to show");
            None
        }
    };

    // ---- Selected articles ----
    let mut finished: Vec<ArticleState> = Vec::new();
    if let Some(result) = &result {
        let handles: Vec<_> = args
            .select
            .iter()
            .filter_map(|&i| match result.articles.get(i) {
                Some(record) => Some(pipeline.request_article(record.clone())),
                None => {
                    warn!(index = i, rows = result.articles.len(), "No such result row");
                    None
                }
            })
            .collect();

        let run = join_all(handles.into_iter().map(|h| h.wait()));
        finished = tokio::select! {
            states = run => states,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted; abandoning in-flight articles");
                pipeline.shutdown();
                Vec::new()
            }
        };
    } else if !args.select.is_empty() {
        warn!("Nothing selected: the search returned no rows");
    }

    let succeeded = finished.iter().filter(|s| s.stage == Stage::Done).count();
    for state in finished.iter().filter(|s| s.stage != Stage::Done) {
        if let Some(err) = &state.error {
            error!(
                link = %state.record.link,
                stage = %state.stage,
                error = %truncate_for_log(&err.message, 300),
                "Article did not complete"
            );
        }
    }

    // ---- JSON output ----
    if let Some(path) = &args.json_output {
        if let Err(e) = write_digests(&finished, &args.query, path).await {
            error!(path = %path.display(), error = %e, "Failed to write JSON digest");
        }
    }

    done.cancel();
    let _ = presenter.await;

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        requested = finished.len(),
        succeeded,
        failed = finished.len() - succeeded,
        "Execution complete"
    );

    Ok(())
}
