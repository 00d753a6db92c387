//! # Leninka Digest
//!
//! Search the CyberLeninka scholarly catalog, download article PDFs, extract
//! their text and condense it with an LLM.
//!
//! ## Architecture
//!
//! Four stage components, each behind an `async_trait` trait:
//! 1. **Search** ([`search::CatalogClient`]): query the catalog for article metadata
//! 2. **Fetch** ([`fetch::HttpFetcher`]): download an article's PDF to local storage
//! 3. **Extract** ([`extract::PdfExtractor`]): turn the PDF into page-marked text
//! 4. **Summarize** ([`summarize::GeminiSummarizer`]): condense the text via Gemini
//!
//! [`pipeline::ArticlePipeline`] drives them. Searches and article runs happen
//! on background tasks; observers receive [`pipeline::Notification`]s over a
//! broadcast channel.
//!
//! ```no_run
//! use leninka_digest::{ArticlePipeline, Config};
//!
//! # async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = ArticlePipeline::from_config(&config)?;
//! let result = pipeline.submit_search("graph theory").await?;
//! if let Ok(result) = result {
//!     let state = pipeline.request_article(result.articles[0].clone()).wait().await;
//!     println!("{}", state.summary.unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod models;
pub mod outputs;
pub mod pipeline;
pub mod search;
pub mod summarize;
pub mod utils;

pub use config::{Config, ConfigError};
pub use error::{Error, ErrorKind, StageError};
pub use models::{ArticleRecord, SearchResult};
pub use pipeline::{
    ArticleHandle, ArticlePipeline, ArticleState, Notification, SearchFailure, SearchPhase, Stage,
};
