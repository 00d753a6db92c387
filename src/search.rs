//! Catalog search client.
//!
//! Sends one POST to the catalog's search endpoint per call and decodes the
//! JSON body into a [`SearchResult`]. No retries, no re-sorting, no
//! filtering: the result is exactly what the provider returned.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{SearchQuery, SearchResult};
use crate::utils::{endpoint_url, truncate_for_log};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Anything that can run a catalog search.
#[async_trait]
pub trait CatalogSearch: Send + Sync {
    /// Search the catalog. An empty `query` returns the provider's default set.
    ///
    /// # Returns
    ///
    /// The result page exactly as delivered: article order and facet counts
    /// are not touched.
    ///
    /// # Errors
    ///
    /// - [`Error::Network`] on transport failure
    /// - [`Error::Protocol`] on a non-success status or an empty or
    ///   undecodable body
    async fn search(&self, query: &str) -> Result<SearchResult>;
}

/// HTTP client for the catalog search endpoint.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    client: reqwest::Client,
    endpoint: String,
    page_size: u32,
    offset: u32,
}

impl CatalogClient {
    /// Create a client for `<catalog_base_url><search_path>`.
    ///
    /// # Arguments
    ///
    /// * `client` - Shared HTTP client
    /// * `config` - Supplies the endpoint, page size and offset
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            endpoint: endpoint_url(&config.catalog_base_url, &config.search_path),
            page_size: config.page_size,
            offset: config.offset,
        }
    }

    /// The full search URL requests are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn protocol(&self, message: impl Into<String>) -> Error {
        Error::Protocol {
            endpoint: self.endpoint.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl CatalogSearch for CatalogClient {
    #[instrument(level = "info", skip_all, fields(%query))]
    async fn search(&self, query: &str) -> Result<SearchResult> {
        let t0 = Instant::now();
        let body = SearchQuery::new(query, self.page_size, self.offset);

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(Error::network)?;

        let status = resp.status();
        let bytes = resp.bytes().await.map_err(Error::network)?;

        if !status.is_success() {
            let preview = String::from_utf8_lossy(&bytes);
            warn!(%status, body = %truncate_for_log(&preview, 200), "Search endpoint returned an error status");
            return Err(self.protocol(format!("status {status}")));
        }
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(self.protocol("empty response body"));
        }

        let result: SearchResult = serde_json::from_slice(&bytes)
            .map_err(|e| self.protocol(format!("undecodable body: {e}")))?;

        info!(
            found = result.found,
            returned = result.articles.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Search completed"
        );
        debug!(links = ?result.articles.iter().map(|a| a.link.as_str()).collect::<Vec<_>>(), "Search result links");
        Ok(result)
    }
}
