//! Web search and page extraction client
//!
//! Thin HTTP client for the search sidecar, which exposes
//! `GET /search?q=` returning ranked results and `GET /read/{url}`
//! returning extracted page content as a JSON string. Result slicing,
//! snippet truncation, and failure swallowing are tool-layer concerns;
//! this client reports transport and status errors as-is.

use crate::config::SearchSettings;
use crate::error::{HermesError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// One ranked result from the search provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

/// Abstraction over the search sidecar
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Ranked results for a query; errors on non-2xx or transport failure
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>>;

    /// Extracted content of a page; errors on non-2xx or transport failure
    async fn read(&self, url: &str) -> Result<String>;
}

/// HTTP client for the search sidecar
pub struct SearchClient {
    settings: SearchSettings,
    client: reqwest::Client,
}

impl SearchClient {
    pub fn new(settings: SearchSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self { settings, client })
    }

    fn base_url(&self) -> &str {
        self.settings.base_url.trim_end_matches('/')
    }
}

#[async_trait]
impl SearchBackend for SearchClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        debug!("Search query: {}", query);

        let response = self
            .client
            .get(format!("{}/search", self.base_url()))
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| HermesError::SearchApi(format!("Search request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(HermesError::SearchApi(format!(
                "Search API error: {} {}",
                response.status().as_u16(),
                response.status().canonical_reason().unwrap_or("unknown")
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| HermesError::SearchApi(format!("Invalid search response: {}", e)))?;

        Ok(parsed.results)
    }

    async fn read(&self, url: &str) -> Result<String> {
        debug!("Reading page: {}", url);

        let response = self
            .client
            .get(format!("{}/read/{}", self.base_url(), url))
            .send()
            .await
            .map_err(|e| HermesError::SearchApi(format!("Read request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(HermesError::SearchApi(format!(
                "Failed to read URL: {}",
                response.status().as_u16()
            )));
        }

        // The sidecar returns the extracted text as a JSON string body
        response
            .json::<String>()
            .await
            .map_err(|e| HermesError::SearchApi(format!("Invalid read response: {}", e)))
    }
}
