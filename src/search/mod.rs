//! Web-search enrichment.
//!
//! Medium and High routes fold search results into the prompt before
//! generation. The provider is an external collaborator: the orchestrator
//! bounds every call with a timeout and treats any failure as "no results".

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

impl SearchResult {
    pub fn new(title: impl Into<String>, url: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
        }
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>>;
}

/// Provider that never finds anything. Enriched routes then generate from the bare prompt.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSearch;

#[async_trait]
impl SearchProvider for NoopSearch {
    fn name(&self) -> &str {
        "noop"
    }

    async fn search(&self, _query: &str) -> Result<Vec<SearchResult>> {
        Ok(Vec::new())
    }
}

/// Append `results` to `prompt` as a JSON source list. No results leaves the prompt untouched.
pub fn enrich_prompt(prompt: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return prompt.to_string();
    }
    let sources = json!({
        "sources": results
            .iter()
            .map(|r| json!({ "title": r.title, "url": r.url, "snippet": r.snippet }))
            .collect::<Vec<_>>()
    });
    format!("{}\n\nAdditional context (sources): {}", prompt, sources)
}
