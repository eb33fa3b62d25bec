//! HTTP retrieval backend

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use super::{Retriever, Snippet};
use crate::agents::error::RetrievalError;

/// Retriever backed by an HTTP search endpoint.
///
/// Sends `POST {url}` with `{"query": ..., "top_k": ...}` and expects a JSON
/// array of `{text, score, source_id}`.
pub struct HttpRetriever {
    client: reqwest::Client,
    url: String,
}

impl HttpRetriever {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self, RetrievalError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    fn name(&self) -> &str {
        "http"
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Snippet>, RetrievalError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "query": query, "top_k": top_k }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::Request(format!(
                "search endpoint returned {}",
                status
            )));
        }

        let mut snippets: Vec<Snippet> = response
            .json()
            .await
            .map_err(|e| RetrievalError::Parse(e.to_string()))?;
        snippets.truncate(top_k);
        Ok(snippets)
    }
}
