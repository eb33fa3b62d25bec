//! Knowledge retrieval backends
//!
//! A retriever returns ranked text snippets for a query. The context assembler
//! owns the timeout and the degradation policy; backends just report errors.

mod http;
mod static_corpus;

pub use http::HttpRetriever;
pub use static_corpus::StaticRetriever;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::agents::config::RetrievalConfig;
use crate::agents::error::RetrievalError;

/// A ranked passage returned by a retriever
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub text: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub source_id: String,
}

impl Snippet {
    pub fn new(text: impl Into<String>, score: f32, source_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            score,
            source_id: source_id.into(),
        }
    }
}

/// Trait for retrieval backends
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Backend name, for logs
    fn name(&self) -> &str;

    /// Up to `top_k` snippets, best first
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Snippet>, RetrievalError>;
}

/// Retriever that never finds anything
#[derive(Debug, Clone, Default)]
pub struct NoRetrieval;

#[async_trait]
impl Retriever for NoRetrieval {
    fn name(&self) -> &str {
        "none"
    }

    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<Snippet>, RetrievalError> {
        Ok(Vec::new())
    }
}

/// Create a retriever from configuration
pub fn create_retriever(config: &RetrievalConfig) -> Result<Arc<dyn Retriever>, RetrievalError> {
    match (&config.enabled, &config.url) {
        (true, Some(url)) => Ok(Arc::new(HttpRetriever::new(url, config.timeout_secs)?)),
        (true, None) => Err(RetrievalError::Request(
            "retrieval is enabled but no url is configured".to_string(),
        )),
        (false, _) => Ok(Arc::new(NoRetrieval)),
    }
}
