//! In-process retrieval over a fixed corpus

use async_trait::async_trait;
use std::collections::HashSet;

use super::{Retriever, Snippet};
use crate::agents::error::RetrievalError;

/// Ranks a fixed set of documents by term overlap with the query
#[derive(Debug, Clone, Default)]
pub struct StaticRetriever {
    documents: Vec<(String, String)>,
}

impl StaticRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document under `source_id`
    pub fn with_document(mut self, source_id: impl Into<String>, text: impl Into<String>) -> Self {
        self.documents.push((source_id.into(), text.into()));
        self
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(|t| t.to_lowercase())
        .collect()
}

#[async_trait]
impl Retriever for StaticRetriever {
    fn name(&self) -> &str {
        "static"
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Snippet>, RetrievalError> {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<(usize, Snippet)> = self
            .documents
            .iter()
            .enumerate()
            .filter_map(|(idx, (source_id, text))| {
                let overlap = terms(text).intersection(&query_terms).count();
                (overlap > 0).then(|| {
                    let score = overlap as f32 / query_terms.len() as f32;
                    (idx, Snippet::new(text.clone(), score, source_id.clone()))
                })
            })
            .collect();

        hits.sort_by(|(ia, a), (ib, b)| b.score.total_cmp(&a.score).then(ia.cmp(ib)));
        Ok(hits.into_iter().take(top_k).map(|(_, s)| s).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ranked_by_overlap() {
        let retriever = StaticRetriever::new()
            .with_document("pricing", "Pricing policy: enterprise plans are billed yearly.")
            .with_document("refunds", "Refund policy for enterprise plans and monthly plans.")
            .with_document("hiring", "We are hiring engineers.");

        let hits = retriever.search("enterprise refund policy", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].source_id, "refunds");

        let top = retriever.search("enterprise refund policy", 1).await.unwrap();
        assert_eq!(top.len(), 1);

        assert!(retriever.search("zebra", 5).await.unwrap().is_empty());
    }
}
