//! The only [`VectorStore`](crate::VectorStore) this crate ships itself: a
//! frame-backed lexical scorer, not an embedding index. Nothing in the
//! dependency stack talks to an actual vector database, so `vector_retrieve`
//! stages fall back to token-overlap scoring over a named frame's text
//! field — same "naive but honest" posture as [`crate::graph`]'s CapitalCase
//! entity extraction (§9 Open Question). A deployment that wires in a real
//! embedding backend does so by registering its own [`VectorStore`]
//! instead of this one.

use crate::error::Result;
use crate::pipeline::{Match, VectorStore};
use async_trait::async_trait;
use flow_store::FrameStore;
use std::collections::{HashMap, HashSet};

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Scores a frame's rows by Jaccard overlap between the query's tokens and
/// `text_field`'s tokens, highest score first.
pub struct FrameVectorStore {
    store: std::sync::Arc<dyn FrameStore>,
    frame: String,
    text_field: String,
}

impl FrameVectorStore {
    pub fn new(store: std::sync::Arc<dyn FrameStore>, frame: impl Into<String>, text_field: impl Into<String>) -> Self {
        Self { store, frame: frame.into(), text_field: text_field.into() }
    }
}

#[async_trait]
impl VectorStore for FrameVectorStore {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Match>> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.store.all(&self.frame)?;
        let mut scored: Vec<Match> = rows
            .into_iter()
            .enumerate()
            .filter_map(|(i, row)| {
                let text = row.get(&self.text_field)?.as_str()?.to_string();
                let doc_tokens = tokenize(&text);
                if doc_tokens.is_empty() {
                    return None;
                }
                let overlap = query_tokens.intersection(&doc_tokens).count();
                if overlap == 0 {
                    return None;
                }
                let union = query_tokens.union(&doc_tokens).count();
                let score = overlap as f64 / union as f64;
                Some(Match {
                    id: format!("{}:{i}", self.frame),
                    text,
                    score,
                    source_stage: "vector_retrieve".to_string(),
                    metadata: row.into_iter().collect::<HashMap<_, _>>(),
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::Value;
    use flow_store::InMemoryFrameStore;

    #[tokio::test]
    async fn ranks_rows_by_token_overlap() {
        let store = InMemoryFrameStore::new();
        store.ensure_frame("docs");
        store.insert("docs", [("body".to_string(), Value::Str("rust ownership and borrowing".into()))].into_iter().collect()).unwrap();
        store.insert("docs", [("body".to_string(), Value::Str("python list comprehensions".into()))].into_iter().collect()).unwrap();
        let vs = FrameVectorStore::new(std::sync::Arc::new(store), "docs", "body");
        let results = vs.search("rust borrowing rules", 5).await.unwrap();
        assert_eq!(results[0].text, "rust ownership and borrowing");
    }

    #[tokio::test]
    async fn empty_query_returns_no_matches() {
        let store = InMemoryFrameStore::new();
        store.ensure_frame("docs");
        let vs = FrameVectorStore::new(std::sync::Arc::new(store), "docs", "body");
        let results = vs.search("", 5).await.unwrap();
        assert!(results.is_empty());
    }
}
