//! `MemoryBackend` contract (§6): `append_turns`, `load_history`,
//! `get_full_history`, `append_summary`, `append_facts`. [`InMemoryBackend`]
//! is the reference implementation; real deployments point `ai_key` at a
//! vector store or database-backed service instead.

use crate::error::Result;
use crate::types::Turn;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

#[async_trait]
pub trait MemoryBackend: Send + Sync {
    async fn append_turns(&self, ai_key: &str, session_key: &str, turns: Vec<Turn>, user_id: Option<&str>) -> Result<()>;

    async fn load_history(&self, ai_key: &str, session_key: &str, limit: Option<usize>) -> Result<Vec<Turn>>;

    async fn get_full_history(&self, ai_key: &str, session_key: &str) -> Result<Vec<Turn>>;

    async fn append_summary(&self, ai_key: &str, session_key: &str, summary: String) -> Result<()>;

    async fn append_facts(&self, ai_key: &str, session_key: &str, facts: Vec<String>) -> Result<()>;

    /// Physically drops entries older than `retention_days` (§4.6
    /// `vacuum_memory_state`); the default does nothing for backends that
    /// expire server-side.
    async fn vacuum(&self, _ai_key: &str, _session_key: &str, _retention_days: i64) -> Result<usize> {
        Ok(0)
    }
}

type Key = (String, String);

#[derive(Default)]
struct Bucket {
    turns: Vec<Turn>,
    summaries: Vec<String>,
    facts: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryBackend {
    buckets: RwLock<HashMap<Key, Bucket>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(ai_key: &str, session_key: &str) -> Key {
        (ai_key.to_string(), session_key.to_string())
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    async fn append_turns(&self, ai_key: &str, session_key: &str, turns: Vec<Turn>, _user_id: Option<&str>) -> Result<()> {
        let mut buckets = self.buckets.write();
        buckets.entry(Self::key(ai_key, session_key)).or_default().turns.extend(turns);
        Ok(())
    }

    async fn load_history(&self, ai_key: &str, session_key: &str, limit: Option<usize>) -> Result<Vec<Turn>> {
        let buckets = self.buckets.read();
        let Some(bucket) = buckets.get(&Self::key(ai_key, session_key)) else { return Ok(Vec::new()) };
        match limit {
            Some(n) => Ok(bucket.turns.iter().rev().take(n).rev().cloned().collect()),
            None => Ok(bucket.turns.clone()),
        }
    }

    async fn get_full_history(&self, ai_key: &str, session_key: &str) -> Result<Vec<Turn>> {
        self.load_history(ai_key, session_key, None).await
    }

    async fn append_summary(&self, ai_key: &str, session_key: &str, summary: String) -> Result<()> {
        let mut buckets = self.buckets.write();
        buckets.entry(Self::key(ai_key, session_key)).or_default().summaries.push(summary);
        Ok(())
    }

    async fn append_facts(&self, ai_key: &str, session_key: &str, facts: Vec<String>) -> Result<()> {
        let mut buckets = self.buckets.write();
        buckets.entry(Self::key(ai_key, session_key)).or_default().facts.extend(facts);
        Ok(())
    }

    async fn vacuum(&self, ai_key: &str, session_key: &str, retention_days: i64) -> Result<usize> {
        let mut buckets = self.buckets.write();
        let Some(bucket) = buckets.get_mut(&Self::key(ai_key, session_key)) else { return Ok(0) };
        let now = chrono::Utc::now();
        let before = bucket.turns.len();
        bucket.turns.retain(|t| t.age_days(now) <= retention_days as f64);
        Ok(before - bucket.turns.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn append_then_load_round_trips() {
        let backend = InMemoryBackend::new();
        backend.append_turns("ai1", "sess1", vec![Turn::new("human", "hi", chrono::Utc::now())], None).await.unwrap();
        let loaded = backend.load_history("ai1", "sess1", None).await.unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn vacuum_drops_entries_older_than_retention() {
        let backend = InMemoryBackend::new();
        let old = chrono::Utc::now() - ChronoDuration::days(40);
        backend.append_turns("ai1", "sess1", vec![Turn::new("human", "old", old)], None).await.unwrap();
        backend.append_turns("ai1", "sess1", vec![Turn::new("human", "new", chrono::Utc::now())], None).await.unwrap();
        let removed = backend.vacuum("ai1", "sess1", 30).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(backend.get_full_history("ai1", "sess1").await.unwrap().len(), 1);
    }
}
