//! `build_memory_messages`/`persist_memory_state`/`vacuum_memory_state`
//! (§4.6): compose recall messages from bound stores, persist new turns
//! and run each kind's post-processing pipeline, and prune retention.

use crate::backend::MemoryBackend;
use crate::decay::rank_by_decay;
use crate::error::Result;
use crate::pii::scrub;
use crate::types::{MemoryKind, MemoryScope, MemoryState, MemoryStoreConfig, PipelineStep, RecallRule, Turn};
use async_trait::async_trait;
use chrono::Utc;
use flow_core::Message;
use indexmap::IndexMap;

#[async_trait]
pub trait Summariser: Send + Sync {
    async fn summarise(&self, turns: &[Turn]) -> Result<String>;
}

#[async_trait]
pub trait FactExtractor: Send + Sync {
    async fn extract(&self, turns: &[Turn]) -> Result<Vec<String>>;
}

fn resolve_session_key(config: &MemoryStoreConfig, session_id: &str, user_id: Option<&str>) -> (String, bool) {
    crate::types::resolve_session_key(config.scope, session_id, user_id)
}

fn retained(history: Vec<Turn>, retention_days: Option<i64>) -> Vec<Turn> {
    let Some(days) = retention_days else { return history };
    let now = Utc::now();
    history.into_iter().filter(|t| t.age_days(now) <= days as f64).collect()
}

fn turn_to_message(turn: &Turn) -> Message {
    match turn.role.as_str() {
        "assistant" | "ai" => Message::assistant(turn.content.clone()),
        "system" => Message::system(turn.content.clone()),
        _ => Message::human(turn.content.clone()),
    }
}

/// Composes the recall messages for one AI call invocation, in canonical
/// kind order (`short_term -> long_term -> episodic -> semantic ->
/// profile`), applying each kind's recall rule, retention window, and
/// optional time-decay ranking.
pub async fn build_memory_messages(
    backend: &dyn MemoryBackend,
    ai_key: &str,
    configs: &IndexMap<MemoryKind, MemoryStoreConfig>,
    recall_rules: &[RecallRule],
    session_id: &str,
    user_id: Option<&str>,
) -> Result<(Vec<Message>, MemoryState)> {
    let mut state = MemoryState::new();
    let mut per_kind: IndexMap<MemoryKind, Vec<Turn>> = IndexMap::new();

    for rule in recall_rules {
        let Some(config) = configs.get(&rule.source) else { continue };
        let (session_key, fallback) = resolve_session_key(config, session_id, user_id);
        state.session_keys.insert(rule.source, session_key.clone());
        state.scope_fallback.insert(rule.source, fallback);

        let history = backend.load_history(ai_key, &session_key, None).await?;
        let history = retained(history, config.retention_days);
        let picked = match config.time_decay_half_life_days {
            Some(half_life) => rank_by_decay(&history, half_life, rule.count, Utc::now()),
            None => {
                let mut picked: Vec<Turn> = history.into_iter().rev().take(rule.count).collect();
                picked.reverse();
                picked
            }
        };
        per_kind.entry(rule.source).or_default().extend(picked);
    }

    for turns in per_kind.values_mut() {
        turns.sort_by_key(|t| t.created_at);
    }

    let mut messages = Vec::new();
    for kind in MemoryKind::all() {
        let Some(turns) = per_kind.get(&kind) else { continue };
        if turns.is_empty() {
            continue;
        }
        if kind == MemoryKind::Profile {
            let joined = turns.iter().map(|t| t.content.as_str()).collect::<Vec<_>>().join("; ");
            messages.push(Message::system(format!("User profile: {joined}")));
        } else {
            messages.extend(turns.iter().map(turn_to_message));
        }
    }

    Ok((messages, state))
}

/// Appends the latest turn to every bound kind and runs each kind's
/// pipeline (`llm_summariser`/`llm_fact_extractor`/`vectoriser`).
#[allow(clippy::too_many_arguments)]
pub async fn persist_memory_state(
    backend: &dyn MemoryBackend,
    configs: &IndexMap<MemoryKind, MemoryStoreConfig>,
    state: &mut MemoryState,
    ai_key: &str,
    session_id: &str,
    user_id: Option<&str>,
    user_text: &str,
    assistant_text: &str,
    summariser: Option<&dyn Summariser>,
    fact_extractor: Option<&dyn FactExtractor>,
) -> Result<()> {
    let mut semantic_session_key = None;
    for (kind, config) in configs {
        let (session_key, fallback) = resolve_session_key(config, session_id, user_id);
        state.session_keys.insert(*kind, session_key.clone());
        state.scope_fallback.insert(*kind, fallback);
        if *kind == MemoryKind::Semantic {
            semantic_session_key = Some(session_key.clone());
        }

        let now = Utc::now();
        let turns = vec![
            Turn::new("human", scrub(&config.pii_policy, user_text), now),
            Turn::new("assistant", scrub(&config.pii_policy, assistant_text), now),
        ];
        backend.append_turns(ai_key, &session_key, turns, user_id).await?;

        for step in &config.pipeline {
            match step {
                PipelineStep::LlmSummariser => {
                    if let Some(summariser) = summariser {
                        let history = backend.get_full_history(ai_key, &session_key).await?;
                        let summary = summariser.summarise(&history).await?;
                        backend.append_summary(ai_key, &session_key, summary).await?;
                    }
                }
                PipelineStep::LlmFactExtractor => {
                    if let Some(extractor) = fact_extractor {
                        let history = backend.get_full_history(ai_key, &session_key).await?;
                        let facts = extractor.extract(&history).await?;
                        backend.append_facts(ai_key, &session_key, facts).await?;
                    }
                }
                PipelineStep::Vectoriser { model } => {
                    let target = semantic_session_key.clone().unwrap_or_else(|| session_key.clone());
                    let marker = format!("[vectoriser:{model}] {assistant_text}");
                    backend.append_turns(ai_key, &target, vec![Turn::new("assistant", marker, now)], user_id).await?;
                }
            }
        }
    }
    Ok(())
}

pub async fn vacuum_memory_state(
    backend: &dyn MemoryBackend,
    configs: &IndexMap<MemoryKind, MemoryStoreConfig>,
    state: &MemoryState,
    ai_key: &str,
) -> Result<usize> {
    let mut total = 0;
    for (kind, config) in configs {
        let Some(retention_days) = config.retention_days else { continue };
        let Some(session_key) = state.session_keys.get(kind) else { continue };
        total += backend.vacuum(ai_key, session_key, retention_days).await?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::types::MemoryScope;

    fn configs() -> IndexMap<MemoryKind, MemoryStoreConfig> {
        let mut m = IndexMap::new();
        m.insert(MemoryKind::ShortTerm, MemoryStoreConfig::new(MemoryKind::ShortTerm, "short"));
        m
    }

    #[tokio::test]
    async fn build_messages_falls_back_to_per_session_without_user_id() {
        let backend = InMemoryBackend::new();
        let mut configs = configs();
        configs.get_mut(&MemoryKind::ShortTerm).unwrap().scope = MemoryScope::PerUser;
        backend.append_turns("ai1", "sess1", vec![Turn::new("human", "hi", Utc::now())], None).await.unwrap();
        let rules = vec![RecallRule { source: MemoryKind::ShortTerm, count: 5, include: None }];
        let (messages, state) = build_memory_messages(&backend, "ai1", &configs, &rules, "sess1", None).await.unwrap();
        assert!(state.scope_fallback.get(&MemoryKind::ShortTerm).copied().unwrap_or(false));
        assert!(messages.is_empty(), "per_session fallback key differs from the per_user key data was written under");
    }

    #[tokio::test]
    async fn persist_then_recall_round_trips() {
        let backend = InMemoryBackend::new();
        let configs = configs();
        let mut state = MemoryState::new();
        persist_memory_state(&backend, &configs, &mut state, "ai1", "sess1", None, "hello", "hi there", None, None).await.unwrap();
        let rules = vec![RecallRule { source: MemoryKind::ShortTerm, count: 5, include: None }];
        let (messages, _) = build_memory_messages(&backend, "ai1", &configs, &rules, "sess1", None).await.unwrap();
        assert_eq!(messages.len(), 2);
    }
}
