//! `MemoryState` (§3) and the configuration shapes a `MemoryStoreConfig`
//! compiles to: kind, scope, retention, PII policy, recall rules, and an
//! optional post-processing pipeline.

use chrono::{DateTime, Utc};
use flow_core::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    ShortTerm,
    LongTerm,
    Episodic,
    Semantic,
    Profile,
}

impl MemoryKind {
    pub fn all() -> [MemoryKind; 5] {
        [MemoryKind::ShortTerm, MemoryKind::LongTerm, MemoryKind::Episodic, MemoryKind::Semantic, MemoryKind::Profile]
    }

    pub fn label(self) -> &'static str {
        match self {
            MemoryKind::ShortTerm => "short_term",
            MemoryKind::LongTerm => "long_term",
            MemoryKind::Episodic => "episodic",
            MemoryKind::Semantic => "semantic",
            MemoryKind::Profile => "profile",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    PerSession,
    PerUser,
}

/// Simple named PII policies; `strip-email-ip` is the one concrete policy
/// named by the source runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PiiPolicy {
    StripEmailIp,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineStep {
    LlmSummariser,
    LlmFactExtractor,
    Vectoriser { model: String },
}

/// `{source, count|top_k, include?}` — `include` is only meaningful for
/// `profile`; well-formedness is enforced upstream at IR-lowering time, so
/// the runtime trusts it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallRule {
    pub source: MemoryKind,
    pub count: usize,
    #[serde(default)]
    pub include: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    pub kind: MemoryKind,
    pub store_binding: String,
    pub retention_days: Option<i64>,
    pub pii_policy: PiiPolicy,
    pub scope: MemoryScope,
    pub pipeline: Vec<PipelineStep>,
    pub time_decay_half_life_days: Option<f64>,
}

impl MemoryStoreConfig {
    pub fn new(kind: MemoryKind, store_binding: impl Into<String>) -> Self {
        Self {
            kind,
            store_binding: store_binding.into(),
            retention_days: None,
            pii_policy: PiiPolicy::None,
            scope: MemoryScope::PerSession,
            pipeline: Vec::new(),
            time_decay_half_life_days: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl Turn {
    pub fn new(role: impl Into<String>, content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self { role: role.into(), content: content.into(), created_at, metadata: None }
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_seconds() as f64 / 86_400.0
    }
}

/// Per-AI-call, ephemeral per invocation: the session key resolved for
/// each bound kind and whether scope fell back from `per_user` to
/// `per_session` because no user id was available.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub session_keys: std::collections::HashMap<MemoryKind, String>,
    pub scope_fallback: std::collections::HashMap<MemoryKind, bool>,
    pub pending_writes: Vec<(MemoryKind, Turn)>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// `per_session -> session_id`; `per_user -> "user:<id>"` if available,
/// else falls back to `per_session`, flagged.
pub fn resolve_session_key(scope: MemoryScope, session_id: &str, user_id: Option<&str>) -> (String, bool) {
    match scope {
        MemoryScope::PerSession => (session_id.to_string(), false),
        MemoryScope::PerUser => match user_id {
            Some(uid) => (format!("user:{uid}"), false),
            None => (session_id.to_string(), true),
        },
    }
}
