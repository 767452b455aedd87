//! Translates the untyped `ConfigEntry`/`Value` collections on `IrProgram`
//! into the typed configuration structs each subsystem crate actually
//! expects (`RecordDef`, `ToolConfig`, `MemoryStoreConfig`, `Stage`, …).
//!
//! This is an invented convention: the distilled IR models every
//! non-flow collection uniformly as `{id, config: Value}` so that
//! `flow-core` doesn't need to depend on `flow-records`/`tooling`/`flow-rag`
//! just to describe their config shapes. `flow-engine` is where those two
//! worlds meet, so it owns turning the raw JSON-ish `Value` into the
//! concrete types those crates' constructors want. Unknown or malformed
//! fields fall back to each type's documented default rather than erroring,
//! matching the teacher's lenient `LocalLlmConfig`/`RemoteLlmConfig::from_env`
//! style of "sensible default over hard failure" for configuration.

use flow_core::value::Value;
use flow_memory::{MemoryKind, MemoryScope, MemoryStoreConfig, PiiPolicy, PipelineStep, RecallRule};
use flow_rag::{FusionMethod, Stage};
use flow_records::{DefaultValue, FieldDef, FieldType, RecordDef};
use indexmap::IndexMap;
use llm::StreamMode;
use std::time::Duration;
use tooling::tool_exec::{
    AuthScheme, BackoffMode, QueryEncoding, RateLimitConfig, ToolConfig, ToolKind, ToolRetryPolicy,
};

fn as_map(v: &Value) -> IndexMap<String, Value> {
    v.as_map().cloned().unwrap_or_default()
}

fn str_field(m: &IndexMap<String, Value>, key: &str) -> Option<String> {
    m.get(key).and_then(Value::as_str).map(str::to_string)
}

fn bool_field(m: &IndexMap<String, Value>, key: &str, default: bool) -> bool {
    m.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn f64_field(m: &IndexMap<String, Value>, key: &str) -> Option<f64> {
    m.get(key).and_then(Value::as_f64)
}

fn usize_field(m: &IndexMap<String, Value>, key: &str, default: usize) -> usize {
    f64_field(m, key).map(|f| f as usize).unwrap_or(default)
}

fn list_field(m: &IndexMap<String, Value>, key: &str) -> Vec<Value> {
    m.get(key).and_then(Value::as_list).map(|s| s.to_vec()).unwrap_or_default()
}

fn string_list_field(m: &IndexMap<String, Value>, key: &str) -> Vec<String> {
    list_field(m, key).iter().filter_map(Value::as_str).map(str::to_string).collect()
}

fn parse_field_type(raw: &str) -> FieldType {
    match raw {
        "text" => FieldType::Text,
        "int" | "integer" => FieldType::Int,
        "float" | "number" => FieldType::Float,
        "bool" | "boolean" => FieldType::Bool,
        "uuid" => FieldType::Uuid,
        "datetime" | "timestamp" => FieldType::DateTime,
        "decimal" => FieldType::Decimal,
        "array" | "list" => FieldType::Array,
        "json" | "object" => FieldType::Json,
        _ => FieldType::String,
    }
}

/// Builds a [`RecordDef`] from a `records.<name>.config` entry shaped like
/// `{frame?, fields: [{name, type, required?, primary_key?, unique?,
/// unique_scope_field?, unique_scope_label?, references?, reference_field?,
/// min?, max?, min_length?, max_length?, enum_values?, pattern?, default?}]}`.
pub fn parse_record_def(name: &str, config: &Value) -> RecordDef {
    let m = as_map(config);
    let mut def = RecordDef::new(name);
    if let Some(frame) = str_field(&m, "frame") {
        def = def.with_frame(frame);
    }
    for field_value in list_field(&m, "fields") {
        let fm = as_map(&field_value);
        let Some(field_name) = str_field(&fm, "name") else { continue };
        let field_type = parse_field_type(str_field(&fm, "type").as_deref().unwrap_or("string"));
        let mut field = FieldDef::new(field_name, field_type);
        if bool_field(&fm, "primary_key", false) {
            field = field.primary_key();
        } else if bool_field(&fm, "required", false) {
            field = field.required();
        }
        if let (Some(scope_field), Some(scope_label)) = (str_field(&fm, "unique_scope_field"), str_field(&fm, "unique_scope_label")) {
            field = field.unique_scoped(scope_field, scope_label);
        } else if bool_field(&fm, "unique", false) {
            field = field.unique();
        }
        if let (Some(record), Some(target_field)) = (str_field(&fm, "references"), str_field(&fm, "reference_field")) {
            field = field.references(record, target_field);
        }
        field.min = f64_field(&fm, "min");
        field.max = f64_field(&fm, "max");
        field.min_length = fm.get("min_length").and_then(Value::as_f64).map(|f| f as usize);
        field.max_length = fm.get("max_length").and_then(Value::as_f64).map(|f| f as usize);
        let enum_values = string_list_field(&fm, "enum_values");
        if !enum_values.is_empty() {
            field.enum_values = Some(enum_values);
        }
        field.pattern = str_field(&fm, "pattern");
        field.default = match fm.get("default") {
            Some(Value::Str(s)) if s == "now" => Some(DefaultValue::Now),
            Some(v) if !v.is_null() => Some(DefaultValue::Literal(v.clone())),
            _ => None,
        };
        def = def.field(field);
    }
    def
}

fn parse_memory_kind(raw: &str) -> Option<MemoryKind> {
    match raw {
        "short_term" => Some(MemoryKind::ShortTerm),
        "long_term" => Some(MemoryKind::LongTerm),
        "episodic" => Some(MemoryKind::Episodic),
        "semantic" => Some(MemoryKind::Semantic),
        "profile" => Some(MemoryKind::Profile),
        _ => None,
    }
}

fn parse_pipeline_step(v: &Value) -> Option<PipelineStep> {
    let m = as_map(v);
    match str_field(&m, "kind").as_deref() {
        Some("llm_summariser") => Some(PipelineStep::LlmSummariser),
        Some("llm_fact_extractor") => Some(PipelineStep::LlmFactExtractor),
        Some("vectoriser") => Some(PipelineStep::Vectoriser { model: str_field(&m, "model").unwrap_or_default() }),
        _ => None,
    }
}

/// Builds a [`MemoryStoreConfig`] from a `memory_stores.<id>.config` entry
/// shaped like `{kind, store_binding, retention_days?, pii_policy?, scope?,
/// pipeline?: [...], time_decay_half_life_days?}`.
pub fn parse_memory_store_config(config: &Value) -> Option<MemoryStoreConfig> {
    let m = as_map(config);
    let kind = parse_memory_kind(str_field(&m, "kind")?.as_str())?;
    let binding = str_field(&m, "store_binding").unwrap_or_else(|| kind.label().to_string());
    let mut cfg = MemoryStoreConfig::new(kind, binding);
    cfg.retention_days = f64_field(&m, "retention_days").map(|f| f as i64);
    cfg.pii_policy = match str_field(&m, "pii_policy").as_deref() {
        Some("strip_email_ip") => PiiPolicy::StripEmailIp,
        _ => PiiPolicy::None,
    };
    cfg.scope = match str_field(&m, "scope").as_deref() {
        Some("per_user") => MemoryScope::PerUser,
        _ => MemoryScope::PerSession,
    };
    cfg.pipeline = list_field(&m, "pipeline").iter().filter_map(parse_pipeline_step).collect();
    cfg.time_decay_half_life_days = f64_field(&m, "time_decay_half_life_days");
    Some(cfg)
}

fn parse_recall_rule(v: &Value) -> Option<RecallRule> {
    let m = as_map(v);
    let source = parse_memory_kind(str_field(&m, "source")?.as_str())?;
    Some(RecallRule { source, count: usize_field(&m, "count", 0), include: m.get("include").and_then(Value::as_bool) })
}

/// Invented config shape for an `ai_calls`/`agents` entry: `{provider, model,
/// system?, stream?, stream_mode?, tools?: [names], memory?: {ai_key,
/// recall: [{source, count, include?}]}}`. The node's actual message/prompt
/// content is the node's `input` expression, not part of this static config
/// (mirrors the Tool Executor split: config here is what's static per call
/// site, the per-invocation payload is evaluated upstream against live
/// `FlowState`).
#[derive(Debug, Clone)]
pub struct AiCallDef {
    pub provider: String,
    pub model: String,
    pub system: Option<String>,
    pub memory_ai_key: Option<String>,
    pub recall_rules: Vec<RecallRule>,
    pub stream: bool,
    pub stream_mode: StreamMode,
    pub tools: Vec<String>,
}

pub fn parse_ai_call_def(config: &Value) -> AiCallDef {
    let m = as_map(config);
    let memory_m = m.get("memory").map(as_map);
    let memory_ai_key = memory_m.as_ref().and_then(|mm| str_field(mm, "ai_key"));
    let recall_rules = memory_m.as_ref().map(|mm| list_field(mm, "recall").iter().filter_map(parse_recall_rule).collect()).unwrap_or_default();
    AiCallDef {
        provider: str_field(&m, "provider").unwrap_or_default(),
        model: str_field(&m, "model").unwrap_or_default(),
        system: str_field(&m, "system"),
        memory_ai_key,
        recall_rules,
        stream: bool_field(&m, "stream", false),
        stream_mode: match str_field(&m, "stream_mode").as_deref() {
            Some("sentences") => StreamMode::Sentences,
            Some("full") => StreamMode::Full,
            _ => StreamMode::Tokens,
        },
        tools: string_list_field(&m, "tools"),
    }
}

fn parse_auth_scheme(v: Option<&Value>) -> AuthScheme {
    let Some(v) = v else { return AuthScheme::None };
    let m = as_map(v);
    match str_field(&m, "scheme").as_deref() {
        Some("bearer") => AuthScheme::Bearer { token: str_field(&m, "token").unwrap_or_default() },
        Some("basic") => AuthScheme::Basic { username: str_field(&m, "username").unwrap_or_default(), password: str_field(&m, "password").unwrap_or_default() },
        Some("api_key_header") => AuthScheme::ApiKeyHeader { header: str_field(&m, "header").unwrap_or_default(), key: str_field(&m, "key").unwrap_or_default() },
        Some("api_key_query") => AuthScheme::ApiKeyQuery { param: str_field(&m, "param").unwrap_or_default(), key: str_field(&m, "key").unwrap_or_default() },
        // OAuth2 is resolved to a static bearer token ahead of time; no
        // refresh flow is implemented (§9 Open Question).
        Some("oauth2") => AuthScheme::OAuth2StaticToken { token: str_field(&m, "token").unwrap_or_default() },
        _ => AuthScheme::None,
    }
}

/// Builds a [`ToolConfig`] from a `tools.<name>.config` entry. `kind`
/// selects `http`/`graphql`/`multipart`/`local_function`; everything else
/// mirrors `ToolConfig`'s own field names.
pub fn parse_tool_config(name: &str, config: &Value) -> ToolConfig {
    let m = as_map(config);
    let kind = match str_field(&m, "kind").as_deref() {
        Some("graphql") => ToolKind::GraphQl,
        Some("multipart") => ToolKind::Multipart,
        Some("local_function") => ToolKind::LocalFunction,
        _ => ToolKind::Http,
    };
    let mut cfg = ToolConfig::new(name, kind);
    cfg.method = str_field(&m, "method").unwrap_or_else(|| "GET".to_string());
    cfg.url_template = str_field(&m, "url").unwrap_or_default();
    cfg.headers = as_map(&m.get("headers").cloned().unwrap_or_else(Value::map))
        .into_iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
        .collect();
    cfg.query = as_map(&m.get("query").cloned().unwrap_or_else(Value::map));
    cfg.query_encoding = match str_field(&m, "query_encoding").as_deref() {
        Some("csv") => QueryEncoding::Csv,
        _ => QueryEncoding::Repeat,
    };
    cfg.body = m.get("body").cloned();
    cfg.graphql_query = str_field(&m, "graphql_query");
    cfg.input_fields = string_list_field(&m, "input_fields");
    cfg.timeout = Duration::from_millis(usize_field(&m, "timeout_ms", 30_000) as u64);
    cfg.auth = parse_auth_scheme(m.get("auth"));
    if let Some(retry_v) = m.get("retry") {
        let rm = as_map(retry_v);
        cfg.retry = ToolRetryPolicy {
            max_attempts: usize_field(&rm, "max_attempts", 1),
            backoff: match str_field(&rm, "backoff").as_deref() {
                Some("constant") => BackoffMode::Constant,
                Some("exponential") => BackoffMode::Exponential,
                _ => BackoffMode::None,
            },
            initial_interval: Duration::from_millis(usize_field(&rm, "initial_interval_ms", 250) as u64),
            max_delay: rm.get("max_delay_ms").and_then(Value::as_f64).map(|f| Duration::from_millis(f as u64)),
            jitter: bool_field(&rm, "jitter", true),
            allow_unsafe: bool_field(&rm, "allow_unsafe", false),
            retriable_status_codes: {
                let codes: Vec<u16> = list_field(&rm, "retriable_status_codes").iter().filter_map(Value::as_f64).map(|f| f as u16).collect();
                if codes.is_empty() { vec![429, 502, 503, 504] } else { codes }
            },
        };
    }
    if let Some(rl_v) = m.get("rate_limit") {
        let rlm = as_map(rl_v);
        cfg.rate_limit = RateLimitConfig {
            per_second: rlm.get("per_second").and_then(Value::as_f64).map(|f| f as u32),
            per_minute: rlm.get("per_minute").and_then(Value::as_f64).map(|f| f as u32),
            burst: rlm.get("burst").and_then(Value::as_f64).map(|f| f as u32),
        };
    }
    cfg.response_schema = m.get("response_schema").map(Value::to_json);
    cfg
}

/// A `vector_stores.<name>.config` entry: `{frame, text_field}`. Built into
/// a [`flow_rag::FrameVectorStore`] against the engine's shared frame store.
#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    pub frame: String,
    pub text_field: String,
}

pub fn parse_vector_store_config(config: &Value) -> VectorStoreConfig {
    let m = as_map(config);
    VectorStoreConfig {
        frame: str_field(&m, "frame").unwrap_or_default(),
        text_field: str_field(&m, "text_field").unwrap_or_else(|| "text".to_string()),
    }
}

/// A `graphs.<name>.config` entry: `{frame, text_field, max_entities_per_doc?}`.
/// Fed to [`flow_rag::GraphEngine::ensure_built`] once at engine construction.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub frame: String,
    pub text_field: String,
    pub max_entities_per_doc: usize,
}

pub fn parse_graph_config(config: &Value) -> GraphConfig {
    let m = as_map(config);
    GraphConfig {
        frame: str_field(&m, "frame").unwrap_or_default(),
        text_field: str_field(&m, "text_field").unwrap_or_else(|| "text".to_string()),
        max_entities_per_doc: usize_field(&m, "max_entities_per_doc", 16),
    }
}

/// Builds one flow's `rag_pipelines.<name>.config.stages: [...]` into the
/// fixed [`Stage`] vocabulary. An entry whose `kind` doesn't match a known
/// stage name is skipped rather than failing the whole pipeline parse,
/// matching the lenient-default convention the rest of this module follows.
pub fn parse_stages(config: &Value) -> Vec<Stage> {
    let m = as_map(config);
    list_field(&m, "stages").iter().filter_map(parse_stage).collect()
}

fn parse_stage(v: &Value) -> Option<Stage> {
    let m = as_map(v);
    let kind = str_field(&m, "kind")?;
    Some(match kind.as_str() {
        "ai_rewrite" => Stage::AiRewrite,
        "query_route" => Stage::QueryRoute { stores: string_list_field(&m, "stores") },
        "multi_query" => Stage::MultiQuery { count: usize_field(&m, "count", 3) },
        "query_decompose" => Stage::QueryDecompose { max_subquestions: usize_field(&m, "max_subquestions", 3) },
        "vector_retrieve" => Stage::VectorRetrieve { store: str_field(&m, "store").unwrap_or_default(), top_k: usize_field(&m, "top_k", 5) },
        "table_lookup" => Stage::TableLookup { frame: str_field(&m, "frame").unwrap_or_default(), field: str_field(&m, "field").unwrap_or_default() },
        "table_summarise" => Stage::TableSummarise { frame: str_field(&m, "frame").unwrap_or_default(), field: str_field(&m, "field").unwrap_or_default() },
        "graph_query" => Stage::GraphQuery { graph: str_field(&m, "graph").unwrap_or_default(), max_hops: usize_field(&m, "max_hops", 2), max_nodes: usize_field(&m, "max_nodes", 20) },
        "graph_summary_lookup" => Stage::GraphSummaryLookup { graph: str_field(&m, "graph").unwrap_or_default() },
        "ai_rerank" => Stage::AiRerank { top_k: usize_field(&m, "top_k", 5) },
        "context_compress" => Stage::ContextCompress { max_chars: usize_field(&m, "max_chars", 4000) },
        "fusion" => Stage::Fusion { method: FusionMethod::parse(str_field(&m, "method").unwrap_or_default().as_str()), sources: string_list_field(&m, "sources") },
        "ai_answer" => Stage::AiAnswer,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;

    #[test]
    fn parses_a_record_def_with_a_primary_key_and_unique_field() {
        let config = Value::from_map(indexmap! {
            "fields".to_string() => Value::List(vec![
                Value::from_map(indexmap! {
                    "name".to_string() => Value::str("id"),
                    "type".to_string() => Value::str("uuid"),
                    "primary_key".to_string() => Value::Bool(true),
                }),
                Value::from_map(indexmap! {
                    "name".to_string() => Value::str("email"),
                    "type".to_string() => Value::str("string"),
                    "unique".to_string() => Value::Bool(true),
                }),
            ]),
        });
        let def = parse_record_def("users", &config);
        assert_eq!(def.name, "users");
        assert!(def.primary_key_field().is_some());
        assert_eq!(def.unique_fields().count(), 1);
    }

    #[test]
    fn parses_stage_list_in_declared_order() {
        let config = Value::from_map(indexmap! {
            "stages".to_string() => Value::List(vec![
                Value::from_map(indexmap! { "kind".to_string() => Value::str("ai_rewrite") }),
                Value::from_map(indexmap! {
                    "kind".to_string() => Value::str("vector_retrieve"),
                    "store".to_string() => Value::str("docs"),
                    "top_k".to_string() => Value::Int(3),
                }),
                Value::from_map(indexmap! { "kind".to_string() => Value::str("ai_answer") }),
            ]),
        });
        let stages = parse_stages(&config);
        assert_eq!(stages.len(), 3);
        assert_eq!(stages[0].name(), "ai_rewrite");
        assert_eq!(stages[2].name(), "ai_answer");
    }
}
