//! The RAG Pipeline (C8): a fixed stage vocabulary threaded through a single
//! `RagContext`, executed in the order a flow's `rag` node configuration
//! lists them.

use crate::error::{RagError, Result};
use crate::fusion::{fuse, FusionMethod};
use crate::graph::{extract_entities, GraphEngine};
use async_trait::async_trait;
use flow_core::llm::{ChatModel, ChatRequest};
use flow_core::{Message, Value};
use flow_store::{Condition, CompareOp, FrameStore, QueryOptions};
use indexmap::IndexMap;
use std::collections::HashMap;

/// One retrieved candidate, whichever stage produced it.
#[derive(Debug, Clone)]
pub struct Match {
    pub id: String,
    pub text: String,
    pub score: f64,
    pub source_stage: String,
    pub metadata: HashMap<String, Value>,
}

/// A pluggable similarity search backend, bound to a name in `RagEngine`.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Match>>;
}

/// State threaded through a RAG stage sequence.
#[derive(Debug, Clone, Default)]
pub struct RagContext {
    pub original_question: String,
    pub current_query: String,
    pub queries: Vec<String>,
    pub subquestions: Vec<String>,
    pub chosen_vector_stores: Vec<String>,
    pub matches: Vec<Match>,
    pub matches_per_stage: IndexMap<String, Vec<Match>>,
    pub context: String,
    pub answer: String,
}

impl RagContext {
    pub fn new(question: impl Into<String>) -> Self {
        let question = question.into();
        Self {
            current_query: question.clone(),
            original_question: question,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub enum Stage {
    AiRewrite,
    QueryRoute { stores: Vec<String> },
    MultiQuery { count: usize },
    QueryDecompose { max_subquestions: usize },
    VectorRetrieve { store: String, top_k: usize },
    TableLookup { frame: String, field: String },
    TableSummarise { frame: String, field: String },
    GraphQuery { graph: String, max_hops: usize, max_nodes: usize },
    GraphSummaryLookup { graph: String },
    AiRerank { top_k: usize },
    ContextCompress { max_chars: usize },
    Fusion { method: FusionMethod, sources: Vec<String> },
    AiAnswer,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::AiRewrite => "ai_rewrite",
            Stage::QueryRoute { .. } => "query_route",
            Stage::MultiQuery { .. } => "multi_query",
            Stage::QueryDecompose { .. } => "query_decompose",
            Stage::VectorRetrieve { .. } => "vector_retrieve",
            Stage::TableLookup { .. } => "table_lookup",
            Stage::TableSummarise { .. } => "table_summarise",
            Stage::GraphQuery { .. } => "graph_query",
            Stage::GraphSummaryLookup { .. } => "graph_summary_lookup",
            Stage::AiRerank { .. } => "ai_rerank",
            Stage::ContextCompress { .. } => "context_compress",
            Stage::Fusion { .. } => "fusion",
            Stage::AiAnswer => "ai_answer",
        }
    }
}

/// The bound collaborators a stage sequence runs against: named vector
/// stores, the record frame store, and the graph engine.
#[derive(Default)]
pub struct RagEngine {
    pub vector_stores: IndexMap<String, Box<dyn VectorStore>>,
    pub graphs: GraphEngine,
}

impl RagEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_vector_store(&mut self, name: impl Into<String>, store: Box<dyn VectorStore>) {
        self.vector_stores.insert(name.into(), store);
    }
}

/// Runs one stage, mutating `ctx` in place. `chat_model` is required for
/// `ai_rewrite`/`multi_query`/`query_decompose`/`ai_rerank`/`ai_answer`;
/// `frame_store` is required for `table_lookup`/`table_summarise`/
/// `graph_query`/`graph_summary_lookup`.
pub async fn run_stage(
    stage: &Stage,
    ctx: &mut RagContext,
    engine: &RagEngine,
    chat_model: Option<&dyn ChatModel>,
    frame_store: Option<&dyn FrameStore>,
) -> Result<()> {
    match stage {
        Stage::AiRewrite => {
            let Some(model) = chat_model else { return Ok(()) };
            let prompt = format!(
                "Rewrite this question to be a better search query. Reply with only the rewritten query.\n\n{}",
                ctx.current_query
            );
            let response = model.chat(ChatRequest::new(vec![Message::human(prompt)])).await?;
            let rewritten = response.text().trim();
            if !rewritten.is_empty() {
                ctx.current_query = rewritten.to_string();
            }
        }
        Stage::QueryRoute { stores } => {
            ctx.chosen_vector_stores = stores.iter().filter(|s| engine.vector_stores.contains_key(s.as_str())).cloned().collect();
        }
        Stage::MultiQuery { count } => {
            let Some(model) = chat_model else { return Ok(()) };
            let prompt = format!(
                "Write {count} different search queries for this question, one per line, no numbering.\n\n{}",
                ctx.current_query
            );
            let response = model.chat(ChatRequest::new(vec![Message::human(prompt)])).await?;
            ctx.queries = response.text().lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).take(*count).collect();
        }
        Stage::QueryDecompose { max_subquestions } => {
            let Some(model) = chat_model else { return Ok(()) };
            let prompt = format!(
                "Break this question into at most {max_subquestions} simpler subquestions, one per line, no numbering.\n\n{}",
                ctx.current_query
            );
            let response = model.chat(ChatRequest::new(vec![Message::human(prompt)])).await?;
            ctx.subquestions = response
                .text()
                .lines()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .take(*max_subquestions)
                .collect();
        }
        Stage::VectorRetrieve { store, top_k } => {
            let vector_store = engine.vector_stores.get(store).ok_or_else(|| RagError::UnknownVectorStore(store.clone()))?;
            let results = vector_store.search(&ctx.current_query, *top_k).await?;
            ctx.matches_per_stage.insert("vector_retrieve".to_string(), results.clone());
            ctx.matches.extend(results);
        }
        Stage::TableLookup { frame, field } => {
            let store = frame_store.ok_or_else(|| RagError::MissingFrameStore("table_lookup".to_string()))?;
            let condition = Condition::Leaf { field: field.clone(), op: CompareOp::Eq, value: Value::Str(ctx.current_query.clone()) };
            let rows = store.query(frame, &QueryOptions { condition, ..Default::default() })?;
            let matches: Vec<Match> = rows
                .into_iter()
                .enumerate()
                .map(|(i, row)| Match {
                    id: format!("{frame}:{i}"),
                    text: row.get(field).map(|v| v.to_string()).unwrap_or_default(),
                    score: 1.0,
                    source_stage: "table_lookup".to_string(),
                    metadata: row.into_iter().collect(),
                })
                .collect();
            ctx.matches_per_stage.insert("table_lookup".to_string(), matches.clone());
            ctx.matches.extend(matches);
        }
        Stage::TableSummarise { frame, field } => {
            let store = frame_store.ok_or_else(|| RagError::MissingFrameStore("table_summarise".to_string()))?;
            let rows = store.all(frame)?;
            let values: Vec<String> = rows.iter().filter_map(|r| r.get(field)).map(|v| v.to_string()).collect();
            if !values.is_empty() {
                ctx.context.push_str(&format!("{} entries from {frame}: {}\n", values.len(), values.join("; ")));
            }
        }
        Stage::GraphQuery { graph, max_hops, max_nodes } => {
            let seeds: Vec<String> = extract_entities(&ctx.current_query, 16).into_iter().map(|e| e.to_lowercase()).collect();
            let nodes = engine.graphs.bfs(graph, &seeds, *max_hops, *max_nodes);
            let matches: Vec<Match> = nodes
                .into_iter()
                .enumerate()
                .map(|(i, n)| Match {
                    id: format!("{graph}:{}", n.id),
                    text: n.label,
                    score: 1.0 / (i + 1) as f64,
                    source_stage: "graph_query".to_string(),
                    metadata: HashMap::new(),
                })
                .collect();
            ctx.matches_per_stage.insert("graph_query".to_string(), matches.clone());
            ctx.matches.extend(matches);
        }
        Stage::GraphSummaryLookup { graph } => {
            let components = engine.graphs.connected_components(graph);
            if !components.is_empty() {
                let summary = components.iter().map(|c| c.join(", ")).collect::<Vec<_>>().join(" | ");
                ctx.context.push_str(&format!("Related entity clusters: {summary}\n"));
            }
        }
        Stage::AiRerank { top_k } => {
            ctx.matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            ctx.matches.truncate(*top_k);
        }
        Stage::ContextCompress { max_chars } => {
            if ctx.context.len() > *max_chars {
                ctx.context.truncate(*max_chars);
            }
        }
        Stage::Fusion { method, sources } => {
            let mut pools = Vec::new();
            for source in sources {
                let pool = ctx.matches_per_stage.get(source).ok_or_else(|| RagError::UnknownFusionSource(source.clone()))?;
                pools.push(pool.clone());
            }
            ctx.matches = fuse(*method, &pools, 60.0);
        }
        Stage::AiAnswer => {
            let Some(model) = chat_model else { return Ok(()) };
            let snippets: Vec<String> = ctx.matches.iter().map(|m| m.text.clone()).collect();
            let prompt = format!(
                "Answer the question using only the provided context. If the context doesn't contain the answer, say so.\n\nContext:\n{}\n{}\n\nQuestion: {}",
                ctx.context,
                snippets.join("\n"),
                ctx.original_question
            );
            let response = model.chat(ChatRequest::new(vec![Message::human(prompt)])).await?;
            ctx.answer = response.text().to_string();
        }
    }
    Ok(())
}

/// Runs a full stage sequence against `ctx`, in order.
pub async fn run_pipeline(
    stages: &[Stage],
    ctx: &mut RagContext,
    engine: &RagEngine,
    chat_model: Option<&dyn ChatModel>,
    frame_store: Option<&dyn FrameStore>,
) -> Result<()> {
    for stage in stages {
        run_stage(stage, ctx, engine, chat_model, frame_store).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::Value as CoreValue;
    use flow_store::InMemoryFrameStore;

    struct FixedVectorStore(Vec<Match>);

    #[async_trait]
    impl VectorStore for FixedVectorStore {
        async fn search(&self, _query: &str, top_k: usize) -> Result<Vec<Match>> {
            Ok(self.0.iter().take(top_k).cloned().collect())
        }
    }

    #[tokio::test]
    async fn vector_retrieve_populates_matches() {
        let mut engine = RagEngine::new();
        engine.register_vector_store(
            "docs",
            Box::new(FixedVectorStore(vec![Match { id: "1".into(), text: "hello".into(), score: 0.9, source_stage: "vector_retrieve".into(), metadata: HashMap::new() }])),
        );
        let mut ctx = RagContext::new("hi");
        run_stage(&Stage::VectorRetrieve { store: "docs".into(), top_k: 5 }, &mut ctx, &engine, None, None).await.unwrap();
        assert_eq!(ctx.matches.len(), 1);
    }

    #[tokio::test]
    async fn table_lookup_finds_matching_row() {
        let store = InMemoryFrameStore::new();
        store.ensure_frame("faq");
        store.insert("faq", [("question".to_string(), CoreValue::Str("pricing".into())), ("answer".to_string(), CoreValue::Str("it's free".into()))].into_iter().collect()).unwrap();
        let engine = RagEngine::new();
        let mut ctx = RagContext::new("pricing");
        run_stage(&Stage::TableLookup { frame: "faq".into(), field: "question".into() }, &mut ctx, &engine, None, Some(&store)).await.unwrap();
        assert_eq!(ctx.matches.len(), 1);
    }

    #[tokio::test]
    async fn unknown_vector_store_is_an_error() {
        let engine = RagEngine::new();
        let mut ctx = RagContext::new("hi");
        let err = run_stage(&Stage::VectorRetrieve { store: "missing".into(), top_k: 5 }, &mut ctx, &engine, None, None).await.unwrap_err();
        assert!(matches!(err, RagError::UnknownVectorStore(_)));
    }
}
