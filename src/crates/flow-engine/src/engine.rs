//! `FlowEngine`: the top-level entry point, §4.2. Owns the translation from
//! an untyped [`IrProgram`] into every subsystem's typed configuration (via
//! [`crate::ir_build`]), composes the resulting [`FlowDispatcher`], and
//! drives one run end to end, including the §4.2 redirect loop
//! (`goto_flow` restarts execution in the target flow rather than
//! returning).

use crate::config::EngineConfig;
use crate::dispatcher::{DispatcherDeps, FlowDispatcher, StreamSink};
use crate::ir_build::{
    parse_ai_call_def, parse_graph_config, parse_memory_store_config, parse_record_def,
    parse_stages, parse_tool_config, parse_vector_store_config,
};
use crate::observability::ObservabilitySink;
use crate::resolver::EngineResolver;
use flow_core::ir::IrProgram;
use flow_core::llm::ChatModel;
use flow_core::scheduler::{build_graph, run_node, SchedulerContext, SchedulerError};
use flow_core::state::{FlowState, RunContext};
use flow_core::value::Value;
use flow_rag::{FrameVectorStore, RagEngine};
use flow_records::RecordRegistry;
use flow_store::FrameStore;
use indexmap::IndexMap;
use llm::ProviderAdapter;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// §4.12's flow-level terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Suspended,
    Failed,
}

#[derive(Debug, Clone)]
pub struct FlowRunResult {
    pub status: RunStatus,
    pub state: FlowState,
}

#[derive(Debug, Error)]
pub enum FlowEngineError {
    #[error("no flow named '{0}'")]
    UnknownFlow(String),

    #[error("flow '{0}' redirected to unknown flow '{1}'")]
    RedirectToMissingFlow(String, String),

    #[error("redirect loop exceeded {0} hops without settling")]
    RedirectLoopTooDeep(usize),

    #[error("failed to build graph '{0}': {1}")]
    GraphSetup(String, String),

    #[error(transparent)]
    Graph(#[from] SchedulerError),
}

/// A redirect chain this long almost certainly means two flows are
/// redirecting to each other; §4.2 doesn't bound this explicitly, but an
/// unbounded loop would hang a run forever.
const MAX_REDIRECTS: usize = 32;

/// Collaborators [`FlowEngine::new`] cannot derive from the IR alone:
/// vendor clients, the storage backend, and memory persistence all need
/// credentials or a backing store a declarative program doesn't carry.
pub struct EngineDeps {
    pub store: Arc<dyn FrameStore>,
    pub provider_adapter: Arc<ProviderAdapter>,
    pub memory_backend: Arc<dyn flow_memory::MemoryBackend>,
    pub default_chat_model: Option<Arc<dyn ChatModel>>,
}

pub struct FlowEngine {
    dispatcher: FlowDispatcher,
    ctx: Arc<SchedulerContext>,
    observability: Arc<ObservabilitySink>,
}

impl FlowEngine {
    /// Parses every non-flow `IrProgram` collection into its subsystem's
    /// typed config, validates each flow graph (C10), and builds the
    /// [`FlowDispatcher`] every run executes through.
    pub fn new(ir: &IrProgram, deps: EngineDeps, config: EngineConfig) -> Result<Self, FlowEngineError> {
        for graph in ir.flows.values() {
            build_graph(graph)?;
        }

        let mut record_registry = RecordRegistry::new();
        let mut records = IndexMap::new();
        for (name, entry) in &ir.records {
            let def = parse_record_def(name, &entry.config);
            record_registry.register(def.clone());
            records.insert(name.clone(), def);
        }

        // `ai_calls`/`agents` share one config shape (provider/model/system/
        // tools/memory) so they're parsed into a single lookup table keyed
        // by call id; the node kind recorded on the `FlowNode` (`Ai` vs.
        // `Agent`), not this map, decides whether `FlowDispatcher` runs the
        // tool-invoke-and-feedback loop for a given call.
        let ai_calls = ir
            .ai_calls
            .iter()
            .chain(ir.agents.iter())
            .map(|(name, entry)| (name.clone(), parse_ai_call_def(&entry.config)))
            .collect::<IndexMap<_, _>>();

        let mut memory_configs = IndexMap::new();
        for entry in ir.memory_stores.values() {
            if let Some(cfg) = parse_memory_store_config(&entry.config) {
                memory_configs.insert(cfg.kind, cfg);
            }
        }

        let mut tool_executor = tooling::tool_exec::ToolExecutor::new();
        for (name, entry) in &ir.tools {
            tool_executor.register(parse_tool_config(name, &entry.config));
        }

        let mut rag_engine = RagEngine::new();
        for (name, entry) in &ir.vector_stores {
            let cfg = parse_vector_store_config(&entry.config);
            rag_engine.register_vector_store(name.clone(), Box::new(FrameVectorStore::new(deps.store.clone(), cfg.frame, cfg.text_field)));
        }
        for (name, entry) in &ir.graphs {
            let cfg = parse_graph_config(&entry.config);
            rag_engine
                .graphs
                .ensure_built(name, deps.store.as_ref(), &cfg.frame, &cfg.text_field, cfg.max_entities_per_doc)
                .map_err(|e| FlowEngineError::GraphSetup(name.clone(), e.to_string()))?;
        }

        let rag_pipelines = ir.rag_pipelines.iter().map(|(name, entry)| (name.clone(), parse_stages(&entry.config))).collect::<IndexMap<_, _>>();

        let resolver: Arc<dyn flow_core::env::ExternalResolver> = Arc::new(EngineResolver::new(deps.store.clone()));
        let ctx = Arc::new(SchedulerContext::new(IndexMap::new(), IndexMap::new(), resolver.clone(), config.max_parallel_tasks));
        let observability = Arc::new(ObservabilitySink::new());

        let dispatcher_deps = DispatcherDeps {
            store: deps.store,
            flows: ir.flows.clone(),
            record_registry,
            records,
            provider_adapter: deps.provider_adapter,
            ai_calls,
            memory_backend: deps.memory_backend,
            memory_configs,
            tool_executor: Arc::new(tool_executor),
            rag_engine: Arc::new(rag_engine),
            rag_pipelines,
            default_chat_model: deps.default_chat_model,
            helpers: IndexMap::new(),
            rulegroups: IndexMap::new(),
            resolver,
            ctx: ctx.clone(),
        };

        Ok(Self {
            dispatcher: FlowDispatcher::new(dispatcher_deps, observability.clone()),
            ctx,
            observability,
        })
    }

    pub fn observability(&self) -> &ObservabilitySink {
        &self.observability
    }

    /// Turns a [`RunContext`] into the `state`/`user`/`secret`/`env`/`input`
    /// seed data §6 describes, plus the app/request identifiers a caller
    /// needs back to correlate a run with its origin.
    fn seed_state(run_context: &RunContext) -> FlowState {
        let mut state = FlowState::new();
        state.context.insert("app_name".to_string(), Value::str(run_context.app_name.clone()));
        state.context.insert("request_id".to_string(), Value::str(run_context.request_id.clone()));
        state.context.insert("user".to_string(), Value::from_map(run_context.user_context.clone()));
        state.context.insert("env".to_string(), Value::from_map(run_context.metadata.clone()));
        state.context.insert(
            "secret".to_string(),
            Value::from_map(run_context.secrets.iter().map(|(k, v)| (k.clone(), Value::str(v.clone()))).collect()),
        );
        let input = run_context.inputs().cloned().unwrap_or_default();
        state.context.insert("input".to_string(), Value::from_map(input));
        if !run_context.user_input.is_null() {
            state.data.insert("user_input".to_string(), run_context.user_input.clone());
        }
        state
    }

    /// Runs `flow_name` to completion, following §4.2's redirect loop:
    /// a `goto_flow` node marks `state`'s redirect target instead of
    /// returning, and the engine restarts traversal from that flow's entry
    /// node with the accumulated state carried forward. A target flow that
    /// doesn't exist is a fatal error, not a silent no-op.
    pub async fn run_flow_async(
        &self,
        flow_name: &str,
        run_context: RunContext,
        initial_state: Option<FlowState>,
        stream_sink: Option<StreamSink>,
    ) -> Result<FlowRunResult, FlowEngineError> {
        if let Some(sink) = stream_sink {
            self.dispatcher.set_stream_sink(sink);
        }

        let mut current_flow = flow_name.to_string();
        let mut state = initial_state.unwrap_or_else(|| Self::seed_state(&run_context));
        let mut hops = 0usize;

        let result = loop {
            let graph = self
                .dispatcher
                .flows
                .get(&current_flow)
                .ok_or_else(|| FlowEngineError::UnknownFlow(current_flow.clone()))?;

            let mut run_state = run_node(graph, &graph.entry_id, state, None, None, &self.ctx, &self.dispatcher).await?;

            if run_state.has_redirect() {
                let target = run_state.redirect_target().unwrap_or_default();
                if !self.dispatcher.flows.contains_key(&target) {
                    break Err(FlowEngineError::RedirectToMissingFlow(current_flow.clone(), target));
                }
                self.observability.record_redirect(&current_flow, &target);
                hops += 1;
                if hops > MAX_REDIRECTS {
                    break Err(FlowEngineError::RedirectLoopTooDeep(MAX_REDIRECTS));
                }
                run_state.clear_transient_markers();
                current_flow = target;
                state = run_state;
                continue;
            }

            let status = if run_state.is_awaiting_input() {
                RunStatus::Suspended
            } else if !run_state.errors.iter().all(|e| e.handled) {
                RunStatus::Failed
            } else {
                RunStatus::Completed
            };
            run_state.clear_transient_markers();
            break Ok(FlowRunResult { status, state: run_state });
        };

        self.dispatcher.clear_stream_sink();
        result
    }
}

/// A process-unique handle for one `run_flow_async` invocation, suitable
/// for log correlation (§6's `request_id`, when a caller doesn't supply
/// its own).
pub fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::ir::{FlowGraph, FlowNode, NodeKind};
    use flow_store::InMemoryFrameStore;

    fn deps() -> EngineDeps {
        EngineDeps {
            store: Arc::new(InMemoryFrameStore::new()),
            provider_adapter: Arc::new(ProviderAdapter::new(
                flow_core::breaker::CircuitBreaker::new(Default::default()),
                flow_core::retry::RetryPolicy::default(),
                std::time::Duration::from_secs(30),
            )),
            memory_backend: Arc::new(flow_memory::InMemoryBackend::new()),
            default_chat_model: None,
        }
    }

    fn single_noop_flow(name: &str) -> FlowGraph {
        let mut graph = FlowGraph::new(name, "start");
        graph.add_node(FlowNode::new("start", NodeKind::Noop));
        graph
    }

    #[tokio::test]
    async fn runs_a_trivial_flow_to_completion() {
        let mut ir = IrProgram::new();
        ir.flows.insert("main".to_string(), single_noop_flow("main"));
        let engine = FlowEngine::new(&ir, deps(), EngineConfig::default()).unwrap();
        let result = engine.run_flow_async("main", RunContext::default(), None, None).await.unwrap();
        assert_eq!(result.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_flow_is_an_error() {
        let ir = IrProgram::new();
        let engine = FlowEngine::new(&ir, deps(), EngineConfig::default()).unwrap();
        let err = engine.run_flow_async("missing", RunContext::default(), None, None).await.unwrap_err();
        assert!(matches!(err, FlowEngineError::UnknownFlow(_)));
    }

    #[tokio::test]
    async fn goto_flow_redirects_into_the_target_flow() {
        let mut ir = IrProgram::new();
        let mut first = FlowGraph::new("first", "go");
        first.add_node(FlowNode::new("go", NodeKind::GotoFlow).with_target("second"));
        ir.flows.insert("first".to_string(), first);
        ir.flows.insert("second".to_string(), single_noop_flow("second"));

        let engine = FlowEngine::new(&ir, deps(), EngineConfig::default()).unwrap();
        let result = engine.run_flow_async("first", RunContext::default(), None, None).await.unwrap();
        assert_eq!(result.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn redirect_to_missing_flow_is_fatal() {
        let mut ir = IrProgram::new();
        let mut first = FlowGraph::new("first", "go");
        first.add_node(FlowNode::new("go", NodeKind::GotoFlow).with_target("nowhere"));
        ir.flows.insert("first".to_string(), first);

        let engine = FlowEngine::new(&ir, deps(), EngineConfig::default()).unwrap();
        let err = engine.run_flow_async("first", RunContext::default(), None, None).await.unwrap_err();
        assert!(matches!(err, FlowEngineError::RedirectToMissingFlow(_, _)));
    }
}
