//! `FlowDispatcher`: the concrete [`NodeDispatcher`] every flow run executes
//! through. This is where the Step Scheduler's generic graph walk (owned by
//! `flow_core::scheduler`) meets the concrete subsystems it can't depend on
//! directly — the Provider Adapter, Tool Executor, Record Layer, RAG
//! Pipeline, Memory Composer, and Transaction Manager.

use crate::interpreter::{Flow, Interpreter, InterpreterError};
use crate::ir_build::AiCallDef;
use crate::observability::ObservabilitySink;
use crate::transaction::{TransactionError, TransactionManager};
use async_trait::async_trait;
use flow_core::env::ExternalResolver;
use flow_core::expr::{Expr, HelperFn, RuleGroup};
use flow_core::ir::{FlowGraph, FlowNode, NodeKind};
use flow_core::messages::Message;
use flow_core::scheduler::{run_node, DispatchError, NodeDispatcher, SchedulerContext};
use flow_core::state::FlowState;
use flow_core::value::Value;
use flow_core::llm::ChatModel;
use flow_memory::{build_memory_messages, persist_memory_state, MemoryKind, MemoryStoreConfig};
use flow_rag::{run_pipeline, Match, RagContext, RagEngine, Stage};
use flow_records::{find, FindRequest, RecordDef, RecordRegistry};
use flow_store::{CompareOp, Condition, FrameStore, Row};
use indexmap::IndexMap;
use llm::ProviderAdapter;
use parking_lot::Mutex;
use std::sync::Arc;
use tooling::tool_exec::ToolExecutor;

/// Every subsystem error this module touches converts through this instead
/// of a per-type `From` impl: `DispatchError` and most subsystem error
/// types are both foreign to this crate, so a blanket `From` per type would
/// violate the orphan rule.
fn disp<E: std::fmt::Display>(e: E) -> DispatchError {
    DispatchError::new(e.to_string())
}

impl From<InterpreterError> for DispatchError {
    fn from(e: InterpreterError) -> Self {
        DispatchError::new(e.to_string())
    }
}

/// A streamed `ai`/`agent` node forwards its chunks here instead of
/// building the full response in memory first. `None` means no caller is
/// currently listening (the common case for a non-interactive run).
pub type StreamSink = Arc<dyn Fn(llm::StreamEvent) + Send + Sync>;

pub struct FlowDispatcher {
    pub store: Arc<dyn FrameStore>,
    pub flows: IndexMap<String, FlowGraph>,
    pub record_registry: RecordRegistry,
    pub records: IndexMap<String, RecordDef>,
    pub provider_adapter: Arc<ProviderAdapter>,
    pub ai_calls: IndexMap<String, AiCallDef>,
    pub memory_backend: Arc<dyn flow_memory::MemoryBackend>,
    pub memory_configs: IndexMap<MemoryKind, MemoryStoreConfig>,
    pub tool_executor: Arc<ToolExecutor>,
    pub rag_engine: Arc<RagEngine>,
    pub rag_pipelines: IndexMap<String, Vec<Stage>>,
    pub default_chat_model: Option<Arc<dyn ChatModel>>,
    pub transaction_manager: TransactionManager,
    pub observability: Arc<ObservabilitySink>,
    pub helpers: IndexMap<String, Arc<dyn HelperFn>>,
    pub rulegroups: IndexMap<String, RuleGroup>,
    pub resolver: Arc<dyn ExternalResolver>,
    pub ctx: Arc<SchedulerContext>,
    stream_sink: Mutex<Option<StreamSink>>,
}

impl FlowDispatcher {
    fn interpreter(&self) -> Interpreter<'_> {
        Interpreter {
            helpers: &self.helpers,
            rulegroups: &self.rulegroups,
            resolver: Some(self.resolver.clone()),
            dispatcher: self,
            stream_sink: self.stream_sink.lock().clone(),
        }
    }

    /// Streamed AI output is forwarded through this rather than returned,
    /// so a caller driving the engine interactively (a CLI REPL, a chat UI)
    /// can render tokens as they arrive. Set before `run_flow_async`,
    /// cleared after (see [`crate::engine::FlowEngine::run_flow_async`]).
    pub fn set_stream_sink(&self, sink: StreamSink) {
        *self.stream_sink.lock() = Some(sink);
    }

    pub fn clear_stream_sink(&self) {
        *self.stream_sink.lock() = None;
    }

    fn evaluate(&self, state: &mut FlowState, expr: &Expr) -> Result<Value, DispatchError> {
        self.ctx.evaluate(state, expr).map_err(disp)
    }

    fn input_map(&self, state: &mut FlowState, node: &FlowNode) -> Result<IndexMap<String, Value>, DispatchError> {
        match &node.input {
            Some(expr) => Ok(self.evaluate(state, expr)?.as_map().cloned().unwrap_or_default()),
            None => Ok(IndexMap::new()),
        }
    }

    /// Translates a `where`-clause expression into the normalized
    /// `Condition` tree `flow-store`/`flow-records` query against. Only the
    /// shapes a lowered `find`/`db_update`/`db_delete` where-clause
    /// actually produces are supported: top-level `and`/`or` chains of
    /// `field == literal`-style comparisons. An expression that doesn't
    /// reduce this way (a helper call, a rulegroup reference as a
    /// condition) falls back to `Condition::All` — every row matches,
    /// which is a deliberately conservative default for an unrecognized
    /// shape rather than silently dropping rows a stricter où-clause meant
    /// to keep.
    fn expr_to_condition(&self, state: &mut FlowState, expr: &Expr) -> Result<Condition, DispatchError> {
        use flow_core::expr::BinOp;
        match expr {
            Expr::Binary(BinOp::And, lhs, rhs) => Ok(Condition::And(vec![
                self.expr_to_condition(state, lhs)?,
                self.expr_to_condition(state, rhs)?,
            ])),
            Expr::Binary(BinOp::Or, lhs, rhs) => Ok(Condition::Or(vec![
                self.expr_to_condition(state, lhs)?,
                self.expr_to_condition(state, rhs)?,
            ])),
            Expr::Binary(op, lhs, rhs) => {
                let Expr::Dotted(base, field) = lhs.as_ref() else {
                    return Ok(Condition::All);
                };
                if !matches!(base.as_ref(), Expr::Identifier(name) if name == "row") {
                    return Ok(Condition::All);
                }
                let Some(cmp) = compare_op(*op) else { return Ok(Condition::All) };
                let value = self.evaluate(state, rhs)?;
                Ok(Condition::Leaf { field: field.clone(), op: cmp, value })
            }
            _ => Ok(Condition::All),
        }
    }

    /// Builds the [`llm::ToolSpec`] list an `agent` node's `def.tools`
    /// names resolve to, skipping a name the Tool Executor doesn't have a
    /// config for rather than failing the whole call — an agent that lists
    /// a tool nobody registered just can't invoke that one.
    fn tool_specs(&self, tool_names: &[String]) -> Vec<flow_core::llm::ToolSpec> {
        tool_names
            .iter()
            .filter_map(|name| self.tool_executor.config(name))
            .map(|cfg| flow_core::llm::ToolSpec {
                name: cfg.name.clone(),
                description: format!("invokes the '{}' tool", cfg.name),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": cfg.input_fields.iter().map(|f| (f.clone(), serde_json::json!({}))).collect::<serde_json::Map<_, _>>(),
                    "required": cfg.input_fields,
                }),
            })
            .collect()
    }

    /// Runs one tool call end to end: arguments come straight off the
    /// provider's `ToolCall.arguments` map, the result is reported to the
    /// Observability Sink the same way a plain `tool` node's call is, and
    /// the outcome is folded back into the conversation as a `tool` message
    /// keyed by `tool_call_id` so the next `generate` round can see it.
    async fn run_tool_call(&self, call: &flow_core::messages::ToolCall) -> Message {
        let args = Value::from_json(call.arguments.clone()).as_map().cloned().unwrap_or_default();
        let result = self.tool_executor.execute(&call.name, args).await;
        match &result {
            Ok(r) => self.observability.record_tool_call(&call.name, r.ok, r.status),
            Err(_) => self.observability.record_tool_call(&call.name, false, None),
        }
        let payload = match result {
            Ok(r) => r.to_value(),
            Err(e) => {
                let mut m = IndexMap::new();
                m.insert("ok".to_string(), Value::Bool(false));
                m.insert("error".to_string(), Value::str(e.to_string()));
                Value::Map(m)
            }
        };
        Message::tool(payload.to_json().to_string(), call.id.clone())
    }

    /// Dispatches both `ai` and `agent` nodes (§4.4's `call_ai`). An `agent`
    /// node differs only in that it may declare `def.tools`: when it does,
    /// the provider is offered those tool specs and, if it asks for a tool
    /// call back, this drives one invoke-result-continue round against
    /// `self.tool_executor` before taking the provider's final answer.
    /// A plain `ai` node never attaches tools, so it never enters that loop
    /// even if the `ai_calls` config happens to carry a stray `tools` list.
    async fn dispatch_ai(&self, node: &FlowNode, state: &mut FlowState, is_agent: bool) -> Result<Value, DispatchError> {
        let Some(call_id) = &node.target else {
            return Err(DispatchError::new("ai/agent node missing a target call id"));
        };
        let def = self
            .ai_calls
            .get(call_id)
            .ok_or_else(|| DispatchError::new(format!("no ai_call/agent registered as '{call_id}'")))?
            .clone();
        let tools = if is_agent { self.tool_specs(&def.tools) } else { Vec::new() };

        let mut messages = Vec::new();
        if let Some(system) = &def.system {
            messages.push(Message::system(system.clone()));
        }

        let ai_key = def.memory_ai_key.clone();
        let session_id = state.context.get("session_id").and_then(Value::as_str).unwrap_or("default").to_string();
        let user_id = state.context.get("user_id").and_then(Value::as_str).map(str::to_string);

        let mut memory_state = None;
        if let Some(ai_key) = &ai_key {
            let (recalled, mem_state) = build_memory_messages(
                self.memory_backend.as_ref(),
                ai_key,
                &self.memory_configs,
                &def.recall_rules,
                &session_id,
                user_id.as_deref(),
            )
            .await
            .map_err(disp)?;
            messages.extend(recalled);
            memory_state = Some(mem_state);
        }

        let prompt = match &node.input {
            Some(expr) => {
                let v = self.evaluate(state, expr)?;
                v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())
            }
            None => String::new(),
        };
        messages.push(Message::human(prompt.clone()));

        let response_text = if def.stream {
            let sink = self.stream_sink.lock().clone();
            let mode = def.stream_mode;
            let (result, event) = self
                .provider_adapter
                .stream(&def.provider, &def.model, messages.clone(), mode, !tools.is_empty(), move |event| {
                    if let Some(sink) = &sink {
                        sink(event);
                    }
                })
                .await;
            self.observability.record_provider_call(&event);
            result.map_err(disp)?
        } else {
            let (result, event) = self.provider_adapter.generate(&def.provider, &def.model, messages.clone(), tools.clone()).await;
            self.observability.record_provider_call(&event);
            let response = result.map_err(disp)?;

            if !tools.is_empty() && !response.tool_calls().is_empty() {
                messages.push(response.message.clone());
                for call in response.tool_calls() {
                    messages.push(self.run_tool_call(call).await);
                }
                let (followup, followup_event) = self.provider_adapter.generate(&def.provider, &def.model, messages.clone(), Vec::new()).await;
                self.observability.record_provider_call(&followup_event);
                followup.map_err(disp)?.text().to_string()
            } else {
                response.text().to_string()
            }
        };

        if let Some(ai_key) = &ai_key {
            let mut mem_state = memory_state.unwrap_or_default();
            persist_memory_state(
                self.memory_backend.as_ref(),
                &self.memory_configs,
                &mut mem_state,
                ai_key,
                &session_id,
                user_id.as_deref(),
                &prompt,
                &response_text,
                None,
                None,
            )
            .await
            .map_err(disp)?;
        }

        let mut out = IndexMap::new();
        out.insert("text".to_string(), Value::Str(response_text));
        Ok(Value::Map(out))
    }

    async fn dispatch_tool(&self, node: &FlowNode, state: &mut FlowState) -> Result<Value, DispatchError> {
        let Some(tool_name) = &node.target else {
            return Err(DispatchError::new("tool node missing a target tool name"));
        };
        let args = self.input_map(state, node)?;
        let result = self.tool_executor.execute(tool_name, args).await;
        match &result {
            Ok(r) => self.observability.record_tool_call(tool_name, r.ok, r.status),
            Err(_) => self.observability.record_tool_call(tool_name, false, None),
        }
        Ok(result.map_err(disp)?.to_value())
    }

    fn record_def(&self, node: &FlowNode) -> Result<&RecordDef, DispatchError> {
        let target = node.target.as_deref().ok_or_else(|| DispatchError::new("record node missing a target"))?;
        self.records.get(target).ok_or_else(|| DispatchError::new(format!("no record '{target}' registered")))
    }

    async fn dispatch_find(&self, node: &FlowNode, state: &mut FlowState) -> Result<Value, DispatchError> {
        let def = self.record_def(node)?.clone();
        let condition = match &node.condition {
            Some(expr) => self.expr_to_condition(state, expr)?,
            None => Condition::All,
        };
        let req = FindRequest { condition, ..Default::default() };
        let rows = find(self.store.as_ref(), &def, &req).map_err(disp)?;
        Ok(Value::List(rows.into_iter().map(Value::from_map).collect()))
    }

    async fn dispatch_db(&self, op: &str, node: &FlowNode, state: &mut FlowState) -> Result<Value, DispatchError> {
        let def = self.record_def(node)?.clone();
        match op {
            "db_create" => {
                let input = self.input_map(state, node)?;
                let row = flow_records::create(self.store.as_ref(), &self.record_registry, &def, input).map_err(disp)?;
                Ok(Value::from_map(row))
            }
            "db_bulk_create" => {
                let v = self.input_map(state, node)?;
                let inputs: Vec<IndexMap<String, Value>> = v
                    .get("rows")
                    .and_then(Value::as_list)
                    .map(|l| l.iter().filter_map(|v| v.as_map().cloned()).collect())
                    .unwrap_or_default();
                let rows = flow_records::bulk_create(self.store.as_ref(), &self.record_registry, &def, inputs).map_err(disp)?;
                Ok(Value::List(rows.into_iter().map(Value::from_map).collect()))
            }
            "db_update" | "db_bulk_update" => {
                let condition = match &node.condition {
                    Some(expr) => self.expr_to_condition(state, expr)?,
                    None => Condition::All,
                };
                let updates = self.input_map(state, node)?;
                let count = flow_records::update(self.store.as_ref(), &self.record_registry, &def, &condition, updates).map_err(disp)?;
                Ok(Value::Int(count as i64))
            }
            "db_delete" | "db_bulk_delete" => {
                let condition = match &node.condition {
                    Some(expr) => self.expr_to_condition(state, expr)?,
                    None => Condition::All,
                };
                let count = flow_records::delete(self.store.as_ref(), &def, &condition).map_err(disp)?;
                Ok(Value::Int(count as i64))
            }
            "db_get" => self.dispatch_find(node, state).await,
            other => Err(DispatchError::new(format!("unknown db operation '{other}'"))),
        }
    }

    /// Raw frame access (`frame_insert`/`frame_query`/`frame_update`/
    /// `frame_delete`): operates directly on a frame by name, bypassing
    /// the Record Layer's coercion/validation/uniqueness. Used for scratch
    /// tables a flow never registered a `record` schema for.
    async fn dispatch_frame(&self, op: &str, node: &FlowNode, state: &mut FlowState) -> Result<Value, DispatchError> {
        let frame = node.target.as_deref().ok_or_else(|| DispatchError::new("frame node missing a target frame name"))?;
        self.store.ensure_frame(frame);
        match op {
            "frame_insert" => {
                let row: Row = self.input_map(state, node)?;
                let inserted = self.store.insert(frame, row).map_err(disp)?;
                Ok(Value::from_map(inserted))
            }
            "frame_query" => {
                let condition = match &node.condition {
                    Some(expr) => self.expr_to_condition(state, expr)?,
                    None => Condition::All,
                };
                let rows = self.store.query(frame, &flow_store::QueryOptions { condition, ..Default::default() }).map_err(disp)?;
                Ok(Value::List(rows.into_iter().map(Value::from_map).collect()))
            }
            "frame_update" => {
                let condition = match &node.condition {
                    Some(expr) => self.expr_to_condition(state, expr)?,
                    None => Condition::All,
                };
                let updates: Row = self.input_map(state, node)?;
                let count = self.store.update(frame, &condition, &updates).map_err(disp)?;
                Ok(Value::Int(count as i64))
            }
            "frame_delete" => {
                let condition = match &node.condition {
                    Some(expr) => self.expr_to_condition(state, expr)?,
                    None => Condition::All,
                };
                let count = self.store.delete(frame, &condition).map_err(disp)?;
                Ok(Value::Int(count as i64))
            }
            other => Err(DispatchError::new(format!("unknown frame operation '{other}'"))),
        }
    }

    async fn dispatch_vector(&self, op: &str, node: &FlowNode, state: &mut FlowState) -> Result<Value, DispatchError> {
        let store_name = node.target.as_deref().ok_or_else(|| DispatchError::new("vector node missing a target store name"))?;
        let vector_store = self
            .rag_engine
            .vector_stores
            .get(store_name)
            .ok_or_else(|| DispatchError::new(format!("no vector store '{store_name}' registered")))?;
        match op {
            "vector_search" => {
                let input = self.input_map(state, node)?;
                let query = input.get("query").and_then(Value::as_str).unwrap_or_default();
                let top_k = input.get("top_k").and_then(Value::as_f64).map(|f| f as usize).unwrap_or(5);
                let matches = vector_store.search(query, top_k).await.map_err(disp)?;
                Ok(Value::List(matches.iter().map(match_to_value).collect()))
            }
            other => Err(DispatchError::new(format!("unknown vector operation '{other}'"))),
        }
    }

    async fn dispatch_rag(&self, node: &FlowNode, state: &mut FlowState) -> Result<Value, DispatchError> {
        let pipeline_id = node.target.as_deref().ok_or_else(|| DispatchError::new("rag node missing a target pipeline id"))?;
        let stages = self
            .rag_pipelines
            .get(pipeline_id)
            .ok_or_else(|| DispatchError::new(format!("no rag_pipeline '{pipeline_id}' registered")))?;
        let question = match &node.input {
            Some(expr) => self.evaluate(state, expr)?.as_str().map(str::to_string).unwrap_or_default(),
            None => String::new(),
        };
        let mut ctx = RagContext::new(question);
        run_pipeline(stages, &mut ctx, self.rag_engine.as_ref(), self.default_chat_model.as_deref(), Some(self.store.as_ref()))
            .await
            .map_err(disp)?;
        let mut out = IndexMap::new();
        out.insert("answer".to_string(), Value::str(ctx.answer));
        out.insert("context".to_string(), Value::str(ctx.context));
        out.insert("matches".to_string(), Value::List(ctx.matches.iter().map(match_to_value).collect()));
        Ok(Value::Map(out))
    }

    async fn dispatch_for_each(&self, node: &FlowNode, state: &mut FlowState) -> Result<Value, DispatchError> {
        let items = match &node.input {
            Some(expr) => self.evaluate(state, expr)?.as_list().map(|s| s.to_vec()).unwrap_or_default(),
            None => Vec::new(),
        };
        let mut outputs = Vec::with_capacity(items.len());
        for item in items {
            state.variables.declare("item", item, false).map_err(disp)?;
            let flow = self.interpreter().run_block(state, &node.statements).await?;
            state.variables.mark_loop_var_exited("item");
            if let Flow::Returned(v) = flow {
                outputs.push(v);
            }
        }
        Ok(Value::List(outputs))
    }

    async fn dispatch_try(&self, node: &FlowNode, state: &mut FlowState) -> Result<Value, DispatchError> {
        match self.interpreter().run_block(state, &node.statements).await {
            Ok(Flow::Returned(v)) => Ok(ok_envelope(v)),
            Ok(Flow::Completed) => Ok(ok_envelope(Value::Null)),
            Err(e) => Ok(error_envelope(e.to_string())),
        }
    }

    async fn dispatch_subflow(&self, node: &FlowNode, state: &mut FlowState) -> Result<Value, DispatchError> {
        let flow_name = node.target.as_deref().ok_or_else(|| DispatchError::new("subflow node missing a target flow name"))?;
        let graph = self.flows.get(flow_name).ok_or_else(|| DispatchError::new(format!("no flow named '{flow_name}'")))?;
        let branch_state = state.fork();
        let result = run_node(graph, &graph.entry_id, branch_state, None, None, &self.ctx, self)
            .await
            .map_err(disp)?;
        let last_output = result.last_output.clone();
        state.merge_branch(flow_name, result);
        Ok(last_output)
    }

    async fn dispatch_transaction(&self, node: &FlowNode, state: &mut FlowState) -> Result<Value, DispatchError> {
        let interp = self.interpreter();
        let statements = &node.statements;
        let result: Result<Value, TransactionError> = self
            .transaction_manager
            .run(|| async move {
                match interp.run_block(state, statements).await {
                    Ok(Flow::Returned(v)) => Ok(v),
                    Ok(Flow::Completed) => Ok(Value::Null),
                    Err(e) => Err(e.to_string()),
                }
            })
            .await;
        self.observability.record_transaction_outcome(&result.as_ref().map(|_| ()).map_err(|e| match e {
            TransactionError::RolledBack(msg) => TransactionError::RolledBack(msg.clone()),
            TransactionError::AlreadyOpen => TransactionError::AlreadyOpen,
        }));
        result.map_err(disp)
    }

    /// `auth_login`/`auth_logout`/`auth_check` (§4.16): a minimal session
    /// marker kept in `state.context.user`, not a real credential store —
    /// authenticating against a concrete identity provider is an external
    /// collaborator the same way the DSL lowering is (§1).
    async fn dispatch_auth(&self, op: &str, node: &FlowNode, state: &mut FlowState) -> Result<Value, DispatchError> {
        match op {
            "auth_login" => {
                let creds = self.input_map(state, node)?;
                state.context.insert("user".to_string(), Value::Map(creds));
                Ok(Value::Bool(true))
            }
            "auth_logout" => {
                state.context.shift_remove("user");
                Ok(Value::Bool(true))
            }
            "auth_check" => Ok(Value::Bool(state.context.get("user").map(|v| !v.is_null()).unwrap_or(false))),
            other => Err(DispatchError::new(format!("unknown auth operation '{other}'"))),
        }
    }
}

fn compare_op(op: flow_core::expr::BinOp) -> Option<CompareOp> {
    use flow_core::expr::BinOp;
    match op {
        BinOp::Eq | BinOp::Is => Some(CompareOp::Eq),
        BinOp::Neq => Some(CompareOp::Neq),
        BinOp::Lt => Some(CompareOp::Lt),
        BinOp::Lte => Some(CompareOp::Lte),
        BinOp::Gt => Some(CompareOp::Gt),
        BinOp::Gte => Some(CompareOp::Gte),
        _ => None,
    }
}

fn match_to_value(m: &Match) -> Value {
    let mut map = IndexMap::new();
    map.insert("id".to_string(), Value::str(m.id.clone()));
    map.insert("text".to_string(), Value::str(m.text.clone()));
    map.insert("score".to_string(), Value::Float(m.score));
    map.insert("source_stage".to_string(), Value::str(m.source_stage.clone()));
    Value::Map(map)
}

fn ok_envelope(data: Value) -> Value {
    let mut m = IndexMap::new();
    m.insert("ok".to_string(), Value::Bool(true));
    m.insert("data".to_string(), data);
    Value::Map(m)
}

fn error_envelope(message: String) -> Value {
    let mut m = IndexMap::new();
    m.insert("ok".to_string(), Value::Bool(false));
    m.insert("error".to_string(), Value::str(message));
    Value::Map(m)
}

#[async_trait]
impl NodeDispatcher for FlowDispatcher {
    async fn dispatch(&self, node: &FlowNode, state: &mut FlowState) -> Result<Value, DispatchError> {
        match &node.kind {
            NodeKind::Noop | NodeKind::Branch | NodeKind::Join | NodeKind::Parallel | NodeKind::Condition => Ok(Value::Null),
            NodeKind::Script | NodeKind::Function => match self.interpreter().run_block(state, &node.statements).await? {
                Flow::Returned(v) => {
                    // §4.2: a `return` inside a script terminates the whole
                    // flow, not just this node's statement block.
                    state.mark_returned(v.clone());
                    Ok(v)
                }
                Flow::Completed => Ok(Value::Null),
            },
            NodeKind::Ai => self.dispatch_ai(node, state, false).await,
            NodeKind::Agent => self.dispatch_ai(node, state, true).await,
            NodeKind::Tool => self.dispatch_tool(node, state).await,
            NodeKind::Find => self.dispatch_find(node, state).await,
            NodeKind::Db(op) => self.dispatch_db(op, node, state).await,
            NodeKind::Frame(op) => self.dispatch_frame(op, node, state).await,
            NodeKind::Vector(op) => self.dispatch_vector(op, node, state).await,
            NodeKind::Rag => self.dispatch_rag(node, state).await,
            NodeKind::ForEach => self.dispatch_for_each(node, state).await,
            NodeKind::Try => self.dispatch_try(node, state).await,
            NodeKind::GotoFlow => {
                let target = node.target.as_deref().ok_or_else(|| DispatchError::new("goto_flow node missing a target flow name"))?;
                state.mark_redirect(target);
                Ok(Value::Null)
            }
            NodeKind::Subflow => self.dispatch_subflow(node, state).await,
            NodeKind::Transaction => self.dispatch_transaction(node, state).await,
            NodeKind::Auth(op) => self.dispatch_auth(op, node, state).await,
        }
    }
}

/// Parameters [`crate::engine::FlowEngine::new`] collects before building a
/// [`FlowDispatcher`]; kept as a plain struct so the constructor's
/// signature doesn't grow an unreadable parameter list.
pub struct DispatcherDeps {
    pub store: Arc<dyn FrameStore>,
    pub flows: IndexMap<String, FlowGraph>,
    pub record_registry: RecordRegistry,
    pub records: IndexMap<String, RecordDef>,
    pub provider_adapter: Arc<ProviderAdapter>,
    pub ai_calls: IndexMap<String, AiCallDef>,
    pub memory_backend: Arc<dyn flow_memory::MemoryBackend>,
    pub memory_configs: IndexMap<MemoryKind, MemoryStoreConfig>,
    pub tool_executor: Arc<ToolExecutor>,
    pub rag_engine: Arc<RagEngine>,
    pub rag_pipelines: IndexMap<String, Vec<Stage>>,
    pub default_chat_model: Option<Arc<dyn ChatModel>>,
    pub helpers: IndexMap<String, Arc<dyn HelperFn>>,
    pub rulegroups: IndexMap<String, RuleGroup>,
    pub resolver: Arc<dyn ExternalResolver>,
    pub ctx: Arc<SchedulerContext>,
}

impl FlowDispatcher {
    pub fn new(deps: DispatcherDeps, observability: Arc<ObservabilitySink>) -> Self {
        Self {
            store: deps.store.clone(),
            flows: deps.flows,
            record_registry: deps.record_registry,
            records: deps.records,
            provider_adapter: deps.provider_adapter,
            ai_calls: deps.ai_calls,
            memory_backend: deps.memory_backend,
            memory_configs: deps.memory_configs,
            tool_executor: deps.tool_executor,
            rag_engine: deps.rag_engine,
            rag_pipelines: deps.rag_pipelines,
            default_chat_model: deps.default_chat_model,
            transaction_manager: TransactionManager::new(deps.store),
            observability,
            helpers: deps.helpers,
            rulegroups: deps.rulegroups,
            resolver: deps.resolver,
            ctx: deps.ctx,
            stream_sink: Mutex::new(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::env::VariableEnvironment;
    use flow_store::InMemoryFrameStore;

    struct NoopResolver;
    impl ExternalResolver for NoopResolver {
        fn resolve(&self, _name: &str) -> Option<Value> {
            None
        }
    }

    fn dispatcher() -> FlowDispatcher {
        let store: Arc<dyn FrameStore> = Arc::new(InMemoryFrameStore::new());
        let ctx = Arc::new(SchedulerContext::new(IndexMap::new(), IndexMap::new(), Arc::new(NoopResolver), 4));
        let deps = DispatcherDeps {
            store: store.clone(),
            flows: IndexMap::new(),
            record_registry: RecordRegistry::new(),
            records: IndexMap::new(),
            provider_adapter: Arc::new(ProviderAdapter::new(
                flow_core::breaker::CircuitBreaker::new(Default::default()),
                flow_core::retry::RetryPolicy::default(),
                std::time::Duration::from_secs(30),
            )),
            ai_calls: IndexMap::new(),
            memory_backend: Arc::new(flow_memory::InMemoryBackend::new()),
            memory_configs: IndexMap::new(),
            tool_executor: Arc::new(ToolExecutor::new()),
            rag_engine: Arc::new(RagEngine::default()),
            rag_pipelines: IndexMap::new(),
            default_chat_model: None,
            helpers: IndexMap::new(),
            rulegroups: IndexMap::new(),
            resolver: Arc::new(NoopResolver),
            ctx,
        };
        FlowDispatcher::new(deps, Arc::new(ObservabilitySink::new()))
    }

    #[tokio::test]
    async fn frame_insert_then_query_round_trips() {
        let dispatcher = dispatcher();
        let mut state = FlowState::new();
        state.variables = VariableEnvironment::new();

        let mut insert_node = FlowNode::new("insert", NodeKind::Frame("frame_insert".to_string())).with_target("widgets");
        insert_node.input = Some(Expr::Record(vec![("name".to_string(), Expr::Str("gizmo".to_string()))]));
        let inserted = dispatcher.dispatch(&insert_node, &mut state).await.unwrap();
        assert_eq!(inserted.as_map().and_then(|m| m.get("name")).and_then(Value::as_str), Some("gizmo"));

        let query_node = FlowNode::new("query", NodeKind::Frame("frame_query".to_string())).with_target("widgets");
        let result = dispatcher.dispatch(&query_node, &mut state).await.unwrap();
        assert_eq!(result.as_list().map(<[_]>::len), Some(1));
    }

    #[tokio::test]
    async fn auth_login_then_check_reports_true() {
        let dispatcher = dispatcher();
        let mut state = FlowState::new();

        let mut login = FlowNode::new("login", NodeKind::Auth("auth_login".to_string()));
        login.input = Some(Expr::Record(vec![("name".to_string(), Expr::Str("ada".to_string()))]));
        dispatcher.dispatch(&login, &mut state).await.unwrap();

        let check = FlowNode::new("check", NodeKind::Auth("auth_check".to_string()));
        let result = dispatcher.dispatch(&check, &mut state).await.unwrap();
        assert_eq!(result, Value::Bool(true));
    }

    #[tokio::test]
    async fn goto_flow_marks_a_redirect_without_dispatching_anything() {
        let dispatcher = dispatcher();
        let mut state = FlowState::new();
        let node = FlowNode::new("go", NodeKind::GotoFlow).with_target("onboarding");
        dispatcher.dispatch(&node, &mut state).await.unwrap();
        assert_eq!(state.redirect_target().as_deref(), Some("onboarding"));
    }

    /// First call asks for `lookup`; once it sees the tool result message
    /// in the conversation it answers with a plain text reply.
    struct ToolCallingModel {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ChatModel for ToolCallingModel {
        async fn chat(&self, request: flow_core::llm::ChatRequest) -> flow_core::error::Result<flow_core::llm::ChatResponse> {
            let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let message = if n == 0 {
                Message::assistant("").with_tool_calls(vec![flow_core::messages::ToolCall::new("lookup", serde_json::json!({}))])
            } else {
                Message::assistant(format!("used {} messages", request.messages.len()))
            };
            Ok(flow_core::llm::ChatResponse { message, usage: None, reasoning: None, metadata: Default::default() })
        }

        async fn stream(&self, _request: flow_core::llm::ChatRequest) -> flow_core::error::Result<flow_core::llm::ChatStreamResponse> {
            unimplemented!("not exercised by this test")
        }

        fn clone_box(&self) -> Box<dyn ChatModel> {
            unimplemented!("not exercised by this test")
        }
    }

    #[tokio::test]
    async fn agent_node_drives_a_tool_call_before_its_final_answer() {
        let store: Arc<dyn FrameStore> = Arc::new(InMemoryFrameStore::new());
        let ctx = Arc::new(SchedulerContext::new(IndexMap::new(), IndexMap::new(), Arc::new(NoopResolver), 4));

        let mut provider_adapter = ProviderAdapter::new(
            flow_core::breaker::CircuitBreaker::new(Default::default()),
            flow_core::retry::RetryPolicy::default(),
            std::time::Duration::from_secs(30),
        );
        provider_adapter.register("test", "model", Arc::new(ToolCallingModel { calls: std::sync::atomic::AtomicUsize::new(0) }));

        let mut tool_executor = ToolExecutor::new();
        tool_executor.register(tooling::tool_exec::ToolConfig::new("lookup", tooling::tool_exec::ToolKind::LocalFunction));
        tool_executor.register_local_function("lookup", Arc::new(|_args| Box::pin(async { Value::str("found it") })));

        let mut ai_calls = IndexMap::new();
        ai_calls.insert(
            "assistant".to_string(),
            AiCallDef {
                provider: "test".to_string(),
                model: "model".to_string(),
                system: None,
                memory_ai_key: None,
                recall_rules: Vec::new(),
                stream: false,
                stream_mode: llm::StreamMode::Tokens,
                tools: vec!["lookup".to_string()],
            },
        );

        let deps = DispatcherDeps {
            store: store.clone(),
            flows: IndexMap::new(),
            record_registry: RecordRegistry::new(),
            records: IndexMap::new(),
            provider_adapter: Arc::new(provider_adapter),
            ai_calls,
            memory_backend: Arc::new(flow_memory::InMemoryBackend::new()),
            memory_configs: IndexMap::new(),
            tool_executor: Arc::new(tool_executor),
            rag_engine: Arc::new(RagEngine::default()),
            rag_pipelines: IndexMap::new(),
            default_chat_model: None,
            helpers: IndexMap::new(),
            rulegroups: IndexMap::new(),
            resolver: Arc::new(NoopResolver),
            ctx,
        };
        let dispatcher = FlowDispatcher::new(deps, Arc::new(ObservabilitySink::new()));

        let mut node = FlowNode::new("agent", NodeKind::Agent).with_target("assistant");
        node.input = Some(Expr::Str("where is it?".to_string()));
        let mut state = FlowState::new();
        let result = dispatcher.dispatch(&node, &mut state).await.unwrap();

        let text = result.as_map().and_then(|m| m.get("text")).and_then(Value::as_str).unwrap_or_default();
        assert!(text.starts_with("used "), "expected the follow-up answer, got: {text}");
    }

    /// §4.2's return semantics: a `return` inside a script node must
    /// terminate the whole flow (`FlowState::has_returned`/`last_output`),
    /// not just the node's own statement block.
    #[tokio::test]
    async fn script_return_marks_the_flow_state_as_returned() {
        use flow_core::ir::{Pattern, Statement};

        let dispatcher = dispatcher();
        let mut node = FlowNode::new("early_exit", NodeKind::Script);
        node.statements = vec![
            Statement::Let {
                pattern: Pattern::Name("x".to_string()),
                value: Expr::Int(42),
                pipeline: vec![],
                is_constant: false,
            },
            Statement::Return { value: Expr::Identifier("x".to_string()) },
        ];
        let mut state = FlowState::new();

        let output = dispatcher.dispatch(&node, &mut state).await.unwrap();
        assert_eq!(output, Value::Int(42));
        assert!(state.has_returned());
        assert_eq!(state.last_output, Value::Int(42));
    }
}
