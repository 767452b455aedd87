//! Flow Graph Builder (C10) + Step Scheduler (C11), §4.2.
//!
//! This module owns the generic graph-traversal algorithm — `when` guards,
//! timeouts, error boundaries, branch edge selection, parallel fan-out with
//! a bounded semaphore, and branch-id-ordered deterministic merge (P3) — but
//! stays agnostic to *how* a node actually executes. Dispatching a node
//! (calling a provider, a tool, a record op, …) requires crates
//! `flow-core` cannot depend on (`llm`, `tooling`, `flow-records`,
//! `flow-rag`), so it is delegated through the [`NodeDispatcher`] seam.
//! `flow-engine` implements that trait and composes this scheduler with
//! the Statement Interpreter (C12), the Transaction Manager (C13), and the
//! Observability Sink (C14).

use crate::env::ExternalResolver;
use crate::expr::{Evaluator, Expr, ExpressionError, HelperFn, RuleGroup};
use crate::ir::{FlowGraph, FlowNode, NodeKind};
use crate::state::{merge_parallel_branches, FlowError, FlowState, StepResult};
use crate::value::Value;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Semaphore;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An error a [`NodeDispatcher`] raises while executing one node. Kept as a
/// plain message rather than a typed enum: each subsystem already has its
/// own `thiserror` taxonomy (§4.13); the scheduler only needs the rendered
/// message to build the §3 `FlowError`/§7 user-visible text.
#[derive(Debug, Error, Clone)]
#[error("{0}")]
pub struct DispatchError(pub String);

impl DispatchError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<ExpressionError> for DispatchError {
    fn from(e: ExpressionError) -> Self {
        DispatchError(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("node '{node}' failed: {message}")]
    NodeFailed { node: String, message: String },

    #[error("node '{0}' references unknown next node '{1}'")]
    UnknownNode(String, String),

    #[error("redirects to missing flow '{0}'")]
    MissingRedirectFlow(String),

    #[error("{0}")]
    Expression(#[from] ExpressionError),

    #[error("parallel fan-out from '{0}' has no join target")]
    MissingJoin(String),
}

/// The seam every node kind's execution is delegated through (§4.2 step 2:
/// "Resolve `kind`; delegate to `_execute_with_timing`"). Implementors
/// return the node's output value (stored under `step.<alias>.output`) or
/// mutate `state` directly for control-flow-only kinds (branch/join/noop),
/// in which case `Value::Null` is an acceptable return.
#[async_trait]
pub trait NodeDispatcher: Send + Sync {
    async fn dispatch(&self, node: &FlowNode, state: &mut FlowState) -> Result<Value, DispatchError>;
}

/// Everything `run_node` needs besides the graph and dispatcher: the
/// expression evaluator's collaborators (helpers/rulegroups/resolver) and
/// the bounded-parallelism semaphore (§5, default 4, `N3_MAX_PARALLEL_TASKS`).
pub struct SchedulerContext {
    pub helpers: IndexMap<String, Arc<dyn HelperFn>>,
    pub rulegroups: IndexMap<String, RuleGroup>,
    pub resolver: Arc<dyn ExternalResolver>,
    pub semaphore: Arc<Semaphore>,
}

impl SchedulerContext {
    pub fn new(
        helpers: IndexMap<String, Arc<dyn HelperFn>>,
        rulegroups: IndexMap<String, RuleGroup>,
        resolver: Arc<dyn ExternalResolver>,
        max_parallel_tasks: usize,
    ) -> Self {
        Self {
            helpers,
            rulegroups,
            resolver,
            semaphore: Arc::new(Semaphore::new(max_parallel_tasks.max(1))),
        }
    }

    /// §4.1: "(1) local env; (2) external resolver ... state., user.,
    /// secret., env., input., step.<name>.output, frame names". The first
    /// six names are rebuilt fresh from the live `FlowState` on every call
    /// (see [`FlowState::ambient_bindings`]); `resolver` covers everything
    /// else a script can name (frame identifiers, step aliases outside the
    /// `step.` namespace, rulegroup/helper lookups already route through
    /// dedicated `Expr` variants).
    pub fn evaluate(&self, state: &mut FlowState, expr: &Expr) -> Result<Value, ExpressionError> {
        for (name, value) in state.ambient_bindings() {
            let _ = state.variables.declare(&name, value, false);
        }
        let mut evaluator = Evaluator::new(&mut state.variables, Some(self.resolver.clone()), &self.helpers, &self.rulegroups);
        evaluator.evaluate(expr)
    }

    pub fn evaluate_bool(&self, state: &mut FlowState, expr: &Expr) -> Result<bool, ExpressionError> {
        let v = self.evaluate(state, expr)?;
        let mut evaluator = Evaluator::new(&mut state.variables, Some(self.resolver.clone()), &self.helpers, &self.rulegroups);
        evaluator.expect_bool(&v)
    }
}

/// Flow Graph Builder (C10): validates the invariant from §3 — "reachability
/// from `entry_id` covers every node; `join` fans in; `branch` selects at
/// most one outgoing". The IR already arrives graph-shaped (AST-to-graph
/// lowering is an external collaborator, §1), so building reduces to this
/// validation pass.
pub fn build_graph(graph: &FlowGraph) -> Result<(), SchedulerError> {
    if !graph.nodes.contains_key(&graph.entry_id) {
        return Err(SchedulerError::UnknownNode("<entry>".to_string(), graph.entry_id.clone()));
    }
    let mut reachable = std::collections::HashSet::new();
    let mut stack = vec![graph.entry_id.clone()];
    while let Some(id) = stack.pop() {
        if !reachable.insert(id.clone()) {
            continue;
        }
        let Some(node) = graph.nodes.get(&id) else {
            return Err(SchedulerError::UnknownNode(id, "<missing>".to_string()));
        };
        for next in &node.next_ids {
            if !graph.nodes.contains_key(next) {
                return Err(SchedulerError::UnknownNode(node.id.clone(), next.clone()));
            }
            stack.push(next.clone());
        }
        if let Some(boundary) = &node.error_boundary_id {
            if !graph.nodes.contains_key(boundary) {
                return Err(SchedulerError::UnknownNode(node.id.clone(), boundary.clone()));
            }
            stack.push(boundary.clone());
        }
    }
    Ok(())
}

/// Reads `node.config.edges.{true,false,default}` for a `branch` node's
/// condition-to-target mapping, falling back to positional `next_ids`
/// (`[true, false]`, `[true]`, or a single default edge) when the IR
/// didn't populate `edges` explicitly.
fn branch_target(node: &FlowNode, truthy: bool) -> Option<String> {
    if let Some(edges) = node.config.as_map().and_then(|m| m.get("edges")).and_then(|v| v.as_map()) {
        let key = if truthy { "true" } else { "false" };
        if let Some(target) = edges.get(key).and_then(|v| v.as_str()) {
            return Some(target.to_string());
        }
        if let Some(target) = edges.get("default").and_then(|v| v.as_str()) {
            return Some(target.to_string());
        }
    }
    match (truthy, node.next_ids.as_slice()) {
        (true, [t, ..]) => Some(t.clone()),
        (false, [_, f, ..]) => Some(f.clone()),
        (false, [only]) => Some(only.clone()),
        _ => None,
    }
}

/// Walks forward through single-successor chains from `start` looking for
/// the first `Join` node — the implicit join target of a fan-out whose
/// branches are simple sequential chains (§4.2 step 6).
fn find_join(graph: &FlowGraph, start: &str) -> Option<String> {
    let mut current = start.to_string();
    let mut guard = 0usize;
    loop {
        guard += 1;
        if guard > graph.nodes.len() + 1 {
            return None;
        }
        let node = graph.nodes.get(&current)?;
        if node.kind == NodeKind::Join {
            return Some(current);
        }
        match node.next_ids.as_slice() {
            [only] => current = only.clone(),
            _ => return None,
        }
    }
}

fn extract_cost(output: &Value) -> Option<f64> {
    output
        .as_map()
        .and_then(|m| m.get("cost").and_then(Value::as_f64).or_else(|| m.get("provider_result").and_then(|v| v.as_map()).and_then(|m2| m2.get("cost")).and_then(Value::as_f64)))
}

/// `run_node` (§4.2): the heart of the Step Scheduler. Recursive over async
/// fns requires boxing; `run_node`/`continue_after`/`run_parallel_fanout`
/// form one mutually-recursive boxed-future group.
pub fn run_node<'a>(
    graph: &'a FlowGraph,
    node_id: &'a str,
    state: FlowState,
    boundary_id: Option<&'a str>,
    stop_at: Option<&'a str>,
    ctx: &'a SchedulerContext,
    dispatcher: &'a dyn NodeDispatcher,
) -> BoxFuture<'a, Result<FlowState, SchedulerError>> {
    Box::pin(async move {
        if Some(node_id) == stop_at {
            return Ok(state);
        }
        let Some(node) = graph.get(node_id) else {
            return Err(SchedulerError::UnknownNode("<run_node>".to_string(), node_id.to_string()));
        };

        let mut state = state;

        if let Some(when) = &node.when {
            let truthy = ctx.evaluate_bool(&mut state, when)?;
            if !truthy {
                state.steps.push(StepResult {
                    node_id: node.id.clone(),
                    success: true,
                    duration_ms: 0,
                    cost: None,
                    output: Value::Null,
                });
                return continue_after(graph, node, state, boundary_id, stop_at, ctx, dispatcher).await;
            }
        }

        let start = Instant::now();
        let dispatch_fut = dispatcher.dispatch(node, &mut state);
        let outcome = match node.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, dispatch_fut).await {
                Ok(r) => r,
                Err(_) => Err(DispatchError::new(format!("step '{}' timed out", node.id))),
            },
            None => dispatch_fut.await,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                let cost = extract_cost(&output);
                if let Some(alias) = &node.alias {
                    state.set_step_output(alias, output.clone());
                }
                state.steps.push(StepResult { node_id: node.id.clone(), success: true, duration_ms, cost, output });

                if state.has_redirect() || state.is_awaiting_input() || state.has_returned() {
                    return Ok(state);
                }
                continue_after(graph, node, state, boundary_id, stop_at, ctx, dispatcher).await
            }
            Err(e) => {
                let handled = boundary_id.is_some();
                state.steps.push(StepResult { node_id: node.id.clone(), success: false, duration_ms, cost: None, output: Value::Null });
                state.errors.push(FlowError { node_id: node.id.clone(), message: e.0.clone(), handled });

                if let Some(boundary) = boundary_id {
                    let mut err_map = IndexMap::new();
                    err_map.insert("message".to_string(), Value::Str(e.0.clone()));
                    err_map.insert("step".to_string(), Value::Str(node.id.clone()));
                    let _ = state.variables.declare("error", Value::Map(err_map), false);
                    run_node(graph, boundary, state, None, stop_at, ctx, dispatcher).await
                } else {
                    Err(SchedulerError::NodeFailed { node: node.id.clone(), message: e.0 })
                }
            }
        }
    })
}

fn continue_after<'a>(
    graph: &'a FlowGraph,
    node: &'a FlowNode,
    state: FlowState,
    boundary_id: Option<&'a str>,
    stop_at: Option<&'a str>,
    ctx: &'a SchedulerContext,
    dispatcher: &'a dyn NodeDispatcher,
) -> BoxFuture<'a, Result<FlowState, SchedulerError>> {
    Box::pin(async move {
        if node.kind == NodeKind::Branch {
            let mut state = state;
            let truthy = match &node.branch_condition {
                Some(expr) => ctx.evaluate_bool(&mut state, expr)?,
                None => true,
            };
            return match branch_target(node, truthy) {
                Some(next) => run_node(graph, &next, state, boundary_id, stop_at, ctx, dispatcher).await,
                None => Ok(state),
            };
        }

        match node.next_ids.len() {
            0 => Ok(state),
            1 => run_node(graph, &node.next_ids[0], state, boundary_id, stop_at, ctx, dispatcher).await,
            _ => run_parallel_fanout(graph, node, state, boundary_id, stop_at, ctx, dispatcher).await,
        }
    })
}

/// §4.2 step 6: "Multiple edges ⇒ parallel fan-out: each branch receives a
/// `state.copy()`, runs under a semaphore ..., stops at `join`." Uses
/// `try_join_all` rather than spawned tasks: on a sibling failure the
/// futures still being polled are simply dropped, which is cooperative
/// cancellation for the single-threaded model §5 describes, without extra
/// machinery.
fn run_parallel_fanout<'a>(
    graph: &'a FlowGraph,
    node: &'a FlowNode,
    state: FlowState,
    boundary_id: Option<&'a str>,
    stop_at: Option<&'a str>,
    ctx: &'a SchedulerContext,
    dispatcher: &'a dyn NodeDispatcher,
) -> BoxFuture<'a, Result<FlowState, SchedulerError>> {
    Box::pin(async move {
        let join_id = node.next_ids.iter().find_map(|n| find_join(graph, n));

        let base = state.clone();
        let mut branch_futures = Vec::with_capacity(node.next_ids.len());
        for branch_entry in &node.next_ids {
            let branch_state = state.fork();
            let stop = join_id.clone();
            let branch_entry = branch_entry.clone();
            branch_futures.push(async move {
                let _permit = ctx.semaphore.acquire().await.expect("semaphore never closed");
                let result = run_node(graph, &branch_entry, branch_state, boundary_id, stop.as_deref(), ctx, dispatcher).await?;
                Ok::<_, SchedulerError>((branch_entry, result))
            });
        }

        let branch_results = futures::future::try_join_all(branch_futures).await?;
        let merged = merge_parallel_branches(base, branch_results);

        match join_id {
            Some(join_id) => run_node(graph, &join_id, merged, boundary_id, stop_at, ctx, dispatcher).await,
            None => Ok(merged),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::ExternalResolver;
    use crate::ir::FlowNode;

    struct NoopResolver;
    impl ExternalResolver for NoopResolver {
        fn resolve(&self, _name: &str) -> Option<Value> {
            None
        }
    }

    struct EchoDispatcher;
    #[async_trait]
    impl NodeDispatcher for EchoDispatcher {
        async fn dispatch(&self, node: &FlowNode, _state: &mut FlowState) -> Result<Value, DispatchError> {
            Ok(Value::Str(node.id.clone()))
        }
    }

    struct FailDispatcher;
    #[async_trait]
    impl NodeDispatcher for FailDispatcher {
        async fn dispatch(&self, node: &FlowNode, _state: &mut FlowState) -> Result<Value, DispatchError> {
            if node.id == "boom" {
                Err(DispatchError::new("kaboom"))
            } else {
                Ok(Value::Null)
            }
        }
    }

    fn ctx() -> SchedulerContext {
        SchedulerContext::new(IndexMap::new(), IndexMap::new(), Arc::new(NoopResolver), 4)
    }

    #[tokio::test]
    async fn sequential_chain_runs_in_order() {
        let mut graph = FlowGraph::new("f", "a");
        let mut a = FlowNode::new("a", NodeKind::Noop);
        a.next_ids = vec!["b".to_string()];
        let b = FlowNode::new("b", NodeKind::Noop);
        graph.add_node(a);
        graph.add_node(b);
        build_graph(&graph).unwrap();

        let state = run_node(&graph, "a", FlowState::new(), None, None, &ctx(), &EchoDispatcher).await.unwrap();
        assert_eq!(state.steps.len(), 2);
        assert_eq!(state.steps[0].node_id, "a");
        assert_eq!(state.steps[1].node_id, "b");
    }

    #[tokio::test]
    async fn unhandled_error_propagates() {
        let mut graph = FlowGraph::new("f", "boom");
        graph.add_node(FlowNode::new("boom", NodeKind::Noop));
        let err = run_node(&graph, "boom", FlowState::new(), None, None, &ctx(), &FailDispatcher).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn error_boundary_handles_failure() {
        let mut graph = FlowGraph::new("f", "boom");
        let mut boom = FlowNode::new("boom", NodeKind::Noop);
        boom.error_boundary_id = Some("handler".to_string());
        graph.add_node(boom);
        graph.add_node(FlowNode::new("handler", NodeKind::Noop));

        let state = run_node(&graph, "boom", FlowState::new(), Some("handler"), None, &ctx(), &FailDispatcher).await.unwrap();
        assert_eq!(state.errors.len(), 1);
        assert!(state.errors[0].handled);
        assert_eq!(state.steps.last().unwrap().node_id, "handler");
    }

    #[tokio::test]
    async fn parallel_fanout_merges_branches_and_runs_join() {
        let mut graph = FlowGraph::new("f", "fork");
        let mut fork = FlowNode::new("fork", NodeKind::Parallel);
        fork.next_ids = vec!["a".to_string(), "b".to_string()];
        graph.add_node(fork);
        let mut a = FlowNode::new("a", NodeKind::Noop);
        a.next_ids = vec!["join".to_string()];
        graph.add_node(a);
        let mut b = FlowNode::new("b", NodeKind::Noop);
        b.next_ids = vec!["join".to_string()];
        graph.add_node(b);
        graph.add_node(FlowNode::new("join", NodeKind::Join));
        build_graph(&graph).unwrap();

        let state = run_node(&graph, "fork", FlowState::new(), None, None, &ctx(), &EchoDispatcher).await.unwrap();
        let ids: Vec<&str> = state.steps.iter().map(|s| s.node_id.as_str()).collect();
        assert!(ids.contains(&"a"));
        assert!(ids.contains(&"b"));
        assert!(ids.contains(&"join"));
        assert_eq!(ids.last(), Some(&"join"));
    }

    struct ReturningDispatcher;
    #[async_trait]
    impl NodeDispatcher for ReturningDispatcher {
        async fn dispatch(&self, node: &FlowNode, state: &mut FlowState) -> Result<Value, DispatchError> {
            if node.id == "a" {
                state.mark_returned(Value::Int(7));
            }
            Ok(Value::Str(node.id.clone()))
        }
    }

    /// §4.2: a node that marks the flow as returned stops traversal — "b"
    /// must never run.
    #[tokio::test]
    async fn returned_marker_stops_traversal() {
        let mut graph = FlowGraph::new("f", "a");
        let mut a = FlowNode::new("a", NodeKind::Noop);
        a.next_ids = vec!["b".to_string()];
        let b = FlowNode::new("b", NodeKind::Noop);
        graph.add_node(a);
        graph.add_node(b);
        build_graph(&graph).unwrap();

        let state = run_node(&graph, "a", FlowState::new(), None, None, &ctx(), &ReturningDispatcher).await.unwrap();
        assert_eq!(state.steps.len(), 1);
        assert_eq!(state.steps[0].node_id, "a");
        assert_eq!(state.last_output, Value::Int(7));
    }

    #[tokio::test]
    async fn fanout_without_explicit_join_merges_diffs_only() {
        let mut graph = FlowGraph::new("f", "fork");
        let mut fork = FlowNode::new("fork", NodeKind::Parallel);
        fork.next_ids = vec!["a".to_string(), "b".to_string()];
        graph.add_node(fork);
        graph.add_node(FlowNode::new("a", NodeKind::Noop));
        graph.add_node(FlowNode::new("b", NodeKind::Noop));

        let state = run_node(&graph, "fork", FlowState::new(), None, None, &ctx(), &EchoDispatcher).await.unwrap();
        assert_eq!(state.steps.len(), 3);
    }
}
