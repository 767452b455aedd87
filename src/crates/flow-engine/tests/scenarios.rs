//! End-to-end fixtures exercised against the composed [`FlowEngine`], the
//! subset of §8's scenarios that don't require a live provider or HTTP
//! mock: parallel fan-out merge, unique-constraint conflict, and
//! transaction rollback. Sequential AI+tool, try/catch, and retry-with-
//! backoff are covered at the unit level in `dispatcher.rs`/`retry.rs`/
//! `breaker.rs` instead, since they need a mocked `ChatModel`/HTTP
//! transport this crate doesn't wire up for integration tests.

use flow_core::ir::{FlowGraph, FlowNode, IrProgram, NodeKind, Pattern, SetTarget, Statement};
use flow_core::expr::Expr;
use flow_core::state::RunContext;
use flow_core::value::Value;
use flow_engine::{EngineConfig, EngineDeps, FlowEngine, RunStatus};
use flow_store::{FrameStore, InMemoryFrameStore};
use llm::ProviderAdapter;
use std::sync::Arc;
use std::time::Duration;

fn deps(store: Arc<dyn FrameStore>) -> EngineDeps {
    EngineDeps {
        store,
        provider_adapter: Arc::new(ProviderAdapter::new(
            flow_core::breaker::CircuitBreaker::new(Default::default()),
            flow_core::retry::RetryPolicy::default(),
            Duration::from_secs(30),
        )),
        memory_backend: Arc::new(flow_memory::InMemoryBackend::new()),
        default_chat_model: None,
    }
}

/// `User` record config used by both the unique-conflict and
/// transaction-rollback fixtures: `id` primary key, required+unique `email`.
fn user_record_config() -> Value {
    Value::from_map(
        [
            ("frame".to_string(), Value::Str("users".to_string())),
            (
                "fields".to_string(),
                Value::List(vec![
                    Value::from_map(
                        [
                            ("name".to_string(), Value::Str("id".to_string())),
                            ("type".to_string(), Value::Str("int".to_string())),
                            ("primary_key".to_string(), Value::Bool(true)),
                        ]
                        .into_iter()
                        .collect(),
                    ),
                    Value::from_map(
                        [
                            ("name".to_string(), Value::Str("email".to_string())),
                            ("type".to_string(), Value::Str("string".to_string())),
                            ("required".to_string(), Value::Bool(true)),
                            ("unique".to_string(), Value::Bool(true)),
                        ]
                        .into_iter()
                        .collect(),
                    ),
                ]),
            ),
        ]
        .into_iter()
        .collect(),
    )
}

/// Scenario 2: parallel fan-out merge. Two branches each write a step
/// output (`step.a.output`/`step.b.output`, the one `FlowState::merge_branch`
/// key family that isn't namespaced by branch id) *and* a `let`-bound
/// variable; the node after the join reads both step outputs and both
/// variables and writes `c = a + b`, exercising both merge paths §4.2 step
/// 6 describes (namespaced `data` re-keying and unprefixed variable
/// overlay).
#[tokio::test]
async fn parallel_fanout_merges_branch_outputs_before_the_join_continuation() {
    let mut graph = FlowGraph::new("main", "fork");

    let mut fork = FlowNode::new("fork", NodeKind::Parallel);
    fork.next_ids = vec!["branch_a".to_string(), "branch_b".to_string()];
    graph.add_node(fork);

    let mut branch_a = FlowNode::new("branch_a", NodeKind::Script).with_statements(vec![
        Statement::Let {
            pattern: Pattern::Name("a_var".to_string()),
            value: Expr::Int(10),
            pipeline: vec![],
            is_constant: false,
        },
        Statement::Return { value: Expr::Int(1) },
    ]);
    branch_a.alias = Some("a".to_string());
    branch_a.next_ids = vec!["join".to_string()];
    graph.add_node(branch_a);

    let mut branch_b = FlowNode::new("branch_b", NodeKind::Script).with_statements(vec![
        Statement::Let {
            pattern: Pattern::Name("b_var".to_string()),
            value: Expr::Int(20),
            pipeline: vec![],
            is_constant: false,
        },
        Statement::Return { value: Expr::Int(2) },
    ]);
    branch_b.alias = Some("b".to_string());
    branch_b.next_ids = vec!["join".to_string()];
    graph.add_node(branch_b);

    let mut join = FlowNode::new("join", NodeKind::Join);
    join.next_ids = vec!["calc".to_string()];
    graph.add_node(join);

    let calc = FlowNode::new("calc", NodeKind::Script).with_statements(vec![Statement::Set {
        target: SetTarget::StateField("c".to_string()),
        value: Expr::Binary(
            flow_core::expr::BinOp::Add,
            Box::new(Expr::Dotted(Box::new(Expr::Dotted(Box::new(Expr::Identifier("step".to_string())), "a".to_string())), "output".to_string())),
            Box::new(Expr::Dotted(Box::new(Expr::Dotted(Box::new(Expr::Identifier("step".to_string())), "b".to_string())), "output".to_string())),
        ),
    }]);
    graph.add_node(calc);

    let mut ir = IrProgram::new();
    ir.flows.insert("main".to_string(), graph);

    let store: Arc<dyn FrameStore> = Arc::new(InMemoryFrameStore::new());
    let engine = FlowEngine::new(&ir, deps(store), EngineConfig::default()).unwrap();
    let result = engine.run_flow_async("main", RunContext::default(), None, None).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.state.step_output("a"), Some(&Value::Int(1)));
    assert_eq!(result.state.step_output("b"), Some(&Value::Int(2)));
    assert_eq!(result.state.data.get("c"), Some(&Value::Int(3)));
    assert_eq!(result.state.variables.get_local("a_var"), Some(&Value::Int(10)));
    assert_eq!(result.state.variables.get_local("b_var"), Some(&Value::Int(20)));
    assert!(result.state.errors.is_empty());
}

/// Scenario 4: record create + unique conflict. Two `db_create` steps with
/// the same email; the first succeeds, the second fails, and exactly one
/// row with that email persists.
#[tokio::test]
async fn second_create_with_a_duplicate_unique_field_fails_and_does_not_persist() {
    let mut graph = FlowGraph::new("main", "first");

    let mut first = FlowNode::new("first", NodeKind::Db("db_create".to_string())).with_target("User");
    first.input = Some(Expr::Record(vec![("id".to_string(), Expr::Int(1)), ("email".to_string(), Expr::Str("a@b.com".to_string()))]));
    first.error_boundary_id = Some("on_conflict".to_string());
    first.next_ids = vec!["second".to_string()];
    graph.add_node(first);

    let mut second = FlowNode::new("second", NodeKind::Db("db_create".to_string())).with_target("User");
    second.input = Some(Expr::Record(vec![("id".to_string(), Expr::Int(2)), ("email".to_string(), Expr::Str("a@b.com".to_string()))]));
    second.error_boundary_id = Some("on_conflict".to_string());
    graph.add_node(second);

    graph.add_node(FlowNode::new("on_conflict", NodeKind::Noop));

    let mut ir = IrProgram::new();
    ir.flows.insert("main".to_string(), graph);
    ir.records.insert("User".to_string(), flow_core::ir::ConfigEntry { id: "User".to_string(), config: user_record_config() });

    let store: Arc<dyn FrameStore> = Arc::new(InMemoryFrameStore::new());
    store.ensure_frame("users");

    let engine = FlowEngine::new(&ir, deps(store.clone()), EngineConfig::default()).unwrap();
    let result = engine.run_flow_async("main", RunContext::default(), None, None).await.unwrap();

    assert_eq!(result.state.errors.len(), 1);
    let message = &result.state.errors[0].message;
    assert!(message.contains("email"), "error message should mention the field: {message}");
    assert!(message.contains("already used"), "error message should state the field is already used: {message}");

    let rows = store.all("users").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("email").and_then(Value::as_str), Some("a@b.com"));
}

/// Scenario 5: transaction rollback. A transaction body creates one row
/// then fails a required-field check on a second; the frame ends up with
/// neither row.
#[tokio::test]
async fn transaction_rolls_back_every_write_on_a_later_failure() {
    let mut create_ok = FlowNode::new("create_ok", NodeKind::Db("db_create".to_string())).with_target("User");
    create_ok.input = Some(Expr::Record(vec![("id".to_string(), Expr::Int(1)), ("email".to_string(), Expr::Str("a@b.com".to_string()))]));

    let mut create_missing_required = FlowNode::new("create_missing_required", NodeKind::Db("db_create".to_string())).with_target("User");
    create_missing_required.input = Some(Expr::Record(vec![("id".to_string(), Expr::Int(2))]));

    let txn = FlowNode::new("txn", NodeKind::Transaction).with_statements(vec![
        Statement::InlineAction { node: Box::new(create_ok) },
        Statement::InlineAction { node: Box::new(create_missing_required) },
    ]);

    let mut graph = FlowGraph::new("main", "txn");
    graph.add_node(txn);

    let mut ir = IrProgram::new();
    ir.flows.insert("main".to_string(), graph);
    ir.records.insert("User".to_string(), flow_core::ir::ConfigEntry { id: "User".to_string(), config: user_record_config() });

    let store: Arc<dyn FrameStore> = Arc::new(InMemoryFrameStore::new());
    store.ensure_frame("users");

    let engine = FlowEngine::new(&ir, deps(store.clone()), EngineConfig::default()).unwrap();
    let err = engine.run_flow_async("main", RunContext::default(), None, None).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("txn"), "error should name the failing node: {message}");
    assert!(message.contains("rolled back"), "error should say the transaction rolled back: {message}");

    let rows = store.all("users").unwrap();
    assert!(rows.is_empty(), "transaction rollback must leave no rows behind, found {rows:?}");
}
