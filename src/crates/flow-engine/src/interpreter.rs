//! Statement Interpreter (C12, §4.3): executes a `script` node's statement
//! list (and every nested block inside `if`/`match`/`repeat`/`try`/`guard`)
//! against a `FlowState`. Shares the same `Evaluator`/`VariableEnvironment`
//! collaborators the Step Scheduler (`flow_core::scheduler`) already uses,
//! so a `let`/`set` inside a script and a `when` guard on a graph node see
//! exactly the same identifier resolution order.

use flow_core::expr::{Evaluator, Expr, ExpressionError, HelperFn, RuleGroup};
use flow_core::ir::{
    FormField, IfBranch, LogLevel, MatchArm, MatchPattern, Pattern, SetTarget, Statement,
};
use flow_core::scheduler::{DispatchError, NodeDispatcher};
use flow_core::state::{CheckpointEntry, FlowState, InputRequest, LogEntry, NoteEntry};
use flow_core::value::Value;
use indexmap::IndexMap;
use llm::StreamEvent;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error("{0}")]
    Expression(#[from] ExpressionError),

    #[error("{0}")]
    Env(#[from] flow_core::env::EnvError),

    #[error("{0}")]
    Dispatch(#[from] DispatchError),

    #[error("destructuring pattern expected a {expected} but found {found}")]
    PatternMismatch { expected: &'static str, found: &'static str },
}

/// What running a statement list produced, besides its side effects on
/// `state`: either it ran to the end, or a `return`/`guard`/awaited-input
/// point cut it short.
#[derive(Debug)]
pub enum Flow {
    /// Ran every statement in the block.
    Completed,
    /// `return <value>` unwound the enclosing block(s).
    Returned(Value),
}

/// Everything the interpreter needs beyond `FlowState`: the evaluator's
/// collaborators and the dispatcher an `InlineAction` recurses through.
pub struct Interpreter<'a> {
    pub helpers: &'a IndexMap<String, Arc<dyn HelperFn>>,
    pub rulegroups: &'a IndexMap<String, RuleGroup>,
    pub resolver: Option<Arc<dyn flow_core::env::ExternalResolver>>,
    pub dispatcher: &'a dyn NodeDispatcher,
    /// Forwards `set state.<field>`'s `state_change` event (§4.3) to
    /// whoever is listening — the same sink `ai`/`agent` streaming chunks
    /// go through. `None` when no caller is currently listening.
    pub stream_sink: Option<Arc<dyn Fn(StreamEvent) + Send + Sync>>,
}

impl<'a> Interpreter<'a> {
    /// Mirrors `SchedulerContext::evaluate` (flow-core/src/scheduler.rs):
    /// rebuilds the `state`/`step`/`user`/`secret`/`env`/`input` ambient
    /// bindings from the live `FlowState` before every evaluation so a
    /// script statement's `state.foo` sees the same live value a node's
    /// `when:` guard would.
    fn evaluate(&self, state: &mut FlowState, expr: &Expr) -> Result<Value, InterpreterError> {
        for (name, value) in state.ambient_bindings() {
            let _ = state.variables.declare(&name, value, false);
        }
        let mut evaluator = Evaluator::new(&mut state.variables, self.resolver.clone(), self.helpers, self.rulegroups);
        Ok(evaluator.evaluate(expr)?)
    }

    fn evaluate_bool(&self, state: &mut FlowState, expr: &Expr) -> Result<bool, InterpreterError> {
        let v = self.evaluate(state, expr)?;
        let mut evaluator = Evaluator::new(&mut state.variables, self.resolver.clone(), self.helpers, self.rulegroups);
        Ok(evaluator.expect_bool(&v)?)
    }

    /// Binds `value` into `pattern`'s name(s) in the local environment.
    fn bind_pattern(&self, state: &mut FlowState, pattern: &Pattern, value: Value, is_constant: bool) -> Result<(), InterpreterError> {
        match pattern {
            Pattern::Name(name) => {
                state.variables.declare(name, value, is_constant)?;
            }
            Pattern::Record(fields) => {
                let map = value.as_map().cloned().unwrap_or_default();
                for (field, rebind) in fields {
                    let bound_name = rebind.as_deref().unwrap_or(field);
                    let field_value = map.get(field).cloned().unwrap_or(Value::Null);
                    state.variables.declare(bound_name, field_value, is_constant)?;
                }
            }
            Pattern::List(names) => {
                let list = value.as_list().map(|s| s.to_vec()).unwrap_or_default();
                for (i, name) in names.iter().enumerate() {
                    let item = list.get(i).cloned().unwrap_or(Value::Null);
                    state.variables.declare(name, item, is_constant)?;
                }
            }
        }
        Ok(())
    }

    fn unbind_pattern(&self, state: &mut FlowState, pattern: &Pattern) {
        match pattern {
            Pattern::Name(name) => state.variables.mark_loop_var_exited(name),
            Pattern::Record(fields) => {
                for (field, rebind) in fields {
                    state.variables.mark_loop_var_exited(rebind.as_deref().unwrap_or(field));
                }
            }
            Pattern::List(names) => {
                for name in names {
                    state.variables.mark_loop_var_exited(name);
                }
            }
        }
    }

    /// Runs a statement block, returning as soon as one statement produces
    /// [`Flow::Returned`] (§4.3: "return/guard-failure unwinds to the
    /// nearest enclosing script or node boundary").
    pub fn run_block<'s>(&'s self, state: &'s mut FlowState, statements: &'s [Statement]) -> BoxFuture<'s, Result<Flow, InterpreterError>> {
        Box::pin(async move {
            for statement in statements {
                match self.run_statement(state, statement).await? {
                    Flow::Completed => continue,
                    returned @ Flow::Returned(_) => return Ok(returned),
                }
            }
            Ok(Flow::Completed)
        })
    }

    fn run_statement<'s>(&'s self, state: &'s mut FlowState, statement: &'s Statement) -> BoxFuture<'s, Result<Flow, InterpreterError>> {
        Box::pin(async move {
            match statement {
                Statement::Let { pattern, value, pipeline, is_constant } => {
                    let expr = if pipeline.is_empty() {
                        value.clone()
                    } else {
                        Expr::Pipeline(Box::new(value.clone()), pipeline.clone())
                    };
                    let v = self.evaluate(state, &expr)?;
                    self.bind_pattern(state, pattern, v, *is_constant)?;
                    Ok(Flow::Completed)
                }

                Statement::Set { target, value } => {
                    let v = self.evaluate(state, value)?;
                    match target {
                        SetTarget::Variable(name) => state.variables.assign(name, v)?,
                        SetTarget::StateField(field) => {
                            let old_value = state.data.get(field).cloned().unwrap_or(Value::Null);
                            state.data.insert(field.clone(), v.clone());
                            if let Some(sink) = &self.stream_sink {
                                sink(StreamEvent::StateChange {
                                    path: field.clone(),
                                    old_value,
                                    new_value: v,
                                });
                            }
                        }
                    }
                    Ok(Flow::Completed)
                }

                Statement::If { branches, otherwise } => self.run_if(state, branches, otherwise).await,

                Statement::Match { subject, arms } => self.run_match(state, subject, arms).await,

                Statement::RepeatForEach { pattern, iterable, body } => {
                    let list = self.evaluate(state, iterable)?.as_list().map(|s| s.to_vec()).unwrap_or_default();
                    for item in list {
                        self.bind_pattern(state, pattern, item, false)?;
                        if let Flow::Returned(v) = self.run_block(state, body).await? {
                            self.unbind_pattern(state, pattern);
                            return Ok(Flow::Returned(v));
                        }
                    }
                    self.unbind_pattern(state, pattern);
                    Ok(Flow::Completed)
                }

                Statement::RepeatUpTo { times, body } => {
                    let n = self.evaluate(state, times)?.as_f64().unwrap_or(0.0) as i64;
                    for _ in 0..n.max(0) {
                        if let Flow::Returned(v) = self.run_block(state, body).await? {
                            return Ok(Flow::Returned(v));
                        }
                    }
                    Ok(Flow::Completed)
                }

                Statement::Retry { max_attempts, backoff, initial_delay_ms, body } => {
                    self.run_retry(state, *max_attempts, *backoff, *initial_delay_ms, body).await
                }

                Statement::TryCatch { body, catch_body } => match self.run_block(state, body).await {
                    Ok(flow) => Ok(flow),
                    Err(e) => {
                        let _ = state.variables.declare("err", error_value(&e), false);
                        let result = self.run_block(state, catch_body).await;
                        state.variables.mark_loop_var_exited("err");
                        result
                    }
                },

                Statement::Guard { condition, body } => {
                    if !self.evaluate_bool(state, condition)? {
                        self.run_block(state, body).await
                    } else {
                        Ok(Flow::Completed)
                    }
                }

                Statement::AskUser { label, name } => {
                    let label_v = self.evaluate(state, label)?;
                    state.inputs.push(InputRequest {
                        name: name.clone(),
                        label: label_v.as_str().map(|s| s.to_string()).unwrap_or_default(),
                        fields: Vec::new(),
                    });
                    state.mark_awaiting_input();
                    Ok(Flow::Returned(Value::Null))
                }

                Statement::Form { label, name, fields } => {
                    let label_v = self.evaluate(state, label)?;
                    state.inputs.push(InputRequest {
                        name: name.clone(),
                        label: label_v.as_str().map(|s| s.to_string()).unwrap_or_default(),
                        fields: fields.iter().map(|f: &FormField| f.name.clone()).collect(),
                    });
                    state.mark_awaiting_input();
                    Ok(Flow::Returned(Value::Null))
                }

                Statement::Log { level, message, metadata } => {
                    let message_v = self.evaluate(state, message)?;
                    let metadata_v = match metadata {
                        Some(expr) => Some(self.evaluate(state, expr)?),
                        None => None,
                    };
                    state.logs.push(LogEntry {
                        timestamp: chrono::Utc::now().to_rfc3339(),
                        level: log_level_str(*level).to_string(),
                        message: message_v.as_str().map(|s| s.to_string()).unwrap_or_else(|| message_v.to_json().to_string()),
                        metadata: metadata_v,
                    });
                    Ok(Flow::Completed)
                }

                Statement::Note { message } => {
                    let v = self.evaluate(state, message)?;
                    state.notes.push(NoteEntry {
                        timestamp: chrono::Utc::now().to_rfc3339(),
                        text: v.as_str().map(|s| s.to_string()).unwrap_or_else(|| v.to_json().to_string()),
                    });
                    Ok(Flow::Completed)
                }

                Statement::Checkpoint { label } => {
                    let v = self.evaluate(state, label)?;
                    state.checkpoints.push(CheckpointEntry {
                        timestamp: chrono::Utc::now().to_rfc3339(),
                        label: v.as_str().map(|s| s.to_string()).unwrap_or_else(|| v.to_json().to_string()),
                    });
                    Ok(Flow::Completed)
                }

                Statement::Return { value } => {
                    let v = self.evaluate(state, value)?;
                    Ok(Flow::Returned(v))
                }

                Statement::InlineAction { node } => {
                    let output = self.dispatcher.dispatch(node, state).await?;
                    if let Some(alias) = &node.alias {
                        state.set_step_output(alias, output.clone());
                    }
                    Ok(Flow::Completed)
                }
            }
        })
    }

    async fn run_if(&self, state: &mut FlowState, branches: &[IfBranch], otherwise: &Option<Vec<Statement>>) -> Result<Flow, InterpreterError> {
        for branch in branches {
            if self.evaluate_bool(state, &branch.condition)? {
                if let Some(pattern) = &branch.bind_as {
                    let v = self.evaluate(state, &branch.condition)?;
                    self.bind_pattern(state, pattern, v, false)?;
                }
                let result = self.run_block(state, &branch.body).await;
                if let Some(pattern) = &branch.bind_as {
                    self.unbind_pattern(state, pattern);
                }
                return result;
            }
        }
        match otherwise {
            Some(body) => self.run_block(state, body).await,
            None => Ok(Flow::Completed),
        }
    }

    async fn run_match(&self, state: &mut FlowState, subject: &Expr, arms: &[MatchArm]) -> Result<Flow, InterpreterError> {
        let subject_v = self.evaluate(state, subject)?;
        let is_error = subject_v
            .as_map()
            .map(|m| m.get("error").map(|e| !e.is_null()).unwrap_or(false) || m.get("ok").map(|o| !o.is_truthy()).unwrap_or(false))
            .unwrap_or(false);

        for arm in arms {
            let matched = match &arm.pattern {
                MatchPattern::Literal(expr) => {
                    let v = self.evaluate(state, expr)?;
                    v.values_equal(&subject_v)
                }
                MatchPattern::Success => !is_error,
                MatchPattern::Error => is_error,
                MatchPattern::Otherwise => true,
            };
            if !matched {
                continue;
            }
            if let Some(name) = &arm.bind_as {
                state.variables.declare(name, subject_v.clone(), false)?;
            }
            let result = self.run_block(state, &arm.body).await;
            if let Some(name) = &arm.bind_as {
                state.variables.mark_loop_var_exited(name);
            }
            return result;
        }
        Ok(Flow::Completed)
    }

    async fn run_retry(&self, state: &mut FlowState, max_attempts: u32, backoff: bool, initial_delay_ms: u64, body: &[Statement]) -> Result<Flow, InterpreterError> {
        let mut delay = initial_delay_ms;
        let mut last_err = None;
        let mut last_flow = None;
        for attempt in 0..max_attempts.max(1) {
            let is_last_attempt = attempt + 1 >= max_attempts;
            match self.run_block(state, body).await {
                // §4.3: "if last output is an error-shape (ok=false) ...
                // retry up to N". The body's own result counts as that
                // "last output" when it ended in a `return`.
                Ok(Flow::Returned(v)) if is_error_shape(&v) && !is_last_attempt => {
                    last_flow = Some(Flow::Returned(v));
                }
                Ok(flow) => return Ok(flow),
                Err(e) => {
                    last_err = Some(e);
                }
            }
            if !is_last_attempt {
                if delay > 0 {
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                }
                if backoff {
                    delay = delay.saturating_mul(2);
                }
            }
        }
        match last_err {
            Some(e) => Err(e),
            // Exhausted retries on an error-shaped `return`, not an
            // exception: "after exhaustion, re-raise" (§4.3) still means the
            // caller gets the error, but there's no `InterpreterError` to
            // wrap since nothing ever raised — surface the last attempt's
            // return value as-is rather than inventing one.
            None => Ok(last_flow.expect("max_attempts.max(1) guarantees at least one iteration ran")),
        }
    }
}

/// §4.3's "error-shape" test for `retry up to N times`: a map with an
/// explicit `ok: false`, the same convention `dispatch_try`'s `ok_envelope`/
/// `error_envelope` and tool results already use.
fn is_error_shape(value: &Value) -> bool {
    value.as_map().and_then(|m| m.get("ok")).map(|ok| !ok.is_truthy()).unwrap_or(false)
}

/// `try: … catch err: …` binds `err = {kind, message}` (§4.3), mirroring
/// the exception-class-name shape the catch body destructures via
/// `err.kind`/`err.message`.
fn error_value(e: &InterpreterError) -> Value {
    let mut m = IndexMap::new();
    m.insert("kind".to_string(), Value::str(error_kind(e)));
    m.insert("message".to_string(), Value::str(e.to_string()));
    Value::Map(m)
}

fn error_kind(e: &InterpreterError) -> &'static str {
    match e {
        InterpreterError::Expression(_) => "ExpressionError",
        InterpreterError::Env(_) => "EnvError",
        InterpreterError::Dispatch(_) => "DispatchError",
        InterpreterError::PatternMismatch { .. } => "PatternMismatch",
    }
}

fn log_level_str(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "info",
        LogLevel::Warning => "warning",
        LogLevel::Error => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::env::ExternalResolver;
    use flow_core::ir::FlowNode;
    use async_trait::async_trait;

    struct NoopResolver;
    impl ExternalResolver for NoopResolver {
        fn resolve(&self, _name: &str) -> Option<Value> {
            None
        }
    }

    struct NoopDispatcher;
    #[async_trait]
    impl NodeDispatcher for NoopDispatcher {
        async fn dispatch(&self, _node: &FlowNode, _state: &mut FlowState) -> Result<Value, DispatchError> {
            Ok(Value::Null)
        }
    }

    fn interpreter<'a>(dispatcher: &'a NoopDispatcher, helpers: &'a IndexMap<String, Arc<dyn HelperFn>>, rulegroups: &'a IndexMap<String, RuleGroup>) -> Interpreter<'a> {
        Interpreter {
            helpers,
            rulegroups,
            resolver: Some(Arc::new(NoopResolver)),
            dispatcher,
            stream_sink: None,
        }
    }

    #[tokio::test]
    async fn let_declares_a_variable_visible_to_later_statements() {
        let helpers = IndexMap::new();
        let rulegroups = IndexMap::new();
        let dispatcher = NoopDispatcher;
        let interp = interpreter(&dispatcher, &helpers, &rulegroups);
        let mut state = FlowState::new();

        let statements = vec![
            Statement::Let { pattern: Pattern::Name("x".to_string()), value: Expr::Int(5), pipeline: vec![], is_constant: false },
            Statement::Return { value: Expr::Identifier("x".to_string()) },
        ];

        let flow = interp.run_block(&mut state, &statements).await.unwrap();
        match flow {
            Flow::Returned(v) => assert_eq!(v, Value::Int(5)),
            Flow::Completed => panic!("expected a returned value"),
        }
    }

    #[tokio::test]
    async fn guard_runs_its_body_when_the_condition_is_false_then_continues() {
        let helpers = IndexMap::new();
        let rulegroups = IndexMap::new();
        let dispatcher = NoopDispatcher;
        let interp = interpreter(&dispatcher, &helpers, &rulegroups);
        let mut state = FlowState::new();

        let statements = vec![
            Statement::Guard {
                condition: Expr::Bool(false),
                body: vec![Statement::Let { pattern: Pattern::Name("guarded".to_string()), value: Expr::Int(1), pipeline: vec![], is_constant: false }],
            },
            Statement::Let { pattern: Pattern::Name("after".to_string()), value: Expr::Int(2), pipeline: vec![], is_constant: false },
        ];

        let flow = interp.run_block(&mut state, &statements).await.unwrap();
        assert!(matches!(flow, Flow::Completed));
        assert_eq!(state.variables.get_local("guarded"), Some(&Value::Int(1)));
        assert_eq!(state.variables.get_local("after"), Some(&Value::Int(2)));
    }

    #[tokio::test]
    async fn guard_skips_its_body_when_the_condition_is_true() {
        let helpers = IndexMap::new();
        let rulegroups = IndexMap::new();
        let dispatcher = NoopDispatcher;
        let interp = interpreter(&dispatcher, &helpers, &rulegroups);
        let mut state = FlowState::new();

        let statements = vec![
            Statement::Guard {
                condition: Expr::Bool(true),
                body: vec![Statement::Let { pattern: Pattern::Name("guarded".to_string()), value: Expr::Int(1), pipeline: vec![], is_constant: false }],
            },
            Statement::Let { pattern: Pattern::Name("after".to_string()), value: Expr::Int(2), pipeline: vec![], is_constant: false },
        ];

        interp.run_block(&mut state, &statements).await.unwrap();
        assert!(!state.variables.is_declared("guarded"));
        assert_eq!(state.variables.get_local("after"), Some(&Value::Int(2)));
    }

    /// Scenario 3 (spec §8): `try: … catch err: set state.msg be err.message`
    /// must bind `err` as a `{kind, message}` record, not a plain string.
    #[tokio::test]
    async fn try_catch_binds_err_as_a_kind_and_message_record() {
        let helpers = IndexMap::new();
        let rulegroups = IndexMap::new();
        let dispatcher = NoopDispatcher;
        let interp = interpreter(&dispatcher, &helpers, &rulegroups);
        let mut state = FlowState::new();

        let statements = vec![Statement::TryCatch {
            body: vec![Statement::Let {
                pattern: Pattern::Name("_never".to_string()),
                value: Expr::Identifier("does.not.exist".to_string()),
                pipeline: vec![],
                is_constant: false,
            }],
            catch_body: vec![Statement::Set {
                target: SetTarget::StateField("msg".to_string()),
                value: Expr::Dotted(Box::new(Expr::Identifier("err".to_string())), "message".to_string()),
            }],
        }];

        interp.run_block(&mut state, &statements).await.unwrap();
        let msg = state.data.get("msg").cloned().unwrap();
        assert!(matches!(msg, Value::Str(_)));
        assert!(!state.variables.is_declared("err"), "err must not leak past the catch body");
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let helpers = IndexMap::new();
        let rulegroups = IndexMap::new();
        let dispatcher = NoopDispatcher;
        let interp = interpreter(&dispatcher, &helpers, &rulegroups);
        let mut state = FlowState::new();

        let body = vec![Statement::Let {
            pattern: Pattern::Name("always_fails".to_string()),
            value: Expr::Identifier("does.not.exist".to_string()),
            pipeline: vec![],
            is_constant: false,
        }];

        let result = interp.run_retry(&mut state, 3, false, 0, &body).await;
        assert!(result.is_err());
    }

    /// §4.3: "if last output is an error-shape (ok=false) ... retry up to N
    /// times", distinct from an exception. Not an exhaustion case: the
    /// third attempt succeeds, so the retry should stop there.
    #[tokio::test]
    async fn retry_retries_on_error_shaped_return_not_just_exceptions() {
        use flow_core::ir::NodeKind;
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct FlakyDispatcher(AtomicUsize);
        #[async_trait]
        impl NodeDispatcher for FlakyDispatcher {
            async fn dispatch(&self, _node: &FlowNode, _state: &mut FlowState) -> Result<Value, DispatchError> {
                let n = self.0.fetch_add(1, Ordering::SeqCst);
                let mut m = IndexMap::new();
                m.insert("ok".to_string(), Value::Bool(n >= 2));
                Ok(Value::Map(m))
            }
        }

        let helpers = IndexMap::new();
        let rulegroups = IndexMap::new();
        let dispatcher = FlakyDispatcher(AtomicUsize::new(0));
        let interp = interpreter_with(&dispatcher, &helpers, &rulegroups);
        let mut state = FlowState::new();

        let mut call_node = FlowNode::new("call", NodeKind::Noop);
        call_node.alias = Some("call".to_string());
        let body = vec![
            Statement::InlineAction { node: call_node },
            Statement::Return {
                value: Expr::Dotted(Box::new(Expr::Dotted(Box::new(Expr::Identifier("step".to_string())), "call".to_string())), "output".to_string()),
            },
        ];

        let flow = interp.run_retry(&mut state, 3, false, 0, &body).await.unwrap();
        match flow {
            Flow::Returned(v) => assert_eq!(v.as_map().and_then(|m| m.get("ok")), Some(&Value::Bool(true))),
            Flow::Completed => panic!("expected a returned value"),
        }
        assert_eq!(dispatcher.0.load(Ordering::SeqCst), 3, "should have retried until success");
    }

    fn interpreter_with<'a>(dispatcher: &'a dyn NodeDispatcher, helpers: &'a IndexMap<String, Arc<dyn HelperFn>>, rulegroups: &'a IndexMap<String, RuleGroup>) -> Interpreter<'a> {
        Interpreter {
            helpers,
            rulegroups,
            resolver: Some(Arc::new(NoopResolver)),
            dispatcher,
            stream_sink: None,
        }
    }

    /// §4.3: `set state.<field>` must emit a `state_change` event with the
    /// old and new values onto the same sink `ai`/`agent` streaming uses.
    #[tokio::test]
    async fn set_state_field_emits_a_state_change_event() {
        let helpers = IndexMap::new();
        let rulegroups = IndexMap::new();
        let dispatcher = NoopDispatcher;
        let events: Arc<parking_lot::Mutex<Vec<StreamEvent>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let events_captured = events.clone();
        let mut interp = interpreter(&dispatcher, &helpers, &rulegroups);
        interp.stream_sink = Some(Arc::new(move |event| events_captured.lock().push(event)));
        let mut state = FlowState::new();
        state.data.insert("counter".to_string(), Value::Int(1));

        let statements = vec![Statement::Set {
            target: SetTarget::StateField("counter".to_string()),
            value: Expr::Int(2),
        }];
        interp.run_block(&mut state, &statements).await.unwrap();

        let recorded = events.lock();
        assert_eq!(recorded.len(), 1);
        match &recorded[0] {
            StreamEvent::StateChange { path, old_value, new_value } => {
                assert_eq!(path, "counter");
                assert_eq!(old_value, &Value::Int(1));
                assert_eq!(new_value, &Value::Int(2));
            }
            other => panic!("expected a StateChange event, got {other:?}"),
        }
    }
}
