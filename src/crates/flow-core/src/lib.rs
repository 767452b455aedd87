//! # flow-core
//!
//! Shared types for the Flow Execution Engine: the expression evaluator and
//! variable environment (C1/C2), the IR shape the scheduler traverses (part
//! of C10), the `FlowState` threaded through a run, the message/value types
//! every subsystem boundary speaks, the `ChatModel` provider contract (§6),
//! and the circuit breaker / retry policy (C15) that `llm` and `tooling`
//! build their retry wrappers on top of.
//!
//! `flow-engine` owns the graph builder and scheduler (C10/C11 proper) and
//! composes this crate with `flow-store`, `flow-records`, `flow-memory`,
//! `flow-rag`, `llm`, and `tooling` into the top-level `FlowEngine`.
//!
//! ## Example
//!
//! ```rust
//! use flow_core::value::Value;
//! use flow_core::env::VariableEnvironment;
//! use flow_core::expr::{BinOp, Evaluator, Expr};
//! use indexmap::IndexMap;
//!
//! let mut env = VariableEnvironment::new();
//! env.declare("x", Value::Int(2), false).unwrap();
//! let helpers = IndexMap::new();
//! let rulegroups = IndexMap::new();
//! let mut evaluator = Evaluator::new(&mut env, None, &helpers, &rulegroups);
//! let result = evaluator
//!     .evaluate(&Expr::Binary(
//!         BinOp::Add,
//!         Box::new(Expr::Identifier("x".into())),
//!         Box::new(Expr::Int(3)),
//!     ))
//!     .unwrap();
//! assert_eq!(result, Value::Int(5));
//! ```

pub mod breaker;
pub mod builtins;
pub mod env;
pub mod error;
pub mod expr;
pub mod ir;
pub mod llm;
pub mod messages;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod value;

pub use breaker::{BreakerState, CircuitBreaker, CircuitBreakerEntry};
pub use env::{EnvError, ExternalResolver, VariableEnvironment};
pub use error::{FlowCoreError, Result};
pub use expr::{BinOp, Evaluator, Expr, ExpressionError, HelperFn, RuleGroup, UnOp};
pub use ir::{
    ConfigEntry, FlowGraph, FlowNode, FormField, IfBranch, IrProgram, LogLevel, MatchArm,
    MatchPattern, NodeKind, Pattern, SetTarget, Statement,
};
pub use llm::{
    ChatModel, ChatRequest, ChatRequestConfig, ChatResponse, ChatStreamChunk, ChatStreamResponse,
    ReasoningContent, ReasoningMode, ToolSpec, UsageMetadata,
};
pub use messages::{Message, MessageContent, MessageRole, ToolCall};
pub use retry::{RetriableKind, RetryPolicy, RetryState, with_retry};
pub use scheduler::{build_graph, run_node, DispatchError, NodeDispatcher, SchedulerContext, SchedulerError};
pub use state::{
    CheckpointEntry, FlowError, FlowState, InputRequest, LogEntry, NoteEntry, RunContext,
    StepResult,
};
pub use value::Value;
