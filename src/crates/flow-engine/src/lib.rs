//! # flow-engine
//!
//! The top-level Flow Execution Engine: the Statement Interpreter (C12),
//! the Transaction Manager (C13), the Observability Sink (C14), and the
//! [`dispatcher::FlowDispatcher`] that implements `flow_core::scheduler`'s
//! [`flow_core::scheduler::NodeDispatcher`] seam by composing every other
//! subsystem crate (`flow-store`, `flow-records`, `flow-memory`,
//! `flow-rag`, `llm`, `tooling`).
//!
//! [`engine::FlowEngine`] is the entry point a host (a CLI, a server) talks
//! to: it turns a declarative [`flow_core::ir::IrProgram`] plus a handful of
//! externally-supplied collaborators (a frame store, a provider adapter, a
//! memory backend) into something that can run a named flow to completion,
//! including the redirect loop a `goto_flow` node triggers.

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod interpreter;
pub mod ir_build;
pub mod observability;
pub mod resolver;
pub mod transaction;

pub use config::EngineConfig;
pub use dispatcher::{DispatcherDeps, FlowDispatcher, StreamSink};
pub use engine::{new_run_id, EngineDeps, FlowEngine, FlowEngineError, FlowRunResult, RunStatus};
pub use interpreter::{Flow, Interpreter, InterpreterError};
pub use observability::ObservabilitySink;
pub use resolver::EngineResolver;
pub use transaction::{TransactionError, TransactionManager};
