//! The immutable `IRProgram` input (§3) and the `FlowGraph` shape it carries
//! per flow. The DSL lexer/parser and AST→IR lowering are external
//! collaborators (§1); by the time a program reaches this engine every
//! expression position already holds a parsed [`crate::expr::Expr`] tree.

use crate::expr::{Expr, PipelineStep};
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The node kinds enumerated in §3. Prefix families (`vector_*`, `frame_*`,
/// `db_*`, `auth_*`) keep their discriminating suffix so record/RAG/auth
/// dispatch (owned by other crates) can match on it without flow-core
/// depending on those crates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Script,
    Ai,
    Agent,
    Tool,
    Condition,
    Branch,
    Join,
    Parallel,
    ForEach,
    Try,
    GotoFlow,
    Subflow,
    Rag,
    Vector(String),
    Frame(String),
    Db(String),
    Find,
    Auth(String),
    Noop,
    Function,
    Transaction,
}

impl NodeKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "script" => NodeKind::Script,
            "ai" => NodeKind::Ai,
            "agent" => NodeKind::Agent,
            "tool" => NodeKind::Tool,
            "condition" => NodeKind::Condition,
            "branch" => NodeKind::Branch,
            "join" => NodeKind::Join,
            "parallel" => NodeKind::Parallel,
            "for_each" => NodeKind::ForEach,
            "try" => NodeKind::Try,
            "goto_flow" => NodeKind::GotoFlow,
            "subflow" => NodeKind::Subflow,
            "rag" => NodeKind::Rag,
            "find" => NodeKind::Find,
            "noop" => NodeKind::Noop,
            "function" => NodeKind::Function,
            "transaction" => NodeKind::Transaction,
            s if s.starts_with("vector_") => NodeKind::Vector(s.to_string()),
            s if s.starts_with("frame_") => NodeKind::Frame(s.to_string()),
            s if s.starts_with("db_") => NodeKind::Db(s.to_string()),
            s if s.starts_with("auth_") => NodeKind::Auth(s.to_string()),
            other => NodeKind::Db(other.to_string()),
        }
    }
}

/// A node in the flow graph (§3 `FlowGraph`).
#[derive(Debug, Clone)]
pub struct FlowNode {
    pub id: String,
    pub kind: NodeKind,
    pub config: Value,
    pub next_ids: Vec<String>,
    pub error_boundary_id: Option<String>,
    pub when: Option<Expr>,
    /// `branch` nodes only: the condition selecting `edges.true`/`edges.false`
    /// (§4.2 step 5). Distinct from `when`, which is a skip-the-node guard
    /// evaluated for every node kind.
    pub branch_condition: Option<Expr>,
    pub timeout: Option<Duration>,
    pub alias: Option<String>,
    /// Statement body for `Script` nodes (C12). Empty for every other kind.
    pub statements: Vec<Statement>,
    /// The id this node refers to in one of `IrProgram`'s named collections
    /// (an `ai_calls`/`agents`/`tools`/`records`/`rag_pipelines` id, a frame
    /// name, or a flow name for `goto_flow`/`subflow`) — whichever
    /// collection `kind` implies.
    pub target: Option<String>,
    /// The node's primary expression payload where one exists: an `ai`
    /// node's message, a `tool` node's argument record, a `db_create`'s
    /// field record. Distinct from `branch_condition`, which only
    /// `Branch` nodes use.
    pub input: Option<Expr>,
    /// The `where`-clause expression for `find`/`db_update`/`db_delete`.
    pub condition: Option<Expr>,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            config: Value::map(),
            next_ids: Vec::new(),
            error_boundary_id: None,
            when: None,
            branch_condition: None,
            timeout: None,
            alias: None,
            statements: Vec::new(),
            target: None,
            input: None,
            condition: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_input(mut self, input: Expr) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_condition(mut self, condition: Expr) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_statements(mut self, statements: Vec<Statement>) -> Self {
        self.statements = statements;
        self
    }
}

/// A destructuring target for `let`/`repeat for each` bindings.
#[derive(Debug, Clone)]
pub enum Pattern {
    Name(String),
    /// `{a, b as c}` — field name, optional rebind-as.
    Record(Vec<(String, Option<String>)>),
    /// `[x, y]`
    List(Vec<String>),
}

/// `set <name | state.<field>> be <expr>`'s left-hand side.
#[derive(Debug, Clone)]
pub enum SetTarget {
    Variable(String),
    StateField(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct IfBranch {
    pub condition: Expr,
    pub bind_as: Option<Pattern>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub enum MatchPattern {
    Literal(Expr),
    Success,
    Error,
    Otherwise,
}

#[derive(Debug, Clone)]
pub struct MatchArm {
    pub pattern: MatchPattern,
    pub bind_as: Option<String>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub struct FormField {
    pub label: String,
    pub name: String,
}

/// The Statement Interpreter's (C12) statement vocabulary: the body of a
/// `Script` node and of every nested block (`if`/`match`/`repeat`/`try`/
/// `guard`).
#[derive(Debug, Clone)]
pub enum Statement {
    Let {
        pattern: Pattern,
        value: Expr,
        pipeline: Vec<PipelineStep>,
        is_constant: bool,
    },
    Set {
        target: SetTarget,
        value: Expr,
    },
    If {
        branches: Vec<IfBranch>,
        otherwise: Option<Vec<Statement>>,
    },
    Match {
        subject: Expr,
        arms: Vec<MatchArm>,
    },
    RepeatForEach {
        pattern: Pattern,
        iterable: Expr,
        body: Vec<Statement>,
    },
    RepeatUpTo {
        times: Expr,
        body: Vec<Statement>,
    },
    Retry {
        max_attempts: u32,
        backoff: bool,
        initial_delay_ms: u64,
        body: Vec<Statement>,
    },
    TryCatch {
        body: Vec<Statement>,
        catch_body: Vec<Statement>,
    },
    Guard {
        condition: Expr,
        body: Vec<Statement>,
    },
    AskUser {
        label: Expr,
        name: String,
    },
    Form {
        label: Expr,
        name: String,
        fields: Vec<FormField>,
    },
    Log {
        level: LogLevel,
        message: Expr,
        metadata: Option<Expr>,
    },
    Note {
        message: Expr,
    },
    Checkpoint {
        label: Expr,
    },
    Return {
        value: Expr,
    },
    /// `do ai|agent|tool|flow "name" with k: v, …` / `go to flow|page "name"`:
    /// a synthetic step node recursed through the scheduler's dispatch.
    InlineAction {
        node: Box<FlowNode>,
    },
}

/// Reachability from `entry_id` must cover every node; `join` fans in;
/// `branch` selects at most one outgoing edge (validated by
/// [`crate::scheduler::build_graph`]).
#[derive(Debug, Clone)]
pub struct FlowGraph {
    pub name: String,
    pub entry_id: String,
    pub nodes: IndexMap<String, FlowNode>,
}

impl FlowGraph {
    pub fn new(name: impl Into<String>, entry_id: impl Into<String>) -> Self {
        Self { name: name.into(), entry_id: entry_id.into(), nodes: IndexMap::new() }
    }

    pub fn add_node(&mut self, node: FlowNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn get(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.get(id)
    }
}

/// A named, typed configuration entry shared by most IR collections
/// (`ai_calls`, `agents`, `tools`, …): an id plus an opaque config `Value`
/// that the owning subsystem parses into its own typed struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub id: String,
    pub config: Value,
}

/// The full program handed to the engine: named collections of flows plus
/// every other collection referenced by flow steps.
#[derive(Debug, Clone, Default)]
pub struct IrProgram {
    pub flows: IndexMap<String, FlowGraph>,
    pub ai_calls: IndexMap<String, ConfigEntry>,
    pub agents: IndexMap<String, ConfigEntry>,
    pub tools: IndexMap<String, ConfigEntry>,
    pub records: IndexMap<String, ConfigEntry>,
    pub frames: IndexMap<String, ConfigEntry>,
    pub vector_stores: IndexMap<String, ConfigEntry>,
    pub graphs: IndexMap<String, ConfigEntry>,
    pub graph_summaries: IndexMap<String, ConfigEntry>,
    pub rag_pipelines: IndexMap<String, ConfigEntry>,
    pub helpers: IndexMap<String, ConfigEntry>,
    pub rulegroups: IndexMap<String, ConfigEntry>,
    pub auth_config: IndexMap<String, ConfigEntry>,
    pub memory_stores: IndexMap<String, ConfigEntry>,
}

impl IrProgram {
    pub fn new() -> Self {
        Self::default()
    }
}
