//! # flow-cli
//!
//! The minimal developer entry point SPEC §4.2/§1 calls for: `validate` and
//! `run` subcommands over a JSON document shaped like [`IrProgram`], thin
//! enough to exercise the engine locally without the DSL lexer/parser,
//! macro expander, or studio/web surface this crate explicitly excludes.
//!
//! The JSON document's flow nodes are a reduced, directly-deserializable
//! shape (`id`/`kind`/`target`/`next_ids`/`error_boundary_id`/`config`) —
//! no expression trees. A flow authored this way can drive `tool`/`frame`/
//! `db_*`/`subflow`/`goto_flow` nodes end to end; `script`/`branch`-with-
//! conditions and anything needing a parsed `Expr` is out of reach here,
//! same as it would be for any caller that doesn't go through the excluded
//! lowering stage.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flow_core::ir::{ConfigEntry, FlowGraph, FlowNode, IrProgram, NodeKind};
use flow_core::state::RunContext;
use flow_core::value::Value;
use flow_engine::{EngineConfig, EngineDeps, FlowEngine};
use flow_store::InMemoryFrameStore;
use indexmap::IndexMap;
use llm::ProviderAdapter;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "flowctl")]
#[command(about = "Flow Execution Engine developer CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a JSON IR program: checks every flow graph is reachable
    /// from its entry node and every non-flow collection parses.
    Validate {
        /// Path to the JSON IR program
        file: PathBuf,
    },

    /// Run one flow from a JSON IR program to completion.
    Run {
        /// Path to the JSON IR program
        file: PathBuf,

        /// Name of the flow to run
        flow: String,

        /// JSON value bound as the run's user input
        #[arg(short, long)]
        input: Option<String>,
    },
}

/// The reduced, JSON-deserializable node shape this CLI accepts — no
/// `Expr`-bearing fields (see module doc).
#[derive(Debug, Deserialize)]
struct CliNode {
    id: String,
    kind: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    next_ids: Vec<String>,
    #[serde(default)]
    error_boundary_id: Option<String>,
    #[serde(default)]
    config: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CliFlow {
    entry_id: String,
    nodes: Vec<CliNode>,
}

#[derive(Debug, Default, Deserialize)]
struct CliProgram {
    #[serde(default)]
    flows: IndexMap<String, CliFlow>,
    #[serde(default)]
    ai_calls: IndexMap<String, ConfigEntry>,
    #[serde(default)]
    agents: IndexMap<String, ConfigEntry>,
    #[serde(default)]
    tools: IndexMap<String, ConfigEntry>,
    #[serde(default)]
    records: IndexMap<String, ConfigEntry>,
    #[serde(default)]
    vector_stores: IndexMap<String, ConfigEntry>,
    #[serde(default)]
    graphs: IndexMap<String, ConfigEntry>,
    #[serde(default)]
    graph_summaries: IndexMap<String, ConfigEntry>,
    #[serde(default)]
    rag_pipelines: IndexMap<String, ConfigEntry>,
    #[serde(default)]
    memory_stores: IndexMap<String, ConfigEntry>,
}

fn build_ir_program(cli_program: CliProgram) -> Result<IrProgram> {
    let mut ir = IrProgram::new();
    for (name, cli_flow) in cli_program.flows {
        let mut graph = FlowGraph::new(name.clone(), cli_flow.entry_id);
        for cli_node in cli_flow.nodes {
            let mut node = FlowNode::new(cli_node.id, NodeKind::parse(&cli_node.kind));
            node.target = cli_node.target;
            node.next_ids = cli_node.next_ids;
            node.error_boundary_id = cli_node.error_boundary_id;
            node.config = Value::from_json(cli_node.config);
            graph.add_node(node);
        }
        ir.flows.insert(name, graph);
    }
    ir.ai_calls = cli_program.ai_calls;
    ir.agents = cli_program.agents;
    ir.tools = cli_program.tools;
    ir.records = cli_program.records;
    ir.vector_stores = cli_program.vector_stores;
    ir.graphs = cli_program.graphs;
    ir.graph_summaries = cli_program.graph_summaries;
    ir.rag_pipelines = cli_program.rag_pipelines;
    ir.memory_stores = cli_program.memory_stores;
    Ok(ir)
}

fn load_ir_program(file: &PathBuf) -> Result<IrProgram> {
    let raw = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let cli_program: CliProgram = serde_json::from_str(&raw).with_context(|| format!("parsing {} as a JSON IR program", file.display()))?;
    build_ir_program(cli_program)
}

fn default_engine_deps() -> EngineDeps {
    EngineDeps {
        store: Arc::new(InMemoryFrameStore::new()),
        provider_adapter: Arc::new(ProviderAdapter::new(
            flow_core::breaker::CircuitBreaker::new(Default::default()),
            flow_core::retry::RetryPolicy::default(),
            Duration::from_secs(30),
        )),
        memory_backend: Arc::new(flow_memory::InMemoryBackend::new()),
        default_chat_model: None,
    }
}

fn validate(file: &PathBuf) -> Result<()> {
    let ir = load_ir_program(file)?;
    let engine = FlowEngine::new(&ir, default_engine_deps(), EngineConfig::from_env())?;
    let _ = engine;
    println!("✓ valid IR program");
    println!("  flows: {}", ir.flows.len());
    for (name, graph) in &ir.flows {
        println!("    - {} ({} nodes, entry '{}')", name, graph.nodes.len(), graph.entry_id);
    }
    println!("  records: {}", ir.records.len());
    println!("  tools: {}", ir.tools.len());
    println!("  memory_stores: {}", ir.memory_stores.len());
    println!("  vector_stores: {}", ir.vector_stores.len());
    println!("  graphs: {}", ir.graphs.len());
    println!("  rag_pipelines: {}", ir.rag_pipelines.len());
    Ok(())
}

async fn run(file: &PathBuf, flow: &str, input: Option<&str>) -> Result<()> {
    let ir = load_ir_program(file)?;
    let engine = FlowEngine::new(&ir, default_engine_deps(), EngineConfig::from_env())?;

    let user_input = match input {
        Some(raw) => Value::from_json(serde_json::from_str::<serde_json::Value>(raw).context("parsing --input as JSON")?),
        None => Value::Null,
    };
    let context = RunContext {
        app_name: "flowctl".to_string(),
        request_id: flow_engine::new_run_id(),
        user_input,
        ..Default::default()
    };

    let result = engine.run_flow_async(flow, context, None, None).await?;
    println!("status: {:?}", result.status);
    println!("last_output: {}", serde_json::to_string_pretty(&result.state.last_output).unwrap_or_default());
    if !result.state.errors.is_empty() {
        println!("errors:");
        for err in &result.state.errors {
            println!("  - [{}] {} (handled: {})", err.node_id, err.message, err.handled);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Validate { file } => validate(&file),
        Commands::Run { file, flow, input } => run(&file, &flow, input.as_deref()).await,
    }
}
