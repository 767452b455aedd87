//! # flow-rag
//!
//! The RAG Pipeline (C8) and its Graph Engine (C9): a fixed stage
//! vocabulary threaded through a `RagContext`, retrieval fusion, and a
//! lazily-built entity co-occurrence graph for `graph_query`/
//! `graph_summary_lookup` stages.

pub mod error;
pub mod fusion;
pub mod graph;
pub mod pipeline;
pub mod vector_store;

pub use error::{RagError, Result};
pub use fusion::{fuse, FusionMethod};
pub use graph::{extract_entities, Graph, GraphEngine, GraphNode};
pub use pipeline::{run_pipeline, run_stage, Match, RagContext, RagEngine, Stage, VectorStore};
pub use vector_store::FrameVectorStore;
