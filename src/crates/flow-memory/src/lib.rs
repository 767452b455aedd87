//! # flow-memory
//!
//! The Memory Composer (C6): recall-message composition and turn
//! persistence across `short_term`/`long_term`/`episodic`/`semantic`/
//! `profile` stores, with per-kind scoping, retention, PII scrubbing, and
//! time-decay ranking.

pub mod backend;
pub mod compose;
pub mod decay;
pub mod error;
pub mod pii;
pub mod types;

pub use backend::{InMemoryBackend, MemoryBackend};
pub use compose::{build_memory_messages, persist_memory_state, vacuum_memory_state, FactExtractor, Summariser};
pub use error::{MemoryError, Result};
pub use types::{MemoryKind, MemoryScope, MemoryState, MemoryStoreConfig, PiiPolicy, PipelineStep, RecallRule, Turn};
