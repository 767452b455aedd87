//! Tool Executor (C7, §4.5) for the flow engine workspace.
//!
//! Houses HTTP/GraphQL/multipart/local-function tool dispatch with auth,
//! rate limiting, retry/backoff, and JSON-schema response validation. The
//! structured event/tracing layer (C14) lives in `flow-engine`, upstream of
//! this crate, per the crate split in SPEC_FULL.md §2.

pub mod tool_exec;
