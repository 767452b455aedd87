//! Shared error taxonomy (§7) for the boundary between `flow-core` and crates
//! that must speak its `Result` type directly — today that's the `ChatModel`
//! contract (§6) implemented by the `llm` crate's provider clients. Each
//! concrete provider error type converts into this one (`impl From<ProviderXError>
//! for FlowCoreError`, written in the provider's own crate per Rust's orphan
//! rules) rather than `flow-core` depending back on them.
//!
//! This is deliberately narrower than `flow_engine::FlowEngineError`, which
//! aggregates this type plus every other subsystem's error enum (§4.13).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FlowCoreError>;

/// Provider error taxonomy from §4.4: `ProviderConfigError`, `ProviderAuthError`
/// (401/403), `ProviderTimeoutError`, `ProviderRetryError` (exhausted),
/// `ProviderCircuitOpenError`.
#[derive(Debug, Error)]
pub enum FlowCoreError {
    #[error("provider configuration error: {0}")]
    ProviderConfig(String),

    #[error("provider authentication failed: {0}")]
    ProviderAuth(String),

    #[error("provider call timed out: {0}")]
    ProviderTimeout(String),

    #[error("provider retries exhausted after {attempts} attempts: {last_error}")]
    ProviderRetry { attempts: u32, last_error: String },

    #[error("circuit open for '{0}', rejecting call until cooldown elapses")]
    ProviderCircuitOpen(String),

    #[error("provider error: {0}")]
    Provider(String),
}
