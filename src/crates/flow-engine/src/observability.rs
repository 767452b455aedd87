//! Observability Sink (C14, §4.14): the structured `tracing` events and
//! running counters every flow run emits. Each event pairs a named span
//! with a duration rather than introducing a second logging facade —
//! `tracing` spans/events are the operator-facing diagnostics, the
//! counters are the stable numbers a caller can poll after a run completes.

use crate::transaction::TransactionError;
use llm::{ProviderCallEvent, ProviderCallStatus};
use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters for one [`crate::engine::FlowEngine`] instance, shared
/// across every run it executes. Counts are process-lifetime totals, not
/// per-run; per-run detail lives in `FlowState::steps`/`errors`/`logs`
/// instead (§3).
#[derive(Debug, Default)]
pub struct ObservabilitySink {
    steps_run: AtomicU64,
    steps_failed: AtomicU64,
    provider_calls: AtomicU64,
    provider_failures: AtomicU64,
    tool_calls: AtomicU64,
    tool_failures: AtomicU64,
    transaction_rollbacks: AtomicU64,
    redirects: AtomicU64,
}

impl ObservabilitySink {
    pub fn new() -> Self {
        Self::default()
    }

    #[tracing::instrument(skip(self), fields(node_id, success))]
    pub fn record_step(&self, node_id: &str, success: bool, duration_ms: u64) {
        self.steps_run.fetch_add(1, Ordering::Relaxed);
        if success {
            tracing::debug!(node_id, duration_ms, "step completed");
        } else {
            self.steps_failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(node_id, duration_ms, "step failed");
        }
    }

    pub fn record_provider_call(&self, event: &ProviderCallEvent) {
        self.provider_calls.fetch_add(1, Ordering::Relaxed);
        match event.status {
            ProviderCallStatus::Success => {
                tracing::debug!(
                    provider = %event.provider_key,
                    duration_ms = event.duration.as_millis() as u64,
                    retry_count = event.retry_count,
                    "provider call succeeded"
                );
            }
            _ => {
                self.provider_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    provider = %event.provider_key,
                    status = ?event.status,
                    retry_count = event.retry_count,
                    error_class = event.error_class.as_deref(),
                    "provider call did not succeed"
                );
            }
        }
    }

    pub fn record_tool_call(&self, tool_name: &str, ok: bool, status: Option<u16>) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
        if ok {
            tracing::debug!(tool = tool_name, status, "tool call succeeded");
        } else {
            self.tool_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(tool = tool_name, status, "tool call failed");
        }
    }

    pub fn record_transaction_outcome(&self, result: &Result<(), TransactionError>) {
        if let Err(TransactionError::RolledBack(reason)) = result {
            self.transaction_rollbacks.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(reason, "transaction rolled back");
        }
    }

    pub fn record_redirect(&self, from_flow: &str, to_flow: &str) {
        self.redirects.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(from = from_flow, to = to_flow, "flow redirected");
    }

    pub fn steps_run(&self) -> u64 {
        self.steps_run.load(Ordering::Relaxed)
    }

    pub fn steps_failed(&self) -> u64 {
        self.steps_failed.load(Ordering::Relaxed)
    }

    pub fn provider_calls(&self) -> u64 {
        self.provider_calls.load(Ordering::Relaxed)
    }

    pub fn provider_failures(&self) -> u64 {
        self.provider_failures.load(Ordering::Relaxed)
    }

    pub fn tool_calls(&self) -> u64 {
        self.tool_calls.load(Ordering::Relaxed)
    }

    pub fn tool_failures(&self) -> u64 {
        self.tool_failures.load(Ordering::Relaxed)
    }

    pub fn transaction_rollbacks(&self) -> u64 {
        self.transaction_rollbacks.load(Ordering::Relaxed)
    }

    pub fn redirects(&self) -> u64 {
        self.redirects.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn counts_steps_and_failures_separately() {
        let sink = ObservabilitySink::new();
        sink.record_step("a", true, 5);
        sink.record_step("b", false, 5);
        assert_eq!(sink.steps_run(), 2);
        assert_eq!(sink.steps_failed(), 1);
    }

    #[test]
    fn counts_provider_failures_for_non_success_statuses() {
        let sink = ObservabilitySink::new();
        sink.record_provider_call(&ProviderCallEvent {
            provider_key: "openai:gpt-4o".to_string(),
            status: ProviderCallStatus::CircuitOpen,
            duration: Duration::from_millis(1),
            retry_count: 0,
            error_class: Some("circuit_open".to_string()),
        });
        assert_eq!(sink.provider_calls(), 1);
        assert_eq!(sink.provider_failures(), 1);
    }
}
