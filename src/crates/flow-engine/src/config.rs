//! `EngineConfig` (§4.15): reads the handful of environment variables that
//! tune the engine's process-wide knobs. Everything else (provider
//! registrations, tool configs, record schemas) comes from the `IrProgram`
//! the caller hands to [`crate::engine::FlowEngine::new`], not the
//! environment.

use std::env;

/// `N3_MAX_PARALLEL_TASKS` governs the Step Scheduler's fan-out semaphore
/// (§5). `N3_PROVIDERS_JSON`/`N3_MEMORY_STORES_JSON` are accepted for parity
/// with the deployment conventions the original system used to wire up
/// provider/memory credentials out of band; this engine takes those same
/// bindings directly as constructor arguments, so the env vars are only
/// consulted for the parallelism knob. `NAMEL3SS_MAX_MACRO_OUTPUT` is
/// accepted (so a deployment's existing env file doesn't need editing) but
/// unused — macro expansion is out of this engine's scope.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_parallel_tasks: usize,
    pub providers_json: Option<String>,
    pub memory_stores_json: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_parallel_tasks: 4, providers_json: None, memory_stores_json: None }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let _ = env::var("NAMEL3SS_MAX_MACRO_OUTPUT");
        Self {
            max_parallel_tasks: env::var("N3_MAX_PARALLEL_TASKS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
            providers_json: env::var("N3_PROVIDERS_JSON").ok(),
            memory_stores_json: env::var("N3_MEMORY_STORES_JSON").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_max_parallel_tasks_is_four() {
        assert_eq!(EngineConfig::default().max_parallel_tasks, 4);
    }
}
