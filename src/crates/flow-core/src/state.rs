//! `FlowState` (§3): per-run mutable state threaded through the scheduler.

use crate::env::VariableEnvironment;
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowError {
    pub node_id: String,
    pub message: String,
    pub handled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub node_id: String,
    pub success: bool,
    pub duration_ms: u64,
    pub cost: Option<f64>,
    pub output: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputRequest {
    pub name: String,
    pub label: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub message: String,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteEntry {
    pub timestamp: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub timestamp: String,
    pub label: String,
}

pub const REDIRECT_FLOW_KEY: &str = "__redirect_flow__";
pub const AWAITING_INPUT_KEY: &str = "__awaiting_input__";
pub const RETURNED_KEY: &str = "__returned__";

/// Mirrors §3's `FlowState`: `data`, `context`, `variables`, `errors`,
/// `inputs/logs/notes/checkpoints`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowState {
    pub data: IndexMap<String, Value>,
    pub context: IndexMap<String, Value>,
    #[serde(skip)]
    pub variables: VariableEnvironment,
    pub errors: Vec<FlowError>,
    pub steps: Vec<StepResult>,
    pub inputs: Vec<InputRequest>,
    pub logs: Vec<LogEntry>,
    pub notes: Vec<NoteEntry>,
    pub checkpoints: Vec<CheckpointEntry>,
    pub last_output: Value,
}

impl Default for FlowState {
    fn default() -> Self {
        Self {
            data: IndexMap::new(),
            context: IndexMap::new(),
            variables: VariableEnvironment::new(),
            errors: Vec::new(),
            steps: Vec::new(),
            inputs: Vec::new(),
            logs: Vec::new(),
            notes: Vec::new(),
            checkpoints: Vec::new(),
            last_output: Value::Null,
        }
    }
}

impl FlowState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_step_output(&mut self, step_name: &str, output: Value) {
        self.data.insert(format!("step.{step_name}.output"), output);
    }

    pub fn step_output(&self, step_name: &str) -> Option<&Value> {
        self.data.get(&format!("step.{step_name}.output"))
    }

    pub fn mark_redirect(&mut self, flow_name: &str) {
        self.context.insert(REDIRECT_FLOW_KEY.to_string(), Value::Str(flow_name.to_string()));
    }

    pub fn redirect_target(&self) -> Option<String> {
        self.context.get(REDIRECT_FLOW_KEY).and_then(|v| v.as_str()).map(str::to_string)
    }

    pub fn clear_transient_markers(&mut self) {
        self.context.shift_remove(REDIRECT_FLOW_KEY);
        self.context.shift_remove(AWAITING_INPUT_KEY);
        self.context.shift_remove(RETURNED_KEY);
    }

    pub fn mark_awaiting_input(&mut self) {
        self.context.insert(AWAITING_INPUT_KEY.to_string(), Value::Bool(true));
    }

    pub fn is_awaiting_input(&self) -> bool {
        matches!(self.context.get(AWAITING_INPUT_KEY), Some(Value::Bool(true)))
    }

    pub fn has_redirect(&self) -> bool {
        self.context.contains_key(REDIRECT_FLOW_KEY)
    }

    /// §4.2: "raising a `ReturnSignal(value)` ... terminates the flow with
    /// `last_output = coerce_to_json_serializable(value)`." Set by the
    /// dispatcher when a `script`/`function` node's statement block produces
    /// `Flow::Returned`; `run_node` checks this the same way it checks
    /// redirect/awaiting-input to stop traversing further nodes.
    pub fn mark_returned(&mut self, value: Value) {
        self.last_output = value;
        self.context.insert(RETURNED_KEY.to_string(), Value::Bool(true));
    }

    pub fn has_returned(&self) -> bool {
        matches!(self.context.get(RETURNED_KEY), Some(Value::Bool(true)))
    }

    /// Deep-clones `data` and `variables` for an independent parallel branch.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// Builds the `state`/`step`/`user`/`secret`/`env`/`input` bindings an
    /// `ExternalResolver` would otherwise supply (§4.1's identifier
    /// resolution order). Rebuilt fresh before every expression
    /// evaluation so a script's `state.foo`/`step.bar.output` reads always
    /// see the live value, not a snapshot taken at flow-prepare time.
    pub fn ambient_bindings(&self) -> IndexMap<String, Value> {
        let mut plain_state = IndexMap::new();
        let mut step_tree: IndexMap<String, Value> = IndexMap::new();
        for (k, v) in &self.data {
            if let Some(rest) = k.strip_prefix("step.") {
                if let Some(name) = rest.strip_suffix(".output") {
                    step_tree.insert(name.to_string(), Value::from_map(IndexMap::from([("output".to_string(), v.clone())])));
                    continue;
                }
            }
            plain_state.insert(k.clone(), v.clone());
        }
        let mut out = IndexMap::new();
        out.insert("state".to_string(), Value::from_map(plain_state));
        out.insert("step".to_string(), Value::from_map(step_tree));
        for key in ["user", "secret", "env", "input"] {
            out.insert(key.to_string(), self.context.get(key).cloned().unwrap_or_else(Value::map));
        }
        out
    }

    /// Re-keys `other`'s non-namespaced `data` diff under `branch_id.` and
    /// overlays it onto `self` (§4.2 step 6). Keys already namespaced with
    /// `step.` are merged as-is. Errors are concatenated. Variable bindings
    /// are overlaid (assign if existing, declare otherwise), diffed against
    /// `self`'s variables as they stood before this call.
    pub fn merge_branch(&mut self, branch_id: &str, other: FlowState) {
        let base_vars = self.variables.clone_env();
        self.merge_branch_with_base(branch_id, other, &base_vars);
    }

    /// Same as `merge_branch`, but diffs `other.variables` against an
    /// explicit `base_vars` snapshot instead of `self.variables` as they
    /// stand when called. `merge_parallel_branches` needs this: folding
    /// several branches into `self` one at a time means `self.variables`
    /// drifts away from the pre-fork baseline after the first branch is
    /// applied, which would make later branches' diffs spuriously include
    /// keys an earlier branch touched but this branch never did.
    fn merge_branch_with_base(&mut self, branch_id: &str, mut other: FlowState, base_vars: &VariableEnvironment) {
        for (k, v) in other.data.drain(..) {
            if k.starts_with("step.") {
                self.data.insert(k, v);
            } else {
                self.data.insert(format!("{branch_id}.{k}"), v);
            }
        }
        self.errors.append(&mut other.errors);
        self.steps.append(&mut other.steps);
        self.inputs.append(&mut other.inputs);
        self.logs.append(&mut other.logs);
        self.notes.append(&mut other.notes);
        self.checkpoints.append(&mut other.checkpoints);
        let var_diff = other.variables.diff(base_vars);
        self.variables.overlay(var_diff);
        if other.has_redirect() {
            if let Some(t) = other.redirect_target() {
                self.mark_redirect(&t);
            }
        }
        if other.is_awaiting_input() {
            self.mark_awaiting_input();
        }
        // Deliberately NOT propagated: a `return` inside one parallel branch
        // is that branch's own terminal value (its step output), not a
        // signal that the whole flow should stop once branches are merged
        // and the join continuation runs — `return` only escalates to a
        // flow-level stop when it unwinds a node run outside a fan-out.
    }
}

/// Merges a batch of branch final-states, sorted by branch id ascending so
/// that colliding keys resolve last-writer-wins = highest branch id (P3).
pub fn merge_parallel_branches(base: FlowState, mut branches: Vec<(String, FlowState)>) -> FlowState {
    branches.sort_by(|a, b| a.0.cmp(&b.0));
    let base_vars = base.variables.clone_env();
    let mut merged = base;
    for (branch_id, state) in branches {
        merged.merge_branch_with_base(&branch_id, state, &base_vars);
    }
    merged
}

/// `context` fields from §6: app, request, user, metadata.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub app_name: String,
    pub request_id: String,
    pub user_input: Value,
    pub user_context: IndexMap<String, Value>,
    pub metadata: IndexMap<String, Value>,
    pub secrets: HashMap<String, String>,
}

impl RunContext {
    pub fn inputs(&self) -> Option<&IndexMap<String, Value>> {
        match self.metadata.get("inputs") {
            Some(Value::Map(m)) => Some(m),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn branch_state(keys: &[(&str, i64)]) -> FlowState {
        let mut s = FlowState::new();
        for (k, v) in keys {
            s.data.insert((*k).to_string(), Value::Int(*v));
        }
        s
    }

    /// P3: merging disjoint-key branch diffs is commutative — the merge
    /// result doesn't depend on the order branches are passed in, as long
    /// as the branch-id pairing is kept (the function itself re-sorts by
    /// branch id, so this also covers callers handing branches in any
    /// order).
    proptest! {
        #[test]
        fn merge_disjoint_branches_is_order_independent(
            a_key in "[a-y]{1,6}", a_val in any::<i64>(),
            b_key in "[a-y]{1,6}", b_val in any::<i64>(),
        ) {
            prop_assume!(a_key != b_key);
            let base = FlowState::new();
            let branch_a = ("a".to_string(), branch_state(&[(a_key.as_str(), a_val)]));
            let branch_b = ("b".to_string(), branch_state(&[(b_key.as_str(), b_val)]));

            let forward = merge_parallel_branches(base.clone(), vec![branch_a.clone(), branch_b.clone()]);
            let backward = merge_parallel_branches(base, vec![branch_b, branch_a]);

            prop_assert_eq!(
                forward.data.get(&format!("a.{a_key}")),
                backward.data.get(&format!("a.{a_key}"))
            );
            prop_assert_eq!(
                forward.data.get(&format!("b.{b_key}")),
                backward.data.get(&format!("b.{b_key}"))
            );
        }
    }

    /// P3: a colliding key resolves to the highest branch id regardless of
    /// the order branches are passed to `merge_parallel_branches` in, since
    /// the function sorts by branch id before overlaying.
    proptest! {
        #[test]
        fn merge_colliding_key_resolves_to_highest_branch_id(
            key in "[a-z]{1,6}", val_a in any::<i64>(), val_b in any::<i64>(), val_c in any::<i64>(),
        ) {
            let base = FlowState::new();
            let branches = vec![
                ("branch-a".to_string(), branch_state(&[(key.as_str(), val_a)])),
                ("branch-b".to_string(), branch_state(&[(key.as_str(), val_b)])),
                ("branch-c".to_string(), branch_state(&[(key.as_str(), val_c)])),
            ];
            let mut shuffled = branches.clone();
            shuffled.reverse();

            let forward = merge_parallel_branches(base.clone(), branches);
            let backward = merge_parallel_branches(base, shuffled);

            // "branch-c" sorts highest lexically among a/b/c, so its value wins
            // in both orderings.
            let expected = Value::Int(val_c);
            prop_assert_eq!(forward.data.get(&format!("branch-c.{key}")), Some(&expected));
            prop_assert_eq!(backward.data.get(&format!("branch-c.{key}")), Some(&expected));
        }
    }

    /// §4.2 step 6: a `let`/`set`-bound variable written inside one parallel
    /// branch is overlaid into the merged state unprefixed (not namespaced
    /// like `data`, and not dropped).
    #[test]
    fn merge_overlays_a_variable_written_inside_one_branch() {
        let base = FlowState::new();

        let mut branch_a = base.fork();
        branch_a.variables.declare("a", Value::Int(1), false).unwrap();
        let mut branch_b = base.fork();
        branch_b.variables.declare("b", Value::Int(2), false).unwrap();

        let merged = merge_parallel_branches(
            base,
            vec![("a".to_string(), branch_a), ("b".to_string(), branch_b)],
        );

        assert_eq!(merged.variables.get_local("a"), Some(&Value::Int(1)));
        assert_eq!(merged.variables.get_local("b"), Some(&Value::Int(2)));
    }

    /// A variable declared before the fork and left untouched by one branch
    /// must survive that branch's merge even though the other branch
    /// reassigned it — the untouched branch's diff must not revert it.
    #[test]
    fn merge_does_not_revert_a_variable_only_the_other_branch_changed() {
        let mut base = FlowState::new();
        base.variables.declare("shared", Value::Int(0), false).unwrap();

        let mut branch_a = base.fork();
        branch_a.variables.assign("shared", Value::Int(99)).unwrap();
        let branch_b = base.fork(); // leaves "shared" untouched

        let merged = merge_parallel_branches(
            base,
            vec![("a".to_string(), branch_a), ("b".to_string(), branch_b)],
        );

        assert_eq!(merged.variables.get_local("shared"), Some(&Value::Int(99)));
    }

    /// Colliding variable writes resolve last-writer-wins by branch id,
    /// matching P3's rule for `data`.
    #[test]
    fn merge_resolves_colliding_variable_to_highest_branch_id() {
        let mut base = FlowState::new();
        base.variables.declare("x", Value::Int(0), false).unwrap();

        let mut branch_a = base.fork();
        branch_a.variables.assign("x", Value::Int(1)).unwrap();
        let mut branch_b = base.fork();
        branch_b.variables.assign("x", Value::Int(2)).unwrap();

        let merged = merge_parallel_branches(
            base,
            vec![("branch-a".to_string(), branch_a), ("branch-b".to_string(), branch_b)],
        );

        assert_eq!(merged.variables.get_local("x"), Some(&Value::Int(2)));
    }
}
