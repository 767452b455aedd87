//! Variable Environment (C2): scoped name -> value bindings with constness
//! and loop-variable expiry.

use crate::value::Value;
use std::collections::{HashMap, HashSet};

/// Resolves names the local environment does not own: `state.*`, `user.*`,
/// `secret.*`, `env.*`, `input.*`, `step.<name>.output`, frame names, step
/// aliases. Supplied by the scheduler at `prepare()` time.
pub trait ExternalResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<Value>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EnvError {
    #[error("'{0}' is unknown. Declare it with 'let {0} be …' or use state./user./step.")]
    UnknownIdentifier(String),

    #[error("'{0}' exists only inside this loop")]
    ExpiredLoopVar(String),

    #[error("cannot assign to unknown name '{0}'. Declare it first with 'let {0} be …'")]
    AssignUnknown(String),

    #[error("cannot assign to '{0}': it was declared as a constant")]
    AssignConstant(String),

    #[error("cannot declare '{0}': a constant of that name already exists")]
    RedeclareConstant(String),
}

/// Scoped name -> value bindings. Cloning produces an independent copy
/// (used for parallel branches, `keep/drop rows where`, loop bodies).
#[derive(Debug, Clone, Default)]
pub struct VariableEnvironment {
    values: HashMap<String, Value>,
    declared: HashSet<String>,
    constants: HashSet<String>,
    expired_loop_vars: HashSet<String>,
}

impl VariableEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: &str, value: Value, is_constant: bool) -> Result<(), EnvError> {
        if self.constants.contains(name) {
            return Err(EnvError::RedeclareConstant(name.to_string()));
        }
        self.expired_loop_vars.remove(name);
        self.values.insert(name.to_string(), value);
        self.declared.insert(name.to_string());
        if is_constant {
            self.constants.insert(name.to_string());
        } else {
            self.constants.remove(name);
        }
        Ok(())
    }

    pub fn assign(&mut self, name: &str, value: Value) -> Result<(), EnvError> {
        if self.constants.contains(name) {
            return Err(EnvError::AssignConstant(name.to_string()));
        }
        if !self.declared.contains(name) {
            return Err(EnvError::AssignUnknown(name.to_string()));
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Local-only lookup; does not consult an `ExternalResolver`.
    pub fn get_local(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.declared.contains(name)
    }

    pub fn is_expired_loop_var(&self, name: &str) -> bool {
        self.expired_loop_vars.contains(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.declared.remove(name);
        self.constants.remove(name);
        self.values.remove(name)
    }

    /// Marks `name` expired after its owning loop exits; any subsequent
    /// reference to it raises `EnvError::ExpiredLoopVar`.
    pub fn mark_loop_var_exited(&mut self, name: &str) {
        self.remove(name);
        self.expired_loop_vars.insert(name.to_string());
    }

    pub fn clone_env(&self) -> Self {
        self.clone()
    }

    /// Diff of bindings present in `self` but absent (or different) from
    /// `base` — used to re-key parallel-branch writes on merge.
    pub fn diff(&self, base: &Self) -> HashMap<String, Value> {
        let mut out = HashMap::new();
        for (k, v) in &self.values {
            match base.values.get(k) {
                Some(bv) if bv == v => {}
                _ => {
                    out.insert(k.clone(), v.clone());
                }
            }
        }
        out
    }

    pub fn overlay(&mut self, diff: HashMap<String, Value>) {
        for (k, v) in diff {
            if self.declared.contains(&k) {
                let _ = self.assign(&k, v);
            } else {
                let _ = self.declare(&k, v, false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_to_unknown_fails() {
        let mut env = VariableEnvironment::new();
        assert!(matches!(env.assign("x", Value::Int(1)), Err(EnvError::AssignUnknown(_))));
    }

    #[test]
    fn constants_cannot_be_reassigned() {
        let mut env = VariableEnvironment::new();
        env.declare("x", Value::Int(1), true).unwrap();
        assert!(matches!(env.assign("x", Value::Int(2)), Err(EnvError::AssignConstant(_))));
    }

    #[test]
    fn loop_var_expires_after_exit() {
        let mut env = VariableEnvironment::new();
        env.declare("row", Value::Int(1), false).unwrap();
        env.mark_loop_var_exited("row");
        assert!(env.is_expired_loop_var("row"));
        assert!(env.get_local("row").is_none());
    }

    #[test]
    fn diff_only_reports_changed_or_new_keys() {
        let base = VariableEnvironment::new();
        let mut branch = base.clone();
        branch.declare("a", Value::Int(1), false).unwrap();
        let diff = branch.diff(&base);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff.get("a"), Some(&Value::Int(1)));
    }
}
