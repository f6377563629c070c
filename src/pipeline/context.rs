//! # Request Context
//!
//! The mutable, single-threaded state a request's pipeline accumulates:
//! the input body, the (post-mapping) parameter set, the current step's
//! resolved arguments, and the per-step raw results and mapping outputs.

use serde_json::{json, Value};

use crate::params::ParameterSet;

/// Per-request pipeline state.
///
/// `steps[i]` and `outputs[i]` exist for every completed step; `args`
/// holds the step currently being evaluated and is overwritten at the
/// start of each step.
#[derive(Debug)]
pub struct RequestContext {
    pub body: Value,
    pub params: ParameterSet,
    pub args: Vec<Value>,
    pub steps: Vec<Value>,
    pub outputs: Vec<Value>,
}

impl RequestContext {
    pub fn new(body: Value, params: ParameterSet) -> Self {
        Self {
            body,
            params,
            args: Vec::new(),
            steps: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Snapshot the context as the mapping expressions receive under
    /// `$context`. The copies mean in-step mutation after the snapshot is
    /// invisible to the expression.
    pub fn opaque(&self) -> Value {
        json!({
            "params": {
                "path": Value::Object(self.params.path.clone()),
                "query": Value::Object(self.params.query.clone()),
            },
            "body": self.body.clone(),
            "args": Value::Array(self.args.clone()),
            "steps": Value::Array(self.steps.clone()),
            "outputs": Value::Array(self.outputs.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_shape() {
        let ctx = RequestContext::new(Value::Null, ParameterSet::default());
        let view = ctx.opaque();
        assert!(view.get("params").and_then(|p| p.get("path")).is_some());
        assert!(view.get("params").and_then(|p| p.get("query")).is_some());
        assert_eq!(view.get("body"), Some(&Value::Null));
        assert_eq!(view.get("args"), Some(&json!([])));
        assert_eq!(view.get("steps"), Some(&json!([])));
        assert_eq!(view.get("outputs"), Some(&json!([])));
    }

    #[test]
    fn test_opaque_is_a_snapshot() {
        let mut ctx = RequestContext::new(Value::Null, ParameterSet::default());
        let view = ctx.opaque();
        ctx.outputs.push(json!({"id": 1}));
        assert_eq!(view.get("outputs"), Some(&json!([])));
    }
}
