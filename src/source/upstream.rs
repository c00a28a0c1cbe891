use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One discovered callable: a name plus an opaque invocation spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub spec: serde_json::Value,
}

impl Function {
    pub fn new(name: impl Into<String>, spec: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }
}

/// Everything a source reported for one backend during a single poll cycle.
///
/// Values are produced fresh on every fetch and never persisted directly; the
/// reconciler copies `functions` into the matching managed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    pub id: String,
    pub functions: Vec<Function>,
}

impl Upstream {
    pub fn new(id: impl Into<String>, functions: Vec<Function>) -> Self {
        Self {
            id: id.into(),
            functions,
        }
    }

    /// Returns the first function name that appears more than once.
    pub fn duplicate_function(&self) -> Option<&str> {
        let mut seen = HashSet::with_capacity(self.functions.len());
        self.functions
            .iter()
            .map(|function| function.name.as_str())
            .find(|name| !seen.insert(*name))
    }
}
