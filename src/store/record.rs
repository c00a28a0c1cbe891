use crate::source::{Function, TrackedUpstream};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Store-native representation of one upstream function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordFunction {
    pub name: String,
    pub spec: serde_json::Value,
}

impl From<&Function> for RecordFunction {
    fn from(function: &Function) -> Self {
        Self {
            name: function.name.clone(),
            spec: function.spec.clone(),
        }
    }
}

impl From<Function> for RecordFunction {
    fn from(function: Function) -> Self {
        Self {
            name: function.name,
            spec: function.spec,
        }
    }
}

/// Maps discovered functions 1:1 into the store representation.
pub fn to_record_functions(functions: &[Function]) -> Vec<RecordFunction> {
    functions.iter().map(RecordFunction::from).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub name: String,
    /// Version stamped by the store on every write; updates are conditional on it.
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSpec {
    pub upstream_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub functions: Vec<RecordFunction>,
}

/// Persisted resource tracked per upstream. Only `spec.functions` is owned by
/// discovery; every other field belongs to whoever created the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagedRecord {
    pub metadata: RecordMetadata,
    pub spec: RecordSpec,
}

impl ManagedRecord {
    pub fn new(
        name: impl Into<String>,
        upstream_type: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            metadata: RecordMetadata {
                name: name.into(),
                ..RecordMetadata::default()
            },
            spec: RecordSpec {
                upstream_type: upstream_type.into(),
                config,
                functions: Vec::new(),
            },
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_functions(mut self, functions: Vec<RecordFunction>) -> Self {
        self.spec.functions = functions;
        self
    }

    /// Identity shared with the discovered upstream.
    pub fn id(&self) -> &str {
        &self.metadata.name
    }

    pub fn resource_version(&self) -> u64 {
        self.metadata.resource_version
    }

    pub fn functions(&self) -> &[RecordFunction] {
        &self.spec.functions
    }

    pub fn tracked(&self) -> TrackedUpstream {
        TrackedUpstream {
            id: self.metadata.name.clone(),
            upstream_type: self.spec.upstream_type.clone(),
            config: self.spec.config.clone(),
        }
    }
}
