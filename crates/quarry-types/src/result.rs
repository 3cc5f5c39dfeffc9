//! The result value produced by a single collection step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single step's output.
///
/// `id` is assigned by the pipeline at emit time and equals the producing
/// step's id. `data` is an arbitrary structured value; `meta` carries
/// kind-specific labels such as `exec_program` or `terraform_provider`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    #[serde(default)]
    pub id: String,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl StepResult {
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            id: String::new(),
            data,
            meta: BTreeMap::new(),
        }
    }

    pub fn with_meta(data: serde_json::Value, meta: BTreeMap<String, String>) -> Self {
        Self {
            id: String::new(),
            data,
            meta,
        }
    }
}
