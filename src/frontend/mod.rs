//! Framework trace documents and their conversion into the graph IR.
//!
//! A trace is the recorded forward run of a trained model: every tensor
//! with its declared shape (constants carry their data) and every function
//! application in execution order. The converter reads it once and never
//! mutates it.

pub mod converter;


pub use converter::GraphConverter;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GraphError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphTrace {
    pub variables: Vec<TraceVariable>,
    pub nodes: Vec<TraceNode>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceVariable {
    pub id: String,
    pub shape: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<f32>>,
}

/// One recorded function application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceNode {
    /// Framework function name, e.g. `Convolution2DFunction`.
    pub op: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl GraphTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| GraphError::malformed(e.to_string()))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    // ─── Programmatic construction ────────────────────────────────

    pub fn variable(&mut self, id: &str, shape: &[usize]) -> &mut Self {
        self.variables.push(TraceVariable {
            id: id.to_string(),
            shape: shape.to_vec(),
            dtype: None,
            data: None,
        });
        self
    }

    pub fn constant(&mut self, id: &str, shape: &[usize], data: Vec<f32>) -> &mut Self {
        self.variables.push(TraceVariable {
            id: id.to_string(),
            shape: shape.to_vec(),
            dtype: None,
            data: Some(data),
        });
        self
    }

    pub fn node(&mut self, op: &str, inputs: &[&str], outputs: &[&str], params: Value) -> &mut Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.nodes.push(TraceNode {
            op: op.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            params,
        });
        self
    }

    pub fn io(&mut self, inputs: &[&str], outputs: &[&str]) -> &mut Self {
        self.inputs = inputs.iter().map(|s| s.to_string()).collect();
        self.outputs = outputs.iter().map(|s| s.to_string()).collect();
        self
    }
}
