use std::fmt;

use serde::Serialize;

use super::OperatorId;

/// Arena index of a variable. Never reused within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariableId(pub(crate) u32);

impl VariableId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    #[default]
    Float32,
}

impl DType {
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Float32 => 4,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "float32" | "f32" => Some(DType::Float32),
            _ => None,
        }
    }
}

/// A tensor flowing through the graph.
///
/// `producer` and `consumers` are back-references owned by the graph; they
/// are only updated through `Graph` methods.
#[derive(Debug, Clone)]
pub struct Variable {
    pub id: VariableId,
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub data: Option<Vec<f32>>,
    pub(crate) producer: Option<OperatorId>,
    pub(crate) consumers: Vec<OperatorId>,
}

impl Variable {
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_constant(&self) -> bool {
        self.data.is_some()
    }

    pub fn producer(&self) -> Option<OperatorId> {
        self.producer
    }

    pub fn consumers(&self) -> &[OperatorId] {
        &self.consumers
    }

    pub fn byte_len(&self) -> usize {
        self.size() * self.dtype.size_in_bytes()
    }
}
