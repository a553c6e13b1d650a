//! Weight buffer packing.
//!
//! Constants are laid out back to back as host-order `f32` in the order
//! they are first read during the traversal, then any constant graph
//! outputs no operator reads. Offsets and lengths are in bytes.

use std::collections::HashSet;

use serde::Serialize;

use crate::ir::{Graph, OperatorId, VariableId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeightEntry {
    pub variable: String,
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightBuffer {
    pub entries: Vec<WeightEntry>,
    data: Vec<f32>,
}

impl WeightBuffer {
    pub fn pack(graph: &Graph, order: &[OperatorId]) -> Self {
        let mut seen: HashSet<VariableId> = HashSet::new();
        let referenced = order
            .iter()
            .flat_map(|&id| graph.operator(id).inputs.iter().copied());
        let candidates = referenced.chain(graph.outputs().iter().copied());

        let mut buffer = WeightBuffer::default();
        for id in candidates {
            let Some(values) = graph.variable(id).data.as_deref() else {
                continue;
            };
            if !seen.insert(id) {
                continue;
            }
            buffer.entries.push(WeightEntry {
                variable: id.to_string(),
                offset: buffer.data.len() * std::mem::size_of::<f32>(),
                length: std::mem::size_of_val(values),
            });
            buffer.data.extend_from_slice(values);
        }
        buffer
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    pub fn byte_len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn entry(&self, key: &str) -> Option<&WeightEntry> {
        self.entries.iter().find(|e| e.variable == key)
    }

    /// Offset of a constant in `f32` elements.
    pub fn element_offset(&self, key: &str) -> Option<usize> {
        self.entry(key).map(|e| e.offset / std::mem::size_of::<f32>())
    }

    /// The packed values of one entry.
    pub fn values(&self, entry: &WeightEntry) -> &[f32] {
        let size = std::mem::size_of::<f32>();
        let start = entry.offset / size;
        &self.data[start..start + entry.length / size]
    }
}
