//! Compiled graphs: the immutable product of [`GraphBuilder::build`].
//!
//! A [`Graph`] owns a topologically ordered node list over compact value
//! slots, the embedded constant payloads, the named input contracts, and the
//! named output slots. It is read-only after compilation and may be shared
//! freely across concurrent `compute` calls.
//!
//! [`GraphBuilder::build`]: crate::builder::GraphBuilder::build

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::operand::OperandDescriptor;
use crate::ops::Operator;

/// One operator application in compiled form, referring to value slots.
#[derive(Debug)]
pub(crate) struct CompiledNode {
    pub(crate) op: Operator,
    /// Slots read, in the operator's documented input order.
    pub(crate) inputs: Vec<usize>,
    /// Slots written, one per produced tensor.
    pub(crate) outputs: Vec<usize>,
}

/// Sentinel for slots that must survive the whole walk (graph outputs).
pub(crate) const KEEP_ALIVE: usize = usize::MAX;

/// An immutable, executable computation graph.
#[derive(Debug)]
pub struct Graph {
    pub(crate) nodes: Vec<CompiledNode>,
    /// Descriptor per value slot; slots cover reachable operands only.
    pub(crate) slots: Vec<OperandDescriptor>,
    /// Constant payloads by slot, embedded at compilation.
    pub(crate) constants: BTreeMap<usize, Arc<[u8]>>,
    /// Reachable declared inputs by name.
    pub(crate) inputs: BTreeMap<String, usize>,
    /// Declared outputs by name.
    pub(crate) outputs: BTreeMap<String, usize>,
    /// Index of the last node reading each slot, or [`KEEP_ALIVE`].
    pub(crate) last_use: Vec<usize>,
}

impl Graph {
    /// Number of compiled operator applications.
    ///
    /// Smaller than the builder's node count when dead nodes were dropped.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Iterates the reachable declared inputs and their contracts.
    pub fn inputs(&self) -> impl Iterator<Item = (&str, &OperandDescriptor)> {
        self.inputs
            .iter()
            .map(|(name, &slot)| (name.as_str(), &self.slots[slot]))
    }

    /// Iterates the declared outputs and their contracts.
    pub fn outputs(&self) -> impl Iterator<Item = (&str, &OperandDescriptor)> {
        self.outputs
            .iter()
            .map(|(name, &slot)| (name.as_str(), &self.slots[slot]))
    }

    /// Looks up the contract of one declared input.
    pub fn input_descriptor(&self, name: &str) -> Option<&OperandDescriptor> {
        self.inputs.get(name).map(|&slot| &self.slots[slot])
    }

    /// Looks up the contract of one declared output.
    pub fn output_descriptor(&self, name: &str) -> Option<&OperandDescriptor> {
        self.outputs.get(name).map(|&slot| &self.slots[slot])
    }
}
