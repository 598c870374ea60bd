//! Execution engine: binds buffers to a compiled graph and drives the kernel
//! backend through the topological node order.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::backend::{BackendError, KernelBackend, TensorValue};
use crate::error::{GraphError, Result};
use crate::graph::Graph;

/// The binding maps handed back by a successful `compute` call.
///
/// Input buffers are returned untouched; output buffers hold the produced
/// tensor bytes.
#[derive(Debug)]
pub struct ComputeResult {
    pub inputs: HashMap<String, Vec<u8>>,
    pub outputs: HashMap<String, Vec<u8>>,
}

pub(crate) fn compute(
    graph: &Graph,
    inputs: HashMap<String, Vec<u8>>,
    mut outputs: HashMap<String, Vec<u8>>,
    backend: &dyn KernelBackend,
) -> Result<ComputeResult> {
    validate_bindings(graph, &inputs, &graph.inputs, "input")?;
    validate_bindings(graph, &outputs, &graph.outputs, "output")?;

    debug!(
        backend = backend.name(),
        nodes = graph.node_count(),
        "compute started"
    );

    // Per-call slot storage; concurrent calls on one graph never share state.
    let mut values: Vec<Option<TensorValue>> = vec![None; graph.slots.len()];
    for (&slot, payload) in &graph.constants {
        values[slot] = Some(TensorValue::new(graph.slots[slot].clone(), payload.clone()));
    }
    for (name, &slot) in &graph.inputs {
        let payload: Arc<[u8]> = Arc::from(inputs[name].as_slice());
        values[slot] = Some(TensorValue::new(graph.slots[slot].clone(), payload));
    }

    for (index, node) in graph.nodes.iter().enumerate() {
        let mut node_inputs = Vec::with_capacity(node.inputs.len());
        for &slot in &node.inputs {
            let value = values[slot]
                .clone()
                .ok_or_else(|| GraphError::option("graph slot read before production"))?;
            node_inputs.push(value);
        }
        let expected: Vec<_> = node
            .outputs
            .iter()
            .map(|&slot| graph.slots[slot].clone())
            .collect();
        trace!(node = index, op = node.op.name(), "evaluating node");
        let produced = backend
            .evaluate(&node.op, &node_inputs, &expected)
            .map_err(|source| GraphError::BackendEvaluationFailed {
                node: index,
                source,
            })?;
        if produced.len() != expected.len() {
            return Err(GraphError::BackendEvaluationFailed {
                node: index,
                source: BackendError::execution(format!(
                    "expected {} outputs, backend returned {}",
                    expected.len(),
                    produced.len()
                )),
            });
        }
        for ((&slot, descriptor), value) in node.outputs.iter().zip(&expected).zip(produced) {
            let expected_len = sized_length(descriptor.byte_length())?;
            if value.byte_length() != expected_len {
                return Err(GraphError::BackendEvaluationFailed {
                    node: index,
                    source: BackendError::execution(format!(
                        "{} produced {} bytes where the contract requires {}",
                        node.op.name(),
                        value.byte_length(),
                        expected_len
                    )),
                });
            }
            values[slot] = Some(value);
        }
        // Release intermediates after their last reader; output slots carry a
        // sentinel last-use and survive the walk.
        for &slot in &node.inputs {
            if graph.last_use[slot] == index {
                values[slot] = None;
            }
        }
    }

    for (name, &slot) in &graph.outputs {
        let value = values[slot]
            .as_ref()
            .ok_or_else(|| GraphError::option(format!("output slot for `{name}` was released")))?;
        let buffer = outputs
            .get_mut(name)
            .ok_or_else(|| GraphError::MissingBinding(name.clone()))?;
        buffer.copy_from_slice(&value.bytes);
    }

    debug!("compute finished");
    Ok(ComputeResult { inputs, outputs })
}

/// Rejects unknown names, missing bindings, and byte-length mismatches
/// before any node is evaluated.
fn validate_bindings(
    graph: &Graph,
    bound: &HashMap<String, Vec<u8>>,
    declared: &BTreeMap<String, usize>,
    role: &str,
) -> Result<()> {
    for name in bound.keys() {
        if !declared.contains_key(name) {
            return Err(GraphError::UnknownBindingName(format!("{name} ({role})")));
        }
    }
    for (name, &slot) in declared {
        let buffer = bound
            .get(name)
            .ok_or_else(|| GraphError::MissingBinding(name.clone()))?;
        let expected = sized_length(graph.slots[slot].byte_length())?;
        if buffer.len() != expected {
            return Err(GraphError::BufferSizeMismatch {
                name: name.clone(),
                expected,
                actual: buffer.len(),
            });
        }
    }
    Ok(())
}

fn sized_length(length: Option<usize>) -> Result<usize> {
    length.ok_or_else(|| GraphError::option("compiled descriptor byte length overflows"))
}
