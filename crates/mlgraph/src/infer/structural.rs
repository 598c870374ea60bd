//! Inference rules for `concat`, `pad`, `expand`, and `gather`.

use crate::error::{GraphError, Result};
use crate::operand::OperandDescriptor;
use crate::ops::PadOptions;

use super::{broadcast_shapes, expect_arity};

pub(super) fn concat(axis: usize, inputs: &[OperandDescriptor]) -> Result<Vec<OperandDescriptor>> {
    const OP: &str = "concat";
    let first = inputs
        .first()
        .ok_or_else(|| GraphError::option(format!("{OP} requires at least one input")))?;
    let rank = first.shape.rank();
    if axis >= rank {
        return Err(GraphError::option(format!(
            "{OP} axis {axis} out of range for rank {rank}"
        )));
    }
    let mut dims = first.shape.dims().to_vec();
    for (index, input) in inputs.iter().enumerate().skip(1) {
        if input.data_type != first.data_type {
            return Err(GraphError::dtype(format!(
                "{OP} input {index} dtype {:?} differs from {:?}",
                input.data_type, first.data_type
            )));
        }
        if input.shape.rank() != rank {
            return Err(GraphError::shape(format!(
                "{OP} input {index} rank {} differs from {rank}",
                input.shape.rank()
            )));
        }
        for (d, (&a, &b)) in dims.iter().zip(input.shape.dims()).enumerate() {
            if d != axis && a != b {
                return Err(GraphError::shape(format!(
                    "{OP} input {index} disagrees on axis {d} ({b} vs {a})"
                )));
            }
        }
        dims[axis] = dims[axis]
            .checked_add(input.shape.dims()[axis])
            .ok_or_else(|| GraphError::shape(format!("{OP} axis {axis} extent overflows")))?;
    }
    Ok(vec![OperandDescriptor::new(first.data_type, dims)])
}

pub(super) fn pad(
    options: &PadOptions,
    inputs: &[OperandDescriptor],
) -> Result<Vec<OperandDescriptor>> {
    const OP: &str = "pad";
    expect_arity(OP, inputs, 1)?;
    let input = &inputs[0];
    let rank = input.shape.rank();
    if options.beginning_padding.len() != rank || options.ending_padding.len() != rank {
        return Err(GraphError::option(format!(
            "{OP} padding vectors must have one entry per axis (rank {rank}), got {} and {}",
            options.beginning_padding.len(),
            options.ending_padding.len()
        )));
    }
    let mut dims = Vec::with_capacity(rank);
    for (axis, &dim) in input.shape.dims().iter().enumerate() {
        let padded = dim
            .checked_add(options.beginning_padding[axis])
            .and_then(|d| d.checked_add(options.ending_padding[axis]))
            .ok_or_else(|| GraphError::shape(format!("{OP} axis {axis} extent overflows")))?;
        dims.push(padded);
    }
    Ok(vec![OperandDescriptor::new(input.data_type, dims)])
}

/// Broadcasts the input to `new_shape`; unlike binary broadcasting the target
/// is fixed, so every input axis must be 1 or already match it.
pub(super) fn expand(
    new_shape: &[u32],
    inputs: &[OperandDescriptor],
) -> Result<Vec<OperandDescriptor>> {
    const OP: &str = "expand";
    expect_arity(OP, inputs, 1)?;
    let input = &inputs[0];
    let dims = broadcast_shapes(OP, input.shape.dims(), new_shape)?;
    if dims != new_shape {
        return Err(GraphError::shape(format!(
            "{OP} cannot reach {new_shape:?} from {:?}",
            input.shape.dims()
        )));
    }
    Ok(vec![OperandDescriptor::new(input.data_type, dims)])
}

/// Output shape replaces the indexed axis with the indices shape.
pub(super) fn gather(axis: usize, inputs: &[OperandDescriptor]) -> Result<Vec<OperandDescriptor>> {
    const OP: &str = "gather";
    expect_arity(OP, inputs, 2)?;
    let (input, indices) = (&inputs[0], &inputs[1]);
    let rank = input.shape.rank();
    if axis >= rank {
        return Err(GraphError::option(format!(
            "{OP} axis {axis} out of range for rank {rank}"
        )));
    }
    if !indices.data_type.is_index() {
        return Err(GraphError::dtype(format!(
            "{OP} indices must be i32, u32, or i64, got {:?}",
            indices.data_type
        )));
    }
    let mut dims = Vec::with_capacity(rank - 1 + indices.shape.rank());
    dims.extend_from_slice(&input.shape.dims()[..axis]);
    dims.extend_from_slice(indices.shape.dims());
    dims.extend_from_slice(&input.shape.dims()[axis + 1..]);
    Ok(vec![OperandDescriptor::new(input.data_type, dims)])
}
