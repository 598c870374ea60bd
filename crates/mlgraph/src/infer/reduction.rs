//! Inference rules for the `reduce*` family and `argMin`/`argMax`.

use crate::error::{GraphError, Result};
use crate::operand::{DataType, OperandDescriptor};
use crate::ops::{ArgMinMaxKind, ArgMinMaxOptions, ReduceKind, ReduceOptions};

use super::{expect_arity, validate_axes};

pub(super) fn reduce(
    kind: ReduceKind,
    options: &ReduceOptions,
    inputs: &[OperandDescriptor],
) -> Result<Vec<OperandDescriptor>> {
    let name = reduce_name(kind);
    expect_arity(name, inputs, 1)?;
    let input = &inputs[0];
    if requires_float(kind) && !input.data_type.is_float() {
        return Err(GraphError::dtype(format!(
            "{name} requires a float input, got {:?}",
            input.data_type
        )));
    }
    let dims = reduced_dims(
        name,
        input.shape.dims(),
        options.axes.as_deref(),
        options.keep_dimensions,
    )?;
    Ok(vec![OperandDescriptor::new(input.data_type, dims)])
}

pub(super) fn arg_min_max(
    kind: ArgMinMaxKind,
    options: &ArgMinMaxOptions,
    inputs: &[OperandDescriptor],
) -> Result<Vec<OperandDescriptor>> {
    let name = match kind {
        ArgMinMaxKind::Min => "argMin",
        ArgMinMaxKind::Max => "argMax",
    };
    expect_arity(name, inputs, 1)?;
    let input = &inputs[0];
    let dims = reduced_dims(
        name,
        input.shape.dims(),
        options.axes.as_deref(),
        options.keep_dimensions,
    )?;
    // Indices are always 64-bit regardless of the input dtype.
    Ok(vec![OperandDescriptor::new(DataType::I64, dims)])
}

/// Shared axis-collapse rule: remove selected axes, or keep them as size 1.
fn reduced_dims(
    name: &'static str,
    dims: &[u32],
    axes: Option<&[usize]>,
    keep_dimensions: bool,
) -> Result<Vec<u32>> {
    let rank = dims.len();
    let all_axes: Vec<usize>;
    let axes = match axes {
        Some(axes) => {
            validate_axes(name, axes, rank)?;
            axes
        }
        None => {
            all_axes = (0..rank).collect();
            &all_axes
        }
    };

    let mut reduced = vec![false; rank];
    for &axis in axes {
        reduced[axis] = true;
    }

    let mut out = Vec::with_capacity(rank);
    for (axis, &dim) in dims.iter().enumerate() {
        if reduced[axis] {
            if keep_dimensions {
                out.push(1);
            }
        } else {
            out.push(dim);
        }
    }
    Ok(out)
}

fn requires_float(kind: ReduceKind) -> bool {
    matches!(
        kind,
        ReduceKind::L2 | ReduceKind::LogSum | ReduceKind::LogSumExp | ReduceKind::Mean
    )
}

fn reduce_name(kind: ReduceKind) -> &'static str {
    match kind {
        ReduceKind::L1 => "reduceL1",
        ReduceKind::L2 => "reduceL2",
        ReduceKind::LogSum => "reduceLogSum",
        ReduceKind::LogSumExp => "reduceLogSumExp",
        ReduceKind::Max => "reduceMax",
        ReduceKind::Mean => "reduceMean",
        ReduceKind::Min => "reduceMin",
        ReduceKind::Product => "reduceProduct",
        ReduceKind::Sum => "reduceSum",
        ReduceKind::SumSquare => "reduceSumSquare",
    }
}
