//! Shape/dtype inference: the operand type system.
//!
//! Given an operator, the descriptors of its inputs (in the node input order
//! documented on [`Operator`]), and its options, either produce the output
//! descriptor(s) or fail. Inference never computes values; it validates and
//! infers before any node is appended to a builder, so a failed call leaves
//! the builder untouched.

mod conv;
mod elementwise;
mod matmul;
mod normalization;
mod pooling;
mod recurrent;
mod reduction;
mod structural;

use crate::error::{GraphError, Result};
use crate::operand::OperandDescriptor;
use crate::ops::Operator;

/// Infers the output descriptors for one operator application.
///
/// Most operators produce exactly one output; `lstm`/`lstmCell` add a
/// cell-state output and the sequence forms append a per-step output when
/// `returnSequence` is set.
pub fn output_descriptors(
    op: &Operator,
    inputs: &[OperandDescriptor],
) -> Result<Vec<OperandDescriptor>> {
    match op {
        Operator::Unary(unary) => elementwise::unary(*unary, inputs),
        Operator::Binary(binary) => elementwise::binary(*binary, inputs),
        Operator::Compare(compare) => elementwise::compare(*compare, inputs),
        Operator::Activation(activation) => elementwise::activation(*activation, inputs),
        Operator::Clamp(options) => elementwise::clamp(options, inputs),
        Operator::Prelu => elementwise::prelu(inputs),
        Operator::Cast(target) => elementwise::cast(*target, inputs),
        Operator::Reduce { kind, options } => reduction::reduce(*kind, options, inputs),
        Operator::ArgMinMax { kind, options } => reduction::arg_min_max(*kind, options, inputs),
        Operator::Conv2d(options) => conv::conv2d(options, inputs),
        Operator::ConvTranspose2d(options) => conv::conv_transpose2d(options, inputs),
        Operator::Pool2d { kind, options } => pooling::pool2d(*kind, options, inputs),
        Operator::Matmul => matmul::matmul(inputs),
        Operator::Gemm(options) => matmul::gemm(options, inputs),
        Operator::Concat { axis } => structural::concat(*axis, inputs),
        Operator::Pad(options) => structural::pad(options, inputs),
        Operator::Expand { new_shape } => structural::expand(new_shape, inputs),
        Operator::Gather { axis } => structural::gather(*axis, inputs),
        Operator::BatchNormalization(options) => normalization::batch_norm(options, inputs),
        Operator::InstanceNormalization(options) => normalization::instance_norm(options, inputs),
        Operator::LayerNormalization(options) => normalization::layer_norm(options, inputs),
        Operator::Gru {
            steps,
            hidden_size,
            options,
        } => recurrent::gru(*steps, *hidden_size, options, inputs),
        Operator::GruCell {
            hidden_size,
            options,
        } => recurrent::gru_cell(*hidden_size, options, inputs),
        Operator::Lstm {
            steps,
            hidden_size,
            options,
        } => recurrent::lstm(*steps, *hidden_size, options, inputs),
        Operator::LstmCell {
            hidden_size,
            options,
        } => recurrent::lstm_cell(*hidden_size, options, inputs),
    }
}

/// Asserts the node carries exactly `expected` inputs.
pub(crate) fn expect_arity(
    op: &'static str,
    inputs: &[OperandDescriptor],
    expected: usize,
) -> Result<()> {
    if inputs.len() != expected {
        return Err(GraphError::option(format!(
            "{op} expects {expected} inputs, got {}",
            inputs.len()
        )));
    }
    Ok(())
}

/// Computes the right-aligned broadcast of two shapes.
///
/// The shorter shape is padded on the left with size-1 dimensions; each
/// aligned pair must be equal or contain a 1, which stretches to the other
/// side's extent.
pub(crate) fn broadcast_shapes(op: &'static str, a: &[u32], b: &[u32]) -> Result<Vec<u32>> {
    let rank = a.len().max(b.len());
    let mut dims = Vec::with_capacity(rank);
    for i in 0..rank {
        let ad = aligned_dim(a, rank, i);
        let bd = aligned_dim(b, rank, i);
        let dim = if ad == bd || bd == 1 {
            ad
        } else if ad == 1 {
            bd
        } else {
            return Err(GraphError::shape(format!(
                "{op} cannot broadcast {a:?} with {b:?} (axis {i}: {ad} vs {bd})"
            )));
        };
        dims.push(dim);
    }
    Ok(dims)
}

fn aligned_dim(dims: &[u32], rank: usize, index: usize) -> u32 {
    let offset = rank - dims.len();
    if index < offset {
        1
    } else {
        dims[index - offset]
    }
}

/// Validates reduction/normalization axes: each in `[0, rank)` and unique.
pub(crate) fn validate_axes(op: &'static str, axes: &[usize], rank: usize) -> Result<()> {
    let mut seen = vec![false; rank];
    for &axis in axes {
        if axis >= rank {
            return Err(GraphError::option(format!(
                "{op} axis {axis} out of range for rank {rank}"
            )));
        }
        if seen[axis] {
            return Err(GraphError::option(format!("{op} repeats axis {axis}")));
        }
        seen[axis] = true;
    }
    Ok(())
}

/// Output extent of one spatial axis under the cross-correlation size formula.
pub(crate) fn conv_output_size(
    op: &'static str,
    input: u32,
    pad_begin: u32,
    pad_end: u32,
    window: u32,
    stride: u32,
    dilation: u32,
    ceil_mode: bool,
) -> Result<u32> {
    if stride == 0 || dilation == 0 {
        return Err(GraphError::option(format!(
            "{op} strides and dilations must be non-zero"
        )));
    }
    if window == 0 {
        return Err(GraphError::option(format!("{op} window must be non-zero")));
    }
    let effective = (window as u64 - 1) * dilation as u64 + 1;
    let padded = input as u64 + pad_begin as u64 + pad_end as u64;
    if padded < effective {
        return Err(GraphError::shape(format!(
            "{op} effective window {effective} exceeds padded input {padded}"
        )));
    }
    let span = padded - effective;
    let out = if ceil_mode {
        span.div_ceil(stride as u64) + 1
    } else {
        span / stride as u64 + 1
    };
    u32::try_from(out).map_err(|_| GraphError::shape(format!("{op} output dimension overflows")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_pads_shorter_shape_on_the_left() {
        let dims = broadcast_shapes("add", &[3, 1, 5], &[4, 5]).unwrap();
        assert_eq!(dims, vec![3, 4, 5]);
    }

    #[test]
    fn broadcast_accepts_scalars() {
        assert_eq!(broadcast_shapes("mul", &[], &[2, 3]).unwrap(), vec![2, 3]);
    }

    #[test]
    fn broadcast_rejects_unequal_non_one_dims() {
        let err = broadcast_shapes("add", &[3, 4], &[5, 4]).unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch(_)));
    }

    #[test]
    fn axes_must_be_unique_and_in_range() {
        assert!(validate_axes("reduceSum", &[0, 1], 3).is_ok());
        assert!(validate_axes("reduceSum", &[3], 3).is_err());
        assert!(validate_axes("reduceSum", &[1, 1], 3).is_err());
    }

    #[test]
    fn conv_size_formula_matches_reference() {
        // floor((8 + 0 + 0 - 1*(3-1) - 1) / 1) + 1 = 6
        assert_eq!(
            conv_output_size("conv2d", 8, 0, 0, 3, 1, 1, false).unwrap(),
            6
        );
        // stride 2: floor((8 - 3) / 2) + 1 = 3, ceil: 4
        assert_eq!(
            conv_output_size("maxPool2d", 8, 0, 0, 3, 2, 1, false).unwrap(),
            3
        );
        assert_eq!(
            conv_output_size("maxPool2d", 8, 0, 0, 3, 2, 1, true).unwrap(),
            4
        );
    }
}
