//! Inference rules for elementwise unary/binary operators, comparisons,
//! activations, clamp, prelu, and cast.

use crate::error::{GraphError, Result};
use crate::operand::{DataType, OperandDescriptor, Shape};
use crate::ops::{Activation, BinaryOp, ClampOptions, CompareOp, UnaryOp};

use super::{broadcast_shapes, expect_arity};

pub(super) fn unary(op: UnaryOp, inputs: &[OperandDescriptor]) -> Result<Vec<OperandDescriptor>> {
    let name = unary_name(op);
    expect_arity(name, inputs, 1)?;
    let input = &inputs[0];
    match op {
        UnaryOp::LogicalNot => {
            if input.data_type != DataType::U8 {
                return Err(GraphError::dtype(format!(
                    "logicalNot requires u8 input, got {:?}",
                    input.data_type
                )));
            }
        }
        UnaryOp::Cos
        | UnaryOp::Erf
        | UnaryOp::Exp
        | UnaryOp::Log
        | UnaryOp::Reciprocal
        | UnaryOp::Sin
        | UnaryOp::Sqrt
        | UnaryOp::Tan => {
            if !input.data_type.is_float() {
                return Err(GraphError::dtype(format!(
                    "{name} requires a float input, got {:?}",
                    input.data_type
                )));
            }
        }
        UnaryOp::Abs | UnaryOp::Ceil | UnaryOp::Floor | UnaryOp::Identity | UnaryOp::Neg => {}
    }
    Ok(vec![input.clone()])
}

pub(super) fn binary(op: BinaryOp, inputs: &[OperandDescriptor]) -> Result<Vec<OperandDescriptor>> {
    let name = binary_name(op);
    expect_arity(name, inputs, 2)?;
    let (a, b) = (&inputs[0], &inputs[1]);
    if a.data_type != b.data_type {
        return Err(GraphError::dtype(format!(
            "{name} operands must share dtype ({:?} vs {:?})",
            a.data_type, b.data_type
        )));
    }
    let dims = broadcast_shapes(name, a.shape.dims(), b.shape.dims())?;
    Ok(vec![OperandDescriptor::new(a.data_type, dims)])
}

pub(super) fn compare(
    op: CompareOp,
    inputs: &[OperandDescriptor],
) -> Result<Vec<OperandDescriptor>> {
    let name = compare_name(op);
    expect_arity(name, inputs, 2)?;
    let (a, b) = (&inputs[0], &inputs[1]);
    if a.data_type != b.data_type {
        return Err(GraphError::dtype(format!(
            "{name} operands must share dtype ({:?} vs {:?})",
            a.data_type, b.data_type
        )));
    }
    let dims = broadcast_shapes(name, a.shape.dims(), b.shape.dims())?;
    // Comparisons always yield the boolean-equivalent integer type.
    Ok(vec![OperandDescriptor::new(DataType::U8, dims)])
}

pub(super) fn activation(
    act: Activation,
    inputs: &[OperandDescriptor],
) -> Result<Vec<OperandDescriptor>> {
    expect_arity("activation", inputs, 1)?;
    let input = &inputs[0];
    if !input.data_type.is_float() {
        return Err(GraphError::dtype(format!(
            "activations require a float input, got {:?}",
            input.data_type
        )));
    }
    if let Activation::Elu { alpha } = act {
        if !alpha.is_finite() {
            return Err(GraphError::option("elu alpha must be finite"));
        }
    }
    Ok(vec![input.clone()])
}

pub(super) fn clamp(
    options: &ClampOptions,
    inputs: &[OperandDescriptor],
) -> Result<Vec<OperandDescriptor>> {
    expect_arity("clamp", inputs, 1)?;
    if options.min_value > options.max_value {
        return Err(GraphError::option(format!(
            "clamp minValue {} exceeds maxValue {}",
            options.min_value, options.max_value
        )));
    }
    Ok(vec![inputs[0].clone()])
}

pub(super) fn prelu(inputs: &[OperandDescriptor]) -> Result<Vec<OperandDescriptor>> {
    expect_arity("prelu", inputs, 2)?;
    let (input, slope) = (&inputs[0], &inputs[1]);
    if input.data_type != slope.data_type {
        return Err(GraphError::dtype(format!(
            "prelu slope dtype {:?} must match input {:?}",
            slope.data_type, input.data_type
        )));
    }
    if !input.data_type.is_float() {
        return Err(GraphError::dtype(format!(
            "prelu requires a float input, got {:?}",
            input.data_type
        )));
    }
    // The slope broadcasts against the input; the output keeps the input shape.
    let dims = broadcast_shapes("prelu", input.shape.dims(), slope.shape.dims())?;
    if dims != input.shape.dims() {
        return Err(GraphError::shape(format!(
            "prelu slope {:?} must broadcast to the input shape {:?}",
            slope.shape.dims(),
            input.shape.dims()
        )));
    }
    Ok(vec![input.clone()])
}

pub(super) fn cast(
    target: DataType,
    inputs: &[OperandDescriptor],
) -> Result<Vec<OperandDescriptor>> {
    expect_arity("cast", inputs, 1)?;
    Ok(vec![OperandDescriptor {
        data_type: target,
        shape: Shape::new(inputs[0].shape.dims().to_vec()),
    }])
}

fn unary_name(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Abs => "abs",
        UnaryOp::Ceil => "ceil",
        UnaryOp::Cos => "cos",
        UnaryOp::Erf => "erf",
        UnaryOp::Exp => "exp",
        UnaryOp::Floor => "floor",
        UnaryOp::Identity => "identity",
        UnaryOp::Log => "log",
        UnaryOp::Neg => "neg",
        UnaryOp::Reciprocal => "reciprocal",
        UnaryOp::Sin => "sin",
        UnaryOp::Sqrt => "sqrt",
        UnaryOp::Tan => "tan",
        UnaryOp::LogicalNot => "logicalNot",
    }
}

fn binary_name(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "add",
        BinaryOp::Sub => "sub",
        BinaryOp::Mul => "mul",
        BinaryOp::Div => "div",
        BinaryOp::Max => "max",
        BinaryOp::Min => "min",
        BinaryOp::Pow => "pow",
    }
}

fn compare_name(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Equal => "equal",
        CompareOp::Greater => "greater",
        CompareOp::GreaterOrEqual => "greaterOrEqual",
        CompareOp::Lesser => "lesser",
        CompareOp::LesserOrEqual => "lesserOrEqual",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_desc(dims: &[u32]) -> OperandDescriptor {
        OperandDescriptor::new(DataType::F32, dims.to_vec())
    }

    #[test]
    fn unary_preserves_descriptor() {
        let out = unary(UnaryOp::Sqrt, &[f32_desc(&[2, 3])]).unwrap();
        assert_eq!(out, vec![f32_desc(&[2, 3])]);
    }

    #[test]
    fn compare_yields_u8() {
        let out = compare(CompareOp::Greater, &[f32_desc(&[4]), f32_desc(&[1])]).unwrap();
        assert_eq!(out[0].data_type, DataType::U8);
        assert_eq!(out[0].shape.dims(), &[4]);
    }

    #[test]
    fn binary_rejects_mixed_dtypes() {
        let int = OperandDescriptor::new(DataType::I32, vec![2]);
        let err = binary(BinaryOp::Add, &[f32_desc(&[2]), int]).unwrap_err();
        assert!(matches!(err, GraphError::DataTypeMismatch(_)));
    }

    #[test]
    fn cast_replaces_dtype_only() {
        let out = cast(DataType::I64, &[f32_desc(&[5, 6])]).unwrap();
        assert_eq!(out[0].data_type, DataType::I64);
        assert_eq!(out[0].shape.dims(), &[5, 6]);
    }

    #[test]
    fn prelu_slope_must_not_outgrow_input() {
        let err = prelu(&[f32_desc(&[1, 4]), f32_desc(&[3, 4])]).unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch(_)));
    }
}
