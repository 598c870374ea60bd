//! Inference rules for the normalization operators. All three preserve the
//! input descriptor; inference is purely validation of the statistic and
//! parameter operands.

use crate::error::{GraphError, Result};
use crate::operand::OperandDescriptor;
use crate::ops::{BatchNormOptions, InputLayout, InstanceNormOptions, LayerNormOptions};

use super::validate_axes;

fn check_float_input(op: &'static str, input: &OperandDescriptor) -> Result<()> {
    if !input.data_type.is_float() {
        return Err(GraphError::dtype(format!(
            "{op} requires a float input, got {:?}",
            input.data_type
        )));
    }
    Ok(())
}

/// Validates one statistic or parameter operand against the expected shape.
fn check_param(
    op: &'static str,
    role: &'static str,
    param: &OperandDescriptor,
    input: &OperandDescriptor,
    expected: &[u32],
) -> Result<()> {
    if param.data_type != input.data_type {
        return Err(GraphError::dtype(format!(
            "{op} {role} dtype {:?} must match input {:?}",
            param.data_type, input.data_type
        )));
    }
    if param.shape.dims() != expected {
        return Err(GraphError::shape(format!(
            "{op} {role} must have shape {expected:?}, got {:?}",
            param.shape.dims()
        )));
    }
    Ok(())
}

pub(super) fn batch_norm(
    options: &BatchNormOptions,
    inputs: &[OperandDescriptor],
) -> Result<Vec<OperandDescriptor>> {
    const OP: &str = "batchNormalization";
    let expected = 3 + options.has_scale as usize + options.has_bias as usize;
    if inputs.len() != expected {
        return Err(GraphError::option(format!(
            "{OP} expects {expected} inputs for its flags, got {}",
            inputs.len()
        )));
    }
    let input = &inputs[0];
    check_float_input(OP, input)?;
    let rank = input.shape.rank();
    if options.axis >= rank {
        return Err(GraphError::option(format!(
            "{OP} axis {} out of range for rank {rank}",
            options.axis
        )));
    }
    if !options.epsilon.is_finite() || options.epsilon <= 0.0 {
        return Err(GraphError::option(format!(
            "{OP} epsilon must be positive, got {}",
            options.epsilon
        )));
    }
    let channel = [input.shape.dims()[options.axis]];
    check_param(OP, "mean", &inputs[1], input, &channel)?;
    check_param(OP, "variance", &inputs[2], input, &channel)?;
    let mut next = 3;
    if options.has_scale {
        check_param(OP, "scale", &inputs[next], input, &channel)?;
        next += 1;
    }
    if options.has_bias {
        check_param(OP, "bias", &inputs[next], input, &channel)?;
    }
    Ok(vec![input.clone()])
}

pub(super) fn instance_norm(
    options: &InstanceNormOptions,
    inputs: &[OperandDescriptor],
) -> Result<Vec<OperandDescriptor>> {
    const OP: &str = "instanceNormalization";
    let expected = 1 + options.has_scale as usize + options.has_bias as usize;
    if inputs.len() != expected {
        return Err(GraphError::option(format!(
            "{OP} expects {expected} inputs for its flags, got {}",
            inputs.len()
        )));
    }
    let input = &inputs[0];
    check_float_input(OP, input)?;
    if input.shape.rank() != 4 {
        return Err(GraphError::shape(format!(
            "{OP} input must be rank 4, got rank {}",
            input.shape.rank()
        )));
    }
    if !options.epsilon.is_finite() || options.epsilon <= 0.0 {
        return Err(GraphError::option(format!(
            "{OP} epsilon must be positive, got {}",
            options.epsilon
        )));
    }
    let channel_axis = match options.layout {
        InputLayout::Nchw => 1,
        InputLayout::Nhwc => 3,
    };
    let channel = [input.shape.dims()[channel_axis]];
    let mut next = 1;
    if options.has_scale {
        check_param(OP, "scale", &inputs[next], input, &channel)?;
        next += 1;
    }
    if options.has_bias {
        check_param(OP, "bias", &inputs[next], input, &channel)?;
    }
    Ok(vec![input.clone()])
}

pub(super) fn layer_norm(
    options: &LayerNormOptions,
    inputs: &[OperandDescriptor],
) -> Result<Vec<OperandDescriptor>> {
    const OP: &str = "layerNormalization";
    let expected = 1 + options.has_scale as usize + options.has_bias as usize;
    if inputs.len() != expected {
        return Err(GraphError::option(format!(
            "{OP} expects {expected} inputs for its flags, got {}",
            inputs.len()
        )));
    }
    let input = &inputs[0];
    check_float_input(OP, input)?;
    if !options.epsilon.is_finite() || options.epsilon <= 0.0 {
        return Err(GraphError::option(format!(
            "{OP} epsilon must be positive, got {}",
            options.epsilon
        )));
    }
    let rank = input.shape.rank();
    // Default normalizes everything past the batch axis.
    let default_axes: Vec<usize>;
    let axes = match &options.axes {
        Some(axes) => {
            validate_axes(OP, axes, rank)?;
            axes.as_slice()
        }
        None => {
            default_axes = (1..rank).collect();
            &default_axes
        }
    };
    // Scale and bias carry the shape of the normalized slice.
    let normalized: Vec<u32> = axes.iter().map(|&axis| input.shape.dims()[axis]).collect();
    let mut next = 1;
    if options.has_scale {
        check_param(OP, "scale", &inputs[next], input, &normalized)?;
        next += 1;
    }
    if options.has_bias {
        check_param(OP, "bias", &inputs[next], input, &normalized)?;
    }
    Ok(vec![input.clone()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::DataType;

    fn f32_desc(dims: &[u32]) -> OperandDescriptor {
        OperandDescriptor::new(DataType::F32, dims.to_vec())
    }

    #[test]
    fn batch_norm_validates_channel_statistics() {
        let out = batch_norm(
            &BatchNormOptions::default(),
            &[f32_desc(&[2, 3, 4, 4]), f32_desc(&[3]), f32_desc(&[3])],
        )
        .unwrap();
        assert_eq!(out[0].shape.dims(), &[2, 3, 4, 4]);
    }

    #[test]
    fn batch_norm_rejects_wrong_statistic_shape() {
        let err = batch_norm(
            &BatchNormOptions::default(),
            &[f32_desc(&[2, 3, 4, 4]), f32_desc(&[4]), f32_desc(&[3])],
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch(_)));
    }

    #[test]
    fn batch_norm_scale_flag_extends_arity() {
        let options = BatchNormOptions {
            has_scale: true,
            ..Default::default()
        };
        let err = batch_norm(
            &options,
            &[f32_desc(&[2, 3, 4, 4]), f32_desc(&[3]), f32_desc(&[3])],
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::InvalidOption(_)));
    }

    #[test]
    fn instance_norm_nhwc_reads_trailing_channels() {
        let options = InstanceNormOptions {
            layout: InputLayout::Nhwc,
            has_scale: true,
            ..Default::default()
        };
        let out = instance_norm(&options, &[f32_desc(&[1, 4, 4, 6]), f32_desc(&[6])]).unwrap();
        assert_eq!(out[0].shape.dims(), &[1, 4, 4, 6]);
    }

    #[test]
    fn layer_norm_default_axes_cover_non_batch_dims() {
        let options = LayerNormOptions {
            has_scale: true,
            has_bias: true,
            ..Default::default()
        };
        let out = layer_norm(
            &options,
            &[f32_desc(&[2, 3, 4]), f32_desc(&[3, 4]), f32_desc(&[3, 4])],
        )
        .unwrap();
        assert_eq!(out[0].shape.dims(), &[2, 3, 4]);
    }

    #[test]
    fn layer_norm_rejects_epsilon_zero() {
        let options = LayerNormOptions {
            epsilon: 0.0,
            ..Default::default()
        };
        assert!(layer_norm(&options, &[f32_desc(&[2, 3])]).is_err());
    }
}
