//! Inference rules for the `*Pool2d` operators.

use crate::error::{GraphError, Result};
use crate::operand::OperandDescriptor;
use crate::ops::{InputLayout, Pool2dKind, Pool2dOptions, RoundingType};

use super::{conv_output_size, expect_arity};

pub(super) fn pool2d(
    kind: Pool2dKind,
    options: &Pool2dOptions,
    inputs: &[OperandDescriptor],
) -> Result<Vec<OperandDescriptor>> {
    let name = match kind {
        Pool2dKind::Average => "averagePool2d",
        Pool2dKind::L2 => "l2Pool2d",
        Pool2dKind::Max => "maxPool2d",
    };
    expect_arity(name, inputs, 1)?;
    let input = &inputs[0];
    if !input.data_type.is_float() {
        return Err(GraphError::dtype(format!(
            "{name} requires a float input, got {:?}",
            input.data_type
        )));
    }
    let dims = input.shape.dims();
    if dims.len() != 4 {
        return Err(GraphError::shape(format!(
            "{name} input must be rank 4, got rank {}",
            dims.len()
        )));
    }
    let (h_axis, w_axis) = match options.layout {
        InputLayout::Nchw => (2, 3),
        InputLayout::Nhwc => (1, 2),
    };
    // No window means global pooling over the padded spatial extent.
    let [pad_hb, pad_he, pad_wb, pad_we] = options.padding;
    let [wh, ww] = options.window_dimensions.unwrap_or([
        dims[h_axis] + pad_hb + pad_he,
        dims[w_axis] + pad_wb + pad_we,
    ]);
    let ceil = options.rounding_type == RoundingType::Ceil;
    let mut out_h = conv_output_size(
        name,
        dims[h_axis],
        pad_hb,
        pad_he,
        wh,
        options.strides[0],
        options.dilations[0],
        ceil,
    )?;
    let mut out_w = conv_output_size(
        name,
        dims[w_axis],
        pad_wb,
        pad_we,
        ww,
        options.strides[1],
        options.dilations[1],
        ceil,
    )?;

    // Explicit sizes win when they stay within one of the computed extent.
    if let Some([eh, ew]) = options.output_sizes {
        if eh.abs_diff(out_h) > 1 || ew.abs_diff(out_w) > 1 || eh == 0 || ew == 0 {
            return Err(GraphError::option(format!(
                "{name} outputSizes [{eh}, {ew}] disagree with computed [{out_h}, {out_w}]"
            )));
        }
        out_h = eh;
        out_w = ew;
    }

    let mut out = dims.to_vec();
    out[h_axis] = out_h;
    out[w_axis] = out_w;
    Ok(vec![OperandDescriptor::new(input.data_type, out)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::DataType;

    fn f32_desc(dims: &[u32]) -> OperandDescriptor {
        OperandDescriptor::new(DataType::F32, dims.to_vec())
    }

    fn window(dims: [u32; 2]) -> Pool2dOptions {
        Pool2dOptions {
            window_dimensions: Some(dims),
            ..Default::default()
        }
    }

    #[test]
    fn max_pool_basic_window() {
        let out = pool2d(Pool2dKind::Max, &window([2, 2]), &[f32_desc(&[1, 3, 4, 4])]).unwrap();
        assert_eq!(out[0].shape.dims(), &[1, 3, 3, 3]);
    }

    #[test]
    fn global_pooling_when_window_is_absent() {
        let out = pool2d(
            Pool2dKind::Average,
            &Pool2dOptions::default(),
            &[f32_desc(&[2, 5, 7, 9])],
        )
        .unwrap();
        assert_eq!(out[0].shape.dims(), &[2, 5, 1, 1]);
    }

    #[test]
    fn ceil_rounding_adds_partial_window() {
        let options = Pool2dOptions {
            window_dimensions: Some([3, 3]),
            strides: [2, 2],
            rounding_type: RoundingType::Ceil,
            ..Default::default()
        };
        let out = pool2d(Pool2dKind::Max, &options, &[f32_desc(&[1, 1, 8, 8])]).unwrap();
        assert_eq!(out[0].shape.dims(), &[1, 1, 4, 4]);
    }

    #[test]
    fn explicit_output_sizes_within_tolerance() {
        let options = Pool2dOptions {
            window_dimensions: Some([3, 3]),
            strides: [2, 2],
            output_sizes: Some([4, 4]),
            ..Default::default()
        };
        let out = pool2d(Pool2dKind::Max, &options, &[f32_desc(&[1, 1, 8, 8])]).unwrap();
        assert_eq!(out[0].shape.dims(), &[1, 1, 4, 4]);
    }

    #[test]
    fn explicit_output_sizes_out_of_tolerance_rejected() {
        let options = Pool2dOptions {
            window_dimensions: Some([3, 3]),
            strides: [2, 2],
            output_sizes: Some([6, 6]),
            ..Default::default()
        };
        let err = pool2d(Pool2dKind::Max, &options, &[f32_desc(&[1, 1, 8, 8])]).unwrap_err();
        assert!(matches!(err, GraphError::InvalidOption(_)));
    }

    #[test]
    fn nhwc_layout_pools_middle_axes() {
        let options = Pool2dOptions {
            window_dimensions: Some([2, 2]),
            layout: InputLayout::Nhwc,
            ..Default::default()
        };
        let out = pool2d(Pool2dKind::Average, &options, &[f32_desc(&[1, 4, 4, 3])]).unwrap();
        assert_eq!(out[0].shape.dims(), &[1, 3, 3, 3]);
    }
}
