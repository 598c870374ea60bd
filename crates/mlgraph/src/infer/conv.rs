//! Inference rules for `conv2d` and `convTranspose2d`.

use crate::error::{GraphError, Result};
use crate::operand::{DataType, OperandDescriptor};
use crate::ops::{
    Conv2dFilterLayout, Conv2dOptions, ConvTranspose2dFilterLayout, ConvTranspose2dOptions,
    InputLayout,
};

use super::conv_output_size;

/// Rank-4 input split into (batch, channels, height, width).
struct InputDims {
    batch: u32,
    channels: u32,
    height: u32,
    width: u32,
}

fn split_input(
    op: &'static str,
    input: &OperandDescriptor,
    layout: InputLayout,
) -> Result<InputDims> {
    let dims = input.shape.dims();
    if dims.len() != 4 {
        return Err(GraphError::shape(format!(
            "{op} input must be rank 4, got rank {}",
            dims.len()
        )));
    }
    Ok(match layout {
        InputLayout::Nchw => InputDims {
            batch: dims[0],
            channels: dims[1],
            height: dims[2],
            width: dims[3],
        },
        InputLayout::Nhwc => InputDims {
            batch: dims[0],
            height: dims[1],
            width: dims[2],
            channels: dims[3],
        },
    })
}

fn assemble_output(layout: InputLayout, dims: InputDims) -> Vec<u32> {
    match layout {
        InputLayout::Nchw => vec![dims.batch, dims.channels, dims.height, dims.width],
        InputLayout::Nhwc => vec![dims.batch, dims.height, dims.width, dims.channels],
    }
}

fn check_filter(
    op: &'static str,
    input: &OperandDescriptor,
    filter: &OperandDescriptor,
) -> Result<()> {
    if !input.data_type.is_float() {
        return Err(GraphError::dtype(format!(
            "{op} requires a float input, got {:?}",
            input.data_type
        )));
    }
    if filter.data_type != input.data_type {
        return Err(GraphError::dtype(format!(
            "{op} filter dtype {:?} must match input {:?}",
            filter.data_type, input.data_type
        )));
    }
    if filter.shape.rank() != 4 {
        return Err(GraphError::shape(format!(
            "{op} filter must be rank 4, got rank {}",
            filter.shape.rank()
        )));
    }
    Ok(())
}

fn check_bias(
    op: &'static str,
    bias: &OperandDescriptor,
    dtype: DataType,
    output_channels: u32,
) -> Result<()> {
    if bias.data_type != dtype {
        return Err(GraphError::dtype(format!(
            "{op} bias dtype {:?} must match input {:?}",
            bias.data_type, dtype
        )));
    }
    if bias.shape.dims() != [output_channels] {
        return Err(GraphError::shape(format!(
            "{op} bias must have shape [{output_channels}], got {:?}",
            bias.shape.dims()
        )));
    }
    Ok(())
}

pub(super) fn conv2d(
    options: &Conv2dOptions,
    inputs: &[OperandDescriptor],
) -> Result<Vec<OperandDescriptor>> {
    const OP: &str = "conv2d";
    if !(2..=3).contains(&inputs.len()) {
        return Err(GraphError::option(format!(
            "{OP} expects 2 or 3 inputs, got {}",
            inputs.len()
        )));
    }
    let (input, filter) = (&inputs[0], &inputs[1]);
    check_filter(OP, input, filter)?;
    let in_dims = split_input(OP, input, options.input_layout)?;

    let f = filter.shape.dims();
    // (output channels, per-group input channels, kernel height, kernel width)
    let (out_channels, filter_in, kh, kw) = match options.filter_layout {
        Conv2dFilterLayout::Oihw => (f[0], f[1], f[2], f[3]),
        Conv2dFilterLayout::Hwio => (f[3], f[2], f[0], f[1]),
        Conv2dFilterLayout::Ohwi => (f[0], f[3], f[1], f[2]),
        Conv2dFilterLayout::Ihwo => (f[3], f[0], f[1], f[2]),
    };

    if options.groups == 0 {
        return Err(GraphError::option(format!("{OP} groups must be non-zero")));
    }
    if filter_in.checked_mul(options.groups) != Some(in_dims.channels) {
        return Err(GraphError::shape(format!(
            "{OP} input channels {} must equal filter input channels {} times groups {}",
            in_dims.channels, filter_in, options.groups
        )));
    }
    if out_channels % options.groups != 0 {
        return Err(GraphError::shape(format!(
            "{OP} output channels {} must be divisible by groups {}",
            out_channels, options.groups
        )));
    }
    if let Some(bias) = inputs.get(2) {
        check_bias(OP, bias, input.data_type, out_channels)?;
    }

    let [pad_hb, pad_he, pad_wb, pad_we] = options.padding;
    let out_h = conv_output_size(
        OP,
        in_dims.height,
        pad_hb,
        pad_he,
        kh,
        options.strides[0],
        options.dilations[0],
        false,
    )?;
    let out_w = conv_output_size(
        OP,
        in_dims.width,
        pad_wb,
        pad_we,
        kw,
        options.strides[1],
        options.dilations[1],
        false,
    )?;

    let out = assemble_output(
        options.input_layout,
        InputDims {
            batch: in_dims.batch,
            channels: out_channels,
            height: out_h,
            width: out_w,
        },
    );
    Ok(vec![OperandDescriptor::new(input.data_type, out)])
}

pub(super) fn conv_transpose2d(
    options: &ConvTranspose2dOptions,
    inputs: &[OperandDescriptor],
) -> Result<Vec<OperandDescriptor>> {
    const OP: &str = "convTranspose2d";
    if !(2..=3).contains(&inputs.len()) {
        return Err(GraphError::option(format!(
            "{OP} expects 2 or 3 inputs, got {}",
            inputs.len()
        )));
    }
    let (input, filter) = (&inputs[0], &inputs[1]);
    check_filter(OP, input, filter)?;
    let in_dims = split_input(OP, input, options.input_layout)?;

    let f = filter.shape.dims();
    // (input channels, per-group output channels, kernel height, kernel width)
    let (filter_in, out_per_group, kh, kw) = match options.filter_layout {
        ConvTranspose2dFilterLayout::Iohw => (f[0], f[1], f[2], f[3]),
        ConvTranspose2dFilterLayout::Hwoi => (f[3], f[2], f[0], f[1]),
        ConvTranspose2dFilterLayout::Ohwi => (f[3], f[0], f[1], f[2]),
    };

    if options.groups == 0 {
        return Err(GraphError::option(format!("{OP} groups must be non-zero")));
    }
    if filter_in != in_dims.channels {
        return Err(GraphError::shape(format!(
            "{OP} filter input channels {} must equal input channels {}",
            filter_in, in_dims.channels
        )));
    }
    if in_dims.channels % options.groups != 0 {
        return Err(GraphError::shape(format!(
            "{OP} input channels {} must be divisible by groups {}",
            in_dims.channels, options.groups
        )));
    }
    let out_channels = out_per_group
        .checked_mul(options.groups)
        .ok_or_else(|| GraphError::shape(format!("{OP} output channel count overflows")))?;
    if let Some(bias) = inputs.get(2) {
        check_bias(OP, bias, input.data_type, out_channels)?;
    }

    let [pad_hb, pad_he, pad_wb, pad_we] = options.padding;
    let out_h = transposed_output_size(
        OP,
        in_dims.height,
        pad_hb,
        pad_he,
        kh,
        options.strides[0],
        options.dilations[0],
        options.output_padding[0],
        options.output_sizes.map(|s| s[0]),
    )?;
    let out_w = transposed_output_size(
        OP,
        in_dims.width,
        pad_wb,
        pad_we,
        kw,
        options.strides[1],
        options.dilations[1],
        options.output_padding[1],
        options.output_sizes.map(|s| s[1]),
    )?;

    let out = assemble_output(
        options.input_layout,
        InputDims {
            batch: in_dims.batch,
            channels: out_channels,
            height: out_h,
            width: out_w,
        },
    );
    Ok(vec![OperandDescriptor::new(input.data_type, out)])
}

/// Inverse of the cross-correlation size formula. An explicit size overrides
/// `output_padding` but must stay within one stride of the base size.
#[allow(clippy::too_many_arguments)]
fn transposed_output_size(
    op: &'static str,
    input: u32,
    pad_begin: u32,
    pad_end: u32,
    window: u32,
    stride: u32,
    dilation: u32,
    output_padding: u32,
    explicit: Option<u32>,
) -> Result<u32> {
    if stride == 0 || dilation == 0 {
        return Err(GraphError::option(format!(
            "{op} strides and dilations must be non-zero"
        )));
    }
    if window == 0 || input == 0 {
        return Err(GraphError::shape(format!(
            "{op} window and input extents must be non-zero"
        )));
    }
    let base = (input as i64 - 1) * stride as i64 + (window as i64 - 1) * dilation as i64 + 1
        - pad_begin as i64
        - pad_end as i64;
    if base <= 0 {
        return Err(GraphError::shape(format!(
            "{op} padding {pad_begin}+{pad_end} consumes the whole output extent"
        )));
    }
    let out = match explicit {
        Some(size) => {
            let size = size as i64;
            if size < base || size >= base + stride as i64 {
                return Err(GraphError::option(format!(
                    "{op} outputSizes entry {size} unreachable (base {base}, stride {stride})"
                )));
            }
            size
        }
        None => {
            if output_padding >= stride {
                return Err(GraphError::option(format!(
                    "{op} outputPadding {output_padding} must be less than stride {stride}"
                )));
            }
            base + output_padding as i64
        }
    };
    u32::try_from(out).map_err(|_| GraphError::shape(format!("{op} output dimension overflows")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_desc(dims: &[u32]) -> OperandDescriptor {
        OperandDescriptor::new(DataType::F32, dims.to_vec())
    }

    #[test]
    fn conv2d_nchw_oihw_basic() {
        let out = conv2d(
            &Conv2dOptions::default(),
            &[f32_desc(&[1, 3, 8, 8]), f32_desc(&[4, 3, 3, 3])],
        )
        .unwrap();
        assert_eq!(out[0].shape.dims(), &[1, 4, 6, 6]);
    }

    #[test]
    fn conv2d_same_padding_keeps_extent() {
        let options = Conv2dOptions {
            padding: [1, 1, 1, 1],
            ..Default::default()
        };
        let out = conv2d(
            &options,
            &[f32_desc(&[2, 3, 8, 8]), f32_desc(&[4, 3, 3, 3])],
        )
        .unwrap();
        assert_eq!(out[0].shape.dims(), &[2, 4, 8, 8]);
    }

    #[test]
    fn conv2d_depthwise_groups() {
        let options = Conv2dOptions {
            groups: 4,
            ..Default::default()
        };
        let out = conv2d(
            &options,
            &[f32_desc(&[1, 4, 5, 5]), f32_desc(&[4, 1, 3, 3])],
        )
        .unwrap();
        assert_eq!(out[0].shape.dims(), &[1, 4, 3, 3]);
    }

    #[test]
    fn conv2d_rejects_channel_mismatch() {
        let err = conv2d(
            &Conv2dOptions::default(),
            &[f32_desc(&[1, 3, 8, 8]), f32_desc(&[4, 2, 3, 3])],
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch(_)));
    }

    #[test]
    fn conv2d_nhwc_hwio() {
        let options = Conv2dOptions {
            input_layout: InputLayout::Nhwc,
            filter_layout: Conv2dFilterLayout::Hwio,
            ..Default::default()
        };
        let out = conv2d(
            &options,
            &[f32_desc(&[1, 8, 8, 3]), f32_desc(&[3, 3, 3, 4])],
        )
        .unwrap();
        assert_eq!(out[0].shape.dims(), &[1, 6, 6, 4]);
    }

    #[test]
    fn conv2d_bias_must_match_output_channels() {
        let err = conv2d(
            &Conv2dOptions::default(),
            &[
                f32_desc(&[1, 3, 8, 8]),
                f32_desc(&[4, 3, 3, 3]),
                f32_desc(&[3]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch(_)));
    }

    #[test]
    fn conv_transpose2d_inverts_conv_size() {
        let options = ConvTranspose2dOptions {
            strides: [2, 2],
            ..Default::default()
        };
        // (3 - 1) * 2 + (3 - 1) + 1 = 7
        let out = conv_transpose2d(
            &options,
            &[f32_desc(&[1, 4, 3, 3]), f32_desc(&[4, 2, 3, 3])],
        )
        .unwrap();
        assert_eq!(out[0].shape.dims(), &[1, 2, 7, 7]);
    }

    #[test]
    fn conv_transpose2d_output_sizes_override_padding() {
        let options = ConvTranspose2dOptions {
            strides: [2, 2],
            output_padding: [1, 1],
            output_sizes: Some([7, 8]),
            ..Default::default()
        };
        let out = conv_transpose2d(
            &options,
            &[f32_desc(&[1, 4, 3, 3]), f32_desc(&[4, 2, 3, 3])],
        )
        .unwrap();
        assert_eq!(out[0].shape.dims(), &[1, 2, 7, 8]);
    }

    #[test]
    fn conv_transpose2d_rejects_unreachable_output_size() {
        let options = ConvTranspose2dOptions {
            strides: [2, 2],
            output_sizes: Some([10, 7]),
            ..Default::default()
        };
        let err = conv_transpose2d(
            &options,
            &[f32_desc(&[1, 4, 3, 3]), f32_desc(&[4, 2, 3, 3])],
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::InvalidOption(_)));
    }
}
