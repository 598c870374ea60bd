//! Inference rules for `matmul` and `gemm`.

use crate::error::{GraphError, Result};
use crate::operand::OperandDescriptor;
use crate::ops::GemmOptions;

use super::{broadcast_shapes, expect_arity};

/// Batched matrix product with broadcasting over the leading axes.
///
/// Rank-1 operands are promoted to a row/column vector for the product and
/// the promoted axis is removed from the result.
pub(super) fn matmul(inputs: &[OperandDescriptor]) -> Result<Vec<OperandDescriptor>> {
    const OP: &str = "matmul";
    expect_arity(OP, inputs, 2)?;
    let (a, b) = (&inputs[0], &inputs[1]);
    if a.data_type != b.data_type {
        return Err(GraphError::dtype(format!(
            "{OP} operands must share dtype ({:?} vs {:?})",
            a.data_type, b.data_type
        )));
    }
    if !a.data_type.is_float() {
        return Err(GraphError::dtype(format!(
            "{OP} requires float operands, got {:?}",
            a.data_type
        )));
    }
    let (a_dims, b_dims) = (a.shape.dims(), b.shape.dims());
    if a_dims.is_empty() || b_dims.is_empty() {
        return Err(GraphError::shape(format!(
            "{OP} operands must be at least rank 1"
        )));
    }

    let a_vector = a_dims.len() == 1;
    let b_vector = b_dims.len() == 1;
    let a_mat: Vec<u32> = if a_vector {
        vec![1, a_dims[0]]
    } else {
        a_dims.to_vec()
    };
    let b_mat: Vec<u32> = if b_vector {
        vec![b_dims[0], 1]
    } else {
        b_dims.to_vec()
    };

    let (m, k_a) = (a_mat[a_mat.len() - 2], a_mat[a_mat.len() - 1]);
    let (k_b, n) = (b_mat[b_mat.len() - 2], b_mat[b_mat.len() - 1]);
    if k_a != k_b {
        return Err(GraphError::shape(format!(
            "{OP} inner dimensions disagree ({k_a} vs {k_b}) for {a_dims:?} x {b_dims:?}"
        )));
    }

    let batch = broadcast_shapes(OP, &a_mat[..a_mat.len() - 2], &b_mat[..b_mat.len() - 2])?;
    let mut dims = batch;
    if !a_vector {
        dims.push(m);
    }
    if !b_vector {
        dims.push(n);
    }
    Ok(vec![OperandDescriptor::new(a.data_type, dims)])
}

pub(super) fn gemm(
    options: &GemmOptions,
    inputs: &[OperandDescriptor],
) -> Result<Vec<OperandDescriptor>> {
    const OP: &str = "gemm";
    if !(2..=3).contains(&inputs.len()) {
        return Err(GraphError::option(format!(
            "{OP} expects 2 or 3 inputs, got {}",
            inputs.len()
        )));
    }
    let (a, b) = (&inputs[0], &inputs[1]);
    if a.data_type != b.data_type {
        return Err(GraphError::dtype(format!(
            "{OP} operands must share dtype ({:?} vs {:?})",
            a.data_type, b.data_type
        )));
    }
    if !a.data_type.is_float() {
        return Err(GraphError::dtype(format!(
            "{OP} requires float operands, got {:?}",
            a.data_type
        )));
    }
    if a.shape.rank() != 2 || b.shape.rank() != 2 {
        return Err(GraphError::shape(format!(
            "{OP} operands must be rank 2, got {:?} and {:?}",
            a.shape.dims(),
            b.shape.dims()
        )));
    }
    let (a_dims, b_dims) = (a.shape.dims(), b.shape.dims());
    let (m, k_a) = if options.a_transpose {
        (a_dims[1], a_dims[0])
    } else {
        (a_dims[0], a_dims[1])
    };
    let (k_b, n) = if options.b_transpose {
        (b_dims[1], b_dims[0])
    } else {
        (b_dims[0], b_dims[1])
    };
    if k_a != k_b {
        return Err(GraphError::shape(format!(
            "{OP} inner dimensions disagree ({k_a} vs {k_b})"
        )));
    }

    if let Some(c) = inputs.get(2) {
        if c.data_type != a.data_type {
            return Err(GraphError::dtype(format!(
                "{OP} c dtype {:?} must match a/b {:?}",
                c.data_type, a.data_type
            )));
        }
        if c.shape.rank() > 2 {
            return Err(GraphError::shape(format!(
                "{OP} c must be at most rank 2, got {:?}",
                c.shape.dims()
            )));
        }
        let broadcast = broadcast_shapes(OP, c.shape.dims(), &[m, n])?;
        if broadcast != [m, n] {
            return Err(GraphError::shape(format!(
                "{OP} c shape {:?} must broadcast to [{m}, {n}]",
                c.shape.dims()
            )));
        }
    }

    Ok(vec![OperandDescriptor::new(a.data_type, vec![m, n])])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::DataType;

    fn f32_desc(dims: &[u32]) -> OperandDescriptor {
        OperandDescriptor::new(DataType::F32, dims.to_vec())
    }

    #[test]
    fn matmul_broadcasts_batch_axes() {
        let out = matmul(&[f32_desc(&[5, 1, 2, 3]), f32_desc(&[4, 3, 6])]).unwrap();
        assert_eq!(out[0].shape.dims(), &[5, 4, 2, 6]);
    }

    #[test]
    fn matmul_vector_operands_drop_promoted_axes() {
        let out = matmul(&[f32_desc(&[3]), f32_desc(&[3])]).unwrap();
        assert_eq!(out[0].shape.rank(), 0);
        let out = matmul(&[f32_desc(&[2, 3]), f32_desc(&[3])]).unwrap();
        assert_eq!(out[0].shape.dims(), &[2]);
    }

    #[test]
    fn matmul_rejects_inner_mismatch() {
        let err = matmul(&[f32_desc(&[2, 3]), f32_desc(&[4, 5])]).unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch(_)));
    }

    #[test]
    fn gemm_transposes_apply_before_the_product() {
        let options = GemmOptions {
            a_transpose: true,
            ..Default::default()
        };
        let out = gemm(&options, &[f32_desc(&[3, 2]), f32_desc(&[3, 4])]).unwrap();
        assert_eq!(out[0].shape.dims(), &[2, 4]);
    }

    #[test]
    fn gemm_c_broadcasts_to_the_product_shape() {
        let out = gemm(
            &GemmOptions::default(),
            &[f32_desc(&[2, 3]), f32_desc(&[3, 4]), f32_desc(&[4])],
        )
        .unwrap();
        assert_eq!(out[0].shape.dims(), &[2, 4]);
    }

    #[test]
    fn gemm_rejects_non_matrix_operands() {
        let err = gemm(
            &GemmOptions::default(),
            &[f32_desc(&[2, 3, 4]), f32_desc(&[4, 5])],
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch(_)));
    }
}
