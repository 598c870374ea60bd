//! Scalar kernels over dense little-endian buffers.
//!
//! Numeric work goes through an f64 accumulator path with per-dtype
//! readers/writers, so every dtype in the catalog is handled by one kernel
//! body. Structural operators move raw element bytes and never reinterpret
//! them.

use half::f16;
use mlgraph::ops::{
    Activation, ArgMinMaxKind, ArgMinMaxOptions, BinaryOp, ClampOptions, CompareOp, GemmOptions,
    Operator, PadOptions, PaddingMode, ReduceKind, ReduceOptions, UnaryOp,
};
use mlgraph::{
    BackendError, BackendResult, DataType, KernelBackend, OperandDescriptor, TensorValue,
};
use tracing::trace;

/// Reference CPU kernel collaborator.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl KernelBackend for CpuBackend {
    fn name(&self) -> &str {
        "ref-cpu"
    }

    fn evaluate(
        &self,
        op: &Operator,
        inputs: &[TensorValue],
        outputs: &[OperandDescriptor],
    ) -> BackendResult<Vec<TensorValue>> {
        trace!(op = op.name(), "cpu kernel");
        if matches!(
            op,
            Operator::Conv2d(_)
                | Operator::ConvTranspose2d(_)
                | Operator::Pool2d { .. }
                | Operator::BatchNormalization(_)
                | Operator::InstanceNormalization(_)
                | Operator::LayerNormalization(_)
                | Operator::Gru { .. }
                | Operator::GruCell { .. }
                | Operator::Lstm { .. }
                | Operator::LstmCell { .. }
        ) {
            return Err(BackendError::unimplemented(
                op.name(),
                "no reference kernel; use a device backend",
            ));
        }
        let out = single_output(op, outputs)?;
        match op {
            Operator::Unary(unary) => eval_unary(*unary, arg(op, inputs, 0)?, out),
            Operator::Binary(binary) => {
                eval_binary(*binary, arg(op, inputs, 0)?, arg(op, inputs, 1)?, out)
            }
            Operator::Compare(compare) => {
                eval_compare(*compare, arg(op, inputs, 0)?, arg(op, inputs, 1)?, out)
            }
            Operator::Activation(act) => eval_activation(*act, arg(op, inputs, 0)?, out),
            Operator::Clamp(options) => eval_clamp(options, arg(op, inputs, 0)?, out),
            Operator::Prelu => eval_prelu(arg(op, inputs, 0)?, arg(op, inputs, 1)?, out),
            Operator::Cast(_) => eval_cast(arg(op, inputs, 0)?, out),
            Operator::Reduce { kind, options } => {
                eval_reduce(*kind, options, arg(op, inputs, 0)?, out)
            }
            Operator::ArgMinMax { kind, options } => {
                eval_arg_min_max(*kind, options, arg(op, inputs, 0)?, out)
            }
            Operator::Concat { axis } => eval_concat(*axis, inputs, out),
            Operator::Pad(options) => eval_pad(options, arg(op, inputs, 0)?, out),
            Operator::Expand { .. } => eval_expand(arg(op, inputs, 0)?, out),
            Operator::Gather { axis } => {
                eval_gather(*axis, arg(op, inputs, 0)?, arg(op, inputs, 1)?, out)
            }
            Operator::Matmul => eval_matmul(arg(op, inputs, 0)?, arg(op, inputs, 1)?, out),
            Operator::Gemm(options) => eval_gemm(options, inputs, out),
            _ => unreachable!("unimplemented operators are rejected above"),
        }
        .map(|value| vec![value])
    }
}

fn arg<'a>(op: &Operator, inputs: &'a [TensorValue], index: usize) -> BackendResult<&'a TensorValue> {
    inputs
        .get(index)
        .ok_or_else(|| BackendError::execution(format!("{} is missing input {index}", op.name())))
}

fn single_output<'a>(
    op: &Operator,
    outputs: &'a [OperandDescriptor],
) -> BackendResult<&'a OperandDescriptor> {
    match outputs {
        [only] => Ok(only),
        _ => Err(BackendError::execution(format!(
            "{} kernels produce exactly one output, asked for {}",
            op.name(),
            outputs.len()
        ))),
    }
}

// Dtype plumbing.

fn read_scalar(dtype: DataType, bytes: &[u8], index: usize) -> f64 {
    let size = dtype.size_in_bytes();
    let at = index * size;
    let chunk = &bytes[at..at + size];
    match dtype {
        DataType::F32 => f32::from_le_bytes(chunk.try_into().unwrap()) as f64,
        DataType::F16 => f16::from_le_bytes(chunk.try_into().unwrap()).to_f64(),
        DataType::I32 => i32::from_le_bytes(chunk.try_into().unwrap()) as f64,
        DataType::U32 => u32::from_le_bytes(chunk.try_into().unwrap()) as f64,
        DataType::I64 => i64::from_le_bytes(chunk.try_into().unwrap()) as f64,
        DataType::U64 => u64::from_le_bytes(chunk.try_into().unwrap()) as f64,
        DataType::I8 => i8::from_le_bytes(chunk.try_into().unwrap()) as f64,
        DataType::U8 => chunk[0] as f64,
    }
}

fn write_scalar(dtype: DataType, out: &mut Vec<u8>, value: f64) {
    match dtype {
        DataType::F32 => out.extend_from_slice(&(value as f32).to_le_bytes()),
        DataType::F16 => out.extend_from_slice(&f16::from_f64(value).to_le_bytes()),
        DataType::I32 => out.extend_from_slice(&(value as i32).to_le_bytes()),
        DataType::U32 => out.extend_from_slice(&(value as u32).to_le_bytes()),
        DataType::I64 => out.extend_from_slice(&(value as i64).to_le_bytes()),
        DataType::U64 => out.extend_from_slice(&(value as u64).to_le_bytes()),
        DataType::I8 => out.extend_from_slice(&(value as i8).to_le_bytes()),
        DataType::U8 => out.push(value as u8),
    }
}

fn element_count(dims: &[u32]) -> usize {
    dims.iter().map(|&d| d as usize).product()
}

fn coords_of(mut flat: usize, dims: &[u32]) -> Vec<usize> {
    let mut coords = vec![0; dims.len()];
    for (axis, &dim) in dims.iter().enumerate().rev() {
        coords[axis] = flat % dim as usize;
        flat /= dim as usize;
    }
    coords
}

fn flat_index(coords: &[usize], dims: &[u32]) -> usize {
    coords
        .iter()
        .zip(dims)
        .fold(0, |flat, (&c, &dim)| flat * dim as usize + c)
}

/// Flat source index for a broadcast operand, right-aligned against the
/// output coordinates.
fn broadcast_flat(out_coords: &[usize], in_dims: &[u32]) -> usize {
    let offset = out_coords.len() - in_dims.len();
    in_dims.iter().enumerate().fold(0, |flat, (axis, &dim)| {
        let coord = if dim == 1 { 0 } else { out_coords[offset + axis] };
        flat * dim as usize + coord
    })
}

fn copy_element(src: &[u8], src_index: usize, dst: &mut [u8], dst_index: usize, size: usize) {
    dst[dst_index * size..(dst_index + 1) * size]
        .copy_from_slice(&src[src_index * size..(src_index + 1) * size]);
}

fn finish(descriptor: &OperandDescriptor, bytes: Vec<u8>) -> BackendResult<TensorValue> {
    Ok(TensorValue::new(descriptor.clone(), bytes))
}

// Elementwise kernels.

fn map_elementwise(
    input: &TensorValue,
    out: &OperandDescriptor,
    f: impl Fn(f64) -> f64,
) -> BackendResult<TensorValue> {
    let dtype = input.descriptor.data_type;
    let n = element_count(input.descriptor.shape.dims());
    let mut bytes = Vec::with_capacity(n * out.data_type.size_in_bytes());
    for i in 0..n {
        write_scalar(out.data_type, &mut bytes, f(read_scalar(dtype, &input.bytes, i)));
    }
    finish(out, bytes)
}

fn erf(x: f64) -> f64 {
    // Abramowitz & Stegun 7.1.26, max error ~1.5e-7.
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

fn eval_unary(op: UnaryOp, input: &TensorValue, out: &OperandDescriptor) -> BackendResult<TensorValue> {
    map_elementwise(input, out, |x| match op {
        UnaryOp::Abs => x.abs(),
        UnaryOp::Ceil => x.ceil(),
        UnaryOp::Cos => x.cos(),
        UnaryOp::Erf => erf(x),
        UnaryOp::Exp => x.exp(),
        UnaryOp::Floor => x.floor(),
        UnaryOp::Identity => x,
        UnaryOp::Log => x.ln(),
        UnaryOp::Neg => -x,
        UnaryOp::Reciprocal => x.recip(),
        UnaryOp::Sin => x.sin(),
        UnaryOp::Sqrt => x.sqrt(),
        UnaryOp::Tan => x.tan(),
        UnaryOp::LogicalNot => {
            if x == 0.0 {
                1.0
            } else {
                0.0
            }
        }
    })
}

fn eval_activation(
    act: Activation,
    input: &TensorValue,
    out: &OperandDescriptor,
) -> BackendResult<TensorValue> {
    map_elementwise(input, out, |x| apply_activation(act, x))
}

fn apply_activation(act: Activation, x: f64) -> f64 {
    match act {
        Activation::Relu => x.max(0.0),
        Activation::Elu { alpha } => {
            if x >= 0.0 {
                x
            } else {
                alpha as f64 * (x.exp() - 1.0)
            }
        }
        Activation::Gelu => 0.5 * x * (1.0 + erf(x / std::f64::consts::SQRT_2)),
        Activation::HardSigmoid { alpha, beta } => {
            (alpha as f64 * x + beta as f64).clamp(0.0, 1.0)
        }
        Activation::HardSwish => x * (x + 3.0).clamp(0.0, 6.0) / 6.0,
        Activation::LeakyRelu { alpha } => {
            if x >= 0.0 {
                x
            } else {
                alpha as f64 * x
            }
        }
        Activation::Linear { alpha, beta } => alpha as f64 * x + beta as f64,
        Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        Activation::Tanh => x.tanh(),
    }
}

fn eval_clamp(
    options: &ClampOptions,
    input: &TensorValue,
    out: &OperandDescriptor,
) -> BackendResult<TensorValue> {
    let (lo, hi) = (options.min_value as f64, options.max_value as f64);
    map_elementwise(input, out, |x| x.clamp(lo, hi))
}

fn eval_cast(input: &TensorValue, out: &OperandDescriptor) -> BackendResult<TensorValue> {
    map_elementwise(input, out, |x| x)
}

fn zip_elementwise(
    a: &TensorValue,
    b: &TensorValue,
    out: &OperandDescriptor,
    f: impl Fn(f64, f64) -> f64,
) -> BackendResult<TensorValue> {
    let out_dims = out.shape.dims();
    let n = element_count(out_dims);
    let mut bytes = Vec::with_capacity(n * out.data_type.size_in_bytes());
    for i in 0..n {
        let coords = coords_of(i, out_dims);
        let x = read_scalar(
            a.descriptor.data_type,
            &a.bytes,
            broadcast_flat(&coords, a.descriptor.shape.dims()),
        );
        let y = read_scalar(
            b.descriptor.data_type,
            &b.bytes,
            broadcast_flat(&coords, b.descriptor.shape.dims()),
        );
        write_scalar(out.data_type, &mut bytes, f(x, y));
    }
    finish(out, bytes)
}

fn eval_binary(
    op: BinaryOp,
    a: &TensorValue,
    b: &TensorValue,
    out: &OperandDescriptor,
) -> BackendResult<TensorValue> {
    zip_elementwise(a, b, out, |x, y| match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        BinaryOp::Max => x.max(y),
        BinaryOp::Min => x.min(y),
        BinaryOp::Pow => x.powf(y),
    })
}

fn eval_compare(
    op: CompareOp,
    a: &TensorValue,
    b: &TensorValue,
    out: &OperandDescriptor,
) -> BackendResult<TensorValue> {
    zip_elementwise(a, b, out, |x, y| {
        let hit = match op {
            CompareOp::Equal => x == y,
            CompareOp::Greater => x > y,
            CompareOp::GreaterOrEqual => x >= y,
            CompareOp::Lesser => x < y,
            CompareOp::LesserOrEqual => x <= y,
        };
        hit as u8 as f64
    })
}

fn eval_prelu(
    input: &TensorValue,
    slope: &TensorValue,
    out: &OperandDescriptor,
) -> BackendResult<TensorValue> {
    zip_elementwise(input, slope, out, |x, s| if x >= 0.0 { x } else { s * x })
}

// Reductions.

struct ReducePlan {
    reduced: Vec<bool>,
    count: usize,
}

fn reduce_plan(dims: &[u32], axes: &Option<Vec<usize>>) -> ReducePlan {
    let mut reduced = vec![false; dims.len()];
    match axes {
        Some(axes) => {
            for &axis in axes {
                reduced[axis] = true;
            }
        }
        None => reduced.fill(true),
    }
    let count = dims
        .iter()
        .enumerate()
        .filter(|&(axis, _)| reduced[axis])
        .map(|(_, &d)| d as usize)
        .product();
    ReducePlan { reduced, count }
}

/// Output flat index for one input coordinate under a reduction.
fn reduce_target(
    coords: &[usize],
    reduced: &[bool],
    keep_dimensions: bool,
    out_dims: &[u32],
) -> usize {
    let mut out_coords = Vec::with_capacity(out_dims.len());
    for (axis, &c) in coords.iter().enumerate() {
        if reduced[axis] {
            if keep_dimensions {
                out_coords.push(0);
            }
        } else {
            out_coords.push(c);
        }
    }
    flat_index(&out_coords, out_dims)
}

fn eval_reduce(
    kind: ReduceKind,
    options: &ReduceOptions,
    input: &TensorValue,
    out: &OperandDescriptor,
) -> BackendResult<TensorValue> {
    let dims = input.descriptor.shape.dims();
    let plan = reduce_plan(dims, &options.axes);
    let out_dims = out.shape.dims();
    let init = match kind {
        ReduceKind::Product => 1.0,
        ReduceKind::Max => f64::NEG_INFINITY,
        ReduceKind::Min => f64::INFINITY,
        _ => 0.0,
    };
    let mut acc = vec![init; element_count(out_dims)];
    for i in 0..element_count(dims) {
        let x = read_scalar(input.descriptor.data_type, &input.bytes, i);
        let target = reduce_target(
            &coords_of(i, dims),
            &plan.reduced,
            options.keep_dimensions,
            out_dims,
        );
        let slot = &mut acc[target];
        match kind {
            ReduceKind::L1 => *slot += x.abs(),
            ReduceKind::L2 | ReduceKind::SumSquare => *slot += x * x,
            ReduceKind::LogSum | ReduceKind::Mean | ReduceKind::Sum => *slot += x,
            ReduceKind::LogSumExp => *slot += x.exp(),
            ReduceKind::Max => *slot = slot.max(x),
            ReduceKind::Min => *slot = slot.min(x),
            ReduceKind::Product => *slot *= x,
        }
    }
    let mut bytes = Vec::with_capacity(acc.len() * out.data_type.size_in_bytes());
    for value in acc {
        let value = match kind {
            ReduceKind::L2 => value.sqrt(),
            ReduceKind::Mean => value / plan.count as f64,
            ReduceKind::LogSum | ReduceKind::LogSumExp => value.ln(),
            _ => value,
        };
        write_scalar(out.data_type, &mut bytes, value);
    }
    finish(out, bytes)
}

fn eval_arg_min_max(
    kind: ArgMinMaxKind,
    options: &ArgMinMaxOptions,
    input: &TensorValue,
    out: &OperandDescriptor,
) -> BackendResult<TensorValue> {
    let dims = input.descriptor.shape.dims();
    let plan = reduce_plan(dims, &options.axes);
    let out_dims = out.shape.dims();
    let mut best: Vec<Option<(f64, usize)>> = vec![None; element_count(out_dims)];
    for i in 0..element_count(dims) {
        let x = read_scalar(input.descriptor.data_type, &input.bytes, i);
        let coords = coords_of(i, dims);
        let target = reduce_target(&coords, &plan.reduced, options.keep_dimensions, out_dims);
        // Flat index within the reduced subspace, row-major over the
        // reduced axes in ascending order.
        let within = dims
            .iter()
            .enumerate()
            .filter(|&(axis, _)| plan.reduced[axis])
            .fold(0usize, |flat, (axis, &dim)| flat * dim as usize + coords[axis]);
        let slot = &mut best[target];
        let better = match slot {
            None => true,
            Some((value, _)) => {
                let beats = match kind {
                    ArgMinMaxKind::Min => x < *value,
                    ArgMinMaxKind::Max => x > *value,
                };
                beats || (options.select_last_index && x == *value)
            }
        };
        if better {
            *slot = Some((x, within));
        }
    }
    let mut bytes = Vec::with_capacity(best.len() * out.data_type.size_in_bytes());
    for slot in best {
        let (_, index) = slot.ok_or_else(|| BackendError::execution("argMin/argMax over empty axis"))?;
        bytes.extend_from_slice(&(index as i64).to_le_bytes());
    }
    finish(out, bytes)
}

// Structural kernels; these move raw element bytes.

fn eval_concat(
    axis: usize,
    inputs: &[TensorValue],
    out: &OperandDescriptor,
) -> BackendResult<TensorValue> {
    let out_dims = out.shape.dims();
    let size = out.data_type.size_in_bytes();
    let mut bytes = vec![0u8; element_count(out_dims) * size];
    let mut offset = 0usize;
    for input in inputs {
        let dims = input.descriptor.shape.dims();
        for i in 0..element_count(dims) {
            let mut coords = coords_of(i, dims);
            coords[axis] += offset;
            copy_element(&input.bytes, i, &mut bytes, flat_index(&coords, out_dims), size);
        }
        offset += dims[axis] as usize;
    }
    finish(out, bytes)
}

fn eval_expand(input: &TensorValue, out: &OperandDescriptor) -> BackendResult<TensorValue> {
    let out_dims = out.shape.dims();
    let size = out.data_type.size_in_bytes();
    let n = element_count(out_dims);
    let mut bytes = vec![0u8; n * size];
    for i in 0..n {
        let src = broadcast_flat(&coords_of(i, out_dims), input.descriptor.shape.dims());
        copy_element(&input.bytes, src, &mut bytes, i, size);
    }
    finish(out, bytes)
}

fn eval_pad(
    options: &PadOptions,
    input: &TensorValue,
    out: &OperandDescriptor,
) -> BackendResult<TensorValue> {
    let in_dims = input.descriptor.shape.dims();
    let out_dims = out.shape.dims();
    let size = out.data_type.size_in_bytes();
    let mut fill = Vec::with_capacity(size);
    write_scalar(out.data_type, &mut fill, options.value as f64);

    let n = element_count(out_dims);
    let mut bytes = vec![0u8; n * size];
    'element: for i in 0..n {
        let coords = coords_of(i, out_dims);
        let mut src_coords = Vec::with_capacity(in_dims.len());
        for (axis, &c) in coords.iter().enumerate() {
            let pos = c as i64 - options.beginning_padding[axis] as i64;
            let extent = in_dims[axis] as i64;
            let resolved = if (0..extent).contains(&pos) {
                pos
            } else {
                match options.mode {
                    PaddingMode::Constant => {
                        bytes[i * size..(i + 1) * size].copy_from_slice(&fill);
                        continue 'element;
                    }
                    PaddingMode::Edge => pos.clamp(0, extent - 1),
                    PaddingMode::Reflection => mirror(pos, extent, false),
                    PaddingMode::Symmetric => mirror(pos, extent, true),
                }
            };
            src_coords.push(resolved as usize);
        }
        copy_element(
            &input.bytes,
            flat_index(&src_coords, in_dims),
            &mut bytes,
            i,
            size,
        );
    }
    finish(out, bytes)
}

/// Mirrors an out-of-range coordinate back into `[0, extent)`; `symmetric`
/// repeats the edge sample, reflection does not.
fn mirror(pos: i64, extent: i64, symmetric: bool) -> i64 {
    if extent == 1 {
        return 0;
    }
    let period = if symmetric { 2 * extent } else { 2 * (extent - 1) };
    let p = pos.rem_euclid(period);
    if symmetric {
        if p >= extent {
            period - 1 - p
        } else {
            p
        }
    } else if p >= extent {
        period - p
    } else {
        p
    }
}

fn eval_gather(
    axis: usize,
    input: &TensorValue,
    indices: &TensorValue,
    out: &OperandDescriptor,
) -> BackendResult<TensorValue> {
    let in_dims = input.descriptor.shape.dims();
    let idx_dims = indices.descriptor.shape.dims();
    let out_dims = out.shape.dims();
    let size = out.data_type.size_in_bytes();
    let extent = in_dims[axis] as i64;
    let n = element_count(out_dims);
    let mut bytes = vec![0u8; n * size];
    for i in 0..n {
        let coords = coords_of(i, out_dims);
        let idx_flat = flat_index(&coords[axis..axis + idx_dims.len()], idx_dims);
        let picked = read_index(indices, idx_flat);
        if !(0..extent).contains(&picked) {
            return Err(BackendError::execution(format!(
                "gather index {picked} out of range for axis extent {extent}"
            )));
        }
        let mut src_coords = Vec::with_capacity(in_dims.len());
        src_coords.extend_from_slice(&coords[..axis]);
        src_coords.push(picked as usize);
        src_coords.extend_from_slice(&coords[axis + idx_dims.len()..]);
        copy_element(
            &input.bytes,
            flat_index(&src_coords, in_dims),
            &mut bytes,
            i,
            size,
        );
    }
    finish(out, bytes)
}

fn read_index(indices: &TensorValue, flat: usize) -> i64 {
    let dtype = indices.descriptor.data_type;
    let size = dtype.size_in_bytes();
    let chunk = &indices.bytes[flat * size..(flat + 1) * size];
    match dtype {
        DataType::I32 => i32::from_le_bytes(chunk.try_into().unwrap()) as i64,
        DataType::U32 => u32::from_le_bytes(chunk.try_into().unwrap()) as i64,
        DataType::I64 => i64::from_le_bytes(chunk.try_into().unwrap()),
        // Inference restricts indices to the three index dtypes.
        _ => read_scalar(dtype, &indices.bytes, flat) as i64,
    }
}

// Matrix products.

fn eval_matmul(
    a: &TensorValue,
    b: &TensorValue,
    out: &OperandDescriptor,
) -> BackendResult<TensorValue> {
    let a_mat = promoted(a.descriptor.shape.dims(), true);
    let b_mat = promoted(b.descriptor.shape.dims(), false);
    let (m, k) = (
        a_mat[a_mat.len() - 2] as usize,
        a_mat[a_mat.len() - 1] as usize,
    );
    let n = b_mat[b_mat.len() - 1] as usize;
    let a_batch = &a_mat[..a_mat.len() - 2];
    let b_batch = &b_mat[..b_mat.len() - 2];
    // The output layout equals the padded batch x [m, n] layout with any
    // promoted vector axes removed, so bytes line up either way.
    let batch_rank = a_batch.len().max(b_batch.len());
    let mut batch_dims = vec![0u32; batch_rank];
    for i in 0..batch_rank {
        let ad = aligned(a_batch, batch_rank, i);
        let bd = aligned(b_batch, batch_rank, i);
        batch_dims[i] = ad.max(bd);
    }

    let dtype_a = a.descriptor.data_type;
    let dtype_b = b.descriptor.data_type;
    let mut bytes =
        Vec::with_capacity(element_count(&batch_dims) * m * n * out.data_type.size_in_bytes());
    for batch in 0..element_count(&batch_dims) {
        let coords = coords_of(batch, &batch_dims);
        let a_base = broadcast_flat(&coords, a_batch) * m * k;
        let b_base = broadcast_flat(&coords, b_batch) * k * n;
        for row in 0..m {
            for col in 0..n {
                let mut sum = 0.0;
                for inner in 0..k {
                    let x = read_scalar(dtype_a, &a.bytes, a_base + row * k + inner);
                    let y = read_scalar(dtype_b, &b.bytes, b_base + inner * n + col);
                    sum += x * y;
                }
                write_scalar(out.data_type, &mut bytes, sum);
            }
        }
    }
    finish(out, bytes)
}

fn promoted(dims: &[u32], is_lhs: bool) -> Vec<u32> {
    if dims.len() == 1 {
        if is_lhs {
            vec![1, dims[0]]
        } else {
            vec![dims[0], 1]
        }
    } else {
        dims.to_vec()
    }
}

fn aligned(dims: &[u32], rank: usize, index: usize) -> u32 {
    let offset = rank - dims.len();
    if index < offset {
        1
    } else {
        dims[index - offset]
    }
}

fn eval_gemm(
    options: &GemmOptions,
    inputs: &[TensorValue],
    out: &OperandDescriptor,
) -> BackendResult<TensorValue> {
    let (a, b) = (&inputs[0], &inputs[1]);
    let c = inputs.get(2);
    let out_dims = out.shape.dims();
    let (m, n) = (out_dims[0] as usize, out_dims[1] as usize);
    let a_dims = a.descriptor.shape.dims();
    let k = if options.a_transpose {
        a_dims[0] as usize
    } else {
        a_dims[1] as usize
    };
    let read_a = |row: usize, inner: usize| {
        let flat = if options.a_transpose {
            inner * m + row
        } else {
            row * k + inner
        };
        read_scalar(a.descriptor.data_type, &a.bytes, flat)
    };
    let read_b = |inner: usize, col: usize| {
        let flat = if options.b_transpose {
            col * k + inner
        } else {
            inner * n + col
        };
        read_scalar(b.descriptor.data_type, &b.bytes, flat)
    };

    let mut bytes = Vec::with_capacity(m * n * out.data_type.size_in_bytes());
    for row in 0..m {
        for col in 0..n {
            let mut sum = 0.0;
            for inner in 0..k {
                sum += read_a(row, inner) * read_b(inner, col);
            }
            let mut value = options.alpha as f64 * sum;
            if let Some(c) = c {
                let flat = broadcast_flat(&[row, col], c.descriptor.shape.dims());
                value += options.beta as f64
                    * read_scalar(c.descriptor.data_type, &c.bytes, flat);
            }
            write_scalar(out.data_type, &mut bytes, value);
        }
    }
    finish(out, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlgraph::Shape;

    fn f32_value(dims: &[u32], data: &[f32]) -> TensorValue {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        TensorValue::new(
            OperandDescriptor::new(DataType::F32, dims.to_vec()),
            bytes,
        )
    }

    fn as_f32(value: &TensorValue) -> Vec<f32> {
        value
            .bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    fn f32_out(dims: &[u32]) -> OperandDescriptor {
        OperandDescriptor::new(DataType::F32, dims.to_vec())
    }

    #[test]
    fn add_broadcasts_rows() {
        let a = f32_value(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = f32_value(&[3], &[10.0, 20.0, 30.0]);
        let out = eval_binary(BinaryOp::Add, &a, &b, &f32_out(&[2, 3])).unwrap();
        assert_eq!(as_f32(&out), vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
    }

    #[test]
    fn relu_zeroes_negatives() {
        let x = f32_value(&[4], &[-1.0, 0.0, 2.5, -3.0]);
        let out = eval_activation(Activation::Relu, &x, &f32_out(&[4])).unwrap();
        assert_eq!(as_f32(&out), vec![0.0, 0.0, 2.5, 0.0]);
    }

    #[test]
    fn compare_emits_u8() {
        let a = f32_value(&[3], &[1.0, 2.0, 3.0]);
        let b = f32_value(&[3], &[2.0, 2.0, 2.0]);
        let out = eval_compare(
            CompareOp::Greater,
            &a,
            &b,
            &OperandDescriptor::new(DataType::U8, vec![3]),
        )
        .unwrap();
        assert_eq!(&out.bytes[..], &[0, 0, 1]);
    }

    #[test]
    fn reduce_sum_over_middle_axis() {
        let x = f32_value(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let options = ReduceOptions {
            axes: Some(vec![1]),
            keep_dimensions: false,
        };
        let out = eval_reduce(ReduceKind::Sum, &options, &x, &f32_out(&[2])).unwrap();
        assert_eq!(as_f32(&out), vec![6.0, 15.0]);
    }

    #[test]
    fn reduce_mean_all_axes() {
        let x = f32_value(&[2, 2], &[1.0, 2.0, 3.0, 4.0]);
        let out = eval_reduce(
            ReduceKind::Mean,
            &ReduceOptions::default(),
            &x,
            &f32_out(&[]),
        )
        .unwrap();
        assert_eq!(as_f32(&out), vec![2.5]);
    }

    #[test]
    fn arg_max_first_and_last_tie_break() {
        let x = f32_value(&[4], &[1.0, 7.0, 7.0, 2.0]);
        let out_desc = OperandDescriptor::new(DataType::I64, Shape::scalar());
        let first = eval_arg_min_max(
            ArgMinMaxKind::Max,
            &ArgMinMaxOptions::default(),
            &x,
            &out_desc,
        )
        .unwrap();
        assert_eq!(i64::from_le_bytes(first.bytes[..8].try_into().unwrap()), 1);
        let last = eval_arg_min_max(
            ArgMinMaxKind::Max,
            &ArgMinMaxOptions {
                select_last_index: true,
                ..Default::default()
            },
            &x,
            &out_desc,
        )
        .unwrap();
        assert_eq!(i64::from_le_bytes(last.bytes[..8].try_into().unwrap()), 2);
    }

    #[test]
    fn concat_joins_along_axis_one() {
        let a = f32_value(&[2, 1], &[1.0, 2.0]);
        let b = f32_value(&[2, 2], &[3.0, 4.0, 5.0, 6.0]);
        let out = eval_concat(1, &[a, b], &f32_out(&[2, 3])).unwrap();
        assert_eq!(as_f32(&out), vec![1.0, 3.0, 4.0, 2.0, 5.0, 6.0]);
    }

    #[test]
    fn pad_reflection_mirrors_without_edge_repeat() {
        let x = f32_value(&[3], &[1.0, 2.0, 3.0]);
        let options = PadOptions {
            beginning_padding: vec![2],
            ending_padding: vec![2],
            mode: PaddingMode::Reflection,
            value: 0.0,
        };
        let out = eval_pad(&options, &x, &f32_out(&[7])).unwrap();
        assert_eq!(as_f32(&out), vec![3.0, 2.0, 1.0, 2.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn pad_constant_fills_value() {
        let x = f32_value(&[2], &[1.0, 2.0]);
        let options = PadOptions {
            beginning_padding: vec![1],
            ending_padding: vec![1],
            mode: PaddingMode::Constant,
            value: 9.0,
        };
        let out = eval_pad(&options, &x, &f32_out(&[4])).unwrap();
        assert_eq!(as_f32(&out), vec![9.0, 1.0, 2.0, 9.0]);
    }

    #[test]
    fn gather_picks_rows() {
        let x = f32_value(&[3, 2], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let indices = TensorValue::new(
            OperandDescriptor::new(DataType::I32, vec![2]),
            [2i32, 0]
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect::<Vec<u8>>(),
        );
        let out = eval_gather(0, &x, &indices, &f32_out(&[2, 2])).unwrap();
        assert_eq!(as_f32(&out), vec![5.0, 6.0, 1.0, 2.0]);
    }

    #[test]
    fn gather_rejects_out_of_range_index() {
        let x = f32_value(&[2], &[1.0, 2.0]);
        let indices = TensorValue::new(
            OperandDescriptor::new(DataType::I32, Shape::scalar()),
            5i32.to_le_bytes().to_vec(),
        );
        let err = eval_gather(0, &x, &indices, &f32_out(&[])).unwrap_err();
        assert!(matches!(err, BackendError::Execution { .. }));
    }

    #[test]
    fn matmul_batched_with_broadcast() {
        let a = f32_value(&[2, 2, 2], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let b = f32_value(&[2, 2], &[1.0, 0.0, 0.0, 1.0]);
        let out = eval_matmul(&a, &b, &f32_out(&[2, 2, 2])).unwrap();
        assert_eq!(
            as_f32(&out),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]
        );
    }

    #[test]
    fn gemm_applies_alpha_beta_and_transpose() {
        let a = f32_value(&[2, 2], &[1.0, 3.0, 2.0, 4.0]);
        let b = f32_value(&[2, 2], &[1.0, 0.0, 0.0, 1.0]);
        let c = f32_value(&[2], &[10.0, 10.0]);
        let options = GemmOptions {
            alpha: 2.0,
            beta: 1.0,
            a_transpose: true,
            b_transpose: false,
        };
        let out = eval_gemm(
            &options,
            &[a, b, c],
            &f32_out(&[2, 2]),
        )
        .unwrap();
        assert_eq!(as_f32(&out), vec![12.0, 14.0, 16.0, 18.0]);
    }

    #[test]
    fn cast_f32_to_i32_truncates() {
        let x = f32_value(&[3], &[1.9, -2.9, 3.0]);
        let out = eval_cast(&x, &OperandDescriptor::new(DataType::I32, vec![3])).unwrap();
        let ints: Vec<i32> = out
            .bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(ints, vec![1, -2, 3]);
    }

    #[test]
    fn conv2d_reports_unimplemented() {
        let backend = CpuBackend::new();
        let op = Operator::Conv2d(Default::default());
        let err = backend.evaluate(&op, &[], &[f32_out(&[1])]).unwrap_err();
        assert!(matches!(err, BackendError::Unimplemented { op: "conv2d", .. }));
    }
}
