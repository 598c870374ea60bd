//! Mutable graph builder.
//!
//! A [`GraphBuilder`] accumulates operands and operator applications with
//! eager validation: every operator method runs shape/dtype inference before
//! anything is appended, so a failed call leaves the builder exactly as it
//! was. [`GraphBuilder::build`] consumes the builder and freezes the
//! reachable subgraph into an immutable [`Graph`], dropping nodes no output
//! depends on.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use half::f16;
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::graph::{CompiledNode, Graph, KEEP_ALIVE};
use crate::infer;
use crate::operand::{DataType, Operand, OperandDescriptor, OperandId, Shape};
use crate::ops::{
    Activation, ArgMinMaxKind, ArgMinMaxOptions, BatchNormOptions, BinaryOp, ClampOptions,
    CompareOp, Conv2dOptions, ConvTranspose2dOptions, GemmOptions, GruCellOptions, GruOptions,
    InstanceNormOptions, LayerNormOptions, LstmCellOptions, LstmOptions, Operator, PadOptions,
    Pool2dKind, Pool2dOptions, ReduceKind, ReduceOptions, UnaryOp,
};

static BUILDER_ID: AtomicU64 = AtomicU64::new(0);

/// How one operand came to exist.
#[derive(Debug)]
enum Producer {
    Input(String),
    Constant,
    Node { node: usize },
}

#[derive(Debug)]
struct NodeRecord {
    op: Operator,
    inputs: Vec<OperandId>,
    outputs: Vec<OperandId>,
}

/// Optional operand-valued parameters of `gru`.
#[derive(Default)]
pub struct GruOperands<'a> {
    pub bias: Option<&'a Operand>,
    pub recurrent_bias: Option<&'a Operand>,
    pub initial_hidden_state: Option<&'a Operand>,
}

/// Optional operand-valued parameters of `gruCell`.
#[derive(Default)]
pub struct GruCellOperands<'a> {
    pub bias: Option<&'a Operand>,
    pub recurrent_bias: Option<&'a Operand>,
}

/// Optional operand-valued parameters of `lstm`.
#[derive(Default)]
pub struct LstmOperands<'a> {
    pub bias: Option<&'a Operand>,
    pub recurrent_bias: Option<&'a Operand>,
    pub peephole_weight: Option<&'a Operand>,
    pub initial_hidden_state: Option<&'a Operand>,
    pub initial_cell_state: Option<&'a Operand>,
}

/// Optional operand-valued parameters of `lstmCell`.
#[derive(Default)]
pub struct LstmCellOperands<'a> {
    pub bias: Option<&'a Operand>,
    pub recurrent_bias: Option<&'a Operand>,
    pub peephole_weight: Option<&'a Operand>,
}

/// Accumulates a computation graph under eager validation.
#[derive(Debug)]
pub struct GraphBuilder {
    id: u64,
    operands: Vec<OperandDescriptor>,
    producers: Vec<Producer>,
    nodes: Vec<NodeRecord>,
    input_names: BTreeMap<String, OperandId>,
    constants: BTreeMap<OperandId, Arc<[u8]>>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            id: BUILDER_ID.fetch_add(1, Ordering::Relaxed),
            operands: Vec::new(),
            producers: Vec::new(),
            nodes: Vec::new(),
            input_names: BTreeMap::new(),
            constants: BTreeMap::new(),
        }
    }

    /// Number of operator applications recorded so far.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Declares a named graph input with the given contract.
    pub fn input(&mut self, name: impl Into<String>, descriptor: OperandDescriptor) -> Result<Operand> {
        let name = name.into();
        if self.input_names.contains_key(&name) {
            return Err(GraphError::DuplicateInputName(name));
        }
        check_sizable(&descriptor)?;
        let operand = self.new_operand(descriptor, Producer::Input(name.clone()));
        self.input_names.insert(name, operand.id);
        Ok(operand)
    }

    /// Embeds a constant tensor; the payload is copied into the builder.
    pub fn constant(&mut self, descriptor: OperandDescriptor, bytes: &[u8]) -> Result<Operand> {
        let expected = check_sizable(&descriptor)?;
        if bytes.len() != expected {
            return Err(GraphError::BufferSizeMismatch {
                name: "constant".to_owned(),
                expected,
                actual: bytes.len(),
            });
        }
        let operand = self.new_operand(descriptor, Producer::Constant);
        self.constants.insert(operand.id, Arc::from(bytes));
        Ok(operand)
    }

    /// Embeds a scalar constant of the given dtype.
    pub fn constant_scalar(&mut self, data_type: DataType, value: f32) -> Result<Operand> {
        let bytes = encode_scalar(data_type, value);
        self.constant(OperandDescriptor::new(data_type, Shape::scalar()), &bytes)
    }

    // Elementwise unary.

    pub fn abs(&mut self, input: &Operand) -> Result<Operand> {
        self.unary(UnaryOp::Abs, input)
    }

    pub fn ceil(&mut self, input: &Operand) -> Result<Operand> {
        self.unary(UnaryOp::Ceil, input)
    }

    pub fn cos(&mut self, input: &Operand) -> Result<Operand> {
        self.unary(UnaryOp::Cos, input)
    }

    pub fn erf(&mut self, input: &Operand) -> Result<Operand> {
        self.unary(UnaryOp::Erf, input)
    }

    pub fn exp(&mut self, input: &Operand) -> Result<Operand> {
        self.unary(UnaryOp::Exp, input)
    }

    pub fn floor(&mut self, input: &Operand) -> Result<Operand> {
        self.unary(UnaryOp::Floor, input)
    }

    pub fn identity(&mut self, input: &Operand) -> Result<Operand> {
        self.unary(UnaryOp::Identity, input)
    }

    pub fn log(&mut self, input: &Operand) -> Result<Operand> {
        self.unary(UnaryOp::Log, input)
    }

    pub fn neg(&mut self, input: &Operand) -> Result<Operand> {
        self.unary(UnaryOp::Neg, input)
    }

    pub fn reciprocal(&mut self, input: &Operand) -> Result<Operand> {
        self.unary(UnaryOp::Reciprocal, input)
    }

    pub fn sin(&mut self, input: &Operand) -> Result<Operand> {
        self.unary(UnaryOp::Sin, input)
    }

    pub fn sqrt(&mut self, input: &Operand) -> Result<Operand> {
        self.unary(UnaryOp::Sqrt, input)
    }

    pub fn tan(&mut self, input: &Operand) -> Result<Operand> {
        self.unary(UnaryOp::Tan, input)
    }

    pub fn logical_not(&mut self, input: &Operand) -> Result<Operand> {
        self.unary(UnaryOp::LogicalNot, input)
    }

    pub fn cast(&mut self, input: &Operand, data_type: DataType) -> Result<Operand> {
        self.append(Operator::Cast(data_type), &[input])
    }

    fn unary(&mut self, op: UnaryOp, input: &Operand) -> Result<Operand> {
        self.append(Operator::Unary(op), &[input])
    }

    // Elementwise binary.

    pub fn add(&mut self, a: &Operand, b: &Operand) -> Result<Operand> {
        self.binary(BinaryOp::Add, a, b)
    }

    pub fn sub(&mut self, a: &Operand, b: &Operand) -> Result<Operand> {
        self.binary(BinaryOp::Sub, a, b)
    }

    pub fn mul(&mut self, a: &Operand, b: &Operand) -> Result<Operand> {
        self.binary(BinaryOp::Mul, a, b)
    }

    pub fn div(&mut self, a: &Operand, b: &Operand) -> Result<Operand> {
        self.binary(BinaryOp::Div, a, b)
    }

    pub fn max(&mut self, a: &Operand, b: &Operand) -> Result<Operand> {
        self.binary(BinaryOp::Max, a, b)
    }

    pub fn min(&mut self, a: &Operand, b: &Operand) -> Result<Operand> {
        self.binary(BinaryOp::Min, a, b)
    }

    pub fn pow(&mut self, a: &Operand, b: &Operand) -> Result<Operand> {
        self.binary(BinaryOp::Pow, a, b)
    }

    fn binary(&mut self, op: BinaryOp, a: &Operand, b: &Operand) -> Result<Operand> {
        self.append(Operator::Binary(op), &[a, b])
    }

    // Comparisons.

    pub fn equal(&mut self, a: &Operand, b: &Operand) -> Result<Operand> {
        self.compare(CompareOp::Equal, a, b)
    }

    pub fn greater(&mut self, a: &Operand, b: &Operand) -> Result<Operand> {
        self.compare(CompareOp::Greater, a, b)
    }

    pub fn greater_or_equal(&mut self, a: &Operand, b: &Operand) -> Result<Operand> {
        self.compare(CompareOp::GreaterOrEqual, a, b)
    }

    pub fn lesser(&mut self, a: &Operand, b: &Operand) -> Result<Operand> {
        self.compare(CompareOp::Lesser, a, b)
    }

    pub fn lesser_or_equal(&mut self, a: &Operand, b: &Operand) -> Result<Operand> {
        self.compare(CompareOp::LesserOrEqual, a, b)
    }

    fn compare(&mut self, op: CompareOp, a: &Operand, b: &Operand) -> Result<Operand> {
        self.append(Operator::Compare(op), &[a, b])
    }

    // Activations. Each has an applied form and a descriptor form for use as
    // a recurrent-operator parameter.

    pub fn relu(&mut self, input: &Operand) -> Result<Operand> {
        self.activation(Activation::Relu, input)
    }

    pub fn relu_activation(&self) -> Activation {
        Activation::Relu
    }

    pub fn elu(&mut self, input: &Operand, alpha: f32) -> Result<Operand> {
        self.activation(Activation::Elu { alpha }, input)
    }

    pub fn elu_activation(&self, alpha: f32) -> Activation {
        Activation::Elu { alpha }
    }

    pub fn gelu(&mut self, input: &Operand) -> Result<Operand> {
        self.activation(Activation::Gelu, input)
    }

    pub fn gelu_activation(&self) -> Activation {
        Activation::Gelu
    }

    pub fn hard_sigmoid(&mut self, input: &Operand, alpha: f32, beta: f32) -> Result<Operand> {
        self.activation(Activation::HardSigmoid { alpha, beta }, input)
    }

    pub fn hard_sigmoid_activation(&self, alpha: f32, beta: f32) -> Activation {
        Activation::HardSigmoid { alpha, beta }
    }

    pub fn hard_swish(&mut self, input: &Operand) -> Result<Operand> {
        self.activation(Activation::HardSwish, input)
    }

    pub fn hard_swish_activation(&self) -> Activation {
        Activation::HardSwish
    }

    pub fn leaky_relu(&mut self, input: &Operand, alpha: f32) -> Result<Operand> {
        self.activation(Activation::LeakyRelu { alpha }, input)
    }

    pub fn leaky_relu_activation(&self, alpha: f32) -> Activation {
        Activation::LeakyRelu { alpha }
    }

    pub fn linear(&mut self, input: &Operand, alpha: f32, beta: f32) -> Result<Operand> {
        self.activation(Activation::Linear { alpha, beta }, input)
    }

    pub fn linear_activation(&self, alpha: f32, beta: f32) -> Activation {
        Activation::Linear { alpha, beta }
    }

    pub fn sigmoid(&mut self, input: &Operand) -> Result<Operand> {
        self.activation(Activation::Sigmoid, input)
    }

    pub fn sigmoid_activation(&self) -> Activation {
        Activation::Sigmoid
    }

    pub fn tanh(&mut self, input: &Operand) -> Result<Operand> {
        self.activation(Activation::Tanh, input)
    }

    pub fn tanh_activation(&self) -> Activation {
        Activation::Tanh
    }

    fn activation(&mut self, act: Activation, input: &Operand) -> Result<Operand> {
        self.append(Operator::Activation(act), &[input])
    }

    pub fn clamp(&mut self, input: &Operand, options: ClampOptions) -> Result<Operand> {
        self.append(Operator::Clamp(options), &[input])
    }

    pub fn prelu(&mut self, input: &Operand, slope: &Operand) -> Result<Operand> {
        self.append(Operator::Prelu, &[input, slope])
    }

    // Reductions.

    pub fn reduce_l1(&mut self, input: &Operand, options: ReduceOptions) -> Result<Operand> {
        self.reduce(ReduceKind::L1, input, options)
    }

    pub fn reduce_l2(&mut self, input: &Operand, options: ReduceOptions) -> Result<Operand> {
        self.reduce(ReduceKind::L2, input, options)
    }

    pub fn reduce_log_sum(&mut self, input: &Operand, options: ReduceOptions) -> Result<Operand> {
        self.reduce(ReduceKind::LogSum, input, options)
    }

    pub fn reduce_log_sum_exp(&mut self, input: &Operand, options: ReduceOptions) -> Result<Operand> {
        self.reduce(ReduceKind::LogSumExp, input, options)
    }

    pub fn reduce_max(&mut self, input: &Operand, options: ReduceOptions) -> Result<Operand> {
        self.reduce(ReduceKind::Max, input, options)
    }

    pub fn reduce_mean(&mut self, input: &Operand, options: ReduceOptions) -> Result<Operand> {
        self.reduce(ReduceKind::Mean, input, options)
    }

    pub fn reduce_min(&mut self, input: &Operand, options: ReduceOptions) -> Result<Operand> {
        self.reduce(ReduceKind::Min, input, options)
    }

    pub fn reduce_product(&mut self, input: &Operand, options: ReduceOptions) -> Result<Operand> {
        self.reduce(ReduceKind::Product, input, options)
    }

    pub fn reduce_sum(&mut self, input: &Operand, options: ReduceOptions) -> Result<Operand> {
        self.reduce(ReduceKind::Sum, input, options)
    }

    pub fn reduce_sum_square(&mut self, input: &Operand, options: ReduceOptions) -> Result<Operand> {
        self.reduce(ReduceKind::SumSquare, input, options)
    }

    fn reduce(&mut self, kind: ReduceKind, input: &Operand, options: ReduceOptions) -> Result<Operand> {
        self.append(Operator::Reduce { kind, options }, &[input])
    }

    pub fn arg_min(&mut self, input: &Operand, options: ArgMinMaxOptions) -> Result<Operand> {
        self.append(
            Operator::ArgMinMax {
                kind: ArgMinMaxKind::Min,
                options,
            },
            &[input],
        )
    }

    pub fn arg_max(&mut self, input: &Operand, options: ArgMinMaxOptions) -> Result<Operand> {
        self.append(
            Operator::ArgMinMax {
                kind: ArgMinMaxKind::Max,
                options,
            },
            &[input],
        )
    }

    // Convolution and pooling.

    pub fn conv2d(
        &mut self,
        input: &Operand,
        filter: &Operand,
        bias: Option<&Operand>,
        options: Conv2dOptions,
    ) -> Result<Operand> {
        let mut inputs = vec![input, filter];
        inputs.extend(bias);
        self.append(Operator::Conv2d(options), &inputs)
    }

    pub fn conv_transpose2d(
        &mut self,
        input: &Operand,
        filter: &Operand,
        bias: Option<&Operand>,
        options: ConvTranspose2dOptions,
    ) -> Result<Operand> {
        let mut inputs = vec![input, filter];
        inputs.extend(bias);
        self.append(Operator::ConvTranspose2d(options), &inputs)
    }

    pub fn average_pool2d(&mut self, input: &Operand, options: Pool2dOptions) -> Result<Operand> {
        self.pool2d(Pool2dKind::Average, input, options)
    }

    pub fn l2_pool2d(&mut self, input: &Operand, options: Pool2dOptions) -> Result<Operand> {
        self.pool2d(Pool2dKind::L2, input, options)
    }

    pub fn max_pool2d(&mut self, input: &Operand, options: Pool2dOptions) -> Result<Operand> {
        self.pool2d(Pool2dKind::Max, input, options)
    }

    fn pool2d(&mut self, kind: Pool2dKind, input: &Operand, options: Pool2dOptions) -> Result<Operand> {
        self.append(Operator::Pool2d { kind, options }, &[input])
    }

    // Matrix products.

    pub fn matmul(&mut self, a: &Operand, b: &Operand) -> Result<Operand> {
        self.append(Operator::Matmul, &[a, b])
    }

    pub fn gemm(
        &mut self,
        a: &Operand,
        b: &Operand,
        c: Option<&Operand>,
        options: GemmOptions,
    ) -> Result<Operand> {
        let mut inputs = vec![a, b];
        inputs.extend(c);
        self.append(Operator::Gemm(options), &inputs)
    }

    // Structural.

    pub fn concat(&mut self, inputs: &[&Operand], axis: usize) -> Result<Operand> {
        self.append(Operator::Concat { axis }, inputs)
    }

    pub fn pad(&mut self, input: &Operand, options: PadOptions) -> Result<Operand> {
        self.append(Operator::Pad(options), &[input])
    }

    pub fn expand(&mut self, input: &Operand, new_shape: &[u32]) -> Result<Operand> {
        self.append(
            Operator::Expand {
                new_shape: new_shape.to_vec(),
            },
            &[input],
        )
    }

    pub fn gather(&mut self, input: &Operand, indices: &Operand, axis: usize) -> Result<Operand> {
        self.append(Operator::Gather { axis }, &[input, indices])
    }

    // Normalization. Presence flags are derived from the operands supplied.

    pub fn batch_normalization(
        &mut self,
        input: &Operand,
        mean: &Operand,
        variance: &Operand,
        scale: Option<&Operand>,
        bias: Option<&Operand>,
        mut options: BatchNormOptions,
    ) -> Result<Operand> {
        options.has_scale = scale.is_some();
        options.has_bias = bias.is_some();
        let mut inputs = vec![input, mean, variance];
        inputs.extend(scale);
        inputs.extend(bias);
        self.append(Operator::BatchNormalization(options), &inputs)
    }

    pub fn instance_normalization(
        &mut self,
        input: &Operand,
        scale: Option<&Operand>,
        bias: Option<&Operand>,
        mut options: InstanceNormOptions,
    ) -> Result<Operand> {
        options.has_scale = scale.is_some();
        options.has_bias = bias.is_some();
        let mut inputs = vec![input];
        inputs.extend(scale);
        inputs.extend(bias);
        self.append(Operator::InstanceNormalization(options), &inputs)
    }

    pub fn layer_normalization(
        &mut self,
        input: &Operand,
        scale: Option<&Operand>,
        bias: Option<&Operand>,
        mut options: LayerNormOptions,
    ) -> Result<Operand> {
        options.has_scale = scale.is_some();
        options.has_bias = bias.is_some();
        let mut inputs = vec![input];
        inputs.extend(scale);
        inputs.extend(bias);
        self.append(Operator::LayerNormalization(options), &inputs)
    }

    // Recurrent.

    /// Runs a GRU over `steps` time steps. Returns the final hidden state,
    /// followed by the per-step sequence when `returnSequence` is set.
    pub fn gru(
        &mut self,
        input: &Operand,
        weight: &Operand,
        recurrent_weight: &Operand,
        steps: u32,
        hidden_size: u32,
        operands: GruOperands<'_>,
        mut options: GruOptions,
    ) -> Result<Vec<Operand>> {
        options.has_bias = operands.bias.is_some();
        options.has_recurrent_bias = operands.recurrent_bias.is_some();
        options.has_initial_hidden_state = operands.initial_hidden_state.is_some();
        let mut inputs = vec![input, weight, recurrent_weight];
        inputs.extend(operands.bias);
        inputs.extend(operands.recurrent_bias);
        inputs.extend(operands.initial_hidden_state);
        self.append_multi(
            Operator::Gru {
                steps,
                hidden_size,
                options,
            },
            &inputs,
        )
    }

    /// Single GRU step; returns the updated hidden state.
    pub fn gru_cell(
        &mut self,
        input: &Operand,
        weight: &Operand,
        recurrent_weight: &Operand,
        hidden_state: &Operand,
        hidden_size: u32,
        operands: GruCellOperands<'_>,
        mut options: GruCellOptions,
    ) -> Result<Operand> {
        options.has_bias = operands.bias.is_some();
        options.has_recurrent_bias = operands.recurrent_bias.is_some();
        let mut inputs = vec![input, weight, recurrent_weight, hidden_state];
        inputs.extend(operands.bias);
        inputs.extend(operands.recurrent_bias);
        self.append(
            Operator::GruCell {
                hidden_size,
                options,
            },
            &inputs,
        )
    }

    /// Runs an LSTM over `steps` time steps. Returns the final hidden state,
    /// the final cell state, and the per-step sequence when `returnSequence`
    /// is set.
    pub fn lstm(
        &mut self,
        input: &Operand,
        weight: &Operand,
        recurrent_weight: &Operand,
        steps: u32,
        hidden_size: u32,
        operands: LstmOperands<'_>,
        mut options: LstmOptions,
    ) -> Result<Vec<Operand>> {
        options.has_bias = operands.bias.is_some();
        options.has_recurrent_bias = operands.recurrent_bias.is_some();
        options.has_peephole_weight = operands.peephole_weight.is_some();
        options.has_initial_hidden_state = operands.initial_hidden_state.is_some();
        options.has_initial_cell_state = operands.initial_cell_state.is_some();
        let mut inputs = vec![input, weight, recurrent_weight];
        inputs.extend(operands.bias);
        inputs.extend(operands.recurrent_bias);
        inputs.extend(operands.peephole_weight);
        inputs.extend(operands.initial_hidden_state);
        inputs.extend(operands.initial_cell_state);
        self.append_multi(
            Operator::Lstm {
                steps,
                hidden_size,
                options,
            },
            &inputs,
        )
    }

    /// Single LSTM step; returns the updated hidden state and cell state.
    pub fn lstm_cell(
        &mut self,
        input: &Operand,
        weight: &Operand,
        recurrent_weight: &Operand,
        hidden_state: &Operand,
        cell_state: &Operand,
        hidden_size: u32,
        operands: LstmCellOperands<'_>,
        mut options: LstmCellOptions,
    ) -> Result<Vec<Operand>> {
        options.has_bias = operands.bias.is_some();
        options.has_recurrent_bias = operands.recurrent_bias.is_some();
        options.has_peephole_weight = operands.peephole_weight.is_some();
        let mut inputs = vec![input, weight, recurrent_weight, hidden_state, cell_state];
        inputs.extend(operands.bias);
        inputs.extend(operands.recurrent_bias);
        inputs.extend(operands.peephole_weight);
        self.append_multi(
            Operator::LstmCell {
                hidden_size,
                options,
            },
            &inputs,
        )
    }

    /// Freezes the reachable subgraph into an immutable [`Graph`].
    ///
    /// Consuming the builder makes reuse after `build` a compile error.
    /// Nodes no named output depends on are dropped; the surviving nodes keep
    /// their construction order, which is already topological.
    pub async fn build<S, I>(self, outputs: I) -> Result<Graph>
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, Operand)>,
    {
        let mut named = BTreeMap::new();
        for (name, operand) in outputs {
            let name = name.into();
            self.check(&operand)?;
            if named.insert(name.clone(), operand.id).is_some() {
                return Err(GraphError::option(format!("duplicate output name `{name}`")));
            }
        }
        if named.is_empty() {
            return Err(GraphError::option("graph must declare at least one output"));
        }
        self.compile(named)
    }

    fn compile(self, named_outputs: BTreeMap<String, OperandId>) -> Result<Graph> {
        // Walk backward from the outputs to find the live subgraph.
        let mut live_operand = vec![false; self.operands.len()];
        let mut live_node = vec![false; self.nodes.len()];
        let mut worklist: Vec<OperandId> = named_outputs.values().copied().collect();
        while let Some(id) = worklist.pop() {
            if std::mem::replace(&mut live_operand[id.0 as usize], true) {
                continue;
            }
            if let Producer::Node { node } = self.producers[id.0 as usize] {
                if !std::mem::replace(&mut live_node[node], true) {
                    worklist.extend(self.nodes[node].inputs.iter().copied());
                    // Sibling outputs of a live node stay allocated.
                    worklist.extend(self.nodes[node].outputs.iter().copied());
                }
            }
        }

        // Compact live operands into value slots.
        let mut slot_of = vec![usize::MAX; self.operands.len()];
        let mut slots = Vec::new();
        for (index, descriptor) in self.operands.iter().enumerate() {
            if live_operand[index] {
                slot_of[index] = slots.len();
                slots.push(descriptor.clone());
            }
        }

        let mut inputs = BTreeMap::new();
        let mut constants = BTreeMap::new();
        let mut produced = vec![false; slots.len()];
        for (index, producer) in self.producers.iter().enumerate() {
            if !live_operand[index] {
                continue;
            }
            match producer {
                Producer::Input(name) => {
                    inputs.insert(name.clone(), slot_of[index]);
                    produced[slot_of[index]] = true;
                }
                Producer::Constant => {
                    constants.insert(slot_of[index], self.constants[&OperandId(index as u32)].clone());
                    produced[slot_of[index]] = true;
                }
                Producer::Node { .. } => {}
            }
        }

        let mut nodes = Vec::new();
        let mut last_use = vec![0usize; slots.len()];
        for (index, record) in self.nodes.into_iter().enumerate() {
            if !live_node[index] {
                continue;
            }
            let node_index = nodes.len();
            let input_slots: Vec<usize> = record.inputs.iter().map(|id| slot_of[id.0 as usize]).collect();
            for &slot in &input_slots {
                // Construction order is topological; a yet-unproduced input
                // here would mean the arena was corrupted into a cycle.
                if !produced[slot] {
                    return Err(GraphError::option("graph contains a dependency cycle"));
                }
                last_use[slot] = node_index;
            }
            let output_slots: Vec<usize> = record.outputs.iter().map(|id| slot_of[id.0 as usize]).collect();
            for &slot in &output_slots {
                produced[slot] = true;
            }
            nodes.push(CompiledNode {
                op: record.op,
                inputs: input_slots,
                outputs: output_slots,
            });
        }

        let outputs: BTreeMap<String, usize> = named_outputs
            .into_iter()
            .map(|(name, id)| (name, slot_of[id.0 as usize]))
            .collect();
        for &slot in outputs.values() {
            last_use[slot] = KEEP_ALIVE;
        }

        debug!(
            nodes = nodes.len(),
            slots = slots.len(),
            inputs = inputs.len(),
            outputs = outputs.len(),
            "graph compiled"
        );

        Ok(Graph {
            nodes,
            slots,
            constants,
            inputs,
            outputs,
            last_use,
        })
    }

    fn check(&self, operand: &Operand) -> Result<()> {
        if operand.builder_id != self.id || operand.id.0 as usize >= self.operands.len() {
            return Err(GraphError::UnknownOperand);
        }
        Ok(())
    }

    fn new_operand(&mut self, descriptor: OperandDescriptor, producer: Producer) -> Operand {
        let id = OperandId(self.operands.len() as u32);
        self.operands.push(descriptor.clone());
        self.producers.push(producer);
        Operand {
            builder_id: self.id,
            id,
            descriptor,
        }
    }

    fn append(&mut self, op: Operator, inputs: &[&Operand]) -> Result<Operand> {
        let mut outputs = self.append_multi(op, inputs)?;
        Ok(outputs.remove(0))
    }

    fn append_multi(&mut self, op: Operator, inputs: &[&Operand]) -> Result<Vec<Operand>> {
        for operand in inputs {
            self.check(operand)?;
        }
        let descriptors: Vec<OperandDescriptor> =
            inputs.iter().map(|operand| operand.descriptor.clone()).collect();
        let inferred = infer::output_descriptors(&op, &descriptors)?;
        let node = self.nodes.len();
        let input_ids = inputs.iter().map(|operand| operand.id).collect();
        let mut output_ids = Vec::with_capacity(inferred.len());
        let mut produced = Vec::with_capacity(inferred.len());
        for descriptor in inferred {
            let operand = self.new_operand(descriptor, Producer::Node { node });
            output_ids.push(operand.id);
            produced.push(operand);
        }
        self.nodes.push(NodeRecord {
            op,
            inputs: input_ids,
            outputs: output_ids,
        });
        Ok(produced)
    }
}

fn check_sizable(descriptor: &OperandDescriptor) -> Result<usize> {
    descriptor
        .byte_length()
        .ok_or_else(|| GraphError::option(format!("dimensions {:?} overflow", descriptor.shape.dims())))
}

fn encode_scalar(data_type: DataType, value: f32) -> Vec<u8> {
    match data_type {
        DataType::F32 => value.to_le_bytes().to_vec(),
        DataType::F16 => f16::from_f32(value).to_le_bytes().to_vec(),
        DataType::I32 => (value as i32).to_le_bytes().to_vec(),
        DataType::U32 => (value as u32).to_le_bytes().to_vec(),
        DataType::I64 => (value as i64).to_le_bytes().to_vec(),
        DataType::U64 => (value as u64).to_le_bytes().to_vec(),
        DataType::I8 => (value as i8).to_le_bytes().to_vec(),
        DataType::U8 => (value as u8).to_le_bytes().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::Shape;

    fn f32_input(builder: &mut GraphBuilder, name: &str, dims: &[u32]) -> Operand {
        builder
            .input(name, OperandDescriptor::new(DataType::F32, dims.to_vec()))
            .unwrap()
    }

    #[test]
    fn failed_inference_appends_nothing() {
        let mut builder = GraphBuilder::new();
        let a = f32_input(&mut builder, "a", &[3, 4]);
        let b = f32_input(&mut builder, "b", &[5, 4]);
        assert!(matches!(
            builder.add(&a, &b),
            Err(GraphError::ShapeMismatch(_))
        ));
        assert_eq!(builder.node_count(), 0);
    }

    #[test]
    fn duplicate_input_names_are_rejected() {
        let mut builder = GraphBuilder::new();
        f32_input(&mut builder, "x", &[2]);
        let err = builder
            .input("x", OperandDescriptor::new(DataType::F32, vec![2]))
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateInputName(name) if name == "x"));
    }

    #[test]
    fn constant_payload_length_is_checked() {
        let mut builder = GraphBuilder::new();
        let err = builder
            .constant(OperandDescriptor::new(DataType::F32, vec![3]), &[0u8; 8])
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::BufferSizeMismatch {
                expected: 12,
                actual: 8,
                ..
            }
        ));
    }

    #[test]
    fn foreign_operands_are_rejected() {
        let mut theirs = GraphBuilder::new();
        let foreign = f32_input(&mut theirs, "x", &[2]);
        let mut ours = GraphBuilder::new();
        let local = f32_input(&mut ours, "x", &[2]);
        assert!(matches!(
            ours.add(&local, &foreign),
            Err(GraphError::UnknownOperand)
        ));
    }

    #[test]
    fn scalar_constants_encode_per_dtype() {
        let mut builder = GraphBuilder::new();
        let c = builder.constant_scalar(DataType::F16, 1.5).unwrap();
        assert_eq!(c.shape(), Shape::scalar().dims());
        assert_eq!(c.data_type(), DataType::F16);
    }

    #[tokio::test]
    async fn build_drops_unreachable_nodes() {
        let mut builder = GraphBuilder::new();
        let x = f32_input(&mut builder, "x", &[2, 2]);
        let y = builder.relu(&x).unwrap();
        let dead = builder.neg(&x).unwrap();
        builder.exp(&dead).unwrap();
        assert_eq!(builder.node_count(), 3);
        let graph = builder.build([("y", y)]).await.unwrap();
        assert_eq!(graph.node_count(), 1);
    }

    #[tokio::test]
    async fn build_requires_an_output() {
        let builder = GraphBuilder::new();
        let err = builder
            .build(Vec::<(String, Operand)>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidOption(_)));
    }

    #[tokio::test]
    async fn build_rejects_foreign_outputs() {
        let mut theirs = GraphBuilder::new();
        let foreign = f32_input(&mut theirs, "x", &[2]);
        let builder = GraphBuilder::new();
        let err = builder.build([("y", foreign)]).await.unwrap_err();
        assert!(matches!(err, GraphError::UnknownOperand));
    }

    #[tokio::test]
    async fn multi_output_nodes_keep_sibling_slots() {
        let mut builder = GraphBuilder::new();
        let input = f32_input(&mut builder, "input", &[3, 2, 4]);
        let weight = f32_input(&mut builder, "weight", &[1, 24, 4]);
        let recurrent = f32_input(&mut builder, "recurrent", &[1, 24, 6]);
        let outputs = builder
            .lstm(
                &input,
                &weight,
                &recurrent,
                3,
                6,
                LstmOperands::default(),
                LstmOptions::default(),
            )
            .unwrap();
        assert_eq!(outputs.len(), 2);
        let graph = builder
            .build([("hidden", outputs[0].clone())])
            .await
            .unwrap();
        // The cell-state slot survives even though only `hidden` is named.
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.nodes[0].outputs.len(), 2);
    }
}
