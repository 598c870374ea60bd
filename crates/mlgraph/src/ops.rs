//! Operator catalog: the tagged operator kinds and their options records.
//!
//! Every operator application in a graph is one [`Operator`] value. Options
//! records carry only scalars and enums; operand-valued options (biases,
//! normalization scales, recurrent initial states, ...) travel in the node's
//! ordered input list, with presence flags here where the arity alone would be
//! ambiguous. The documented input order for each variant is the contract
//! between the builder, the type system, and kernel backends.

use serde::{Deserialize, Serialize};

use crate::operand::DataType;

/// Elementwise unary operators: output shape and dtype equal the input's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Abs,
    Ceil,
    Cos,
    Erf,
    Exp,
    Floor,
    Identity,
    Log,
    Neg,
    Reciprocal,
    Sin,
    Sqrt,
    Tan,
    /// Requires and produces the boolean-equivalent `U8` dtype.
    LogicalNot,
}

/// Elementwise binary operators with right-aligned broadcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
    Pow,
}

/// Elementwise comparisons; output dtype is `U8` regardless of input dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Equal,
    Greater,
    GreaterOrEqual,
    Lesser,
    LesserOrEqual,
}

/// Reduction kinds sharing the `axes`/`keepDimensions` contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReduceKind {
    L1,
    L2,
    LogSum,
    LogSumExp,
    Max,
    Mean,
    Min,
    Product,
    Sum,
    SumSquare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgMinMaxKind {
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pool2dKind {
    Average,
    L2,
    Max,
}

/// Which shape axis of a rank-4 input is interpreted as channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InputLayout {
    #[default]
    Nchw,
    Nhwc,
}

/// Filter layouts accepted by `conv2d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Conv2dFilterLayout {
    #[default]
    Oihw,
    Hwio,
    Ohwi,
    Ihwo,
}

/// Filter layouts accepted by `convTranspose2d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConvTranspose2dFilterLayout {
    #[default]
    Iohw,
    Hwoi,
    Ohwi,
}

/// Floor vs ceil in the pooling output-size formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoundingType {
    #[default]
    Floor,
    Ceil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PaddingMode {
    #[default]
    Constant,
    Edge,
    Reflection,
    Symmetric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecurrentDirection {
    #[default]
    Forward,
    Backward,
    Both,
}

impl RecurrentDirection {
    /// Number of directions a recurrent operator unrolls over.
    pub fn count(self) -> u32 {
        match self {
            RecurrentDirection::Forward | RecurrentDirection::Backward => 1,
            RecurrentDirection::Both => 2,
        }
    }
}

/// Gate ordering inside packed GRU weight tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GruWeightLayout {
    #[default]
    Zrn,
    Rzn,
}

/// Gate ordering inside packed LSTM weight tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LstmWeightLayout {
    #[default]
    Iofg,
    Ifgo,
}

/// Reusable activation descriptor.
///
/// Dual-form operators produce these from their options-only form; recurrent
/// operators accept them as parameters instead of applied operands. The same
/// numeric parameters drive the applied form via [`Operator::Activation`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Activation {
    Relu,
    Elu { alpha: f32 },
    Gelu,
    HardSigmoid { alpha: f32, beta: f32 },
    HardSwish,
    LeakyRelu { alpha: f32 },
    Linear { alpha: f32, beta: f32 },
    Sigmoid,
    Tanh,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClampOptions {
    pub min_value: f32,
    pub max_value: f32,
}

impl Default for ClampOptions {
    fn default() -> Self {
        Self {
            min_value: f32::NEG_INFINITY,
            max_value: f32::INFINITY,
        }
    }
}

/// Options shared by every `reduce*` operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceOptions {
    /// Axes to collapse; `None` reduces over every axis.
    pub axes: Option<Vec<usize>>,
    /// Keep reduced axes as size 1 instead of removing them.
    pub keep_dimensions: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgMinMaxOptions {
    pub axes: Option<Vec<usize>>,
    pub keep_dimensions: bool,
    /// Break ties toward the last occurrence instead of the first.
    pub select_last_index: bool,
}

/// Options for `conv2d`. Inputs: `[input, filter]` or `[input, filter, bias]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conv2dOptions {
    /// `[beginHeight, endHeight, beginWidth, endWidth]`.
    pub padding: [u32; 4],
    pub strides: [u32; 2],
    pub dilations: [u32; 2],
    pub groups: u32,
    pub input_layout: InputLayout,
    pub filter_layout: Conv2dFilterLayout,
}

impl Default for Conv2dOptions {
    fn default() -> Self {
        Self {
            padding: [0; 4],
            strides: [1, 1],
            dilations: [1, 1],
            groups: 1,
            input_layout: InputLayout::default(),
            filter_layout: Conv2dFilterLayout::default(),
        }
    }
}

/// Options for `convTranspose2d`. Inputs: `[input, filter]` or `[input, filter, bias]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvTranspose2dOptions {
    pub padding: [u32; 4],
    pub strides: [u32; 2],
    pub dilations: [u32; 2],
    /// Extra size appended to each spatial output dimension; ignored when
    /// `output_sizes` is explicit.
    pub output_padding: [u32; 2],
    /// Explicit spatial output sizes overriding the inverse size formula.
    pub output_sizes: Option<[u32; 2]>,
    pub groups: u32,
    pub input_layout: InputLayout,
    pub filter_layout: ConvTranspose2dFilterLayout,
}

impl Default for ConvTranspose2dOptions {
    fn default() -> Self {
        Self {
            padding: [0; 4],
            strides: [1, 1],
            dilations: [1, 1],
            output_padding: [0, 0],
            output_sizes: None,
            groups: 1,
            input_layout: InputLayout::default(),
            filter_layout: ConvTranspose2dFilterLayout::default(),
        }
    }
}

/// Options shared by the three `*Pool2d` operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool2dOptions {
    /// Pooling window; `None` spans the full spatial extent (global pooling).
    pub window_dimensions: Option<[u32; 2]>,
    pub padding: [u32; 4],
    pub strides: [u32; 2],
    pub dilations: [u32; 2],
    pub layout: InputLayout,
    pub rounding_type: RoundingType,
    /// Explicit spatial output sizes; must agree with the computed size
    /// within a tolerance of one.
    pub output_sizes: Option<[u32; 2]>,
}

impl Default for Pool2dOptions {
    fn default() -> Self {
        Self {
            window_dimensions: None,
            padding: [0; 4],
            strides: [1, 1],
            dilations: [1, 1],
            layout: InputLayout::default(),
            rounding_type: RoundingType::default(),
            output_sizes: None,
        }
    }
}

/// Options for `gemm`. Inputs: `[a, b]` or `[a, b, c]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GemmOptions {
    pub alpha: f32,
    pub beta: f32,
    pub a_transpose: bool,
    pub b_transpose: bool,
}

impl Default for GemmOptions {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            a_transpose: false,
            b_transpose: false,
        }
    }
}

/// Options for `pad`; the per-axis padding vectors live here alongside mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PadOptions {
    pub beginning_padding: Vec<u32>,
    pub ending_padding: Vec<u32>,
    pub mode: PaddingMode,
    /// Fill value for [`PaddingMode::Constant`].
    pub value: f32,
}

/// Options for `batchNormalization`.
/// Inputs: `[input, mean, variance]` then `scale` and/or `bias` when flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchNormOptions {
    /// Which input axis is the channel axis.
    pub axis: usize,
    pub epsilon: f32,
    pub has_scale: bool,
    pub has_bias: bool,
}

impl Default for BatchNormOptions {
    fn default() -> Self {
        Self {
            axis: 1,
            epsilon: 1e-5,
            has_scale: false,
            has_bias: false,
        }
    }
}

/// Options for `instanceNormalization`.
/// Inputs: `[input]` then `scale` and/or `bias` when flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceNormOptions {
    pub epsilon: f32,
    pub layout: InputLayout,
    pub has_scale: bool,
    pub has_bias: bool,
}

impl Default for InstanceNormOptions {
    fn default() -> Self {
        Self {
            epsilon: 1e-5,
            layout: InputLayout::default(),
            has_scale: false,
            has_bias: false,
        }
    }
}

/// Options for `layerNormalization`.
/// Inputs: `[input]` then `scale` and/or `bias` when flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerNormOptions {
    /// Axes normalized over; `None` means every axis but the first.
    pub axes: Option<Vec<usize>>,
    pub epsilon: f32,
    pub has_scale: bool,
    pub has_bias: bool,
}

impl Default for LayerNormOptions {
    fn default() -> Self {
        Self {
            axes: None,
            epsilon: 1e-5,
            has_scale: false,
            has_bias: false,
        }
    }
}

/// Options for `gru`.
/// Inputs: `[input, weight, recurrentWeight]` then, in order when flagged:
/// `bias`, `recurrentBias`, `initialHiddenState`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GruOptions {
    pub reset_after: bool,
    pub return_sequence: bool,
    pub direction: RecurrentDirection,
    pub layout: GruWeightLayout,
    /// Update/new gate activations; defaults to `[sigmoid, tanh]`.
    pub activations: Option<Vec<Activation>>,
    pub has_bias: bool,
    pub has_recurrent_bias: bool,
    pub has_initial_hidden_state: bool,
}

/// Options for `gruCell`.
/// Inputs: `[input, weight, recurrentWeight, hiddenState]` then `bias`,
/// `recurrentBias` when flagged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GruCellOptions {
    pub reset_after: bool,
    pub layout: GruWeightLayout,
    pub activations: Option<Vec<Activation>>,
    pub has_bias: bool,
    pub has_recurrent_bias: bool,
}

/// Options for `lstm`.
/// Inputs: `[input, weight, recurrentWeight]` then, in order when flagged:
/// `bias`, `recurrentBias`, `peepholeWeight`, `initialHiddenState`,
/// `initialCellState`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LstmOptions {
    pub return_sequence: bool,
    pub direction: RecurrentDirection,
    pub layout: LstmWeightLayout,
    pub activations: Option<Vec<Activation>>,
    pub has_bias: bool,
    pub has_recurrent_bias: bool,
    pub has_peephole_weight: bool,
    pub has_initial_hidden_state: bool,
    pub has_initial_cell_state: bool,
}

/// Options for `lstmCell`.
/// Inputs: `[input, weight, recurrentWeight, hiddenState, cellState]` then
/// `bias`, `recurrentBias`, `peepholeWeight` when flagged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LstmCellOptions {
    pub layout: LstmWeightLayout,
    pub activations: Option<Vec<Activation>>,
    pub has_bias: bool,
    pub has_recurrent_bias: bool,
    pub has_peephole_weight: bool,
}

/// One operator application, tagged over the full catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operator {
    Unary(UnaryOp),
    Binary(BinaryOp),
    Compare(CompareOp),
    /// Applied form of a dual-form activation.
    Activation(Activation),
    Clamp(ClampOptions),
    /// `prelu`; inputs `[input, slope]`, slope broadcast against input.
    Prelu,
    Cast(DataType),
    Reduce {
        kind: ReduceKind,
        options: ReduceOptions,
    },
    ArgMinMax {
        kind: ArgMinMaxKind,
        options: ArgMinMaxOptions,
    },
    Conv2d(Conv2dOptions),
    ConvTranspose2d(ConvTranspose2dOptions),
    Pool2d {
        kind: Pool2dKind,
        options: Pool2dOptions,
    },
    /// Batched matrix multiply; inputs `[a, b]`.
    Matmul,
    Gemm(GemmOptions),
    Concat {
        axis: usize,
    },
    Pad(PadOptions),
    Expand {
        new_shape: Vec<u32>,
    },
    Gather {
        axis: usize,
    },
    BatchNormalization(BatchNormOptions),
    InstanceNormalization(InstanceNormOptions),
    LayerNormalization(LayerNormOptions),
    Gru {
        steps: u32,
        hidden_size: u32,
        options: GruOptions,
    },
    GruCell {
        hidden_size: u32,
        options: GruCellOptions,
    },
    Lstm {
        steps: u32,
        hidden_size: u32,
        options: LstmOptions,
    },
    LstmCell {
        hidden_size: u32,
        options: LstmCellOptions,
    },
}

impl Operator {
    /// Stable lower-camel operator name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Unary(op) => match op {
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
            },
            Operator::Binary(op) => match op {
                BinaryOp::Add => "add",
                BinaryOp::Sub => "sub",
                BinaryOp::Mul => "mul",
                BinaryOp::Div => "div",
                BinaryOp::Max => "max",
                BinaryOp::Min => "min",
                BinaryOp::Pow => "pow",
            },
            Operator::Compare(op) => match op {
                CompareOp::Equal => "equal",
                CompareOp::Greater => "greater",
                CompareOp::GreaterOrEqual => "greaterOrEqual",
                CompareOp::Lesser => "lesser",
                CompareOp::LesserOrEqual => "lesserOrEqual",
            },
            Operator::Activation(act) => match act {
                Activation::Relu => "relu",
                Activation::Elu { .. } => "elu",
                Activation::Gelu => "gelu",
                Activation::HardSigmoid { .. } => "hardSigmoid",
                Activation::HardSwish => "hardSwish",
                Activation::LeakyRelu { .. } => "leakyRelu",
                Activation::Linear { .. } => "linear",
                Activation::Sigmoid => "sigmoid",
                Activation::Tanh => "tanh",
            },
            Operator::Clamp(_) => "clamp",
            Operator::Prelu => "prelu",
            Operator::Cast(_) => "cast",
            Operator::Reduce { kind, .. } => match kind {
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
            },
            Operator::ArgMinMax { kind, .. } => match kind {
                ArgMinMaxKind::Min => "argMin",
                ArgMinMaxKind::Max => "argMax",
            },
            Operator::Conv2d(_) => "conv2d",
            Operator::ConvTranspose2d(_) => "convTranspose2d",
            Operator::Pool2d { kind, .. } => match kind {
                Pool2dKind::Average => "averagePool2d",
                Pool2dKind::L2 => "l2Pool2d",
                Pool2dKind::Max => "maxPool2d",
            },
            Operator::Matmul => "matmul",
            Operator::Gemm(_) => "gemm",
            Operator::Concat { .. } => "concat",
            Operator::Pad(_) => "pad",
            Operator::Expand { .. } => "expand",
            Operator::Gather { .. } => "gather",
            Operator::BatchNormalization(_) => "batchNormalization",
            Operator::InstanceNormalization(_) => "instanceNormalization",
            Operator::LayerNormalization(_) => "layerNormalization",
            Operator::Gru { .. } => "gru",
            Operator::GruCell { .. } => "gruCell",
            Operator::Lstm { .. } => "lstm",
            Operator::LstmCell { .. } => "lstmCell",
        }
    }
}
