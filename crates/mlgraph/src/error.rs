//! Error taxonomy shared by the type system, builder, compiler, and executor.

use thiserror::Error;

use crate::backend::BackendError;

/// Errors surfaced by graph construction, compilation, and execution.
///
/// Construction-time failures are reported synchronously at the call that
/// caused them; `build` fails only for graph-level conditions and `compute`
/// validates every binding before evaluating a single node.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Incompatible dimensions for broadcasting, concatenation, matmul, or
    /// convolution sizing.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// An operator required matching or compatible dtypes and did not get them.
    #[error("data type mismatch: {0}")]
    DataTypeMismatch(String),

    /// An option value is outside its domain (negative axis, non-dividing
    /// groups, inconsistent output sizes, ...).
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// An operand was referenced that this builder did not produce.
    #[error("operand was not produced by this builder")]
    UnknownOperand,

    /// Two inputs were declared under the same name.
    #[error("duplicate input name `{0}`")]
    DuplicateInputName(String),

    /// A bound buffer (or constant payload) does not match the declared
    /// `product(shape) * size_of(dtype)` byte length.
    #[error("buffer size mismatch for `{name}`: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// A binding name does not correspond to any declared input or output.
    #[error("no input or output named `{0}` in graph")]
    UnknownBindingName(String),

    /// A declared input or output was left without a buffer.
    #[error("no buffer bound for `{0}`")]
    MissingBinding(String),

    /// The context could not be created for the requested configuration.
    #[error("context creation failed: {0}")]
    ContextCreationFailed(String),

    /// The kernel collaborator failed while evaluating a node. Output buffers
    /// are left in an unspecified state.
    #[error("backend evaluation failed at node {node}: {source}")]
    BackendEvaluationFailed {
        node: usize,
        #[source]
        source: BackendError,
    },
}

impl GraphError {
    pub(crate) fn shape(detail: impl Into<String>) -> Self {
        GraphError::ShapeMismatch(detail.into())
    }

    pub(crate) fn dtype(detail: impl Into<String>) -> Self {
        GraphError::DataTypeMismatch(detail.into())
    }

    pub(crate) fn option(detail: impl Into<String>) -> Self {
        GraphError::InvalidOption(detail.into())
    }
}

/// Convenience alias for results returned throughout the crate.
pub type Result<T> = std::result::Result<T, GraphError>;
