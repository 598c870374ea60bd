//! Kernel-collaborator boundary consumed by the execution engine.
//!
//! The core never computes tensor values itself. Each compiled node is handed
//! to a [`KernelBackend`] together with its resolved input tensors and the
//! descriptors the type system inferred for its outputs; the backend returns
//! the produced tensors or a [`BackendError`] that the engine wraps and
//! surfaces without retrying.

use std::sync::Arc;

use thiserror::Error;

use crate::context::DeviceType;
use crate::operand::OperandDescriptor;
use crate::ops::Operator;

/// Dense tensor payload exchanged with kernel backends.
///
/// The byte buffer is shared, never mutated in place; backends produce fresh
/// payloads for their outputs.
#[derive(Debug, Clone)]
pub struct TensorValue {
    pub descriptor: OperandDescriptor,
    pub bytes: Arc<[u8]>,
}

impl TensorValue {
    pub fn new(descriptor: OperandDescriptor, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            descriptor,
            bytes: bytes.into(),
        }
    }

    pub fn byte_length(&self) -> usize {
        self.bytes.len()
    }
}

/// Failure reported by a kernel collaborator.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend does not provide a kernel for this operator.
    #[error("{op} is not implemented: {reason}")]
    Unimplemented { op: &'static str, reason: String },

    /// The kernel ran and failed.
    #[error("backend execution failure: {message}")]
    Execution { message: String },
}

impl BackendError {
    pub fn unimplemented(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::Unimplemented {
            op,
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }
}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Device-specific collaborator that evaluates single operator applications.
pub trait KernelBackend: Send + Sync {
    /// Returns a human-readable backend identifier (e.g., `"ref-cpu"`).
    fn name(&self) -> &str;

    /// Reports whether this backend can serve the given device type.
    fn supports(&self, device: DeviceType) -> bool {
        matches!(device, DeviceType::Cpu)
    }

    /// Evaluates one operator application.
    ///
    /// `inputs` follow the node's operand order (required inputs first, then
    /// any present operand-valued options); `outputs` are the descriptors the
    /// type system inferred, one per produced tensor, and the returned vector
    /// must match them in arity and byte length.
    fn evaluate(
        &self,
        op: &Operator,
        inputs: &[TensorValue],
        outputs: &[OperandDescriptor],
    ) -> BackendResult<Vec<TensorValue>>;
}
