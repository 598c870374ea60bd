//! Operand handles and the dtype/shape contracts they carry.
//!
//! An [`Operand`] is an immutable handle to one tensor value flowing through a
//! builder's graph. It records the [`OperandDescriptor`] fixed at creation and
//! the identity of the builder that owns it, so that a handle captured from
//! one builder cannot be smuggled into another.

mod dtype;
mod shape;

pub use dtype::DataType;
pub use shape::Shape;

use serde::{Deserialize, Serialize};

/// Index of an operand within its owning builder (and later, its graph slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperandId(pub u32);

/// Dtype/shape contract describing one operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperandDescriptor {
    pub data_type: DataType,
    pub shape: Shape,
}

impl OperandDescriptor {
    pub fn new(data_type: DataType, shape: impl Into<Shape>) -> Self {
        Self {
            data_type,
            shape: shape.into(),
        }
    }

    /// Returns total element count when the product does not overflow.
    pub fn element_count(&self) -> Option<usize> {
        self.shape.element_count()
    }

    /// Returns the total byte length implied by the contract.
    pub fn byte_length(&self) -> Option<usize> {
        self.element_count()?
            .checked_mul(self.data_type.size_in_bytes())
    }
}

/// Immutable handle to one tensor value within a builder's graph.
///
/// Cloning an operand clones the handle, never the value; dtype and shape are
/// fixed at creation and never mutated.
#[derive(Debug, Clone)]
pub struct Operand {
    pub(crate) builder_id: u64,
    pub(crate) id: OperandId,
    pub(crate) descriptor: OperandDescriptor,
}

impl Operand {
    /// Returns the scalar element type of the value this handle refers to.
    pub fn data_type(&self) -> DataType {
        self.descriptor.data_type
    }

    /// Returns the dimensions of the value this handle refers to.
    pub fn shape(&self) -> &[u32] {
        self.descriptor.shape.dims()
    }

    /// Borrows the full dtype/shape contract.
    pub fn descriptor(&self) -> &OperandDescriptor {
        &self.descriptor
    }
}
