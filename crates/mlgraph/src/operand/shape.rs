//! Lightweight wrapper for operand shapes and dimension bookkeeping.

use serde::{Deserialize, Serialize};

/// Stores the logical dimensions of an operand.
///
/// Dimensions are ordered outermost first; an empty dimension list denotes a
/// scalar with exactly one element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<u32>,
}

impl Shape {
    /// Constructs a new shape from the provided dimensions.
    pub fn new(dims: impl Into<Vec<u32>>) -> Self {
        Shape { dims: dims.into() }
    }

    /// The scalar shape (rank zero, one element).
    pub fn scalar() -> Self {
        Shape { dims: Vec::new() }
    }

    /// Borrow the raw dimension slice for downstream calculations.
    pub fn dims(&self) -> &[u32] {
        &self.dims
    }

    /// Returns the rank (number of axes) of the shape.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Computes the total number of elements, guarding against overflow.
    pub fn element_count(&self) -> Option<usize> {
        let mut count = 1usize;
        for &dim in &self.dims {
            count = count.checked_mul(dim as usize)?;
        }
        Some(count)
    }
}

impl From<Vec<u32>> for Shape {
    fn from(dims: Vec<u32>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[u32]> for Shape {
    fn from(dims: &[u32]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl<const N: usize> From<[u32; N]> for Shape {
    fn from(dims: [u32; N]) -> Self {
        Shape::new(dims.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_shape_has_one_element() {
        let shape = Shape::scalar();
        assert_eq!(shape.rank(), 0);
        assert_eq!(shape.element_count(), Some(1));
    }

    #[test]
    fn element_count_detects_overflow() {
        let shape = Shape::new([u32::MAX, u32::MAX, u32::MAX]);
        assert_eq!(shape.element_count(), None);
    }
}
