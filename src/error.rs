//! Unified error types for nnkit.
//!
//! This module provides [`NnError`], the single error type returned by tensor
//! operations, backend kernels, layers, losses, optimizers and the model. It
//! uses the `thiserror` crate for ergonomic error handling.
//!
//! # Example
//!
//! ```rust
//! use nnkit::NnError;
//!
//! fn validate_shape(expected: &[usize], got: &[usize]) -> Result<(), NnError> {
//!     if expected != got {
//!         return Err(NnError::shape_mismatch(expected, got));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Recovery policy
//!
//! Only the accelerator variants ([`NnError::AcceleratorUnavailable`] and
//! [`NnError::AcceleratorExecution`]) are ever recovered inside the crate: a
//! [`Dense`](crate::layers::Dense) layer that sees one of them downgrades
//! itself to the CPU backend. Everything else propagates to the caller.

use thiserror::Error;

use crate::config::ConfigError;

/// Unified error type for nnkit operations.
#[derive(Error, Debug)]
pub enum NnError {
    /// Two shapes that must agree do not.
    ///
    /// Raised by element-wise operations, reshape, losses and layer
    /// preconditions.
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected tensor shape.
        expected: Vec<usize>,
        /// Actual tensor shape received.
        got: Vec<usize>,
    },

    /// The operation is not defined for a tensor of this rank or layout.
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    /// Element access beyond the tensor bounds.
    #[error("Index ({row}, {col}) out of range for {rows}x{cols} tensor")]
    OutOfRange {
        /// Requested row.
        row: usize,
        /// Requested column.
        col: usize,
        /// Number of rows of the tensor.
        rows: usize,
        /// Number of columns of the tensor.
        cols: usize,
    },

    /// A kernel or constructor received arguments violating its contract.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Device support is missing from this build or no device could be opened.
    #[error("Accelerator unavailable: {0}")]
    AcceleratorUnavailable(String),

    /// The accelerator failed while allocating, transferring or executing.
    #[error("Accelerator execution failed: {0}")]
    AcceleratorExecution(String),

    /// The model or training loop was used out of order.
    ///
    /// Typical causes: training before [`Model::compile`](crate::Model::compile),
    /// or a batch size larger than the dataset.
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for nnkit operations.
pub type NnResult<T> = Result<T, NnError>;

impl NnError {
    /// Creates a shape mismatch error.
    pub fn shape_mismatch(expected: &[usize], got: &[usize]) -> Self {
        NnError::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    /// Creates an invalid shape error.
    pub fn invalid_shape<S: Into<String>>(msg: S) -> Self {
        NnError::InvalidShape(msg.into())
    }

    /// Creates an out of range error.
    pub fn out_of_range(row: usize, col: usize, rows: usize, cols: usize) -> Self {
        NnError::OutOfRange {
            row,
            col,
            rows,
            cols,
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        NnError::InvalidArgument(msg.into())
    }

    /// Creates an accelerator unavailable error.
    pub fn accelerator_unavailable<S: Into<String>>(msg: S) -> Self {
        NnError::AcceleratorUnavailable(msg.into())
    }

    /// Creates an accelerator execution error.
    pub fn accelerator_execution<S: Into<String>>(msg: S) -> Self {
        NnError::AcceleratorExecution(msg.into())
    }

    /// Creates a precondition error.
    pub fn precondition<S: Into<String>>(msg: S) -> Self {
        NnError::Precondition(msg.into())
    }

    /// Returns `true` for errors a Dense layer recovers from by falling back
    /// to the CPU backend.
    pub fn is_accelerator_failure(&self) -> bool {
        matches!(
            self,
            NnError::AcceleratorUnavailable(_) | NnError::AcceleratorExecution(_)
        )
    }

    /// Returns `true` for any dimension-related failure.
    ///
    /// Kernels report their shape preconditions as [`NnError::InvalidArgument`],
    /// tensor operations as [`NnError::ShapeMismatch`] or [`NnError::InvalidShape`].
    pub fn is_shape_error(&self) -> bool {
        matches!(
            self,
            NnError::ShapeMismatch { .. } | NnError::InvalidShape(_) | NnError::InvalidArgument(_)
        )
    }
}
