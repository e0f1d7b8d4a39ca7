//! Loss functions.
//!
//! - [`Loss::MeanSquaredError`] - `mean((pred - target)^2)` for regression
//! - [`Loss::CrossEntropy`] - negative log-likelihood of probability outputs
//!
//! # Target encodings
//!
//! Cross-entropy accepts two target layouts for a `[batch, classes]`
//! prediction:
//!
//! - **one-hot**: `[batch, classes]`, a single `1.0` per row
//! - **class index**: `[batch, 1]`, each row holds the class as a float
//!
//! Both give the same loss and gradient for the same labels.
//!
//! # Example
//!
//! ```rust
//! use nnkit::{Loss, Tensor};
//!
//! let pred = Tensor::from_vec(vec![1, 3], vec![0.7, 0.2, 0.1])?;
//! let one_hot = Tensor::from_vec(vec![1, 3], vec![1.0, 0.0, 0.0])?;
//! let index = Tensor::from_vec(vec![1, 1], vec![0.0])?;
//!
//! let a = Loss::CrossEntropy.forward(&pred, &one_hot)?;
//! let b = Loss::CrossEntropy.forward(&pred, &index)?;
//! assert!((a - b).abs() < 1e-6);
//! # Ok::<(), nnkit::NnError>(())
//! ```

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{NnError, NnResult};
use crate::tensor::Tensor;

/// Lower clamp applied to probabilities before taking the log.
pub const PROB_FLOOR: f32 = 1e-9;

/// Scalar training objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Loss {
    /// Mean squared error over every element.
    MeanSquaredError,
    /// Cross-entropy over softmax probabilities.
    ///
    /// The gradient is `(p - t) / rows`, i.e. already composed with the
    /// softmax derivative; pair it with [`Softmax::new`](crate::layers::Softmax::new).
    CrossEntropy,
}

/// How cross-entropy targets are laid out relative to the prediction.
enum Targets {
    OneHot,
    ClassIndex,
}

impl Loss {
    /// Short name used in summaries.
    pub fn name(&self) -> &'static str {
        match self {
            Loss::MeanSquaredError => "mse",
            Loss::CrossEntropy => "cross_entropy",
        }
    }

    /// Computes the scalar loss.
    ///
    /// # Errors
    ///
    /// - MSE: [`NnError::ShapeMismatch`] if shapes differ.
    /// - Cross-entropy: [`NnError::InvalidArgument`] for a target layout that
    ///   is neither one-hot nor class index, or a class index outside
    ///   `0..classes`.
    pub fn forward(&self, pred: &Tensor, target: &Tensor) -> NnResult<f32> {
        match self {
            Loss::MeanSquaredError => {
                check_same_shape(pred, target)?;
                let n = pred.len();
                if n == 0 {
                    return Ok(0.0);
                }
                let sum: f32 = pred
                    .as_slice()
                    .iter()
                    .zip(target.as_slice())
                    .map(|(p, t)| (p - t) * (p - t))
                    .sum();
                Ok(sum / n as f32)
            }
            Loss::CrossEntropy => {
                let rows = pred.rows();
                if rows == 0 {
                    return Ok(0.0);
                }
                let mut loss = 0.0f32;
                match classify_targets(pred, target)? {
                    Targets::OneHot => {
                        for (&p, &t) in pred.as_slice().iter().zip(target.as_slice()) {
                            if t != 0.0 {
                                loss -= t * p.max(PROB_FLOOR).ln();
                            }
                        }
                    }
                    Targets::ClassIndex => {
                        let cols = pred.cols();
                        for i in 0..rows {
                            let c = class_index(target.as_slice()[i], cols)?;
                            loss -= pred.as_slice()[i * cols + c].max(PROB_FLOOR).ln();
                        }
                    }
                }
                Ok(loss / rows as f32)
            }
        }
    }

    /// Computes the gradient of the loss with respect to `pred`.
    ///
    /// # Errors
    ///
    /// Same conditions as [`forward`](Self::forward).
    pub fn backward(&self, pred: &Tensor, target: &Tensor) -> NnResult<Tensor> {
        match self {
            Loss::MeanSquaredError => {
                check_same_shape(pred, target)?;
                let n = pred.len() as f32;
                let data = pred
                    .as_slice()
                    .iter()
                    .zip(target.as_slice())
                    .map(|(p, t)| 2.0 * (p - t) / n)
                    .collect();
                Tensor::from_vec(pred.shape().to_vec(), data)
            }
            Loss::CrossEntropy => {
                let rows = pred.rows() as f32;
                match classify_targets(pred, target)? {
                    Targets::OneHot => {
                        let data = pred
                            .as_slice()
                            .iter()
                            .zip(target.as_slice())
                            .map(|(p, t)| (p - t) / rows)
                            .collect();
                        Tensor::from_vec(pred.shape().to_vec(), data)
                    }
                    Targets::ClassIndex => {
                        let cols = pred.cols();
                        let mut grad = pred.scale(1.0 / rows);
                        for i in 0..pred.rows() {
                            let c = class_index(target.as_slice()[i], cols)?;
                            let g = &mut grad.as_mut_slice()[i * cols + c];
                            *g = (pred.as_slice()[i * cols + c] - 1.0) / rows;
                        }
                        Ok(grad)
                    }
                }
            }
        }
    }
}

fn check_same_shape(pred: &Tensor, target: &Tensor) -> NnResult<()> {
    if pred.shape() != target.shape() {
        return Err(NnError::shape_mismatch(pred.shape(), target.shape()));
    }
    Ok(())
}

fn classify_targets(pred: &Tensor, target: &Tensor) -> NnResult<Targets> {
    if pred.rank() != 2 || target.rank() != 2 || pred.rows() != target.rows() {
        return Err(NnError::invalid_argument(format!(
            "cross-entropy needs rank-2 tensors with equal rows, got {:?} and {:?}",
            pred.shape(),
            target.shape()
        )));
    }
    if pred.shape() == target.shape() {
        Ok(Targets::OneHot)
    } else if target.cols() == 1 {
        Ok(Targets::ClassIndex)
    } else {
        Err(NnError::invalid_argument(format!(
            "incompatible cross-entropy target shape {:?} for prediction {:?}",
            target.shape(),
            pred.shape()
        )))
    }
}

fn class_index(value: f32, classes: usize) -> NnResult<usize> {
    if value >= 0.0 && value.fract() == 0.0 && (value as usize) < classes {
        Ok(value as usize)
    } else {
        Err(NnError::invalid_argument(format!(
            "class index {value} outside 0..{classes}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(shape: Vec<usize>, data: Vec<f32>) -> Tensor {
        Tensor::from_vec(shape, data).unwrap()
    }

    #[test]
    fn test_mse() {
        let pred = t(vec![1, 3], vec![1.0, 2.0, 3.0]);
        let target = t(vec![1, 3], vec![1.0, 1.0, 1.0]);
        let loss = Loss::MeanSquaredError.forward(&pred, &target).unwrap();
        assert!((loss - 5.0 / 3.0).abs() < 1e-6);

        let grad = Loss::MeanSquaredError.backward(&pred, &target).unwrap();
        let expected = [0.0, 2.0 / 3.0, 4.0 / 3.0];
        for (g, e) in grad.as_slice().iter().zip(expected) {
            assert!((g - e).abs() < 1e-6);
        }
    }

    #[test]
    fn test_mse_shape_mismatch() {
        let err = Loss::MeanSquaredError
            .forward(&Tensor::new(vec![2, 2]), &Tensor::new(vec![4, 1]))
            .unwrap_err();
        assert!(matches!(err, NnError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_cross_entropy_one_hot() {
        let pred = t(vec![2, 2], vec![0.8, 0.2, 0.4, 0.6]);
        let target = t(vec![2, 2], vec![1.0, 0.0, 0.0, 1.0]);
        let loss = Loss::CrossEntropy.forward(&pred, &target).unwrap();
        let expected = -(0.8f32.ln() + 0.6f32.ln()) / 2.0;
        assert!((loss - expected).abs() < 1e-6);

        let grad = Loss::CrossEntropy.backward(&pred, &target).unwrap();
        assert!((grad.as_slice()[0] - (-0.1)).abs() < 1e-6);
        assert!((grad.as_slice()[1] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_cross_entropy_clamps_zero_probability() {
        let pred = t(vec![1, 2], vec![0.0, 1.0]);
        let target = t(vec![1, 2], vec![1.0, 0.0]);
        let loss = Loss::CrossEntropy.forward(&pred, &target).unwrap();
        assert!(loss.is_finite());
        assert!((loss + PROB_FLOOR.ln()).abs() < 1e-3);
    }

    #[test]
    fn test_cross_entropy_bad_shapes() {
        let pred = Tensor::new(vec![2, 3]);
        assert!(matches!(
            Loss::CrossEntropy.forward(&pred, &Tensor::new(vec![2, 2])),
            Err(NnError::InvalidArgument(_))
        ));
        assert!(Loss::CrossEntropy.backward(&pred, &Tensor::new(vec![3, 1])).is_err());
    }

    #[test]
    fn test_class_index_out_of_range() {
        let pred = t(vec![1, 2], vec![0.5, 0.5]);
        assert!(Loss::CrossEntropy.forward(&pred, &t(vec![1, 1], vec![2.0])).is_err());
        assert!(Loss::CrossEntropy.forward(&pred, &t(vec![1, 1], vec![-1.0])).is_err());
        assert!(Loss::CrossEntropy.forward(&pred, &t(vec![1, 1], vec![0.5])).is_err());
    }
}
