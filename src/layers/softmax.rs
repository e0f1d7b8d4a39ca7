//! Row-wise softmax layer.

use crate::backend::{CpuKernels, Kernels};
use crate::error::{NnError, NnResult};
use crate::tensor::Tensor;

/// Row-wise softmax with max subtraction.
///
/// In the default mode, `backward` treats a gradient shaped like the output
/// as already composed with the softmax derivative (the cross-entropy
/// `p - t` form) and passes it through unchanged. The Jacobian mode always
/// applies `J = diag(s) - s ⊗ s` per row, which is what any other loss
/// needs.
#[derive(Debug, Clone, Default)]
pub struct Softmax {
    jacobian: bool,
    last_output: Option<Tensor>,
}

impl Softmax {
    /// Softmax with the fused cross-entropy gradient shortcut.
    pub fn new() -> Self {
        Self {
            jacobian: false,
            last_output: None,
        }
    }

    /// Softmax that always back-propagates through the exact Jacobian.
    pub fn with_jacobian() -> Self {
        Self {
            jacobian: true,
            last_output: None,
        }
    }

    /// Returns `true` in Jacobian mode.
    pub fn uses_jacobian(&self) -> bool {
        self.jacobian
    }

    /// Output of the most recent forward pass.
    pub fn last_output(&self) -> Option<&Tensor> {
        self.last_output.as_ref()
    }

    /// Normalizes each row of a rank-2 `input` and caches the result.
    pub fn forward(&mut self, input: &Tensor) -> NnResult<Tensor> {
        if input.rank() != 2 {
            return Err(NnError::invalid_shape(format!(
                "softmax expects [batch, classes], got {:?}",
                input.shape()
            )));
        }
        let cols = input.cols();
        let mut output = Tensor::from_vec(input.shape().to_vec(), input.as_slice().to_vec())?;
        for row in output.as_mut_slice().chunks_mut(cols.max(1)) {
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0f32;
            for x in row.iter_mut() {
                *x = (*x - max).exp();
                sum += *x;
            }
            for x in row.iter_mut() {
                *x /= sum;
            }
        }
        self.last_output = Some(output.clone());
        Ok(output)
    }

    /// Back-propagates through the cached softmax output.
    ///
    /// # Errors
    ///
    /// - [`NnError::Precondition`] if called before `forward`.
    /// - [`NnError::ShapeMismatch`] if the batch sizes differ.
    /// - [`NnError::InvalidArgument`] if a gradient row cannot be multiplied
    ///   by the row Jacobian.
    pub fn backward(&mut self, grad_output: &Tensor) -> NnResult<Tensor> {
        let output = self
            .last_output
            .as_ref()
            .ok_or_else(|| NnError::precondition("Softmax::backward called before forward"))?;

        if !self.jacobian && grad_output.shape() == output.shape() {
            return Ok(grad_output.clone());
        }
        if grad_output.rank() != 2 || grad_output.rows() != output.rows() {
            return Err(NnError::shape_mismatch(output.shape(), grad_output.shape()));
        }

        let cols = output.cols();
        let mut grad_input = Vec::with_capacity(output.len());
        for i in 0..output.rows() {
            let s = output.row(i)?;
            let g = grad_output.row(i)?;
            let jacobian = Tensor::diag(&s)?.sub(&Tensor::outer(&s, &s)?)?;
            let mut row_grad = Tensor::new(vec![1, cols]);
            // J is symmetric, so g · J equals J · g.
            CpuKernels.matmul(&g, &jacobian, &mut row_grad)?;
            grad_input.extend_from_slice(row_grad.as_slice());
        }
        Tensor::from_vec(vec![output.rows(), cols], grad_input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_sum_to_one() {
        let mut layer = Softmax::new();
        let x = Tensor::from_vec(vec![2, 3], vec![1.0, 2.0, 3.0, 1000.0, 1000.0, -1000.0])
            .unwrap();
        let y = layer.forward(&x).unwrap();
        for i in 0..2 {
            let sum: f32 = y.row_slice(i).unwrap().iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
        assert!((y.get(1, 0).unwrap() - 0.5).abs() < 1e-6);
        assert!(y.as_slice().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_fused_shortcut_passes_through() {
        let mut layer = Softmax::new();
        layer.forward(&Tensor::new(vec![2, 3])).unwrap();
        let g = Tensor::from_vec(vec![2, 3], vec![0.1, -0.2, 0.1, 0.3, 0.0, -0.3]).unwrap();
        assert_eq!(layer.backward(&g).unwrap(), g);
    }

    #[test]
    fn test_jacobian_matches_finite_difference() {
        let x = Tensor::from_vec(vec![1, 3], vec![0.2, -0.4, 1.1]).unwrap();
        let g = Tensor::from_vec(vec![1, 3], vec![1.0, -2.0, 0.5]).unwrap();
        let mut layer = Softmax::with_jacobian();
        layer.forward(&x).unwrap();
        let analytic = layer.backward(&g).unwrap();

        // d/dx_k of sum_j g_j * softmax(x)_j
        let eps = 1e-3;
        for k in 0..3 {
            let objective = |delta: f32| {
                let mut xp = x.clone();
                xp.as_mut_slice()[k] += delta;
                let y = Softmax::new().forward(&xp).unwrap();
                y.as_slice()
                    .iter()
                    .zip(g.as_slice())
                    .map(|(a, b)| a * b)
                    .sum::<f32>()
            };
            let numeric = (objective(eps) - objective(-eps)) / (2.0 * eps);
            assert!(
                (analytic.as_slice()[k] - numeric).abs() < 1e-2,
                "k={k}: {} vs {numeric}",
                analytic.as_slice()[k]
            );
        }
    }

    #[test]
    fn test_jacobian_row_sums_vanish() {
        // A constant upstream gradient has zero projection through softmax.
        let mut layer = Softmax::with_jacobian();
        layer
            .forward(&Tensor::from_vec(vec![1, 4], vec![0.5, 1.0, -1.0, 2.0]).unwrap())
            .unwrap();
        let dx = layer.backward(&Tensor::filled(vec![1, 4], 1.0)).unwrap();
        assert!(dx.as_slice().iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_shortcut_falls_to_jacobian_on_shape_difference() {
        let mut layer = Softmax::new();
        layer.forward(&Tensor::new(vec![2, 3])).unwrap();
        // Different column count: the Jacobian product cannot be formed.
        assert!(matches!(
            layer.backward(&Tensor::new(vec![2, 2])),
            Err(NnError::InvalidArgument(_))
        ));
        assert!(matches!(
            layer.backward(&Tensor::new(vec![1, 3])),
            Err(NnError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_backward_before_forward() {
        assert!(Softmax::new().backward(&Tensor::new(vec![1, 2])).is_err());
    }
}
