//! Pointwise activation layer.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::backend::{CpuKernels, Kernels};
use crate::error::{NnError, NnResult};
use crate::tensor::Tensor;

/// Activation family.
///
/// `Softmax` only appears in configurations; it is built as a
/// [`Softmax`](super::Softmax) layer, never as an [`Activation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ActivationKind {
    /// `max(0, x)`.
    #[default]
    Relu,
    /// `1 / (1 + e^-x)`.
    Sigmoid,
    /// Row-wise normalization (separate layer).
    Softmax,
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActivationKind::Relu => "relu",
            ActivationKind::Sigmoid => "sigmoid",
            ActivationKind::Softmax => "softmax",
        })
    }
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Stateless pointwise activation with an analytic derivative.
#[derive(Debug, Clone)]
pub struct Activation {
    kind: ActivationKind,
    last_input: Option<Tensor>,
    last_output: Option<Tensor>,
}

impl Activation {
    /// Creates a ReLU or sigmoid layer.
    ///
    /// # Errors
    ///
    /// [`NnError::InvalidArgument`] for [`ActivationKind::Softmax`], which is a
    /// separate layer.
    pub fn new(kind: ActivationKind) -> NnResult<Self> {
        if kind == ActivationKind::Softmax {
            return Err(NnError::invalid_argument(
                "softmax is a separate layer, not a pointwise activation",
            ));
        }
        Ok(Self {
            kind,
            last_input: None,
            last_output: None,
        })
    }

    /// Activation family.
    pub fn kind(&self) -> ActivationKind {
        self.kind
    }

    /// Output of the most recent forward pass.
    pub fn last_output(&self) -> Option<&Tensor> {
        self.last_output.as_ref()
    }

    /// Applies the function element-wise and caches the input.
    pub fn forward(&mut self, input: &Tensor) -> NnResult<Tensor> {
        let mut output = Tensor::new(input.shape().to_vec());
        match self.kind {
            ActivationKind::Relu => CpuKernels.relu(input, &mut output)?,
            _ => {
                for (o, &x) in output.as_mut_slice().iter_mut().zip(input.as_slice()) {
                    *o = sigmoid(x);
                }
            }
        }
        self.last_input = Some(input.clone());
        self.last_output = Some(output.clone());
        Ok(output)
    }

    /// Returns `grad_output ⊙ f'(cached input)`.
    pub fn backward(&mut self, grad_output: &Tensor) -> NnResult<Tensor> {
        let input = self
            .last_input
            .as_ref()
            .ok_or_else(|| NnError::precondition("Activation::backward called before forward"))?;
        if grad_output.len() != input.len() {
            return Err(NnError::shape_mismatch(input.shape(), grad_output.shape()));
        }

        let derivative: fn(f32) -> f32 = match self.kind {
            ActivationKind::Relu => |x| if x > 0.0 { 1.0 } else { 0.0 },
            _ => |x| {
                let s = sigmoid(x);
                s * (1.0 - s)
            },
        };
        let data = grad_output
            .as_slice()
            .iter()
            .zip(input.as_slice())
            .map(|(&g, &x)| g * derivative(x))
            .collect();
        Tensor::from_vec(grad_output.shape().to_vec(), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_kind_rejected() {
        assert!(matches!(
            Activation::new(ActivationKind::Softmax),
            Err(NnError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_relu_forward_backward() {
        let mut layer = Activation::new(ActivationKind::Relu).unwrap();
        let x = Tensor::from_vec(vec![1, 4], vec![-1.0, 0.0, 0.5, 2.0]).unwrap();
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.as_slice(), &[0.0, 0.0, 0.5, 2.0]);

        let g = Tensor::filled(vec![1, 4], 3.0);
        let dx = layer.backward(&g).unwrap();
        assert_eq!(dx.as_slice(), &[0.0, 0.0, 3.0, 3.0]);
    }

    #[test]
    fn test_sigmoid_forward_backward() {
        let mut layer = Activation::new(ActivationKind::Sigmoid).unwrap();
        let x = Tensor::from_vec(vec![1, 2], vec![0.0, 2.0]).unwrap();
        let y = layer.forward(&x).unwrap();
        assert!((y.as_slice()[0] - 0.5).abs() < 1e-6);

        let dx = layer.backward(&Tensor::filled(vec![1, 2], 1.0)).unwrap();
        assert!((dx.as_slice()[0] - 0.25).abs() < 1e-6);
        let s = sigmoid(2.0);
        assert!((dx.as_slice()[1] - s * (1.0 - s)).abs() < 1e-6);
    }

    #[test]
    fn test_backward_before_forward() {
        let mut layer = Activation::new(ActivationKind::Relu).unwrap();
        assert!(matches!(
            layer.backward(&Tensor::new(vec![1, 1])),
            Err(NnError::Precondition(_))
        ));
    }

    #[test]
    fn test_backward_size_mismatch() {
        let mut layer = Activation::new(ActivationKind::Sigmoid).unwrap();
        layer.forward(&Tensor::new(vec![2, 2])).unwrap();
        assert!(layer.backward(&Tensor::new(vec![2, 3])).is_err());
    }
}
