//! Network layers.
//!
//! [`Layer`] is a closed set of variants sharing a forward/backward/update
//! contract:
//!
//! | Variant | Parameters | Notes |
//! |---------|-----------|-------|
//! | [`Dense`] | weights `[in, out]`, biases `[1, out]` | backend selection with CPU fallback |
//! | [`Activation`] | none | ReLU or sigmoid, derivative from cached input |
//! | [`Softmax`] | none | row-wise, fused cross-entropy gradient shortcut |
//!
//! `forward` caches what `backward` needs, so calls must alternate
//! forward → backward on the same batch.

mod activation;
mod dense;
mod softmax;

pub use activation::{Activation, ActivationKind};
pub use dense::{BackendState, Dense};
pub use softmax::Softmax;

use std::fmt;
use std::sync::Arc;

use crate::backend::{Backend, Kernels};
use crate::error::NnResult;
use crate::optimizer::Optimizer;
use crate::tensor::Tensor;

/// Discriminant of a [`Layer`], for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// Fully-connected affine layer.
    Dense,
    /// Pointwise activation.
    Activation(ActivationKind),
    /// Row-wise softmax.
    Softmax,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::Dense => f.write_str("Dense"),
            LayerKind::Activation(kind) => write!(f, "Activation({kind})"),
            LayerKind::Softmax => f.write_str("Softmax"),
        }
    }
}

/// One layer of a [`Model`](crate::Model).
#[derive(Debug)]
pub enum Layer {
    /// Learnable affine transform.
    Dense(Dense),
    /// Stateless pointwise function.
    Activation(Activation),
    /// Row-wise normalization.
    Softmax(Softmax),
}

impl Layer {
    /// Runs the layer on `input` and caches what `backward` needs.
    pub fn forward(&mut self, input: &Tensor) -> NnResult<Tensor> {
        match self {
            Layer::Dense(l) => l.forward(input),
            Layer::Activation(l) => l.forward(input),
            Layer::Softmax(l) => l.forward(input),
        }
    }

    /// Propagates `grad_output` to the layer input, filling gradient caches.
    pub fn backward(&mut self, grad_output: &Tensor) -> NnResult<Tensor> {
        match self {
            Layer::Dense(l) => l.backward(grad_output),
            Layer::Activation(l) => l.backward(grad_output),
            Layer::Softmax(l) => l.backward(grad_output),
        }
    }

    /// Applies the optimizer to the layer's parameters; no-op without any.
    pub fn update(&mut self, optimizer: &mut dyn Optimizer) -> NnResult<()> {
        match self {
            Layer::Dense(l) => l.update(optimizer),
            Layer::Activation(_) | Layer::Softmax(_) => Ok(()),
        }
    }

    /// Layer discriminant.
    pub fn kind(&self) -> LayerKind {
        match self {
            Layer::Dense(_) => LayerKind::Dense,
            Layer::Activation(l) => LayerKind::Activation(l.kind()),
            Layer::Softmax(_) => LayerKind::Softmax,
        }
    }

    /// Borrows the Dense layer, if this is one.
    pub fn as_dense(&self) -> Option<&Dense> {
        match self {
            Layer::Dense(l) => Some(l),
            _ => None,
        }
    }

    /// Mutably borrows the Dense layer, if this is one.
    pub fn as_dense_mut(&mut self) -> Option<&mut Dense> {
        match self {
            Layer::Dense(l) => Some(l),
            _ => None,
        }
    }

    /// Number of learnable scalars.
    pub fn param_count(&self) -> usize {
        self.as_dense().map_or(0, Dense::param_count)
    }

    /// Output of the most recent forward pass.
    pub fn last_output(&self) -> Option<&Tensor> {
        match self {
            Layer::Dense(l) => l.last_output(),
            Layer::Activation(l) => l.last_output(),
            Layer::Softmax(l) => l.last_output(),
        }
    }

    pub(crate) fn set_backend(&mut self, backend: Backend) {
        if let Layer::Dense(l) = self {
            l.set_backend(backend);
        }
    }

    pub(crate) fn set_accelerator(&mut self, kernels: Arc<dyn Kernels>) {
        if let Layer::Dense(l) = self {
            l.set_accelerator(kernels);
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Dense(l) => write!(
                f,
                "Dense({} -> {}, {:?})",
                l.in_features(),
                l.out_features(),
                l.backend_state()
            ),
            other => write!(f, "{}", other.kind()),
        }
    }
}

impl From<Dense> for Layer {
    fn from(layer: Dense) -> Self {
        Layer::Dense(layer)
    }
}

impl From<Activation> for Layer {
    fn from(layer: Activation) -> Self {
        Layer::Activation(layer)
    }
}

impl From<Softmax> for Layer {
    fn from(layer: Softmax) -> Self {
        Layer::Softmax(layer)
    }
}
