//! Sequential model: layers plus one loss and one optimizer.
//!
//! # Lifecycle
//!
//! | State | Reached by | Allows |
//! |-------|-----------|--------|
//! | `Uninitialized` | [`Model::new`] | `add`, `compile` |
//! | `Built` | at least one `add` | `forward`, `backward` |
//! | `Compiled` | `compile` without layers | nothing useful until layers are added |
//! | `Ready` | `compile` with layers | `train_step`, `evaluate` |
//!
//! `train_step` and `evaluate` fail with [`NnError::Precondition`] until the
//! model has been compiled.
//!
//! # Example
//!
//! ```rust
//! use nnkit::{Activation, ActivationKind, Dense, Loss, Model, Softmax, Sgd, Tensor};
//!
//! let mut model = Model::new();
//! model.add(Dense::new(2, 3));
//! model.add(Activation::new(ActivationKind::Relu)?);
//! model.add(Dense::new(3, 2));
//! model.add(Softmax::new());
//! model.compile(Loss::CrossEntropy, Box::new(Sgd::new(0.1)));
//!
//! let x = Tensor::from_vec(vec![2, 2], vec![0.0, 1.0, 1.0, 0.0])?;
//! let y = Tensor::from_vec(vec![2, 2], vec![1.0, 0.0, 0.0, 1.0])?;
//! let loss = model.train_step(&x, &y)?;
//! assert!(loss.is_finite());
//! # Ok::<(), nnkit::NnError>(())
//! ```

use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

use log::debug;

use crate::backend::{Backend, Kernels};
use crate::error::{NnError, NnResult};
use crate::layers::Layer;
use crate::loss::Loss;
use crate::optimizer::Optimizer;
use crate::tensor::Tensor;

/// Lifecycle state of a [`Model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    /// No layers, not compiled.
    Uninitialized,
    /// Layers present, not compiled.
    Built,
    /// Compiled, no layers yet.
    Compiled,
    /// Compiled with layers; trainable.
    Ready,
}

/// Loss and accuracy over one evaluated batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Mean loss.
    pub loss: f32,
    /// Fraction of rows whose argmax matches the target class, in `[0, 1]`.
    pub accuracy: f32,
}

#[derive(Debug)]
struct Compiled {
    loss: Loss,
    optimizer: Box<dyn Optimizer>,
}

/// Ordered stack of layers trained with one loss and one optimizer.
#[derive(Debug, Default)]
pub struct Model {
    layers: Vec<Layer>,
    compiled: Option<Compiled>,
    backend: Backend,
    accelerator: Option<Arc<dyn Kernels>>,
}

impl Model {
    /// Creates an empty model on the CPU backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `kernels` as the accelerator for every current and future Dense layer.
    ///
    /// Only takes effect for layers whose backend is [`Backend::Accelerator`].
    pub fn with_accelerator(mut self, kernels: Arc<dyn Kernels>) -> Self {
        self.set_accelerator(kernels);
        self
    }

    /// See [`with_accelerator`](Self::with_accelerator).
    pub fn set_accelerator(&mut self, kernels: Arc<dyn Kernels>) {
        for layer in &mut self.layers {
            layer.set_accelerator(Arc::clone(&kernels));
        }
        self.accelerator = Some(kernels);
    }

    /// Appends a layer. Shapes are not validated until the first forward pass.
    ///
    /// Dense layers inherit the model's backend and accelerator.
    pub fn add(&mut self, layer: impl Into<Layer>) {
        let mut layer = layer.into();
        if let Some(acc) = &self.accelerator {
            layer.set_accelerator(Arc::clone(acc));
        }
        if self.backend != Backend::Cpu {
            layer.set_backend(self.backend);
        }
        self.layers.push(layer);
    }

    /// Sets the loss and optimizer, replacing any previous ones.
    pub fn compile(&mut self, loss: Loss, optimizer: Box<dyn Optimizer>) {
        debug!(
            "compiling model: {} layers, loss {}, optimizer {} (lr {})",
            self.layers.len(),
            loss.name(),
            optimizer.name(),
            optimizer.learning_rate()
        );
        self.compiled = Some(Compiled { loss, optimizer });
    }

    /// Requests `backend` for every Dense layer.
    ///
    /// Layers that already fell back to the CPU stay there.
    pub fn set_backend(&mut self, backend: Backend) {
        self.backend = backend;
        for layer in &mut self.layers {
            layer.set_backend(backend);
        }
    }

    /// Backend last requested with [`set_backend`](Self::set_backend).
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ModelState {
        match (self.layers.is_empty(), self.compiled.is_some()) {
            (true, false) => ModelState::Uninitialized,
            (false, false) => ModelState::Built,
            (true, true) => ModelState::Compiled,
            (false, true) => ModelState::Ready,
        }
    }

    /// Returns `true` once [`compile`](Self::compile) has been called.
    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Layers in forward order.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Mutable access to the layers, e.g. to overwrite weights.
    pub fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    /// Loss selected at compile time.
    pub fn loss(&self) -> Option<Loss> {
        self.compiled.as_ref().map(|c| c.loss)
    }

    /// Optimizer selected at compile time.
    pub fn optimizer(&self) -> Option<&dyn Optimizer> {
        self.compiled.as_ref().map(|c| c.optimizer.as_ref())
    }

    /// Changes the optimizer's learning rate.
    pub fn set_learning_rate(&mut self, lr: f32) -> NnResult<()> {
        let compiled = self.compiled_mut()?;
        compiled.optimizer.set_learning_rate(lr);
        Ok(())
    }

    /// Total learnable scalars.
    pub fn param_count(&self) -> usize {
        self.layers.iter().map(Layer::param_count).sum()
    }

    /// One line per layer, followed by the parameter total.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for (i, layer) in self.layers.iter().enumerate() {
            let _ = writeln!(out, "{i:>3}: {layer} [{} params]", layer.param_count());
        }
        let _ = write!(out, "total params: {}", self.param_count());
        out
    }

    /// Runs every layer in order.
    pub fn forward(&mut self, input: &Tensor) -> NnResult<Tensor> {
        let mut current = input.clone();
        for layer in &mut self.layers {
            current = layer.forward(&current)?;
        }
        Ok(current)
    }

    /// Runs every layer's backward pass in reverse order.
    pub fn backward(&mut self, grad: &Tensor) -> NnResult<Tensor> {
        let mut current = grad.clone();
        for layer in self.layers.iter_mut().rev() {
            current = layer.backward(&current)?;
        }
        Ok(current)
    }

    /// One optimization step on `(x, y)`; returns the loss before the update.
    ///
    /// Any failure abandons the whole step: if an update fails part-way,
    /// every Dense layer gets back the parameters it had before the step.
    /// State kept inside the optimizer itself is not rolled back.
    pub fn train_step(&mut self, x: &Tensor, y: &Tensor) -> NnResult<f32> {
        let loss_fn = self.compiled_ref()?.loss;

        let prediction = self.forward(x)?;
        let loss = loss_fn.forward(&prediction, y)?;
        let grad = loss_fn.backward(&prediction, y)?;
        self.backward(&grad)?;

        let Some(compiled) = self.compiled.as_mut() else {
            return Err(not_compiled());
        };
        let snapshot = ParamSnapshot::capture(&self.layers)?;
        for layer in &mut self.layers {
            if let Err(err) = layer.update(compiled.optimizer.as_mut()) {
                snapshot.restore(&mut self.layers);
                return Err(err);
            }
        }
        Ok(loss)
    }

    /// Computes loss and argmax accuracy without updating parameters.
    ///
    /// Targets may be one-hot (same shape as the prediction) or class
    /// indices (`[batch, 1]`).
    pub fn evaluate(&mut self, x: &Tensor, y: &Tensor) -> NnResult<Evaluation> {
        let loss_fn = self.compiled_ref()?.loss;
        if x.rows() == 0 {
            return Err(NnError::precondition("cannot evaluate an empty batch"));
        }

        let prediction = self.forward(x)?;
        let loss = loss_fn.forward(&prediction, y)?;

        if prediction.rank() != 2 || y.rank() != 2 || y.rows() != prediction.rows() {
            return Err(NnError::shape_mismatch(prediction.shape(), y.shape()));
        }
        let one_hot = y.shape() == prediction.shape();
        if !one_hot && y.cols() != 1 {
            return Err(NnError::invalid_argument(format!(
                "targets {:?} are neither one-hot nor class indices for prediction {:?}",
                y.shape(),
                prediction.shape()
            )));
        }

        let mut correct = 0usize;
        for i in 0..prediction.rows() {
            let predicted = prediction.argmax_row(i)?;
            let actual = if one_hot {
                y.argmax_row(i)?
            } else {
                y.get(i, 0)? as usize
            };
            if predicted == actual {
                correct += 1;
            }
        }
        Ok(Evaluation {
            loss,
            accuracy: correct as f32 / prediction.rows() as f32,
        })
    }

    fn compiled_ref(&self) -> NnResult<&Compiled> {
        self.compiled.as_ref().ok_or_else(not_compiled)
    }

    fn compiled_mut(&mut self) -> NnResult<&mut Compiled> {
        self.compiled.as_mut().ok_or_else(not_compiled)
    }
}

/// Host copies of every Dense layer's weights and biases, in layer order.
struct ParamSnapshot {
    params: Vec<Option<(Tensor, Tensor)>>,
}

impl ParamSnapshot {
    fn capture(layers: &[Layer]) -> NnResult<Self> {
        let params = layers
            .iter()
            .map(|layer| {
                layer
                    .as_dense()
                    .map(|d| -> NnResult<(Tensor, Tensor)> {
                        Ok((host_copy(d.weights())?, host_copy(d.biases())?))
                    })
                    .transpose()
            })
            .collect::<NnResult<Vec<_>>>()?;
        Ok(Self { params })
    }

    /// Puts the captured values back. Device mirrors are dropped and
    /// re-staged on the next accelerated pass.
    fn restore(self, layers: &mut [Layer]) {
        for (layer, saved) in layers.iter_mut().zip(self.params) {
            if let (Some(dense), Some((weights, biases))) = (layer.as_dense_mut(), saved) {
                *dense.weights_mut() = weights;
                *dense.biases_mut() = biases;
            }
        }
    }
}

fn host_copy(t: &Tensor) -> NnResult<Tensor> {
    Tensor::from_vec(t.shape().to_vec(), t.as_slice().to_vec())
}

fn not_compiled() -> NnError {
    NnError::precondition("model must be compiled before training or evaluation")
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
